// Prompt text for resume and cover-letter generation.

use std::fmt::Write;

use super::{ApplicantContext, PostingContext, ResumeContext};
use crate::models::UserProfile;

pub const RESUME_SYSTEM: &str = "You are an experienced technical recruiter writing resumes \
    for the Kazakhstan job market. You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences.";

pub const COVER_LETTER_SYSTEM: &str = "You write short, specific cover letters for job \
    applications. Respond with the letter text only, without a subject line, \
    greeting placeholders or signature placeholders.";

const RESUME_SHAPE: &str = r#"{
  "title": "desired position",
  "skills": ["skill", "..."],
  "experience": [
    {"company": "", "position": "", "description": "", "start": "YYYY-MM-DD", "end": "YYYY-MM-DD or null"}
  ],
  "education": {"level": "higher", "name": "", "organization": "", "year": 2020}
}"#;

fn posting_section(out: &mut String, posting: &PostingContext) {
    let _ = writeln!(out, "Position: {}", posting.title);
    let _ = writeln!(out, "Company: {}", posting.company);
    let _ = writeln!(out, "Description: {}", posting.description);
    if let Some(requirements) = posting.requirements.as_deref().filter(|s| !s.is_empty()) {
        let _ = writeln!(out, "Requirements: {requirements}");
    }
    if let Some(responsibilities) = posting.responsibilities.as_deref().filter(|s| !s.is_empty()) {
        let _ = writeln!(out, "Responsibilities: {responsibilities}");
    }
    if !posting.skills.is_empty() {
        let _ = writeln!(out, "Key skills: {}", posting.skills.join(", "));
    }
}

pub fn resume_prompt(
    posting: &PostingContext,
    applicant: &ApplicantContext,
    profile: Option<&UserProfile>,
) -> String {
    let mut out = String::from("Write a resume tailored to this job posting.\n\n");
    posting_section(&mut out, posting);

    let _ = writeln!(
        out,
        "\nCandidate: {} {} <{}>",
        applicant.first_name, applicant.last_name, applicant.email
    );

    match profile {
        Some(profile) if !profile.experience.is_empty() => {
            out.push_str("\nThe candidate's real work history. Keep companies and dates, ");
            out.push_str("rewrite descriptions to emphasise what matters for this posting:\n");
            for entry in &profile.experience {
                let _ = writeln!(
                    out,
                    "- {} at {} ({} to {}): {}",
                    entry.position,
                    entry.company,
                    entry.start,
                    entry.end.as_deref().unwrap_or("present"),
                    entry.description
                );
            }
        }
        _ => out.push_str(
            "\nThe candidate has not provided work history. Produce one or two plausible \
             entries consistent with the posting's seniority.\n",
        ),
    }

    if let Some(education) = profile.and_then(|profile| profile.education.as_ref()) {
        let _ = writeln!(
            out,
            "\nEducation (use as is): {} {}, {}, {}",
            education.level, education.name, education.organization, education.year
        );
    }

    out.push_str("\nRespond with a JSON object of exactly this shape:\n");
    out.push_str(RESUME_SHAPE);
    out
}

pub fn cover_letter_prompt(
    posting: &PostingContext,
    applicant: &ApplicantContext,
    resume: &ResumeContext,
) -> String {
    let mut out = String::from("Write a cover letter of at most 150 words for this posting.\n\n");
    posting_section(&mut out, posting);

    let _ = writeln!(
        out,
        "\nCandidate: {} {}",
        applicant.first_name, applicant.last_name
    );
    if !resume.skills.is_empty() {
        let _ = writeln!(out, "Candidate skills: {}", resume.skills.join(", "));
    }
    for entry in resume.experience.iter().take(3) {
        let _ = writeln!(out, "- {} at {}", entry.position, entry.company);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Education, Experience};

    fn posting() -> PostingContext {
        PostingContext {
            title: "Backend Developer".into(),
            company: "Kaspi.kz".into(),
            description: "Payments platform".into(),
            requirements: Some("3+ years of Go".into()),
            responsibilities: None,
            skills: vec!["Go".into(), "PostgreSQL".into()],
        }
    }

    fn applicant() -> ApplicantContext {
        ApplicantContext {
            first_name: "Aigerim".into(),
            last_name: "Saparova".into(),
            email: "aigerim@example.kz".into(),
        }
    }

    #[test]
    fn resume_prompt_without_profile_asks_for_synthesised_history() {
        let prompt = resume_prompt(&posting(), &applicant(), None);
        assert!(prompt.contains("Requirements: 3+ years of Go"));
        assert!(!prompt.contains("Responsibilities"));
        assert!(prompt.contains("has not provided work history"));
        assert!(prompt.contains("\"skills\""));
    }

    #[test]
    fn resume_prompt_includes_profile_entries() {
        let profile = UserProfile {
            experience: vec![Experience {
                company: "Kolesa".into(),
                position: "Go Developer".into(),
                description: "Listings search".into(),
                start: "2021-03-01".into(),
                end: None,
            }],
            education: Some(Education {
                level: "higher".into(),
                name: "Computer Science".into(),
                organization: "KBTU".into(),
                year: 2020,
            }),
        };

        let prompt = resume_prompt(&posting(), &applicant(), Some(&profile));
        assert!(prompt.contains("Go Developer at Kolesa (2021-03-01 to present)"));
        assert!(prompt.contains("KBTU, 2020"));
    }

    #[test]
    fn cover_letter_prompt_lists_skills() {
        let resume = ResumeContext {
            skills: vec!["Go".into(), "Kafka".into()],
            experience: Vec::new(),
        };
        let prompt = cover_letter_prompt(&posting(), &applicant(), &resume);
        assert!(prompt.contains("Candidate skills: Go, Kafka"));
        assert!(prompt.contains("Aigerim Saparova"));
    }
}
