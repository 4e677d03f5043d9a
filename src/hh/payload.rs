//! Request bodies for the `resume_profile` endpoints.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::Experience;

/// Almaty.
pub const DEFAULT_AREA_ID: &str = "159";
pub const DEFAULT_SCHEDULE_ID: &str = "fullDay";
pub const DEFAULT_EMPLOYMENT_ID: &str = "full";
/// "Information technology specialist".
pub const DEFAULT_PROFESSIONAL_ROLE_ID: &str = "96";

const DEFAULT_COMPANY: &str = "Not specified";
const DEFAULT_DESCRIPTION: &str = "Work experience in the listed position";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeDraft {
    pub vacancy_id: Option<u64>,
}

impl ResumeDraft {
    /// Ties the draft to a posting when its upstream id is numeric, so the
    /// job board attributes the resulting application to it.
    pub fn for_vacancy(hh_vacancy_id: Option<&str>) -> Self {
        Self {
            vacancy_id: hh_vacancy_id.and_then(|id| id.trim().parse().ok()),
        }
    }

    pub fn body(&self) -> DraftBody {
        DraftBody {
            entry_point: if self.vacancy_id.is_some() {
                "vacancy_response"
            } else {
                "default"
            },
            vacancy_id: self.vacancy_id,
            update_profile: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DraftBody {
    pub entry_point: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vacancy_id: Option<u64>,
    pub update_profile: bool,
}

#[derive(Debug, Clone)]
pub struct ResumeUpdate {
    pub title: String,
    pub skills: Vec<String>,
    pub experience: Vec<Experience>,
}

impl ResumeUpdate {
    pub fn body(&self, current_year: i32) -> UpdateBody {
        let experience = self
            .experience
            .iter()
            .map(|entry| ExperienceEntry {
                company: non_empty_or(&entry.company, DEFAULT_COMPANY),
                position: non_empty_or(&entry.position, &self.title),
                description: non_empty_or(&entry.description, DEFAULT_DESCRIPTION),
                start: if entry.start.trim().is_empty() {
                    format!("{}-01-01", current_year - 2)
                } else {
                    entry.start.clone()
                },
                end: entry.end.clone().filter(|end| !end.trim().is_empty()),
                area: IdRef {
                    id: DEFAULT_AREA_ID,
                },
            })
            .collect();

        UpdateBody {
            current_screen_id: "experience",
            resume: UpdateResume {
                title: self.title.clone(),
                skill_set: self.skills.clone(),
                experience,
                schedules: vec![IdRef {
                    id: DEFAULT_SCHEDULE_ID,
                }],
                employments: vec![IdRef {
                    id: DEFAULT_EMPLOYMENT_ID,
                }],
                professional_roles: vec![IdRef {
                    id: DEFAULT_PROFESSIONAL_ROLE_ID,
                }],
            },
            additional_properties: Map::new(),
        }
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

#[derive(Debug, Serialize)]
pub struct UpdateBody {
    pub current_screen_id: &'static str,
    pub resume: UpdateResume,
    pub additional_properties: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct UpdateResume {
    pub title: String,
    pub skill_set: Vec<String>,
    pub experience: Vec<ExperienceEntry>,
    pub schedules: Vec<IdRef>,
    pub employments: Vec<IdRef>,
    pub professional_roles: Vec<IdRef>,
}

#[derive(Debug, Serialize)]
pub struct ExperienceEntry {
    pub company: String,
    pub position: String,
    pub description: String,
    pub start: String,
    pub end: Option<String>,
    pub area: IdRef,
}

#[derive(Debug, Serialize)]
pub struct IdRef {
    pub id: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn draft_for_numeric_vacancy_uses_response_entry_point() {
        let body = serde_json::to_value(ResumeDraft::for_vacancy(Some("93352010")).body()).unwrap();
        assert_eq!(
            body,
            json!({
                "entry_point": "vacancy_response",
                "vacancy_id": 93352010u64,
                "update_profile": true
            })
        );
    }

    #[test]
    fn draft_without_usable_vacancy_id_falls_back_to_default() {
        for id in [None, Some("local-17")] {
            let body = serde_json::to_value(ResumeDraft::for_vacancy(id).body()).unwrap();
            assert_eq!(body["entry_point"], "default");
            assert!(body.get("vacancy_id").is_none());
        }
    }

    #[test]
    fn update_fills_missing_experience_fields() {
        let update = ResumeUpdate {
            title: "Backend Dev".into(),
            skills: vec!["Go".into(), "PostgreSQL".into()],
            experience: vec![Experience {
                company: String::new(),
                position: String::new(),
                description: String::new(),
                start: String::new(),
                end: Some(String::new()),
            }],
        };

        let body = serde_json::to_value(update.body(2025)).unwrap();
        let entry = &body["resume"]["experience"][0];
        assert_eq!(entry["company"], DEFAULT_COMPANY);
        assert_eq!(entry["position"], "Backend Dev");
        assert_eq!(entry["start"], "2023-01-01");
        assert!(entry["end"].is_null());
        assert_eq!(entry["area"]["id"], DEFAULT_AREA_ID);
        assert_eq!(body["resume"]["skill_set"], json!(["Go", "PostgreSQL"]));
        assert_eq!(body["resume"]["schedules"], json!([{ "id": "fullDay" }]));
        assert_eq!(body["resume"]["employments"], json!([{ "id": "full" }]));
        assert_eq!(body["resume"]["professional_roles"], json!([{ "id": "96" }]));
        assert_eq!(body["current_screen_id"], "experience");
    }
}
