//! Resume and cover-letter generation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Education, Experience, Resume, User, UserProfile, Vacancy};

mod openai;
pub mod prompts;

pub use openai::OpenAiGenerator;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("generator returned empty content")]
    EmptyContent,

    #[error("generated resume is unusable: {0}")]
    Malformed(String),
}

/// What the generator needs to know about a job posting.
#[derive(Debug, Clone, Serialize)]
pub struct PostingContext {
    pub title: String,
    pub company: String,
    pub description: String,
    pub requirements: Option<String>,
    pub responsibilities: Option<String>,
    pub skills: Vec<String>,
}

impl From<&Vacancy> for PostingContext {
    fn from(vacancy: &Vacancy) -> Self {
        Self {
            title: vacancy.title.clone(),
            company: vacancy.company.clone(),
            description: vacancy.description.clone(),
            requirements: vacancy.requirements.clone(),
            responsibilities: vacancy.responsibilities.clone(),
            skills: vacancy.skills.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicantContext {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl From<&User> for ApplicantContext {
    fn from(user: &User) -> Self {
        Self {
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
        }
    }
}

/// The resume a cover letter is written for.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResumeContext {
    pub skills: Vec<String>,
    pub experience: Vec<Experience>,
}

impl From<&Resume> for ResumeContext {
    fn from(resume: &Resume) -> Self {
        Self {
            skills: resume.skills.clone(),
            experience: resume.experience.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedResume {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub experience: Vec<Experience>,
    #[serde(default)]
    pub education: Option<Education>,
}

impl GeneratedResume {
    /// Rejects results the pipeline cannot turn into a usable resume.
    pub fn validate(mut self) -> Result<Self, GeneratorError> {
        self.title = self.title.trim().to_string();
        self.skills.retain(|skill| !skill.trim().is_empty());

        if self.title.is_empty() {
            return Err(GeneratorError::Malformed("missing title".into()));
        }
        if self.skills.is_empty() {
            return Err(GeneratorError::Malformed("no skills".into()));
        }
        Ok(self)
    }

    pub fn resume_context(&self) -> ResumeContext {
        ResumeContext {
            skills: self.skills.clone(),
            experience: self.experience.clone(),
        }
    }
}

#[async_trait]
pub trait ResumeGenerator: Send + Sync + 'static {
    /// Produces a resume tailored to the posting. `profile` seeds the
    /// experience and education sections when the applicant has filled them.
    async fn generate_resume(
        &self,
        posting: &PostingContext,
        applicant: &ApplicantContext,
        profile: Option<&UserProfile>,
    ) -> Result<GeneratedResume, GeneratorError>;

    async fn generate_cover_letter(
        &self,
        posting: &PostingContext,
        applicant: &ApplicantContext,
        resume: &ResumeContext,
    ) -> Result<String, GeneratorError>;
}
