//! HeadHunter job-board integration.

use async_trait::async_trait;
use thiserror::Error;

mod client;
pub mod payload;

pub use client::HhClient;
pub use payload::{ResumeDraft, ResumeUpdate};

#[derive(Debug, Error)]
pub enum HhError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rate limited by HeadHunter")]
    RateLimited,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("HeadHunter API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("HeadHunter response did not contain a resume id")]
    MissingResumeId,
}

/// Result of a publish request that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// 429: the resume was published recently and cannot be republished yet.
    AlreadyPublished,
    /// 400: HeadHunter refused to publish the resume in its current shape.
    Rejected(String),
}

#[async_trait]
pub trait JobBoardClient: Send + Sync + 'static {
    /// Creates a remote resume and returns its upstream id.
    async fn create_resume_draft(&self, token: &str, draft: &ResumeDraft) -> Result<String, HhError>;

    async fn update_resume(
        &self,
        token: &str,
        resume_id: &str,
        update: &ResumeUpdate,
    ) -> Result<(), HhError>;

    async fn publish_resume(&self, token: &str, resume_id: &str)
        -> Result<PublishOutcome, HhError>;

    async fn submit_application(
        &self,
        token: &str,
        vacancy_id: &str,
        resume_id: &str,
        cover_letter: Option<&str>,
    ) -> Result<(), HhError>;
}
