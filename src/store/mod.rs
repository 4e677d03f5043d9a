//! Durable records the submission pipeline reads and writes: postings,
//! applicants, resumes and applications.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Application, ApplicationChanges, NewApplication, NewResume, Resume, User, UserProfile, Vacancy,
};

mod memory;
mod postgres;

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists")]
    Duplicate,
    #[error("database error: {0}")]
    Database(diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(String),
    #[error("malformed stored document: {0}")]
    Document(#[from] serde_json::Error),
    #[error("store task failed: {0}")]
    Task(String),
}

impl From<diesel::result::Error> for StoreError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => StoreError::Duplicate,
            other => StoreError::Database(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    async fn find_vacancy(&self, vacancy_id: Uuid) -> StoreResult<Option<Vacancy>>;

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    /// Prior experience and education, if the applicant filled a profile.
    async fn find_profile(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>>;

    /// Stored job-board access token. `None` when missing or expired.
    async fn hh_access_token(&self, user_id: Uuid) -> StoreResult<Option<String>>;

    /// Looks a resume up by local id or by upstream id, owned by `user_id`.
    async fn find_resume_by_ref(&self, user_id: Uuid, resume_ref: &str)
        -> StoreResult<Option<Resume>>;

    async fn create_resume(&self, resume: NewResume) -> StoreResult<Resume>;

    /// Returns `false` when the resume no longer exists.
    async fn delete_resume(&self, resume_id: Uuid) -> StoreResult<bool>;

    /// Fails with [`StoreError::Duplicate`] when the (user, vacancy) pair exists.
    async fn create_application(&self, application: NewApplication) -> StoreResult<Application>;

    async fn find_application(&self, application_id: Uuid) -> StoreResult<Option<Application>>;

    async fn find_application_for(
        &self,
        user_id: Uuid,
        vacancy_id: Uuid,
    ) -> StoreResult<Option<Application>>;

    /// Newest first.
    async fn list_applications(&self, user_id: Uuid) -> StoreResult<Vec<Application>>;

    /// Returns `false` when the record no longer exists.
    async fn update_application(
        &self,
        application_id: Uuid,
        changes: ApplicationChanges,
    ) -> StoreResult<bool>;

    /// Returns `false` when the record no longer exists.
    async fn delete_application(&self, application_id: Uuid) -> StoreResult<bool>;
}
