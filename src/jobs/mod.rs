//! Durable queue for application submission jobs.
//!
//! A job row carries the [`ApplicationJob`] payload plus attempt bookkeeping.
//! Callers see five lifecycle states: `waiting` (due now), `delayed`
//! (backing off until `run_after`), `active`, `completed` and `failed`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

pub const JOB_GENERATE_AND_APPLY: &str = "generate-and-apply";
pub const JOB_REUSE_RESUME: &str = "reuse-resume";

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(String),
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("queue task failed: {0}")]
    Task(String),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

/// Work item for one application. The variant decides which pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ApplicationJob {
    GenerateAndApply {
        application_id: Uuid,
        user_id: Uuid,
        vacancy_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cover_letter: Option<String>,
    },
    ReuseResume {
        application_id: Uuid,
        user_id: Uuid,
        vacancy_id: Uuid,
        /// Local resume id or upstream resume id, as the caller supplied it.
        resume_ref: String,
    },
}

impl ApplicationJob {
    pub fn job_type(&self) -> &'static str {
        match self {
            ApplicationJob::GenerateAndApply { .. } => JOB_GENERATE_AND_APPLY,
            ApplicationJob::ReuseResume { .. } => JOB_REUSE_RESUME,
        }
    }

    pub fn application_id(&self) -> Uuid {
        match self {
            ApplicationJob::GenerateAndApply { application_id, .. }
            | ApplicationJob::ReuseResume { application_id, .. } => *application_id,
        }
    }

}

/// Attempt limit and exponential backoff applied to every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based) runs.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn from_row(status: &str, run_after: NaiveDateTime, now: NaiveDateTime) -> Self {
        match status {
            STATUS_PROCESSING => JobState::Active,
            STATUS_SUCCEEDED => JobState::Completed,
            STATUS_FAILED => JobState::Failed,
            _ if run_after > now => JobState::Delayed,
            _ => JobState::Waiting,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(
            self,
            JobState::Waiting | JobState::Delayed | JobState::Active
        )
    }
}

/// A job handed to a worker. `attempts` already counts the current attempt.
#[derive(Debug, Clone)]
pub struct ReservedJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_attempts: u32,
    /// The lease on this job's last permitted attempt expired. No attempt
    /// remains; the handler only records the failure.
    pub abandoned: bool,
}

impl ReservedJob {
    pub fn decode(&self) -> JobQueueResult<ApplicationJob> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub job_type: String,
    pub state: JobState,
    pub progress: u8,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub total: u64,
}

impl QueueStats {
    pub fn count(&mut self, state: JobState) {
        match state {
            JobState::Waiting => self.waiting += 1,
            JobState::Delayed => self.delayed += 1,
            JobState::Active => self.active += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
        }
        self.total += 1;
    }
}

/// Lease applied when a queue is not configured with one.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(300);

#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    async fn enqueue(&self, job: &ApplicationJob, policy: &RetryPolicy) -> JobQueueResult<Uuid>;

    /// Claims the oldest due job and marks it active. A job is never handed
    /// to two workers at once. An active job whose lease expired (its
    /// worker stopped without reporting) is due again; taking it over uses
    /// up another attempt.
    async fn reserve(&self) -> JobQueueResult<Option<ReservedJob>>;

    /// Renews the lease of an active job.
    async fn heartbeat(&self, job_id: Uuid) -> JobQueueResult<()>;

    async fn complete(&self, job_id: Uuid) -> JobQueueResult<()>;

    async fn retry_after(&self, job_id: Uuid, delay: Duration, error: &str) -> JobQueueResult<()>;

    async fn fail(&self, job_id: Uuid, error: &str) -> JobQueueResult<()>;

    /// Deletes the job. Returns `false` when it was already gone.
    async fn remove(&self, job_id: Uuid) -> JobQueueResult<bool>;

    async fn set_progress(&self, job_id: Uuid, progress: u8) -> JobQueueResult<()>;

    /// The waiting, delayed or active job that belongs to an application.
    async fn find_live(&self, application_id: Uuid) -> JobQueueResult<Option<JobSnapshot>>;

    /// 1-based position among waiting jobs, `None` when the job is not waiting.
    async fn waiting_position(&self, job_id: Uuid) -> JobQueueResult<Option<usize>>;

    async fn stats(&self) -> JobQueueResult<QueueStats>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    #[test]
    fn backoff_doubles_from_the_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn payload_carries_an_explicit_kind() {
        let job = ApplicationJob::ReuseResume {
            application_id: Uuid::nil(),
            user_id: Uuid::nil(),
            vacancy_id: Uuid::nil(),
            resume_ref: "hh-42".into(),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["kind"], "reuse-resume");
        assert_eq!(value["kind"], job.job_type());

        let decoded: ApplicationJob = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn generate_payload_without_cover_letter_decodes() {
        let value = serde_json::json!({
            "kind": "generate-and-apply",
            "application_id": Uuid::nil(),
            "user_id": Uuid::nil(),
            "vacancy_id": Uuid::nil(),
        });
        let job: ApplicationJob = serde_json::from_value(value).unwrap();
        assert!(matches!(
            job,
            ApplicationJob::GenerateAndApply {
                cover_letter: None,
                ..
            }
        ));
    }

    #[test]
    fn queued_rows_due_later_are_delayed() {
        let now = Utc::now().naive_utc();
        let later = now + ChronoDuration::seconds(4);
        assert_eq!(JobState::from_row(STATUS_QUEUED, now, now), JobState::Waiting);
        assert_eq!(JobState::from_row(STATUS_QUEUED, later, now), JobState::Delayed);
        assert_eq!(JobState::from_row(STATUS_PROCESSING, later, now), JobState::Active);
        assert!(!JobState::from_row(STATUS_SUCCEEDED, now, now).is_live());
    }

    #[test]
    fn stats_total_is_the_sum_of_states() {
        let mut stats = QueueStats::default();
        for state in [
            JobState::Waiting,
            JobState::Waiting,
            JobState::Active,
            JobState::Delayed,
            JobState::Failed,
            JobState::Completed,
        ] {
            stats.count(state);
        }
        assert_eq!(
            stats.total,
            stats.waiting + stats.active + stats.completed + stats.failed + stats.delayed
        );
        assert_eq!(stats.total, 6);
    }
}
