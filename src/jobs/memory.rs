use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::{
    ApplicationJob, JobQueue, JobQueueResult, JobSnapshot, JobState, QueueStats, ReservedJob,
    RetryPolicy, DEFAULT_LEASE_TIMEOUT, STATUS_FAILED, STATUS_PROCESSING, STATUS_QUEUED, STATUS_SUCCEEDED,
};

#[derive(Debug, Clone)]
struct StoredJob {
    id: Uuid,
    job_type: String,
    payload: serde_json::Value,
    application_id: Uuid,
    status: &'static str,
    attempts: u32,
    max_attempts: u32,
    progress: u8,
    run_after: NaiveDateTime,
    leased_at: NaiveDateTime,
    last_error: Option<String>,
    seq: u64,
}

impl StoredJob {
    fn state(&self, now: NaiveDateTime) -> JobState {
        JobState::from_row(self.status, self.run_after, now)
    }

    fn snapshot(&self, now: NaiveDateTime) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            job_type: self.job_type.clone(),
            state: self.state(now),
            progress: self.progress,
            attempts: self.attempts,
        }
    }
}

#[derive(Default)]
struct Inner {
    jobs: Vec<StoredJob>,
    next_seq: u64,
}

impl Inner {
    fn get_mut(&mut self, job_id: Uuid) -> Option<&mut StoredJob> {
        self.jobs.iter_mut().find(|job| job.id == job_id)
    }

    fn waiting(&self, now: NaiveDateTime) -> Vec<&StoredJob> {
        let mut waiting: Vec<&StoredJob> = self
            .jobs
            .iter()
            .filter(|job| job.state(now) == JobState::Waiting)
            .collect();
        waiting.sort_by_key(|job| (job.run_after, job.seq));
        waiting
    }

    fn next_reservable(&self, now: NaiveDateTime, lease_cutoff: NaiveDateTime) -> Option<Uuid> {
        self.jobs
            .iter()
            .filter(|job| {
                (job.status == STATUS_QUEUED && job.run_after <= now)
                    || (job.status == STATUS_PROCESSING && job.leased_at <= lease_cutoff)
            })
            .min_by_key(|job| (job.run_after, job.seq))
            .map(|job| job.id)
    }
}

/// Process-local queue with the same semantics as [`super::PgJobQueue`].
/// Used by tests and single-process development setups.
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
    lease_timeout: Duration,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self {
            inner: Mutex::default(),
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
        }
    }
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    /// Last recorded error for a job, if it still exists.
    pub async fn last_error(&self, job_id: Uuid) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .iter()
            .find(|job| job.id == job_id)
            .and_then(|job| job.last_error.clone())
    }

    pub async fn snapshot(&self, job_id: Uuid) -> Option<JobSnapshot> {
        let inner = self.inner.lock().await;
        let now = Utc::now().naive_utc();
        inner
            .jobs
            .iter()
            .find(|job| job.id == job_id)
            .map(|job| job.snapshot(now))
    }

    /// Makes every delayed job due immediately.
    pub async fn release_delayed(&self) {
        let mut inner = self.inner.lock().await;
        let now = Utc::now().naive_utc();
        for job in inner.jobs.iter_mut() {
            if job.status == STATUS_QUEUED && job.run_after > now {
                job.run_after = now;
            }
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &ApplicationJob, policy: &RetryPolicy) -> JobQueueResult<Uuid> {
        let payload = serde_json::to_value(job)?;
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();
        inner.jobs.push(StoredJob {
            id,
            job_type: job.job_type().to_string(),
            payload,
            application_id: job.application_id(),
            status: STATUS_QUEUED,
            attempts: 0,
            max_attempts: policy.max_attempts.max(1),
            progress: 0,
            run_after: now,
            leased_at: now,
            last_error: None,
            seq,
        });
        Ok(id)
    }

    async fn reserve(&self) -> JobQueueResult<Option<ReservedJob>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now().naive_utc();
        let lease_cutoff = now
            - ChronoDuration::from_std(self.lease_timeout)
                .unwrap_or_else(|_| ChronoDuration::minutes(5));
        let Some(job_id) = inner.next_reservable(now, lease_cutoff) else {
            return Ok(None);
        };
        let Some(job) = inner.get_mut(job_id) else {
            return Ok(None);
        };

        let recovered = job.status == STATUS_PROCESSING;
        let abandoned = recovered && job.attempts >= job.max_attempts;
        if recovered {
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                abandoned,
                "job lease expired, taking it over"
            );
        }
        if !abandoned {
            job.attempts += 1;
        }
        job.status = STATUS_PROCESSING;
        job.progress = 0;
        job.leased_at = now;
        Ok(Some(ReservedJob {
            id: job.id,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            abandoned,
        }))
    }

    async fn heartbeat(&self, job_id: Uuid) -> JobQueueResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.get_mut(job_id) {
            if job.status == STATUS_PROCESSING {
                job.leased_at = Utc::now().naive_utc();
            }
        }
        Ok(())
    }

    async fn complete(&self, job_id: Uuid) -> JobQueueResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.get_mut(job_id) {
            job.status = STATUS_SUCCEEDED;
            job.progress = 100;
            job.last_error = None;
        }
        Ok(())
    }

    async fn retry_after(&self, job_id: Uuid, delay: Duration, error: &str) -> JobQueueResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.get_mut(job_id) {
            let delay =
                ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));
            job.status = STATUS_QUEUED;
            job.run_after = Utc::now().naive_utc() + delay;
            job.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> JobQueueResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.get_mut(job_id) {
            job.status = STATUS_FAILED;
            job.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn remove(&self, job_id: Uuid) -> JobQueueResult<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.jobs.len();
        inner.jobs.retain(|job| job.id != job_id);
        Ok(inner.jobs.len() < before)
    }

    async fn set_progress(&self, job_id: Uuid, progress: u8) -> JobQueueResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.get_mut(job_id) {
            if job.status == STATUS_PROCESSING && progress > job.progress {
                job.progress = progress.min(100);
                job.leased_at = Utc::now().naive_utc();
            }
        }
        Ok(())
    }

    async fn find_live(&self, application_id: Uuid) -> JobQueueResult<Option<JobSnapshot>> {
        let inner = self.inner.lock().await;
        let now = Utc::now().naive_utc();
        Ok(inner
            .jobs
            .iter()
            .filter(|job| job.application_id == application_id && job.state(now).is_live())
            .max_by_key(|job| job.seq)
            .map(|job| job.snapshot(now)))
    }

    async fn waiting_position(&self, job_id: Uuid) -> JobQueueResult<Option<usize>> {
        let inner = self.inner.lock().await;
        let now = Utc::now().naive_utc();
        Ok(inner
            .waiting(now)
            .iter()
            .position(|job| job.id == job_id)
            .map(|index| index + 1))
    }

    async fn stats(&self) -> JobQueueResult<QueueStats> {
        let inner = self.inner.lock().await;
        let now = Utc::now().naive_utc();
        let mut stats = QueueStats::default();
        for job in &inner.jobs {
            stats.count(job.state(now));
        }
        Ok(stats)
    }
}
