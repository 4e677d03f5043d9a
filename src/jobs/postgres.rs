use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use tokio::task;
use tracing::warn;
use uuid::Uuid;

use super::{
    ApplicationJob, JobQueue, JobQueueError, JobQueueResult, JobSnapshot, JobState, QueueStats,
    ReservedJob, RetryPolicy, DEFAULT_LEASE_TIMEOUT, STATUS_FAILED, STATUS_PROCESSING,
    STATUS_QUEUED, STATUS_SUCCEEDED,
};
use crate::db::PgPool;
use crate::schema::jobs;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = jobs)]
struct JobRow {
    id: Uuid,
    job_type: String,
    payload: Value,
    status: String,
    attempts: i32,
    max_attempts: i32,
    progress: i16,
    run_after: NaiveDateTime,
    created_at: NaiveDateTime,
}

impl JobRow {
    fn snapshot(&self, now: NaiveDateTime) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            job_type: self.job_type.clone(),
            state: JobState::from_row(&self.status, self.run_after, now),
            progress: self.progress.clamp(0, 100) as u8,
            attempts: self.attempts.max(0) as u32,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
struct NewJob {
    id: Uuid,
    job_type: String,
    payload: Value,
    status: String,
    max_attempts: i32,
    application_id: Option<Uuid>,
    run_after: NaiveDateTime,
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub fn enqueue_job(
    conn: &mut PgConnection,
    job: &ApplicationJob,
    policy: &RetryPolicy,
) -> JobQueueResult<Uuid> {
    let new_job = NewJob {
        id: Uuid::new_v4(),
        job_type: job.job_type().to_string(),
        payload: serde_json::to_value(job)?,
        status: STATUS_QUEUED.to_string(),
        max_attempts: policy.max_attempts as i32,
        application_id: Some(job.application_id()),
        run_after: now(),
    };

    diesel::insert_into(jobs::table)
        .values(&new_job)
        .execute(conn)?;

    Ok(new_job.id)
}

pub fn reserve_job(
    conn: &mut PgConnection,
    lease_timeout: Duration,
) -> JobQueueResult<Option<ReservedJob>> {
    let now = now();
    let lease_cutoff = now
        - ChronoDuration::from_std(lease_timeout).unwrap_or_else(|_| ChronoDuration::minutes(5));

    conn.transaction::<_, JobQueueError, _>(|conn| {
        let job_opt = jobs::table
            .filter(
                jobs::status
                    .eq(STATUS_QUEUED)
                    .and(jobs::run_after.le(now))
                    .or(jobs::status
                        .eq(STATUS_PROCESSING)
                        .and(jobs::updated_at.le(lease_cutoff))),
            )
            .order((jobs::run_after.asc(), jobs::created_at.asc()))
            .select(JobRow::as_select())
            .for_update()
            .skip_locked()
            .first::<JobRow>(conn)
            .optional()?;

        let Some(job) = job_opt else {
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

        let attempts = if abandoned {
            job.attempts
        } else {
            job.attempts + 1
        };
        diesel::update(jobs::table.find(job.id))
            .set((
                jobs::status.eq(STATUS_PROCESSING),
                jobs::attempts.eq(attempts),
                jobs::progress.eq(0i16),
                jobs::updated_at.eq(now),
            ))
            .execute(conn)?;

        Ok(Some(ReservedJob {
            id: job.id,
            job_type: job.job_type,
            payload: job.payload,
            attempts: attempts.max(0) as u32,
            max_attempts: job.max_attempts.max(1) as u32,
            abandoned,
        }))
    })
}

pub fn heartbeat_job(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<()> {
    diesel::update(
        jobs::table
            .find(job_id)
            .filter(jobs::status.eq(STATUS_PROCESSING)),
    )
    .set(jobs::updated_at.eq(now()))
    .execute(conn)?;
    Ok(())
}

pub fn mark_job_succeeded(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_SUCCEEDED),
            jobs::progress.eq(100i16),
            jobs::last_error.eq::<Option<String>>(None),
            jobs::updated_at.eq(now()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn retry_job_after(
    conn: &mut PgConnection,
    job_id: Uuid,
    delay: Duration,
    error_message: &str,
) -> JobQueueResult<()> {
    let next_run = Utc::now()
        + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));

    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_QUEUED),
            jobs::run_after.eq(next_run.naive_utc()),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::updated_at.eq(now()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn mark_job_failed(
    conn: &mut PgConnection,
    job_id: Uuid,
    error_message: &str,
) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_FAILED),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::updated_at.eq(now()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn remove_job(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<bool> {
    let deleted = diesel::delete(jobs::table.find(job_id)).execute(conn)?;
    Ok(deleted > 0)
}

pub fn set_job_progress(conn: &mut PgConnection, job_id: Uuid, progress: u8) -> JobQueueResult<()> {
    let progress = i16::from(progress.min(100));
    diesel::update(
        jobs::table
            .find(job_id)
            .filter(jobs::status.eq(STATUS_PROCESSING))
            .filter(jobs::progress.lt(progress)),
    )
    .set((jobs::progress.eq(progress), jobs::updated_at.eq(now())))
    .execute(conn)?;
    Ok(())
}

pub fn find_live_job(
    conn: &mut PgConnection,
    application_id: Uuid,
) -> JobQueueResult<Option<JobSnapshot>> {
    let row = jobs::table
        .filter(jobs::application_id.eq(application_id))
        .filter(jobs::status.eq_any(vec![STATUS_QUEUED, STATUS_PROCESSING]))
        .order(jobs::created_at.desc())
        .select(JobRow::as_select())
        .first::<JobRow>(conn)
        .optional()?;
    Ok(row.map(|row| row.snapshot(now())))
}

pub fn waiting_position(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<Option<usize>> {
    let now = now();
    let Some(job) = jobs::table
        .find(job_id)
        .select(JobRow::as_select())
        .first::<JobRow>(conn)
        .optional()?
    else {
        return Ok(None);
    };

    if JobState::from_row(&job.status, job.run_after, now) != JobState::Waiting {
        return Ok(None);
    }

    let ahead_or_equal: i64 = jobs::table
        .filter(jobs::status.eq(STATUS_QUEUED))
        .filter(jobs::run_after.le(now))
        .filter(
            jobs::run_after.lt(job.run_after).or(jobs::run_after
                .eq(job.run_after)
                .and(jobs::created_at.le(job.created_at))),
        )
        .count()
        .get_result(conn)?;

    Ok(Some(ahead_or_equal.max(1) as usize))
}

pub fn queue_stats(conn: &mut PgConnection) -> JobQueueResult<QueueStats> {
    let now = now();
    let by_status = |conn: &mut PgConnection, status: &str| -> JobQueueResult<u64> {
        let count: i64 = jobs::table
            .filter(jobs::status.eq(status))
            .count()
            .get_result(conn)?;
        Ok(count.max(0) as u64)
    };

    let waiting: i64 = jobs::table
        .filter(jobs::status.eq(STATUS_QUEUED))
        .filter(jobs::run_after.le(now))
        .count()
        .get_result(conn)?;
    let delayed: i64 = jobs::table
        .filter(jobs::status.eq(STATUS_QUEUED))
        .filter(jobs::run_after.gt(now))
        .count()
        .get_result(conn)?;

    let mut stats = QueueStats {
        waiting: waiting.max(0) as u64,
        delayed: delayed.max(0) as u64,
        active: by_status(conn, STATUS_PROCESSING)?,
        completed: by_status(conn, STATUS_SUCCEEDED)?,
        failed: by_status(conn, STATUS_FAILED)?,
        total: 0,
    };
    stats.total = stats.waiting + stats.active + stats.completed + stats.failed + stats.delayed;
    Ok(stats)
}

/// Queue backed by the `jobs` table. `updated_at` doubles as the lease
/// timestamp of an active job.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    lease_timeout: Duration,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
        }
    }

    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    async fn with_conn<F, T>(&self, f: F) -> JobQueueResult<T>
    where
        F: FnOnce(&mut PgConnection) -> JobQueueResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| JobQueueError::Pool(err.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| JobQueueError::Task(err.to_string()))?
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: &ApplicationJob, policy: &RetryPolicy) -> JobQueueResult<Uuid> {
        let job = job.clone();
        let policy = *policy;
        self.with_conn(move |conn| enqueue_job(conn, &job, &policy))
            .await
    }

    async fn reserve(&self) -> JobQueueResult<Option<ReservedJob>> {
        let lease_timeout = self.lease_timeout;
        self.with_conn(move |conn| reserve_job(conn, lease_timeout))
            .await
    }

    async fn heartbeat(&self, job_id: Uuid) -> JobQueueResult<()> {
        self.with_conn(move |conn| heartbeat_job(conn, job_id))
            .await
    }

    async fn complete(&self, job_id: Uuid) -> JobQueueResult<()> {
        self.with_conn(move |conn| mark_job_succeeded(conn, job_id))
            .await
    }

    async fn retry_after(&self, job_id: Uuid, delay: Duration, error: &str) -> JobQueueResult<()> {
        let error = error.to_string();
        self.with_conn(move |conn| retry_job_after(conn, job_id, delay, &error))
            .await
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> JobQueueResult<()> {
        let error = error.to_string();
        self.with_conn(move |conn| mark_job_failed(conn, job_id, &error))
            .await
    }

    async fn remove(&self, job_id: Uuid) -> JobQueueResult<bool> {
        self.with_conn(move |conn| remove_job(conn, job_id)).await
    }

    async fn set_progress(&self, job_id: Uuid, progress: u8) -> JobQueueResult<()> {
        self.with_conn(move |conn| set_job_progress(conn, job_id, progress))
            .await
    }

    async fn find_live(&self, application_id: Uuid) -> JobQueueResult<Option<JobSnapshot>> {
        self.with_conn(move |conn| find_live_job(conn, application_id))
            .await
    }

    async fn waiting_position(&self, job_id: Uuid) -> JobQueueResult<Option<usize>> {
        self.with_conn(move |conn| waiting_position(conn, job_id))
            .await
    }

    async fn stats(&self) -> JobQueueResult<QueueStats> {
        self.with_conn(queue_stats).await
    }
}
