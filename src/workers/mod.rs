use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    task::JoinSet,
    time::{interval_at, sleep, Instant, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::jobs::{JobQueue, JobQueueError, ReservedJob};

pub mod progress;
pub mod submission;

pub use progress::ProgressReporter;
/// How often a running job renews its lease unless configured otherwise.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub use submission::{
    Attempt, PipelineError, PipelineOutcome, PipelineReport, PipelineRun, PipelineStep,
    StepStatus, SubmissionJob, SubmissionOrchestrator,
};

#[derive(Debug, PartialEq, Eq)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
    /// The work the job referred to no longer exists; the job is dropped.
    Cancelled,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &ReservedJob, progress: &ProgressReporter) -> JobExecution;
}

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            handler,
            poll_interval,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Should stay well below the queue's lease timeout.
    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval.max(Duration::from_millis(1));
        self
    }

    pub async fn run(&self) {
        info!("worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Runs at most one job. Returns whether a job was found.
    pub async fn tick(&self) -> Result<bool, JobQueueError> {
        let Some(job) = self.queue.reserve().await? else {
            return Ok(false);
        };

        info!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts, "job started");
        let result = self.execute(&job).await;

        match result {
            JobExecution::Success => {
                self.queue.complete(job.id).await?;
                info!(job_id = %job.id, job_type = %job.job_type, "job completed successfully");
            }
            JobExecution::Retry { delay, error } => {
                warn!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts, delay_ms = delay.as_millis() as u64, %error, "job will retry");
                self.queue.retry_after(job.id, delay, &error).await?;
            }
            JobExecution::Failed { error } => {
                error!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts, %error, "job failed");
                self.queue.fail(job.id, &error).await?;
            }
            JobExecution::Cancelled => {
                info!(job_id = %job.id, job_type = %job.job_type, "job cancelled, removing");
                self.queue.remove(job.id).await?;
            }
        }

        Ok(true)
    }

    /// Runs the handler while forwarding its progress checkpoints to the queue
    /// and keeping the job's lease fresh.
    async fn execute(&self, job: &ReservedJob) -> JobExecution {
        let (reporter, mut progress_rx) = ProgressReporter::channel();
        let handling = self.handler.handle(job, &reporter);
        tokio::pin!(handling);

        let mut heartbeat = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                result = &mut handling => break result,
                Ok(()) = progress_rx.changed() => {
                    let percent = *progress_rx.borrow_and_update();
                    self.forward_progress(job, percent).await;
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = self.queue.heartbeat(job.id).await {
                        warn!(job_id = %job.id, error = %err, "failed to renew job lease");
                    }
                }
            }
        };

        if progress_rx.has_changed().unwrap_or(false) {
            let percent = *progress_rx.borrow_and_update();
            self.forward_progress(job, percent).await;
        }

        result
    }

    async fn forward_progress(&self, job: &ReservedJob, percent: u8) {
        if let Err(err) = self.queue.set_progress(job.id, percent).await {
            warn!(job_id = %job.id, progress = percent, error = %err, "failed to record job progress");
        }
    }
}

/// A fixed number of [`Worker`]s polling the same queue.
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
        poll_interval: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        let workers = (0..concurrency.max(1))
            .map(|_| {
                Arc::new(
                    Worker::new(queue.clone(), handler.clone(), poll_interval)
                        .with_heartbeat_interval(heartbeat_interval),
                )
            })
            .collect();
        Self { workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Runs every worker until the returned future is dropped.
    pub async fn run(self) {
        let mut tasks = JoinSet::new();
        for worker in self.workers {
            tasks.spawn(async move { worker.run().await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "worker task ended unexpectedly");
            }
        }
    }
}
