//! Caller-facing operations on queued applications.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::jobs::{ApplicationJob, JobQueue, JobQueueError, JobState, QueueStats, RetryPolicy};
use crate::models::{Application, ApplicationChanges, ApplicationStatus, NewApplication, Vacancy};
use crate::store::{RecordStore, StoreError};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("queue unavailable: {0}")]
    Queue(#[from] JobQueueError),
    #[error("record store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ApplyError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Duplicate => ApplyError::Conflict(ALREADY_APPLIED.into()),
            other => ApplyError::Store(other),
        }
    }
}

const ALREADY_APPLIED: &str = "you have already applied to this vacancy";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueReceipt {
    pub application_id: Uuid,
    pub job_id: Uuid,
    /// 1-based; `None` when a worker picked the job up before the lookup.
    pub queue_position: Option<usize>,
    pub status: ApplicationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueInfo {
    pub job_id: Uuid,
    pub position: Option<usize>,
    pub state: JobState,
    pub progress: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VacancySummary {
    pub id: Uuid,
    pub title: String,
    pub company: String,
    pub city: Option<String>,
}

impl From<Vacancy> for VacancySummary {
    fn from(vacancy: Vacancy) -> Self {
        Self {
            id: vacancy.id,
            title: vacancy.title,
            company: vacancy.company,
            city: vacancy.city,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationView {
    #[serde(flatten)]
    pub application: Application,
    pub vacancy: Option<VacancySummary>,
    pub queue_info: Option<QueueInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cancellation {
    pub application_id: Uuid,
    pub job_removed: bool,
}

pub struct QueueGateway {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn RecordStore>,
    policy: RetryPolicy,
}

impl QueueGateway {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn RecordStore>, policy: RetryPolicy) -> Self {
        Self {
            queue,
            store,
            policy,
        }
    }

    /// Queues an application whose resume and cover letter are generated.
    pub async fn enqueue_generated(
        &self,
        user_id: Uuid,
        vacancy_id: Uuid,
        cover_letter: Option<String>,
    ) -> Result<EnqueueReceipt, ApplyError> {
        let vacancy = self.posting(vacancy_id).await?;
        if !vacancy.is_active() {
            return Err(ApplyError::Conflict(format!(
                "vacancy {vacancy_id} is not accepting applications"
            )));
        }
        self.ensure_not_applied(user_id, vacancy_id).await?;

        let cover_letter = cover_letter.filter(|letter| !letter.trim().is_empty());
        let mut application = NewApplication::queued(user_id, vacancy_id);
        application.cover_letter = cover_letter.clone();

        self.enqueue(application, |application_id| ApplicationJob::GenerateAndApply {
            application_id,
            user_id,
            vacancy_id,
            cover_letter,
        })
        .await
    }

    /// Queues an application that reuses one of the caller's resumes,
    /// referenced by local id or upstream id.
    pub async fn enqueue_with_existing_resume(
        &self,
        user_id: Uuid,
        vacancy_id: Uuid,
        resume_ref: &str,
    ) -> Result<EnqueueReceipt, ApplyError> {
        self.posting(vacancy_id).await?;
        self.ensure_not_applied(user_id, vacancy_id).await?;

        let resume = self
            .store
            .find_resume_by_ref(user_id, resume_ref)
            .await?
            .ok_or_else(|| ApplyError::NotFound(format!("resume {resume_ref} not found")))?;

        let mut application = NewApplication::queued(user_id, vacancy_id);
        application.resume_id = Some(resume.id);

        let resume_ref = resume_ref.to_string();
        self.enqueue(application, |application_id| ApplicationJob::ReuseResume {
            application_id,
            user_id,
            vacancy_id,
            resume_ref,
        })
        .await
    }

    pub async fn list_applications(&self, user_id: Uuid) -> Result<Vec<ApplicationView>, ApplyError> {
        let applications = self.store.list_applications(user_id).await?;
        let mut views = Vec::with_capacity(applications.len());
        for application in applications {
            views.push(self.view(application).await?);
        }
        Ok(views)
    }

    pub async fn get_application(
        &self,
        application_id: Uuid,
        user_id: Uuid,
    ) -> Result<ApplicationView, ApplyError> {
        let application = self.owned_application(application_id, user_id).await?;
        self.view(application).await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, ApplyError> {
        Ok(self.queue.stats().await?)
    }

    /// Drops the live job, if any, then deletes the record. A job that is
    /// already running is not interrupted; its final write finds no record.
    pub async fn cancel(&self, application_id: Uuid, user_id: Uuid) -> Result<Cancellation, ApplyError> {
        let application = self.owned_application(application_id, user_id).await?;

        let job_removed = match self.queue.find_live(application.id).await? {
            Some(job) => self.queue.remove(job.id).await?,
            None => false,
        };

        if !self.store.delete_application(application.id).await? {
            return Err(ApplyError::NotFound(format!(
                "application {application_id} not found"
            )));
        }

        info!(%application_id, %user_id, job_removed, "application cancelled");
        Ok(Cancellation {
            application_id,
            job_removed,
        })
    }

    async fn enqueue<F>(&self, application: NewApplication, build_job: F) -> Result<EnqueueReceipt, ApplyError>
    where
        F: FnOnce(Uuid) -> ApplicationJob,
    {
        let application = self.store.create_application(application).await?;
        let job = build_job(application.id);

        let job_id = match self.queue.enqueue(&job, &self.policy).await {
            Ok(job_id) => job_id,
            Err(err) => {
                // Without a job the record would sit in QUEUED forever.
                if let Err(cleanup) = self.store.delete_application(application.id).await {
                    warn!(application_id = %application.id, error = %cleanup, "failed to remove application after enqueue error");
                }
                return Err(err.into());
            }
        };

        let changes = ApplicationChanges {
            job_id: Some(job_id),
            ..ApplicationChanges::default()
        };
        if let Err(err) = self.store.update_application(application.id, changes).await {
            warn!(application_id = %application.id, %job_id, error = %err, "failed to link job to application");
        }

        let queue_position = self.queue.waiting_position(job_id).await?;
        info!(
            application_id = %application.id,
            user_id = %application.user_id,
            vacancy_id = %application.vacancy_id,
            %job_id,
            job_type = job.job_type(),
            ?queue_position,
            "application queued"
        );

        Ok(EnqueueReceipt {
            application_id: application.id,
            job_id,
            queue_position,
            status: ApplicationStatus::Queued,
        })
    }

    async fn posting(&self, vacancy_id: Uuid) -> Result<Vacancy, ApplyError> {
        self.store
            .find_vacancy(vacancy_id)
            .await?
            .ok_or_else(|| ApplyError::NotFound(format!("vacancy {vacancy_id} not found")))
    }

    async fn ensure_not_applied(&self, user_id: Uuid, vacancy_id: Uuid) -> Result<(), ApplyError> {
        match self.store.find_application_for(user_id, vacancy_id).await? {
            Some(_) => Err(ApplyError::Conflict(ALREADY_APPLIED.into())),
            None => Ok(()),
        }
    }

    async fn owned_application(&self, application_id: Uuid, user_id: Uuid) -> Result<Application, ApplyError> {
        let application = self
            .store
            .find_application(application_id)
            .await?
            .ok_or_else(|| ApplyError::NotFound(format!("application {application_id} not found")))?;

        if application.user_id != user_id {
            return Err(ApplyError::Forbidden(format!(
                "application {application_id} belongs to another user"
            )));
        }
        Ok(application)
    }

    async fn view(&self, application: Application) -> Result<ApplicationView, ApplyError> {
        let vacancy = self
            .store
            .find_vacancy(application.vacancy_id)
            .await?
            .map(VacancySummary::from);
        let queue_info = self.queue_info(&application).await?;
        Ok(ApplicationView {
            application,
            vacancy,
            queue_info,
        })
    }

    async fn queue_info(&self, application: &Application) -> Result<Option<QueueInfo>, ApplyError> {
        if application.status.is_terminal() {
            return Ok(None);
        }

        let Some(job) = self.queue.find_live(application.id).await? else {
            return Ok(None);
        };

        let position = match job.state {
            JobState::Waiting => self.queue.waiting_position(job.id).await?,
            _ => None,
        };

        Ok(Some(QueueInfo {
            job_id: job.id,
            position,
            state: job.state,
            progress: job.progress,
        }))
    }
}
