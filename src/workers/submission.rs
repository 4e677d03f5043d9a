//! The submission pipelines run for every queued application.
//!
//! Both pipelines move the application record `QUEUED -> PROCESSING ->
//! {COMPLETED | FAILED}` and record the result of every step in a
//! [`PipelineReport`]. Steps that may degrade without failing the job
//! (publishing the remote resume, and submitting to the job board in the
//! generate path) are recorded as warnings.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{JobExecution, JobHandler, ProgressReporter};
use crate::ai::{ApplicantContext, GeneratedResume, PostingContext, ResumeContext, ResumeGenerator};
use crate::hh::{JobBoardClient, PublishOutcome, ResumeDraft, ResumeUpdate};
use crate::jobs::{ApplicationJob, ReservedJob, RetryPolicy};
use crate::models::{ApplicationChanges, ApplicationStatus, NewResume, User, Vacancy};
use crate::store::{RecordStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStep {
    MarkProcessing,
    LoadPosting,
    LoadApplicant,
    LoadProfile,
    GenerateResume,
    CreateRemoteResume,
    UpdateRemoteResume,
    PublishResume,
    ResolveResume,
    CoverLetter,
    SubmitApplication,
    Finalize,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::MarkProcessing => "mark-processing",
            PipelineStep::LoadPosting => "load-posting",
            PipelineStep::LoadApplicant => "load-applicant",
            PipelineStep::LoadProfile => "load-profile",
            PipelineStep::GenerateResume => "generate-resume",
            PipelineStep::CreateRemoteResume => "create-remote-resume",
            PipelineStep::UpdateRemoteResume => "update-remote-resume",
            PipelineStep::PublishResume => "publish-resume",
            PipelineStep::ResolveResume => "resolve-resume",
            PipelineStep::CoverLetter => "cover-letter",
            PipelineStep::SubmitApplication => "submit-application",
            PipelineStep::Finalize => "finalize",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Ok,
    /// The step did not apply to this job, e.g. submitting to the job board
    /// for a posting that has no upstream id.
    Skipped,
    Warning(String),
    Fatal(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    steps: Vec<(PipelineStep, StepStatus)>,
}

impl PipelineReport {
    pub fn steps(&self) -> &[(PipelineStep, StepStatus)] {
        &self.steps
    }

    pub fn status(&self, step: PipelineStep) -> Option<&StepStatus> {
        self.steps
            .iter()
            .rev()
            .find(|(recorded, _)| *recorded == step)
            .map(|(_, status)| status)
    }

    pub fn warnings(&self) -> impl Iterator<Item = (PipelineStep, &str)> {
        self.steps.iter().filter_map(|(step, status)| match status {
            StepStatus::Warning(reason) => Some((*step, reason.as_str())),
            _ => None,
        })
    }

    pub fn fatal(&self) -> Option<(PipelineStep, &str)> {
        self.steps.iter().find_map(|(step, status)| match status {
            StepStatus::Fatal(reason) => Some((*step, reason.as_str())),
            _ => None,
        })
    }

    fn ok(&mut self, step: PipelineStep) {
        self.steps.push((step, StepStatus::Ok));
    }

    fn skip(&mut self, step: PipelineStep) {
        self.steps.push((step, StepStatus::Skipped));
    }

    fn warn(&mut self, step: PipelineStep, reason: impl Into<String>) {
        self.steps.push((step, StepStatus::Warning(reason.into())));
    }

    /// Records `err` as the fatal result of `step` and hands it back for `?`.
    fn fail(&mut self, step: PipelineStep, err: PipelineError) -> PipelineError {
        self.steps.push((step, StepStatus::Fatal(err.to_string())));
        err
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
    /// The job's lease expired on its last attempt before it reported back.
    #[error("interrupted: {0}")]
    Interrupted(String),
    #[error("record store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed { resume_id: Uuid },
    /// The application record is gone; the job should be dropped.
    Cancelled,
    /// The record already reached a terminal status on an earlier delivery.
    AlreadyFinished(ApplicationStatus),
}

#[derive(Debug)]
pub struct PipelineRun {
    pub outcome: Result<PipelineOutcome, PipelineError>,
    pub report: PipelineReport,
}

/// Which delivery of a job is running. `number` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub number: u32,
    pub max_attempts: u32,
}

impl Attempt {
    pub fn is_final(&self) -> bool {
        self.number >= self.max_attempts
    }
}

impl From<&ReservedJob> for Attempt {
    fn from(job: &ReservedJob) -> Self {
        Self {
            number: job.attempts,
            max_attempts: job.max_attempts,
        }
    }
}

enum Start {
    Ready,
    Orphaned,
    Finished(ApplicationStatus),
}

pub struct SubmissionOrchestrator {
    store: Arc<dyn RecordStore>,
    board: Arc<dyn JobBoardClient>,
    generator: Arc<dyn ResumeGenerator>,
}

impl SubmissionOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        board: Arc<dyn JobBoardClient>,
        generator: Arc<dyn ResumeGenerator>,
    ) -> Self {
        Self {
            store,
            board,
            generator,
        }
    }

    pub async fn run(
        &self,
        job: &ApplicationJob,
        attempt: Attempt,
        progress: &ProgressReporter,
    ) -> PipelineRun {
        let mut report = PipelineReport::default();
        let outcome = match job {
            ApplicationJob::GenerateAndApply {
                application_id,
                user_id,
                vacancy_id,
                cover_letter,
            } => {
                self.generate_and_apply(
                    *application_id,
                    *user_id,
                    *vacancy_id,
                    cover_letter.as_deref(),
                    &mut report,
                    progress,
                )
                .await
            }
            ApplicationJob::ReuseResume {
                application_id,
                user_id,
                vacancy_id,
                resume_ref,
            } => {
                self.reuse_resume(
                    *application_id,
                    *user_id,
                    *vacancy_id,
                    resume_ref,
                    &mut report,
                    progress,
                )
                .await
            }
        };

        if let Err(err) = &outcome {
            self.record_failure(job.application_id(), err, attempt).await;
        }

        PipelineRun { outcome, report }
    }

    async fn generate_and_apply(
        &self,
        application_id: Uuid,
        user_id: Uuid,
        vacancy_id: Uuid,
        cover_letter: Option<&str>,
        report: &mut PipelineReport,
        progress: &ProgressReporter,
    ) -> Result<PipelineOutcome, PipelineError> {
        match self.start(application_id, report).await? {
            Start::Ready => {}
            Start::Orphaned => return Ok(PipelineOutcome::Cancelled),
            Start::Finished(status) => return Ok(PipelineOutcome::AlreadyFinished(status)),
        }
        progress.checkpoint(10);

        let vacancy = self
            .active_posting(vacancy_id)
            .await
            .map_err(|err| report.fail(PipelineStep::LoadPosting, err))?;
        report.ok(PipelineStep::LoadPosting);
        progress.checkpoint(20);

        let user = self
            .applicant(user_id)
            .await
            .map_err(|err| report.fail(PipelineStep::LoadApplicant, err))?;
        let token = self
            .access_token(user_id)
            .await
            .map_err(|err| report.fail(PipelineStep::LoadApplicant, err))?;
        report.ok(PipelineStep::LoadApplicant);
        progress.checkpoint(30);

        // A missing profile only means the generator invents the history.
        let profile = self
            .store
            .find_profile(user_id)
            .await
            .map_err(|err| report.fail(PipelineStep::LoadProfile, err.into()))?;
        debug!(
            %application_id,
            experience_entries = profile.as_ref().map_or(0, |p| p.experience.len()),
            has_education = profile.as_ref().is_some_and(|p| p.education.is_some()),
            "loaded applicant profile"
        );
        report.ok(PipelineStep::LoadProfile);
        progress.checkpoint(45);

        let posting = PostingContext::from(&vacancy);
        let applicant = ApplicantContext::from(&user);
        let generated = self
            .generator
            .generate_resume(&posting, &applicant, profile.as_ref())
            .await
            .and_then(GeneratedResume::validate)
            .map_err(|err| {
                report.fail(
                    PipelineStep::GenerateResume,
                    PipelineError::Upstream(format!("resume generation failed: {err}")),
                )
            })?;
        info!(
            %application_id,
            title = %generated.title,
            skills = generated.skills.len(),
            experience_entries = generated.experience.len(),
            "generated resume"
        );
        report.ok(PipelineStep::GenerateResume);
        progress.checkpoint(60);

        let draft = ResumeDraft::for_vacancy(vacancy.hh_vacancy_id.as_deref());
        let hh_resume_id = self
            .board
            .create_resume_draft(&token, &draft)
            .await
            .map_err(|err| {
                report.fail(
                    PipelineStep::CreateRemoteResume,
                    PipelineError::Upstream(format!("failed to create remote resume: {err}")),
                )
            })?;
        report.ok(PipelineStep::CreateRemoteResume);
        progress.checkpoint(70);

        // Creation only accepts a skeleton; the content goes in with an update.
        let update = ResumeUpdate {
            title: generated.title.clone(),
            skills: generated.skills.clone(),
            experience: generated.experience.clone(),
        };
        self.board
            .update_resume(&token, &hh_resume_id, &update)
            .await
            .map_err(|err| {
                report.fail(
                    PipelineStep::UpdateRemoteResume,
                    PipelineError::Upstream(format!("failed to update remote resume: {err}")),
                )
            })?;
        report.ok(PipelineStep::UpdateRemoteResume);
        progress.checkpoint(75);

        match self.board.publish_resume(&token, &hh_resume_id).await {
            Ok(PublishOutcome::Published) => report.ok(PipelineStep::PublishResume),
            Ok(PublishOutcome::AlreadyPublished) => {
                warn!(%application_id, %hh_resume_id, step = %PipelineStep::PublishResume, "resume was published recently, skipping");
                report.warn(PipelineStep::PublishResume, "resume was published recently");
            }
            Ok(PublishOutcome::Rejected(reason)) => {
                warn!(%application_id, %hh_resume_id, step = %PipelineStep::PublishResume, %reason, "resume publication rejected");
                report.warn(
                    PipelineStep::PublishResume,
                    format!("publication rejected: {reason}"),
                );
            }
            Err(err) => {
                warn!(%application_id, %hh_resume_id, step = %PipelineStep::PublishResume, error = %err, "resume publication failed, may need manual publishing");
                report.warn(PipelineStep::PublishResume, err.to_string());
            }
        }
        progress.checkpoint(80);

        let letter = match cover_letter.filter(|letter| !letter.trim().is_empty()) {
            Some(letter) => letter.to_string(),
            None => self
                .cover_letter(&posting, &applicant, &generated.resume_context())
                .await
                .map_err(|err| report.fail(PipelineStep::CoverLetter, err))?,
        };
        report.ok(PipelineStep::CoverLetter);
        progress.checkpoint(85);

        match vacancy.hh_vacancy_id.as_deref() {
            Some(hh_vacancy_id) => match self
                .board
                .submit_application(&token, hh_vacancy_id, &hh_resume_id, Some(&letter))
                .await
            {
                Ok(()) => report.ok(PipelineStep::SubmitApplication),
                Err(err) => {
                    warn!(%application_id, %hh_vacancy_id, %hh_resume_id, step = %PipelineStep::SubmitApplication, error = %err, "job board rejected the application, it must be submitted manually");
                    report.warn(PipelineStep::SubmitApplication, err.to_string());
                }
            },
            None => report.skip(PipelineStep::SubmitApplication),
        }
        progress.checkpoint(90);

        // The record may have been cancelled while the job board was busy.
        let still_wanted = self
            .store
            .find_application(application_id)
            .await
            .map_err(|err| report.fail(PipelineStep::Finalize, err.into()))?
            .is_some();
        if !still_wanted {
            warn!(%application_id, %hh_resume_id, "application was cancelled while processing, result discarded");
            report.skip(PipelineStep::Finalize);
            return Ok(PipelineOutcome::Cancelled);
        }

        let resume = self
            .store
            .create_resume(NewResume {
                user_id,
                title: generated.title.clone(),
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                email: user.email.clone(),
                phone: user.phone.clone().unwrap_or_default(),
                position: generated.title.clone(),
                skills: generated.skills,
                experience: generated.experience,
                education: generated.education,
                hh_resume_id: Some(hh_resume_id),
            })
            .await
            .map_err(|err| report.fail(PipelineStep::Finalize, err.into()))?;

        let outcome = self
            .finish(application_id, resume.id, letter, report)
            .await?;
        if outcome == PipelineOutcome::Cancelled {
            self.discard_resume(resume.id).await;
        } else {
            progress.checkpoint(100);
        }
        Ok(outcome)
    }

    async fn reuse_resume(
        &self,
        application_id: Uuid,
        user_id: Uuid,
        vacancy_id: Uuid,
        resume_ref: &str,
        report: &mut PipelineReport,
        progress: &ProgressReporter,
    ) -> Result<PipelineOutcome, PipelineError> {
        match self.start(application_id, report).await? {
            Start::Ready => {}
            Start::Orphaned => return Ok(PipelineOutcome::Cancelled),
            Start::Finished(status) => return Ok(PipelineOutcome::AlreadyFinished(status)),
        }
        progress.checkpoint(10);

        let vacancy = self
            .posting(vacancy_id)
            .await
            .map_err(|err| report.fail(PipelineStep::LoadPosting, err))?;
        report.ok(PipelineStep::LoadPosting);
        progress.checkpoint(20);

        let resume = match self.store.find_resume_by_ref(user_id, resume_ref).await {
            Ok(Some(resume)) => resume,
            Ok(None) => {
                return Err(report.fail(
                    PipelineStep::ResolveResume,
                    PipelineError::NotFound(format!("resume {resume_ref}")),
                ))
            }
            Err(err) => return Err(report.fail(PipelineStep::ResolveResume, err.into())),
        };
        report.ok(PipelineStep::ResolveResume);
        progress.checkpoint(30);

        let user = self
            .applicant(user_id)
            .await
            .map_err(|err| report.fail(PipelineStep::LoadApplicant, err))?;
        let remote = vacancy
            .hh_vacancy_id
            .as_deref()
            .zip(resume.hh_resume_id.as_deref());
        // The token only matters when the job board will be called.
        let token = match remote {
            Some(_) => Some(
                self.access_token(user_id)
                    .await
                    .map_err(|err| report.fail(PipelineStep::LoadApplicant, err))?,
            ),
            None => None,
        };
        report.ok(PipelineStep::LoadApplicant);
        progress.checkpoint(40);

        let posting = PostingContext::from(&vacancy);
        let applicant = ApplicantContext::from(&user);
        let letter = self
            .cover_letter(&posting, &applicant, &ResumeContext::from(&resume))
            .await
            .map_err(|err| report.fail(PipelineStep::CoverLetter, err))?;
        report.ok(PipelineStep::CoverLetter);
        progress.checkpoint(70);

        match (remote, token) {
            (Some((hh_vacancy_id, hh_resume_id)), Some(token)) => {
                self.board
                    .submit_application(&token, hh_vacancy_id, hh_resume_id, Some(&letter))
                    .await
                    .map_err(|err| {
                        report.fail(
                            PipelineStep::SubmitApplication,
                            PipelineError::Upstream(format!("failed to submit application: {err}")),
                        )
                    })?;
                info!(%application_id, %hh_vacancy_id, %hh_resume_id, "submitted application to job board");
                report.ok(PipelineStep::SubmitApplication);
            }
            _ => {
                debug!(%application_id, "posting or resume has no upstream id, not submitting to job board");
                report.skip(PipelineStep::SubmitApplication);
            }
        }
        progress.checkpoint(90);

        let outcome = self
            .finish(application_id, resume.id, letter, report)
            .await?;
        progress.checkpoint(100);
        Ok(outcome)
    }

    async fn start(
        &self,
        application_id: Uuid,
        report: &mut PipelineReport,
    ) -> Result<Start, PipelineError> {
        let application = self
            .store
            .find_application(application_id)
            .await
            .map_err(|err| report.fail(PipelineStep::MarkProcessing, err.into()))?;

        let Some(application) = application else {
            info!(%application_id, "application no longer exists, skipping job");
            report.skip(PipelineStep::MarkProcessing);
            return Ok(Start::Orphaned);
        };

        if application.status.is_terminal() {
            info!(%application_id, status = %application.status, "application already finished, skipping job");
            report.skip(PipelineStep::MarkProcessing);
            return Ok(Start::Finished(application.status));
        }

        let updated = self
            .store
            .update_application(
                application_id,
                ApplicationChanges::status(ApplicationStatus::Processing),
            )
            .await
            .map_err(|err| report.fail(PipelineStep::MarkProcessing, err.into()))?;

        if !updated {
            info!(%application_id, "application was cancelled, skipping job");
            report.skip(PipelineStep::MarkProcessing);
            return Ok(Start::Orphaned);
        }

        report.ok(PipelineStep::MarkProcessing);
        Ok(Start::Ready)
    }

    async fn finish(
        &self,
        application_id: Uuid,
        resume_id: Uuid,
        cover_letter: String,
        report: &mut PipelineReport,
    ) -> Result<PipelineOutcome, PipelineError> {
        let changes = ApplicationChanges {
            status: Some(ApplicationStatus::Completed),
            resume_id: Some(resume_id),
            cover_letter: Some(cover_letter),
            failed_reason: Some(None),
            ..ApplicationChanges::default()
        };

        let updated = self
            .store
            .update_application(application_id, changes)
            .await
            .map_err(|err| report.fail(PipelineStep::Finalize, err.into()))?;

        if !updated {
            warn!(%application_id, %resume_id, "application was cancelled while processing, result discarded");
            report.skip(PipelineStep::Finalize);
            return Ok(PipelineOutcome::Cancelled);
        }

        info!(%application_id, %resume_id, "application completed");
        report.ok(PipelineStep::Finalize);
        Ok(PipelineOutcome::Completed { resume_id })
    }

    /// Removes a resume created for an application that vanished mid-run.
    async fn discard_resume(&self, resume_id: Uuid) {
        match self.store.delete_resume(resume_id).await {
            Ok(_) => debug!(%resume_id, "discarded resume of a cancelled application"),
            Err(err) => {
                warn!(%resume_id, error = %err, "failed to discard resume of a cancelled application")
            }
        }
    }

    /// Settles a job whose last permitted attempt never reported back. The
    /// pipeline is not run again; an unfinished record is marked `FAILED`.
    pub async fn abandon(&self, job: &ApplicationJob, attempt: Attempt) -> PipelineRun {
        let mut report = PipelineReport::default();
        let application_id = job.application_id();

        let outcome = match self.store.find_application(application_id).await {
            Err(err) => Err(report.fail(PipelineStep::MarkProcessing, err.into())),
            Ok(None) => {
                report.skip(PipelineStep::MarkProcessing);
                Ok(PipelineOutcome::Cancelled)
            }
            Ok(Some(application)) if application.status.is_terminal() => {
                report.skip(PipelineStep::MarkProcessing);
                Ok(PipelineOutcome::AlreadyFinished(application.status))
            }
            Ok(Some(_)) => Err(report.fail(
                PipelineStep::MarkProcessing,
                PipelineError::Interrupted("worker stopped before the job finished".into()),
            )),
        };

        if let Err(err) = &outcome {
            self.record_failure(application_id, err, attempt).await;
        }

        PipelineRun { outcome, report }
    }

    /// Writes the failure reason. The status only becomes `FAILED` once no
    /// attempts remain; until then the record stays `PROCESSING`.
    async fn record_failure(&self, application_id: Uuid, err: &PipelineError, attempt: Attempt) {
        error!(
            %application_id,
            attempt = attempt.number,
            max_attempts = attempt.max_attempts,
            error = %err,
            "submission pipeline failed"
        );

        let changes = ApplicationChanges {
            status: attempt.is_final().then_some(ApplicationStatus::Failed),
            failed_reason: Some(Some(err.to_string())),
            ..ApplicationChanges::default()
        };

        match self.store.update_application(application_id, changes).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(%application_id, "application disappeared before the failure could be recorded")
            }
            Err(store_err) => {
                error!(%application_id, error = %store_err, "failed to record pipeline failure")
            }
        }
    }

    async fn posting(&self, vacancy_id: Uuid) -> Result<Vacancy, PipelineError> {
        self.store
            .find_vacancy(vacancy_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("vacancy {vacancy_id}")))
    }

    async fn active_posting(&self, vacancy_id: Uuid) -> Result<Vacancy, PipelineError> {
        let vacancy = self.posting(vacancy_id).await?;
        if !vacancy.is_active() {
            return Err(PipelineError::Conflict(format!(
                "vacancy {vacancy_id} is not active"
            )));
        }
        Ok(vacancy)
    }

    async fn applicant(&self, user_id: Uuid) -> Result<User, PipelineError> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("user {user_id}")))
    }

    async fn access_token(&self, user_id: Uuid) -> Result<String, PipelineError> {
        self.store.hh_access_token(user_id).await?.ok_or_else(|| {
            PipelineError::Upstream("HeadHunter access token is missing or expired".into())
        })
    }

    async fn cover_letter(
        &self,
        posting: &PostingContext,
        applicant: &ApplicantContext,
        resume: &ResumeContext,
    ) -> Result<String, PipelineError> {
        let letter = self
            .generator
            .generate_cover_letter(posting, applicant, resume)
            .await
            .map_err(|err| PipelineError::Upstream(format!("cover letter generation failed: {err}")))?;

        let letter = letter.trim();
        if letter.is_empty() {
            return Err(PipelineError::Upstream(
                "generated cover letter is empty".into(),
            ));
        }
        Ok(letter.to_string())
    }
}

/// Queue handler that runs [`SubmissionOrchestrator`] and maps its result to
/// the queue's retry policy.
pub struct SubmissionJob {
    orchestrator: Arc<SubmissionOrchestrator>,
    policy: RetryPolicy,
}

impl SubmissionJob {
    pub fn new(orchestrator: Arc<SubmissionOrchestrator>, policy: RetryPolicy) -> Self {
        Self {
            orchestrator,
            policy,
        }
    }
}

#[async_trait]
impl JobHandler for SubmissionJob {
    async fn handle(&self, job: &ReservedJob, progress: &ProgressReporter) -> JobExecution {
        let payload = match job.decode() {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid application job payload: {err}"),
                }
            }
        };

        let attempt = Attempt::from(job);
        let run = if job.abandoned {
            self.orchestrator.abandon(&payload, attempt).await
        } else {
            self.orchestrator.run(&payload, attempt, progress).await
        };

        for (step, reason) in run.report.warnings() {
            debug!(job_id = %job.id, %step, reason, "step completed with a warning");
        }

        match run.outcome {
            Ok(PipelineOutcome::Completed { .. }) | Ok(PipelineOutcome::AlreadyFinished(_)) => {
                JobExecution::Success
            }
            Ok(PipelineOutcome::Cancelled) => JobExecution::Cancelled,
            Err(err) if attempt.is_final() => JobExecution::Failed {
                error: err.to_string(),
            },
            Err(err) => JobExecution::Retry {
                delay: self.policy.delay_for(attempt.number),
                error: err.to_string(),
            },
        }
    }
}
