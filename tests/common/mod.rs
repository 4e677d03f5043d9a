use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use jobjam::ai::{
    ApplicantContext, GeneratedResume, GeneratorError, PostingContext, ResumeContext,
    ResumeGenerator,
};
use jobjam::auth::jwt::JwtService;
use jobjam::config::AppConfig;
use jobjam::hh::{HhError, JobBoardClient, PublishOutcome, ResumeDraft, ResumeUpdate};
use jobjam::jobs::{JobQueue, MemoryJobQueue, RetryPolicy, DEFAULT_LEASE_TIMEOUT};
use jobjam::models::{
    Education, Experience, NewResume, Resume, User, UserProfile, Vacancy, VACANCY_STATUS_ACTIVE,
};
use jobjam::routes;
use jobjam::state::AppState;
use jobjam::store::{MemoryRecordStore, RecordStore};
use jobjam::workers::Worker;
use jobjam::{QueueGateway, SubmissionJob, SubmissionOrchestrator};
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const MAX_ATTEMPTS: u32 = 3;

/// A call the pipeline made against the job board.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardCall {
    CreateDraft {
        vacancy_id: Option<u64>,
    },
    Update {
        resume_id: String,
        title: String,
    },
    Publish {
        resume_id: String,
    },
    Submit {
        vacancy_id: String,
        resume_id: String,
        cover_letter: Option<String>,
    },
}

#[derive(Default)]
pub struct FakeJobBoard {
    calls: Mutex<Vec<BoardCall>>,
    fail_create: AtomicBool,
    fail_submit: AtomicBool,
    publish: Mutex<Option<PublishOutcome>>,
    delete_on_submit: Mutex<Option<(Arc<MemoryRecordStore>, Uuid)>>,
}

#[allow(dead_code)]
impl FakeJobBoard {
    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_submit(&self) {
        self.fail_submit.store(true, Ordering::SeqCst);
    }

    pub async fn publish_returns(&self, outcome: PublishOutcome) {
        *self.publish.lock().await = Some(outcome);
    }

    /// Deletes the application record while its submission is in flight,
    /// the way a user cancelling at that moment would.
    pub async fn delete_on_submit(&self, store: Arc<MemoryRecordStore>, application_id: Uuid) {
        *self.delete_on_submit.lock().await = Some((store, application_id));
    }

    pub async fn calls(&self) -> Vec<BoardCall> {
        self.calls.lock().await.clone()
    }

    pub async fn submissions(&self) -> Vec<BoardCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|call| matches!(call, BoardCall::Submit { .. }))
            .collect()
    }
}

#[async_trait]
impl JobBoardClient for FakeJobBoard {
    async fn create_resume_draft(&self, _token: &str, draft: &ResumeDraft) -> Result<String, HhError> {
        self.calls.lock().await.push(BoardCall::CreateDraft {
            vacancy_id: draft.vacancy_id,
        });
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(HhError::Api {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        Ok("hh-resume-1".to_string())
    }

    async fn update_resume(
        &self,
        _token: &str,
        resume_id: &str,
        update: &ResumeUpdate,
    ) -> Result<(), HhError> {
        self.calls.lock().await.push(BoardCall::Update {
            resume_id: resume_id.to_string(),
            title: update.title.clone(),
        });
        Ok(())
    }

    async fn publish_resume(&self, _token: &str, resume_id: &str) -> Result<PublishOutcome, HhError> {
        self.calls.lock().await.push(BoardCall::Publish {
            resume_id: resume_id.to_string(),
        });
        Ok(self
            .publish
            .lock()
            .await
            .clone()
            .unwrap_or(PublishOutcome::Published))
    }

    async fn submit_application(
        &self,
        _token: &str,
        vacancy_id: &str,
        resume_id: &str,
        cover_letter: Option<&str>,
    ) -> Result<(), HhError> {
        self.calls.lock().await.push(BoardCall::Submit {
            vacancy_id: vacancy_id.to_string(),
            resume_id: resume_id.to_string(),
            cover_letter: cover_letter.map(str::to_string),
        });
        if let Some((store, application_id)) = self.delete_on_submit.lock().await.take() {
            store
                .delete_application(application_id)
                .await
                .map_err(|err| HhError::Api {
                    status: 500,
                    message: err.to_string(),
                })?;
        }
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(HhError::Forbidden("vacancy is archived".into()));
        }
        Ok(())
    }
}

/// Deterministic generator: the resume title follows the posting title.
#[derive(Default)]
pub struct FakeGenerator {
    fail_resume: AtomicBool,
    empty_letter: AtomicBool,
    hang_resume: AtomicBool,
}

#[allow(dead_code)]
impl FakeGenerator {
    /// Resumes come back without skills, which validation rejects.
    pub fn fail_resume(&self) {
        self.fail_resume.store(true, Ordering::SeqCst);
    }

    pub fn empty_letter(&self) {
        self.empty_letter.store(true, Ordering::SeqCst);
    }

    /// Resume generation never returns while set.
    pub fn hang_resume(&self, hang: bool) {
        self.hang_resume.store(hang, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResumeGenerator for FakeGenerator {
    async fn generate_resume(
        &self,
        posting: &PostingContext,
        _applicant: &ApplicantContext,
        profile: Option<&UserProfile>,
    ) -> Result<GeneratedResume, GeneratorError> {
        if self.hang_resume.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_resume.load(Ordering::SeqCst) {
            return Ok(GeneratedResume {
                title: posting.title.clone(),
                skills: vec!["  ".to_string()],
                experience: Vec::new(),
                education: None,
            });
        }
        Ok(GeneratedResume {
            title: posting.title.clone(),
            skills: if posting.skills.is_empty() {
                vec!["Communication".to_string()]
            } else {
                posting.skills.clone()
            },
            experience: profile.map(|p| p.experience.clone()).unwrap_or_default(),
            education: profile.and_then(|p| p.education.clone()),
        })
    }

    async fn generate_cover_letter(
        &self,
        posting: &PostingContext,
        applicant: &ApplicantContext,
        _resume: &ResumeContext,
    ) -> Result<String, GeneratorError> {
        if self.empty_letter.load(Ordering::SeqCst) {
            return Ok("  \n".to_string());
        }
        Ok(format!(
            "Dear {} team, {} would like to join as {}.",
            posting.company, applicant.first_name, posting.title
        ))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub queue: Arc<MemoryJobQueue>,
    pub store: Arc<MemoryRecordStore>,
    pub board: Arc<FakeJobBoard>,
    pub generator: Arc<FakeGenerator>,
    pub orchestrator: Arc<SubmissionOrchestrator>,
    router: Router,
    worker: Worker,
}

#[allow(dead_code)]
impl TestApp {
    pub fn new() -> Result<Self> {
        Self::with_lease_timeout(DEFAULT_LEASE_TIMEOUT)
    }

    /// A zero lease lets the next tick take over a job whose run was dropped.
    pub fn with_lease_timeout(lease_timeout: Duration) -> Result<Self> {
        let config = test_config();
        // No backoff: a retried job is due again on the next tick.
        let policy = RetryPolicy {
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::ZERO,
        };

        let queue = Arc::new(MemoryJobQueue::new().with_lease_timeout(lease_timeout));
        let store = Arc::new(MemoryRecordStore::new());
        let board = Arc::new(FakeJobBoard::default());
        let generator = Arc::new(FakeGenerator::default());

        let gateway = QueueGateway::new(queue.clone(), store.clone(), policy);
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(config, gateway, jwt);
        let router = routes::create_router(state.clone());

        let orchestrator = Arc::new(SubmissionOrchestrator::new(
            store.clone(),
            board.clone(),
            generator.clone(),
        ));
        let handler = Arc::new(SubmissionJob::new(orchestrator.clone(), policy));
        let worker = Worker::new(queue.clone(), handler, Duration::from_millis(10));

        Ok(Self {
            state,
            queue,
            store,
            board,
            generator,
            orchestrator,
            router,
            worker,
        })
    }

    pub fn gateway(&self) -> &QueueGateway {
        &self.state.gateway
    }

    /// Runs one job, if any is due.
    pub async fn tick(&self) -> Result<bool> {
        self.worker.tick().await.context("worker tick failed")
    }

    /// Runs jobs until none is due.
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.tick().await? {
            processed += 1;
        }
        Ok(processed)
    }

    pub async fn insert_user(&self, first_name: &str, with_token: bool) -> Uuid {
        let user = User {
            id: Uuid::new_v4(),
            email: format!("{}@example.kz", first_name.to_lowercase()),
            first_name: first_name.to_string(),
            last_name: "Tester".to_string(),
            phone: Some("+77010000000".to_string()),
        };
        let user_id = user.id;
        self.store.insert_user(user).await;
        if with_token {
            let expires = Utc::now().naive_utc() + chrono::Duration::hours(1);
            self.store
                .set_hh_token(user_id, format!("token-{user_id}"), Some(expires))
                .await;
        }
        user_id
    }

    pub async fn insert_profile(&self, user_id: Uuid) {
        self.store
            .insert_profile(
                user_id,
                UserProfile {
                    experience: vec![Experience {
                        company: "Kaspi".to_string(),
                        position: "Backend Developer".to_string(),
                        description: "Payments APIs".to_string(),
                        start: "2021-03-01".to_string(),
                        end: None,
                    }],
                    education: Some(Education {
                        level: "higher".to_string(),
                        name: "Computer Science".to_string(),
                        organization: "KBTU".to_string(),
                        year: 2020,
                    }),
                },
            )
            .await;
    }

    pub async fn insert_vacancy(&self, title: &str, hh_vacancy_id: Option<&str>) -> Uuid {
        self.insert_vacancy_with_status(title, hh_vacancy_id, VACANCY_STATUS_ACTIVE)
            .await
    }

    pub async fn insert_vacancy_with_status(
        &self,
        title: &str,
        hh_vacancy_id: Option<&str>,
        status: &str,
    ) -> Uuid {
        let vacancy = Vacancy {
            id: Uuid::new_v4(),
            title: title.to_string(),
            company: "Tech Corp".to_string(),
            city: Some("Almaty".to_string()),
            description: format!("We are hiring a {title}"),
            requirements: Some("3+ years of Rust".to_string()),
            responsibilities: None,
            skills: vec!["Rust".to_string(), "PostgreSQL".to_string()],
            status: status.to_string(),
            hh_vacancy_id: hh_vacancy_id.map(str::to_string),
        };
        let vacancy_id = vacancy.id;
        self.store.insert_vacancy(vacancy).await;
        vacancy_id
    }

    pub async fn insert_resume(&self, user_id: Uuid, hh_resume_id: Option<&str>) -> Result<Resume> {
        let resume = self
            .store
            .create_resume(NewResume {
                user_id,
                title: "Backend Developer".to_string(),
                first_name: "Aigerim".to_string(),
                last_name: "Tester".to_string(),
                email: "aigerim@example.kz".to_string(),
                phone: String::new(),
                position: "Backend Developer".to_string(),
                skills: vec!["Rust".to_string()],
                experience: Vec::new(),
                education: None,
                hh_resume_id: hh_resume_id.map(str::to_string),
            })
            .await?;
        Ok(resume)
    }

    pub fn token_for(&self, user_id: Uuid) -> Result<String> {
        self.state
            .jwt
            .generate_token(user_id, &format!("{user_id}@example.kz"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::DELETE).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn job_count(&self) -> Result<u64> {
        Ok(self.queue.stats().await?.total)
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused@localhost/unused".to_string(),
        database_max_pool_size: 1,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        jwt_expiry_minutes: 60,
        cors_allowed_origin: None,
        hh_api_base_url: "http://hh.invalid".to_string(),
        hh_host: "hh.kz".to_string(),
        hh_user_agent: "JobJam-Test/1.0".to_string(),
        openai_api_key: "test-key".to_string(),
        openai_base_url: "http://openai.invalid".to_string(),
        openai_model: "test-model".to_string(),
        worker_concurrency: 1,
        worker_poll_interval_ms: 10,
        job_max_attempts: MAX_ATTEMPTS,
        job_backoff_base_ms: 0,
        job_lease_timeout_secs: 300,
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body.collect().await.context("failed to read body")?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_json(body: Body) -> Result<serde_json::Value> {
    let bytes = body_to_vec(body).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
