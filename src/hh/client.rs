use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use reqwest::{multipart::Form, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{HhError, JobBoardClient, PublishOutcome, ResumeDraft, ResumeUpdate};
use crate::config::AppConfig;

const LOCALE: &str = "RU";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ResumeProfileResponse {
    resume: Option<ResumeRef>,
}

#[derive(Debug, Deserialize)]
struct ResumeRef {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    description: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    #[serde(rename = "type")]
    kind: Option<String>,
    value: Option<String>,
}

/// Pulls a readable message out of an HeadHunter error body, falling back to
/// the raw text.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed
            .description
            .or_else(|| {
                let parts: Vec<String> = parsed
                    .errors
                    .iter()
                    .filter_map(|item| match (&item.kind, &item.value) {
                        (Some(kind), Some(value)) => Some(format!("{kind}: {value}")),
                        (Some(kind), None) => Some(kind.clone()),
                        (None, Some(value)) => Some(value.clone()),
                        (None, None) => None,
                    })
                    .collect();
                (!parts.is_empty()).then(|| parts.join(", "))
            })
            .unwrap_or_else(|| body.to_string()),
        Err(_) => body.to_string(),
    }
}

fn parse_resume_id(body: &str) -> Result<String, HhError> {
    let parsed: ResumeProfileResponse =
        serde_json::from_str(body).map_err(|_| HhError::MissingResumeId)?;
    parsed
        .resume
        .and_then(|resume| resume.id)
        .filter(|id| !id.is_empty())
        .ok_or(HhError::MissingResumeId)
}

/// HTTP client for the HeadHunter API.
#[derive(Clone)]
pub struct HhClient {
    client: Client,
    base_url: String,
    host: String,
    user_agent: String,
}

impl HhClient {
    pub fn new(config: &AppConfig) -> Result<Self, HhError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: config.hh_api_base_url.trim_end_matches('/').to_string(),
            host: config.hh_host.clone(),
            user_agent: config.hh_user_agent.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        request
            .bearer_auth(token)
            .header("HH-User-Agent", &self.user_agent)
            .query(&[("host", self.host.as_str()), ("locale", LOCALE)])
    }

    async fn read_failure(response: Response) -> (StatusCode, String) {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        (status, error_message(&body))
    }
}

#[async_trait]
impl JobBoardClient for HhClient {
    async fn create_resume_draft(&self, token: &str, draft: &ResumeDraft) -> Result<String, HhError> {
        let response = self
            .authorized(self.client.post(self.url("/resume_profile")), token)
            .json(&draft.body())
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = Self::read_failure(response).await;
            warn!(status = status.as_u16(), error = %message, "failed to create resume profile");
            return Err(HhError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        let resume_id = parse_resume_id(&body)?;
        info!(hh_resume_id = %resume_id, "created resume profile");
        Ok(resume_id)
    }

    async fn update_resume(
        &self,
        token: &str,
        resume_id: &str,
        update: &ResumeUpdate,
    ) -> Result<(), HhError> {
        let body = update.body(Utc::now().year());
        let response = self
            .authorized(
                self.client
                    .put(self.url(&format!("/resume_profile/{resume_id}"))),
                token,
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = Self::read_failure(response).await;
            warn!(hh_resume_id = %resume_id, status = status.as_u16(), error = %message, "failed to update resume profile");
            return Err(HhError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!(hh_resume_id = %resume_id, "updated resume profile");
        Ok(())
    }

    async fn publish_resume(
        &self,
        token: &str,
        resume_id: &str,
    ) -> Result<PublishOutcome, HhError> {
        let response = self
            .authorized(
                self.client
                    .post(self.url(&format!("/resumes/{resume_id}/publish"))),
                token,
            )
            .send()
            .await?;

        if response.status().is_success() {
            info!(hh_resume_id = %resume_id, "published resume");
            return Ok(PublishOutcome::Published);
        }

        let (status, message) = Self::read_failure(response).await;
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                warn!(hh_resume_id = %resume_id, "resume cannot be republished yet");
                Ok(PublishOutcome::AlreadyPublished)
            }
            StatusCode::BAD_REQUEST => {
                warn!(hh_resume_id = %resume_id, error = %message, "resume publication rejected");
                Ok(PublishOutcome::Rejected(message))
            }
            StatusCode::NOT_FOUND => Err(HhError::NotFound(format!("resume {resume_id}"))),
            other => Err(HhError::Api {
                status: other.as_u16(),
                message,
            }),
        }
    }

    async fn submit_application(
        &self,
        token: &str,
        vacancy_id: &str,
        resume_id: &str,
        cover_letter: Option<&str>,
    ) -> Result<(), HhError> {
        let mut form = Form::new()
            .text("vacancy_id", vacancy_id.to_string())
            .text("resume_id", resume_id.to_string());
        if let Some(message) = cover_letter.filter(|message| !message.is_empty()) {
            form = form.text("message", message.to_string());
        }

        let response = self
            .authorized(self.client.post(self.url("/negotiations")), token)
            .multipart(form)
            .send()
            .await?;

        if response.status().is_success() {
            info!(hh_vacancy_id = %vacancy_id, hh_resume_id = %resume_id, "submitted application");
            return Ok(());
        }

        let (status, message) = Self::read_failure(response).await;
        match status {
            StatusCode::BAD_REQUEST => Err(HhError::BadRequest(message)),
            StatusCode::FORBIDDEN => Err(HhError::Forbidden(message)),
            StatusCode::TOO_MANY_REQUESTS => Err(HhError::RateLimited),
            other => Err(HhError::Api {
                status: other.as_u16(),
                message,
            }),
        }
    }
}
