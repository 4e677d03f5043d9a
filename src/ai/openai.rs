use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::prompts::{cover_letter_prompt, resume_prompt, COVER_LETTER_SYSTEM, RESUME_SYSTEM};
use super::{
    ApplicantContext, GeneratedResume, GeneratorError, PostingContext, ResumeContext,
    ResumeGenerator,
};
use crate::config::AppConfig;
use crate::models::UserProfile;

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Generator backed by the OpenAI chat completions API.
#[derive(Clone)]
pub struct OpenAiGenerator {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(config: &AppConfig) -> Result<Self, GeneratorError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            api_key: config.openai_api_key.clone(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            model: config.openai_model.clone(),
        })
    }

    /// Sends one chat completion and returns the text of the first choice.
    /// Retries on 429 and 5xx with exponential backoff.
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        json: bool,
    ) -> Result<String, GeneratorError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.7,
            response_format: json.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };
        let url = format!("{}/chat/completions", self.base_url);

        let mut last_error: Option<GeneratorError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying completion request");
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    last_error = Some(GeneratorError::Http(err));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let text = response.text().await.unwrap_or_default();
                warn!(status = status.as_u16(), "completion request throttled or failed");
                last_error = Some(GeneratorError::Api {
                    status: status.as_u16(),
                    message: text,
                });
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiError>(&text)
                    .map(|err| err.error.message)
                    .unwrap_or(text);
                return Err(GeneratorError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let parsed: ChatResponse = response.json().await?;
            if let Some(usage) = &parsed.usage {
                debug!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "completion succeeded"
                );
            }

            return parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .map(|content| content.trim().to_string())
                .filter(|content| !content.is_empty())
                .ok_or(GeneratorError::EmptyContent);
        }

        Err(last_error.unwrap_or(GeneratorError::EmptyContent))
    }
}

/// Strips ```json ... ``` or ``` ... ``` fences the model sometimes adds.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let inner = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"));
    match inner {
        Some(stripped) => stripped
            .trim_start()
            .strip_suffix("```")
            .map(str::trim)
            .unwrap_or_else(|| stripped.trim_start()),
        None => text,
    }
}

fn parse_resume(text: &str) -> Result<GeneratedResume, GeneratorError> {
    let resume: GeneratedResume = serde_json::from_str(strip_json_fences(text))?;
    resume.validate()
}

#[async_trait]
impl ResumeGenerator for OpenAiGenerator {
    async fn generate_resume(
        &self,
        posting: &PostingContext,
        applicant: &ApplicantContext,
        profile: Option<&UserProfile>,
    ) -> Result<GeneratedResume, GeneratorError> {
        let prompt = resume_prompt(posting, applicant, profile);
        let text = self.complete(RESUME_SYSTEM, &prompt, true).await?;
        let mut resume = parse_resume(&text)?;

        // Real profile data wins over whatever the model invented.
        if let Some(profile) = profile {
            if resume.education.is_none() {
                resume.education = profile.education.clone();
            }
        }
        Ok(resume)
    }

    async fn generate_cover_letter(
        &self,
        posting: &PostingContext,
        applicant: &ApplicantContext,
        resume: &ResumeContext,
    ) -> Result<String, GeneratorError> {
        let prompt = cover_letter_prompt(posting, applicant, resume);
        self.complete(COVER_LETTER_SYSTEM, &prompt, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences_with_json_tag() {
        let input = "```json\n{\"title\": \"Backend Dev\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"title\": \"Backend Dev\"}");
    }

    #[test]
    fn strips_fences_without_tag() {
        let input = "```\n{\"title\": \"Backend Dev\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"title\": \"Backend Dev\"}");
    }

    #[test]
    fn leaves_plain_json_alone() {
        let input = "  {\"title\": \"Backend Dev\"} ";
        assert_eq!(strip_json_fences(input), "{\"title\": \"Backend Dev\"}");
    }

    #[test]
    fn parses_fenced_resume() {
        let text = "```json\n{\"title\": \"Backend Dev\", \"skills\": [\"Go\"], \"experience\": [], \"education\": null}\n```";
        let resume = parse_resume(text).unwrap();
        assert_eq!(resume.title, "Backend Dev");
        assert_eq!(resume.skills, vec!["Go".to_string()]);
    }

    #[test]
    fn incomplete_experience_and_string_year_still_parse() {
        let text = r#"{
            "title": "Backend Dev",
            "skills": ["Go"],
            "experience": [{"company": "Kaspi", "position": "Dev", "start": "2021-01-01"}],
            "education": {"level": "higher", "name": "CS", "organization": "KBTU", "year": "2019"}
        }"#;
        let resume = parse_resume(text).unwrap();
        assert_eq!(resume.experience.len(), 1);
        assert!(resume.experience[0].description.is_empty());
        assert_eq!(resume.education.map(|e| e.year), Some(2019));
    }

    #[test]
    fn resume_without_title_is_malformed() {
        assert!(matches!(
            parse_resume(r#"{"skills": ["Go"]}"#),
            Err(GeneratorError::Malformed(_))
        ));
    }

    #[test]
    fn malformed_resume_is_rejected() {
        assert!(matches!(parse_resume("not json"), Err(GeneratorError::Parse(_))));
        assert!(matches!(
            parse_resume("{\"title\": \"Backend Dev\", \"skills\": []}"),
            Err(GeneratorError::Malformed(_))
        ));
    }
}
