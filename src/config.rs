use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;
use crate::jobs::RetryPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_minutes: i64,
    pub cors_allowed_origin: Option<String>,
    pub hh_api_base_url: String,
    pub hh_host: String,
    pub hh_user_agent: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub worker_concurrency: usize,
    pub worker_poll_interval_ms: u64,
    pub job_max_attempts: u32,
    pub job_backoff_base_ms: u64,
    pub job_lease_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "jobjam".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "jobjam-clients".to_string());
        let jwt_expiry_minutes = env::var("JWT_EXPIRY_MINUTES")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("JWT_EXPIRY_MINUTES must be an integer")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let hh_api_base_url =
            env::var("HH_API_BASE_URL").unwrap_or_else(|_| "https://api.hh.ru".to_string());
        let hh_host = env::var("HH_HOST").unwrap_or_else(|_| "hh.kz".to_string());
        let hh_user_agent = env::var("HH_USER_AGENT")
            .unwrap_or_else(|_| "JobJam/1.0 (support@jobjam.kz)".to_string());
        let openai_api_key = env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?;
        let openai_base_url = env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let openai_model = env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let worker_concurrency = env::var("WORKER_CONCURRENCY")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .context("WORKER_CONCURRENCY must be an integer")?;
        let worker_poll_interval_ms = env::var("WORKER_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .context("WORKER_POLL_INTERVAL_MS must be an integer")?;
        let job_max_attempts = env::var("JOB_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .context("JOB_MAX_ATTEMPTS must be an integer")?;
        let job_backoff_base_ms = env::var("JOB_BACKOFF_BASE_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .context("JOB_BACKOFF_BASE_MS must be an integer")?;
        let job_lease_timeout_secs = env::var("JOB_LEASE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .context("JOB_LEASE_TIMEOUT_SECS must be an integer")?;

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_minutes,
            cors_allowed_origin,
            hh_api_base_url,
            hh_host,
            hh_user_agent,
            openai_api_key,
            openai_base_url,
            openai_model,
            worker_concurrency,
            worker_poll_interval_ms,
            job_max_attempts,
            job_backoff_base_ms,
            job_lease_timeout_secs,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.job_max_attempts.max(1),
            base_delay: Duration::from_millis(self.job_backoff_base_ms),
        }
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }

    /// How long an active job may go without a heartbeat before another
    /// worker takes it over.
    pub fn job_lease_timeout(&self) -> Duration {
        Duration::from_secs(self.job_lease_timeout_secs.max(1))
    }

    /// Heartbeats run four times per lease so one slow write does not
    /// forfeit it.
    pub fn worker_heartbeat_interval(&self) -> Duration {
        self.job_lease_timeout() / 4
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
