use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::gateway::ApplyError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<ApplyError> for AppError {
    fn from(value: ApplyError) -> Self {
        let status = match &value {
            ApplyError::NotFound(_) => StatusCode::NOT_FOUND,
            ApplyError::Conflict(_) => StatusCode::CONFLICT,
            ApplyError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApplyError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApplyError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %value, status = status.as_u16(), "request failed");
        }
        AppError::new(status, value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobQueueError;

    #[test]
    fn apply_errors_map_to_http_statuses() {
        let cases = [
            (ApplyError::NotFound("vacancy".into()), StatusCode::NOT_FOUND),
            (ApplyError::Conflict("duplicate".into()), StatusCode::CONFLICT),
            (ApplyError::Forbidden("not yours".into()), StatusCode::FORBIDDEN),
            (
                ApplyError::Queue(JobQueueError::Pool("timed out".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(AppError::from(error).status(), expected);
        }
    }
}
