use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::gateway::{ApplicationView, Cancellation, EnqueueReceipt};
use crate::jobs::QueueStats;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct QueueApplicationRequest {
    pub vacancy_id: Uuid,
    pub cover_letter: Option<String>,
}

#[derive(Deserialize)]
pub struct SimpleApplyRequest {
    pub vacancy_id: Uuid,
    /// Local resume id or HeadHunter resume id.
    pub resume_id: String,
}

pub async fn queue_application(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<QueueApplicationRequest>,
) -> AppResult<(StatusCode, Json<EnqueueReceipt>)> {
    let receipt = state
        .gateway
        .enqueue_generated(user.user_id, payload.vacancy_id, payload.cover_letter)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

pub async fn simple_apply(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<SimpleApplyRequest>,
) -> AppResult<(StatusCode, Json<EnqueueReceipt>)> {
    let resume_ref = payload.resume_id.trim();
    if resume_ref.is_empty() {
        return Err(AppError::bad_request("resume_id must not be empty"));
    }

    let receipt = state
        .gateway
        .enqueue_with_existing_resume(user.user_id, payload.vacancy_id, resume_ref)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

pub async fn list_applications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ApplicationView>>> {
    Ok(Json(state.gateway.list_applications(user.user_id).await?))
}

pub async fn get_application(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(application_id): Path<Uuid>,
) -> AppResult<Json<ApplicationView>> {
    Ok(Json(
        state
            .gateway
            .get_application(application_id, user.user_id)
            .await?,
    ))
}

pub async fn cancel_application(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(application_id): Path<Uuid>,
) -> AppResult<Json<Cancellation>> {
    Ok(Json(
        state.gateway.cancel(application_id, user.user_id).await?,
    ))
}

pub async fn queue_stats(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<Json<QueueStats>> {
    Ok(Json(state.gateway.queue_stats().await?))
}
