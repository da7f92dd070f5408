use axum::{extract::State, routing::post, Json, Router};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    dto::{ForgotPasswordRequest, MessageResponse, ResetPasswordRequest},
    services::{consume_reset, request_reset, RESET_REQUESTED_MESSAGE},
};
use crate::{error::ApiError, extract::ApiJson, state::AppState};

/// Unauthenticated: the caller cannot prove identity yet.
pub fn reset_routes() -> Router<AppState> {
    Router::new()
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = payload
        .email
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::bad_request("Email required"))?;

    request_reset(&state, &email).await?;

    Ok(Json(MessageResponse {
        message: RESET_REQUESTED_MESSAGE,
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
    let (Some(user_id), Some(token), Some(new_password)) = (
        non_empty(payload.user_id),
        non_empty(payload.token),
        non_empty(payload.new_password),
    ) else {
        return Err(ApiError::bad_request("Missing parameters"));
    };

    let Ok(user_id) = Uuid::parse_str(&user_id) else {
        warn!("reset attempted with malformed user id");
        return Err(ApiError::bad_request("Invalid or expired token"));
    };

    consume_reset(&state, user_id, &token, &new_password).await?;

    Ok(Json(MessageResponse {
        message: "Password updated",
    }))
}
