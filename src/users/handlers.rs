use axum::{
    extract::State,
    routing::{delete, get, patch},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{PublicUser, UpdateRoleRequest, UpdateRoleResponse},
    repo_types::UserSummary,
};
use crate::{
    auth::{claims::Role, extractors::AuthUser},
    error::ApiError,
    extract::{ApiJson, ApiPath},
    state::AppState,
};

/// Every route here is ADMIN-only; the gates are applied by `users::router`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id/role", patch(update_role))
        .route("/users/:id", delete(delete_user))
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserSummary>>, ApiError> {
    Ok(Json(state.users.list().await?))
}

#[instrument(skip(state, payload))]
pub async fn update_role(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateRoleRequest>,
) -> Result<Json<UpdateRoleResponse>, ApiError> {
    let role: Role = payload
        .role
        .as_deref()
        .and_then(|r| r.parse().ok())
        .ok_or_else(|| ApiError::bad_request("Valid role (ADMIN or USER) is required"))?;

    let user = state
        .users
        .update_role(id, role)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    info!(admin_id = %caller.sub, user_id = %id, role = %role, "user role updated");
    Ok(Json(UpdateRoleResponse {
        message: "User role updated successfully",
        user: PublicUser::from(user),
    }))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Value>, ApiError> {
    if id == caller.sub {
        warn!(admin_id = %caller.sub, "admin tried to delete own account");
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    if !state.users.delete(id).await? {
        return Err(ApiError::not_found("User not found"));
    }

    info!(admin_id = %caller.sub, user_id = %id, "user deleted");
    Ok(Json(json!({ "message": "User deleted successfully" })))
}
