use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{CreateTemplateRequest, CreatedTemplateResponse, SubmitRequest, SubmittedResponse},
    repo_types::{
        FeedbackTemplate, NewResponse, ResponseWithRelations, ResponseWithTemplate,
        TemplateRef, TemplateWithCount,
    },
};
use crate::{
    auth::extractors::AuthUser,
    error::ApiError,
    extract::{ApiJson, ApiPath},
    state::AppState,
};

const DEFAULT_RATING: i32 = 5;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/feedback/templates", post(create_template).get(list_templates))
        .route("/feedback/templates/:id", delete(delete_template))
        .route("/feedback/responses", get(list_responses))
}

pub fn member_routes() -> Router<AppState> {
    Router::new()
        .route("/feedback/active", get(list_active))
        .route("/feedback/submit", post(submit))
        .route("/feedback/my-responses", get(my_responses))
}

#[instrument(skip(state, payload))]
pub async fn create_template(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<CreatedTemplateResponse>), ApiError> {
    let title = payload.title.as_deref().filter(|t| !t.is_empty());
    let (Some(title), Some(question)) = (title, payload.final_question()) else {
        return Err(ApiError::bad_request("Title and question(s) are required"));
    };

    let template = state.feedback.create_template(title, &question).await?;
    info!(template_id = %template.id, "feedback template created");
    Ok((
        StatusCode::CREATED,
        Json(CreatedTemplateResponse {
            message: "Feedback template created",
            template,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn list_templates(
    State(state): State<AppState>,
) -> Result<Json<Vec<TemplateWithCount>>, ApiError> {
    Ok(Json(state.feedback.list_templates().await?))
}

#[instrument(skip(state))]
pub async fn delete_template(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Value>, ApiError> {
    if !state.feedback.delete_template(id).await? {
        return Err(ApiError::not_found("Feedback template not found"));
    }
    info!(template_id = %id, "feedback template deleted");
    Ok(Json(json!({ "message": "Template deleted" })))
}

#[instrument(skip(state))]
pub async fn list_responses(
    State(state): State<AppState>,
) -> Result<Json<Vec<ResponseWithRelations>>, ApiError> {
    Ok(Json(state.feedback.list_responses().await?))
}

#[instrument(skip(state))]
pub async fn list_active(
    State(state): State<AppState>,
) -> Result<Json<Vec<FeedbackTemplate>>, ApiError> {
    Ok(Json(state.feedback.list_active_templates().await?))
}

#[instrument(skip(state, payload))]
pub async fn submit(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiJson(payload): ApiJson<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmittedResponse>), ApiError> {
    let (Some(template_id), Some(answer)) = (payload.template_id, payload.final_answer()) else {
        return Err(ApiError::bad_request(
            "Template ID, answer(s), and authentication required",
        ));
    };

    // tokens outlive account deletion
    if state.users.find_by_id(caller.sub).await?.is_none() {
        warn!(user_id = %caller.sub, "token holder no longer exists");
        return Err(ApiError::Unauthorized);
    }

    let template = state
        .feedback
        .find_template(template_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Feedback template not found"))?;
    if !template.is_active {
        return Err(ApiError::bad_request(
            "This feedback is no longer accepting responses",
        ));
    }

    let response = state
        .feedback
        .create_response(NewResponse {
            template_id,
            user_id: caller.sub,
            answer,
            rating: payload.rating.unwrap_or(DEFAULT_RATING),
        })
        .await?;

    info!(response_id = %response.id, %template_id, user_id = %caller.sub, "feedback submitted");
    Ok((
        StatusCode::CREATED,
        Json(SubmittedResponse {
            message: "Feedback submitted successfully",
            response: ResponseWithTemplate {
                response,
                template: TemplateRef::from(&template),
            },
        }),
    ))
}

#[instrument(skip(state))]
pub async fn my_responses(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<ResponseWithTemplate>>, ApiError> {
    Ok(Json(state.feedback.list_responses_by_user(caller.sub).await?))
}
