use anyhow::anyhow;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    app_state::AppState,
    counsel::broadcaster::NewRequest,
    error::{AppError, AppResult},
    handlers::v1::{require_role, validate_payload},
    models::identity::{Identity, Role},
};

#[derive(Deserialize, Validate)]
pub struct HelpRequestPayload {
    #[validate(length(min = 1, max = 100, message = "Region must be 1-100 characters"))]
    pub region: String,
    #[validate(length(min = 1, max = 100, message = "Category must be 1-100 characters"))]
    pub category: String,
    #[validate(length(max = 2000, message = "Note must be at most 2000 characters"))]
    #[serde(default)]
    pub note: String,
    #[validate(length(min = 6, max = 32, message = "Phone must be 6-32 characters"))]
    pub phone: Option<String>,
}

pub async fn create_request(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<HelpRequestPayload>,
) -> AppResult<impl IntoResponse> {
    require_role(&identity, Role::User)?;
    validate_payload(&payload)?;

    let request = state
        .engine
        .broadcaster
        .create_request(NewRequest {
            requester_id: identity.user_id,
            region: payload.region,
            category: payload.category,
            note: payload.note,
            phone: payload.phone,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn get_request(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(request_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let request = state.engine.broadcaster.get(request_id).await?;
    // Counselors see open requests so they can decide to accept.
    if identity.role == Role::User && request.requester_id != identity.user_id {
        return Err(AppError::Forbidden(anyhow!(
            "You do not have permission to view this request"
        )));
    }
    Ok(Json(request))
}

#[derive(Deserialize, Validate, Default)]
pub struct CancelPayload {
    #[validate(length(max = 500, message = "Reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

pub async fn cancel_request(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(request_id): Path<Uuid>,
    payload: Option<Json<CancelPayload>>,
) -> AppResult<impl IntoResponse> {
    let Json(payload) = payload.unwrap_or_default();
    validate_payload(&payload)?;

    let request = state
        .engine
        .broadcaster
        .cancel_request(request_id, identity.user_id, payload.reason)
        .await?;
    Ok(Json(request))
}

pub async fn poll_matches(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(request_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let request = state.engine.broadcaster.get(request_id).await?;
    if request.requester_id != identity.user_id {
        return Err(AppError::Forbidden(anyhow!(
            "Only the requester may poll matches"
        )));
    }
    let matches = state.engine.broadcaster.poll_matches(request_id).await?;
    Ok(Json(matches))
}

pub async fn accept_request(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(request_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    require_role(&identity, Role::Counselor)?;
    let request = state
        .engine
        .broadcaster
        .accept(request_id, identity.user_id)
        .await?;
    Ok(Json(request))
}

pub async fn schedule_request(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(request_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    require_role(&identity, Role::Counselor)?;
    let request = state
        .engine
        .broadcaster
        .schedule(request_id, identity.user_id)
        .await?;
    Ok(Json(request))
}
