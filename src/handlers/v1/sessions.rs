use anyhow::anyhow;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    app_state::AppState,
    error::{AppError, AppResult},
    handlers::v1::{require_role, validate_payload},
    models::{
        identity::{Identity, Role},
        messages::MessageType,
        sessions::{EndOutcome, SessionView},
    },
};

const DEFAULT_PAGE: i64 = 50;

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> AppResult<impl IntoResponse> {
    let sessions = state.engine.sessions.list_for(identity.user_id).await?;
    let views: Vec<SessionView> = sessions.into_iter().map(SessionView::from).collect();
    Ok(Json(views))
}

pub async fn get_session(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(session_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let session = state
        .engine
        .sessions
        .get_for(session_id, identity.user_id)
        .await?;
    Ok(Json(SessionView::from(session)))
}

pub async fn dismiss_session(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(session_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    require_role(&identity, Role::Counselor)?;
    let session = state
        .engine
        .sessions
        .dismiss(session_id, identity.user_id)
        .await?;
    Ok(Json(SessionView::from(session)))
}

#[derive(Deserialize, Default)]
pub struct EndPayload {
    pub outcome: Option<EndOutcome>,
}

pub async fn end_session(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(session_id): Path<Uuid>,
    payload: Option<Json<EndPayload>>,
) -> AppResult<impl IntoResponse> {
    let Json(payload) = payload.unwrap_or_default();
    let session = state
        .engine
        .sessions
        .end(
            session_id,
            identity.user_id,
            payload.outcome.unwrap_or(EndOutcome::Completed),
        )
        .await?;
    Ok(Json(SessionView::from(session)))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub before: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<impl IntoResponse> {
    if query.before.is_some_and(|b| b < 1) {
        return Err(AppError::BadRequest(anyhow!("before must be a positive seq")));
    }
    let messages = state
        .engine
        .channel
        .history(
            session_id,
            identity.user_id,
            query.before,
            query.limit.unwrap_or(DEFAULT_PAGE),
        )
        .await?;
    Ok(Json(messages))
}

#[derive(Deserialize, Validate)]
pub struct SendMessagePayload {
    #[validate(length(min = 1, max = 4000, message = "Message must be 1-4000 characters"))]
    pub body: String,
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<SendMessagePayload>,
) -> AppResult<impl IntoResponse> {
    validate_payload(&payload)?;
    let message = state
        .engine
        .channel
        .send(
            session_id,
            identity.user_id,
            identity.role,
            &payload.body,
            payload.message_type,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(session_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let marked = state
        .engine
        .channel
        .mark_read(session_id, identity.user_id)
        .await?;
    Ok(Json(json!({ "session_id": session_id, "marked": marked })))
}
