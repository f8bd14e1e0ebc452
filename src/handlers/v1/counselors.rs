use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::{
    app_state::AppState,
    error::AppResult,
    handlers::v1::{require_role, validate_payload},
    models::identity::{Identity, Role},
};

#[derive(Deserialize)]
pub struct CounselorQuery {
    pub region: Option<String>,
}

pub async fn list_online_counselors(
    State(state): State<AppState>,
    Query(query): Query<CounselorQuery>,
) -> AppResult<impl IntoResponse> {
    let counselors = state
        .engine
        .directory
        .list_online(query.region.as_deref())
        .await?;
    Ok(Json(counselors))
}

#[derive(Deserialize, Validate)]
pub struct PresencePayload {
    pub online: bool,
    #[validate(length(min = 1, max = 100, message = "Region must be 1-100 characters"))]
    pub region: Option<String>,
    #[validate(length(max = 20, message = "At most 20 specializations"))]
    #[serde(default)]
    pub specializations: Vec<String>,
}

pub async fn set_presence(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<PresencePayload>,
) -> AppResult<impl IntoResponse> {
    require_role(&identity, Role::Counselor)?;
    validate_payload(&payload)?;

    let counselor = state
        .engine
        .directory
        .set_online(
            identity.user_id,
            payload.online,
            payload.region.as_deref(),
            &payload.specializations,
        )
        .await?;
    Ok(Json(counselor))
}

pub async fn get_catalog(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let catalog = state.engine.catalog.get().await?;
    Ok(Json(catalog))
}
