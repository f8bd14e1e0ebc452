use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    app_state::AppState,
    error::AppResult,
    handlers::v1::{require_role, validate_payload},
    models::identity::{Identity, Role},
};

#[derive(Deserialize, Validate)]
pub struct RatingPayload {
    pub counselor_id: Uuid,
    pub session_id: Uuid,
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i16,
    #[validate(length(max = 1000, message = "Comment must be at most 1000 characters"))]
    pub comment: Option<String>,
}

pub async fn submit_rating(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<RatingPayload>,
) -> AppResult<impl IntoResponse> {
    require_role(&identity, Role::User)?;
    validate_payload(&payload)?;

    let (rating, counselor) = state
        .engine
        .ratings
        .submit(
            payload.counselor_id,
            identity.user_id,
            payload.session_id,
            payload.rating,
            payload.comment,
        )
        .await?;
    Ok(Json(json!({
        "rating": rating,
        "counselor_rating": counselor.rating,
        "rating_count": counselor.rating_count,
    })))
}

/// The caller's own rating of a counselor.
pub async fn get_my_rating(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(counselor_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let rating = state
        .engine
        .ratings
        .get_for_pair(counselor_id, identity.user_id)
        .await?;
    Ok(Json(rating))
}
