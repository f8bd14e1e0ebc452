use anyhow::anyhow;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    counsel::{engine::PaymentResolution, payments::ObligationTarget},
    error::{AppError, AppResult},
    handlers::v1::require_role,
    models::{
        identity::{Identity, Role},
        payments::PaymentOutcome,
        sessions::SessionView,
    },
};

pub const SIGNATURE_HEADER: &str = "x-payment-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Deserialize)]
pub struct ObligationPayload {
    pub counselor_id: Uuid,
    pub request_id: Option<Uuid>,
    /// Set when paying to resume a dismissed session.
    pub session_id: Option<Uuid>,
}

pub async fn create_obligation(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<ObligationPayload>,
) -> AppResult<impl IntoResponse> {
    require_role(&identity, Role::User)?;
    let obligation = state
        .engine
        .payments
        .create_obligation(
            identity.user_id,
            payload.counselor_id,
            ObligationTarget {
                request_id: payload.request_id,
                session_id: payload.session_id,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(obligation)))
}

#[derive(Deserialize)]
pub struct PaymentCallback {
    pub obligation_id: Uuid,
    pub outcome: PaymentOutcome,
}

/// Provider webhook. The body is signed with the shared secret; only a
/// verified body is parsed.
pub async fn payment_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(anyhow!("Missing payment signature")))?;
    verify_signature(&state.payment_webhook_secret, &body, signature)?;

    let callback: PaymentCallback = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(anyhow!("Invalid callback body: {}", e)))?;

    let resolution = state
        .engine
        .handle_payment_event(callback.obligation_id, callback.outcome)
        .await?;

    let response = match resolution {
        PaymentResolution::SessionOpened(session) => json!({
            "obligation_id": callback.obligation_id,
            "result": "session_opened",
            "session": SessionView::from(session),
        }),
        PaymentResolution::SessionReactivated(session) => json!({
            "obligation_id": callback.obligation_id,
            "result": "session_reactivated",
            "session": SessionView::from(session),
        }),
        PaymentResolution::Failed(obligation) => json!({
            "obligation_id": callback.obligation_id,
            "result": "payment_failed",
            "obligation": obligation,
        }),
    };
    Ok(Json(response))
}

pub fn sign_payload(secret: &str, body: &[u8]) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::InternalServerError(anyhow!("HMAC init failed: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn verify_signature(secret: &str, body: &[u8], signature: &str) -> AppResult<()> {
    let expected = hex::decode(signature.trim())
        .map_err(|_| AppError::Unauthorized(anyhow!("Malformed payment signature")))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::InternalServerError(anyhow!("HMAC init failed: {}", e)))?;
    mac.update(body);
    // verify_slice compares in constant time.
    mac.verify_slice(&expected).map_err(|_| {
        tracing::warn!("payment callback with bad signature rejected");
        AppError::Unauthorized(anyhow!("Invalid payment signature"))
    })
}
