use serde_json::json;
use std::fmt::Display;

use anyhow::Error as anyhowError;
use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;
use uuid::Uuid;

use crate::models::sessions::SessionBlock;

/// Failures raised by the counsel engine itself.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("session {session_id} cannot send messages: {reason}")]
    SessionNotSendable {
        session_id: Uuid,
        reason: SessionBlock,
    },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("payment not confirmed for obligation {0}")]
    PaymentNotConfirmed(Uuid),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".into()),
            other => CoreError::Storage(other.to_string()),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug)]
pub enum AppError {
    // 400 bad request
    BadRequest(anyhowError),
    // 401 unauthorized
    Unauthorized(anyhowError),
    // 402 payment required
    PaymentRequired(anyhowError),
    // 403 forbidden
    Forbidden(anyhowError),
    // 404 not found
    NotFound(anyhowError),
    // 409 conflict
    Conflict(anyhowError),
    // 409 conflict, session refuses messages
    SessionBlocked(SessionBlock, anyhowError),
    // 500 internal server error
    InternalServerError(anyhowError),
}

impl Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::BadRequest(e) => write!(f, "BadRequest: {}", e),
            AppError::Unauthorized(e) => write!(f, "Unauthorized: {}", e),
            AppError::PaymentRequired(e) => write!(f, "PaymentRequired: {}", e),
            AppError::Forbidden(e) => write!(f, "Forbidden: {}", e),
            AppError::NotFound(e) => write!(f, "NotFound: {}", e),
            AppError::Conflict(e) => write!(f, "Conflict: {}", e),
            AppError::SessionBlocked(reason, e) => write!(f, "SessionBlocked({}): {}", reason, e),
            AppError::InternalServerError(e) => write!(f, "InternalServerError: {}", e),
        }
    }
}

impl From<anyhowError> for AppError {
    fn from(e: anyhowError) -> Self {
        AppError::InternalServerError(e)
    }
}

impl From<CoreError> for AppError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidTransition(_) => AppError::Conflict(e.into()),
            CoreError::Forbidden(_) => AppError::Forbidden(e.into()),
            CoreError::SessionNotSendable { reason, .. } => {
                AppError::SessionBlocked(reason, e.into())
            }
            CoreError::InvalidValue(_) => AppError::BadRequest(e.into()),
            CoreError::NotFound(_) => AppError::NotFound(e.into()),
            CoreError::PaymentNotConfirmed(_) => AppError::PaymentRequired(e.into()),
            CoreError::Storage(_) => {
                tracing::error!(error = %e, "storage failure");
                AppError::InternalServerError(e.into())
            }
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::SessionBlocked(..) => StatusCode::CONFLICT,
            Self::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code clients can branch on.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::SessionBlocked(reason, _) => Some(reason.code()),
            Self::PaymentRequired(_) => Some("payment_not_confirmed"),
            _ => None,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::BadRequest(err)
            | Self::Unauthorized(err)
            | Self::PaymentRequired(err)
            | Self::Forbidden(err)
            | Self::NotFound(err)
            | Self::Conflict(err)
            | Self::SessionBlocked(_, err)
            | Self::InternalServerError(err) => err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let code = self.code();

        #[cfg(debug_assertions)]
        let error_response = json!({
            "error": {
                "message": self.message(),
                "code": code,
                "type": format!("{:?}", self),
            }
        });

        // Blocked sessions are an expected state, so their reason is always surfaced.
        #[cfg(not(debug_assertions))]
        let error_response = match &self {
            Self::SessionBlocked(reason, _) => json!({
                "error": { "message": reason.to_string(), "code": code }
            }),
            Self::InternalServerError(_) => json!({
                "error": {
                    "message": status.canonical_reason().unwrap_or("An error occurred"),
                }
            }),
            _ => json!({
                "error": { "message": self.message(), "code": code }
            }),
        };
        (status, axum::Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
