pub mod counselors;
pub mod payments;
pub mod ratings;
pub mod requests;
pub mod sessions;

use anyhow::anyhow;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::identity::{Identity, Role};

pub(crate) fn require_role(identity: &Identity, role: Role) -> AppResult<()> {
    if identity.role != role {
        return Err(AppError::Forbidden(anyhow!(
            "only a {} may do this",
            role.as_str()
        )));
    }
    Ok(())
}

pub(crate) fn validate_payload<T: Validate>(payload: &T) -> AppResult<()> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(anyhow!("Invalid inputs: {}", e)))
}
