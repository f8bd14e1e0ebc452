use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::counsel::directory::Directory;
use crate::error::{CoreError, CoreResult};
use crate::models::payments::{ObligationStatus, PaymentObligation, PaymentOutcome, PaymentPurpose};
use crate::models::requests::HelpRequestStatus;
use crate::models::sessions::SessionStatus;
use crate::store::Store;

/// What the payer intends the obligation to unlock.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObligationTarget {
    pub request_id: Option<Uuid>,
    /// A dismissed session this payment should reactivate.
    pub session_id: Option<Uuid>,
}

/// Records booking obligations and applies provider confirmations to them.
/// The engine never waits on the provider; it only reacts to callbacks.
#[derive(Clone)]
pub struct PaymentGate {
    store: Arc<dyn Store>,
    directory: Directory,
}

impl PaymentGate {
    pub fn new(store: Arc<dyn Store>, directory: Directory) -> Self {
        Self { store, directory }
    }

    pub async fn create_obligation(
        &self,
        payer_id: Uuid,
        counselor_id: Uuid,
        target: ObligationTarget,
    ) -> CoreResult<PaymentObligation> {
        let counselor = self.directory.get(counselor_id).await?;
        if counselor.booking_fee_cents < 0 {
            return Err(CoreError::InvalidValue(format!(
                "counselor {} has a negative booking fee",
                counselor_id
            )));
        }

        if let Some(session_id) = target.session_id {
            let session = self
                .store
                .get_session(session_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))?;
            if session.user_id != payer_id || session.counselor_id != counselor_id {
                return Err(CoreError::Forbidden(format!(
                    "session {} does not belong to this payer and counselor",
                    session_id
                )));
            }
            if session.status() != SessionStatus::Dismissed {
                return Err(CoreError::InvalidTransition(format!(
                    "session {} does not need repayment",
                    session_id
                )));
            }
        }

        if let Some(request_id) = target.request_id {
            let request = self
                .store
                .get_request(request_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("request {}", request_id)))?;
            if request.requester_id != payer_id {
                return Err(CoreError::Forbidden(format!(
                    "request {} belongs to another requester",
                    request_id
                )));
            }
            let linkable = match request.status {
                HelpRequestStatus::Broadcasting => true,
                HelpRequestStatus::Accepted | HelpRequestStatus::Scheduled => {
                    request.matched_counselor_id == Some(counselor_id)
                }
                _ => false,
            };
            if !linkable {
                return Err(CoreError::InvalidTransition(format!(
                    "request {} is {} and cannot be booked with counselor {}",
                    request_id,
                    request.status.as_str(),
                    counselor_id
                )));
            }
        }

        let obligation = PaymentObligation {
            id: Uuid::new_v4(),
            payer_id,
            payee_counselor_id: counselor_id,
            amount_cents: counselor.booking_fee_cents,
            purpose: PaymentPurpose::Booking,
            status: ObligationStatus::Pending,
            session_id: target.session_id,
            request_id: target.request_id,
            created_at: Utc::now(),
            resolved_at: None,
        };
        self.store.insert_obligation(&obligation).await?;
        tracing::info!(
            obligation_id = %obligation.id,
            payer_id = %payer_id,
            counselor_id = %counselor_id,
            amount_cents = obligation.amount_cents,
            "payment obligation created"
        );
        Ok(obligation)
    }

    pub async fn get(&self, obligation_id: Uuid) -> CoreResult<PaymentObligation> {
        self.store
            .get_obligation(obligation_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("obligation {}", obligation_id)))
    }

    /// Applies the provider's verdict. Resolution happens once; a repeated
    /// callback with the same verdict returns the stored obligation, a
    /// contradicting one is rejected.
    pub async fn on_payment_confirmed(
        &self,
        obligation_id: Uuid,
        outcome: PaymentOutcome,
    ) -> CoreResult<PaymentObligation> {
        let status = ObligationStatus::from(outcome);
        if let Some(resolved) = self
            .store
            .resolve_obligation(obligation_id, status, Utc::now())
            .await?
        {
            tracing::info!(
                obligation_id = %obligation_id,
                status = ?resolved.status,
                "payment obligation resolved"
            );
            return Ok(resolved);
        }

        let existing = self.get(obligation_id).await?;
        if existing.status == status {
            tracing::debug!(obligation_id = %obligation_id, "duplicate payment callback ignored");
            Ok(existing)
        } else {
            tracing::warn!(
                obligation_id = %obligation_id,
                stored = ?existing.status,
                reported = ?status,
                "conflicting payment callback rejected"
            );
            Err(CoreError::InvalidTransition(format!(
                "obligation {} already resolved as {:?}",
                obligation_id, existing.status
            )))
        }
    }
}
