use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_purpose", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentPurpose {
    Booking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "obligation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ObligationStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Result reported by the payment provider for an obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    Confirmed,
    Failed,
}

impl From<PaymentOutcome> for ObligationStatus {
    fn from(outcome: PaymentOutcome) -> Self {
        match outcome {
            PaymentOutcome::Confirmed => ObligationStatus::Confirmed,
            PaymentOutcome::Failed => ObligationStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentObligation {
    pub id: Uuid,
    pub payer_id: Uuid,
    pub payee_counselor_id: Uuid,
    pub amount_cents: i64,
    pub purpose: PaymentPurpose,
    pub status: ObligationStatus,
    // Set when the payment should lift a dismissal instead of opening a new session.
    pub session_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PaymentObligation {
    pub fn is_confirmed(&self) -> bool {
        self.status == ObligationStatus::Confirmed
    }

    pub fn is_resolved(&self) -> bool {
        self.status != ObligationStatus::Pending
    }
}
