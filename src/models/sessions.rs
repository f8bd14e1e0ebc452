use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::identity::Role;

/// Flat status as stored in the `chat_sessions.status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "session_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Dismissed,
    Ended,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Dismissed => "dismissed",
            SessionStatus::Ended => "ended",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "end_outcome", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EndOutcome {
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dismissal {
    pub at: DateTime<Utc>,
    pub by: Uuid,
}

/// Lifecycle of a chat session. Payment state is derived from the variant,
/// so an active-but-unpaid session cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Dismissed {
        dismissed_at: DateTime<Utc>,
        dismissed_by: Uuid,
    },
    Ended {
        ended_at: DateTime<Utc>,
        outcome: EndOutcome,
        dismissal: Option<Dismissal>,
    },
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Active => SessionStatus::Active,
            SessionState::Dismissed { .. } => SessionStatus::Dismissed,
            SessionState::Ended { .. } => SessionStatus::Ended,
        }
    }

    /// A session that ended while dismissed never had its repayment made.
    pub fn payment_paid(&self) -> bool {
        match self {
            SessionState::Active => true,
            SessionState::Dismissed { .. } => false,
            SessionState::Ended { dismissal, .. } => dismissal.is_none(),
        }
    }

    pub fn dismissal(&self) -> Option<Dismissal> {
        match *self {
            SessionState::Dismissed {
                dismissed_at,
                dismissed_by,
            } => Some(Dismissal {
                at: dismissed_at,
                by: dismissed_by,
            }),
            SessionState::Ended { dismissal, .. } => dismissal,
            SessionState::Active => None,
        }
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SessionState::Ended { ended_at, .. } => Some(*ended_at),
            _ => None,
        }
    }

    pub fn end_outcome(&self) -> Option<EndOutcome> {
        match self {
            SessionState::Ended { outcome, .. } => Some(*outcome),
            _ => None,
        }
    }

    /// Rebuilds the state from its column representation.
    pub fn from_columns(
        status: SessionStatus,
        dismissed_at: Option<DateTime<Utc>>,
        dismissed_by: Option<Uuid>,
        ended_at: Option<DateTime<Utc>>,
        outcome: Option<EndOutcome>,
    ) -> Result<Self, String> {
        let dismissal = match (dismissed_at, dismissed_by) {
            (Some(at), Some(by)) => Some(Dismissal { at, by }),
            (None, None) => None,
            _ => return Err("dismissed_at and dismissed_by must be set together".into()),
        };
        match status {
            SessionStatus::Active => Ok(SessionState::Active),
            SessionStatus::Dismissed => {
                let d = dismissal.ok_or("dismissed session without dismissal record")?;
                Ok(SessionState::Dismissed {
                    dismissed_at: d.at,
                    dismissed_by: d.by,
                })
            }
            SessionStatus::Ended => Ok(SessionState::Ended {
                ended_at: ended_at.ok_or("ended session without ended_at")?,
                outcome: outcome.unwrap_or(EndOutcome::Abandoned),
                dismissal,
            }),
        }
    }
}

/// Why a session currently refuses new messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionBlock {
    PaymentRequired,
    Ended,
}

impl SessionBlock {
    pub fn for_status(status: SessionStatus) -> Option<SessionBlock> {
        match status {
            SessionStatus::Active => None,
            SessionStatus::Dismissed => Some(SessionBlock::PaymentRequired),
            SessionStatus::Ended => Some(SessionBlock::Ended),
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            SessionBlock::PaymentRequired => "payment_required",
            SessionBlock::Ended => "session_ended",
        }
    }
}

impl fmt::Display for SessionBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionBlock::PaymentRequired => write!(f, "payment required to continue"),
            SessionBlock::Ended => write!(f, "session has ended"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub request_id: Option<Uuid>,
    pub obligation_id: Uuid,
    pub user_id: Uuid,
    pub counselor_id: Uuid,
    pub booking_fee_cents: i64,
    #[serde(flatten)]
    pub state: SessionState,
    pub last_message_summary: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_seq: i64,
    pub unread_count_user: i64,
    pub unread_count_counselor: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn payment_paid(&self) -> bool {
        self.state.payment_paid()
    }

    pub fn can_send_messages(&self) -> bool {
        self.status() == SessionStatus::Active && self.payment_paid()
    }

    pub fn block_reason(&self) -> Option<SessionBlock> {
        SessionBlock::for_status(self.status())
    }

    /// Role the given account plays in this session, if any.
    pub fn role_of(&self, account_id: Uuid) -> Option<Role> {
        if account_id == self.user_id {
            Some(Role::User)
        } else if account_id == self.counselor_id {
            Some(Role::Counselor)
        } else {
            None
        }
    }

    pub fn unread_for(&self, role: Role) -> i64 {
        match role {
            Role::User => self.unread_count_user,
            Role::Counselor => self.unread_count_counselor,
        }
    }
}

/// Outward view of a session including the derived payment facts.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: ChatSession,
    pub payment_paid: bool,
    pub can_send_messages: bool,
    pub blocked_reason: Option<SessionBlock>,
}

impl From<ChatSession> for SessionView {
    fn from(session: ChatSession) -> Self {
        Self {
            payment_paid: session.payment_paid(),
            can_send_messages: session.can_send_messages(),
            blocked_reason: session.block_reason(),
            session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_follows_state() {
        let now = Utc::now();
        let by = Uuid::new_v4();
        assert!(SessionState::Active.payment_paid());
        assert!(!SessionState::Dismissed {
            dismissed_at: now,
            dismissed_by: by
        }
        .payment_paid());
        let ended_after_dismissal = SessionState::Ended {
            ended_at: now,
            outcome: EndOutcome::Abandoned,
            dismissal: Some(Dismissal { at: now, by }),
        };
        assert!(!ended_after_dismissal.payment_paid());
    }

    #[test]
    fn columns_round_trip_to_state() {
        let now = Utc::now();
        let by = Uuid::new_v4();
        let state =
            SessionState::from_columns(SessionStatus::Dismissed, Some(now), Some(by), None, None)
                .unwrap();
        assert_eq!(state.dismissal(), Some(Dismissal { at: now, by }));

        let broken =
            SessionState::from_columns(SessionStatus::Dismissed, None, None, None, None);
        assert!(broken.is_err());
    }
}
