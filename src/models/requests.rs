use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "help_request_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HelpRequestStatus {
    Broadcasting,
    Accepted,
    Scheduled,
    Completed,
    Cancelled,
    Expired,
}

impl HelpRequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HelpRequestStatus::Completed | HelpRequestStatus::Cancelled | HelpRequestStatus::Expired
        )
    }

    /// Forward-only edges of the request lifecycle.
    pub fn can_transition_to(self, next: HelpRequestStatus) -> bool {
        use HelpRequestStatus::*;
        matches!(
            (self, next),
            (Broadcasting, Accepted)
                | (Broadcasting, Cancelled)
                | (Broadcasting, Expired)
                | (Accepted, Scheduled)
                | (Accepted, Completed)
                | (Accepted, Cancelled)
                | (Scheduled, Completed)
                | (Scheduled, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HelpRequestStatus::Broadcasting => "broadcasting",
            HelpRequestStatus::Accepted => "accepted",
            HelpRequestStatus::Scheduled => "scheduled",
            HelpRequestStatus::Completed => "completed",
            HelpRequestStatus::Cancelled => "cancelled",
            HelpRequestStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HelpRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub region: String,
    pub category: String,
    pub note: String,
    pub phone: Option<String>,
    pub status: HelpRequestStatus,
    pub matched_counselor_id: Option<Uuid>,
    pub broadcast_count: i64,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HelpRequest {
    pub fn new(
        requester_id: Uuid,
        region: String,
        category: String,
        note: String,
        phone: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            requester_id,
            region,
            category,
            note,
            phone,
            status: HelpRequestStatus::Broadcasting,
            matched_counselor_id: None,
            broadcast_count: 0,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HelpRequestStatus::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [Completed, Cancelled, Expired] {
            for next in [Broadcasting, Accepted, Scheduled, Completed, Cancelled, Expired] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn never_moves_backward() {
        assert!(!Accepted.can_transition_to(Broadcasting));
        assert!(!Scheduled.can_transition_to(Accepted));
        assert!(!Accepted.can_transition_to(Expired));
        assert!(Broadcasting.can_transition_to(Expired));
    }
}
