use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::identity::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Voice,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    /// Per-session position, starting at 1. Doubles as the resume cursor.
    pub seq: i64,
    pub sender_id: Uuid,
    pub sender_role: Role,
    pub message_type: MessageType,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_system(&self) -> bool {
        self.message_type == MessageType::System
    }

    /// Short preview shown in session lists.
    pub fn summary(&self) -> String {
        match self.message_type {
            MessageType::Voice => "[voice message]".to_string(),
            MessageType::System => self.body.clone(),
            MessageType::Text => self.body.chars().take(SUMMARY_CHARS).collect(),
        }
    }
}

pub const SUMMARY_CHARS: usize = 100;
pub const MAX_BODY_CHARS: usize = 4000;

#[cfg(test)]
mod tests {
    use super::*;

    fn message(kind: MessageType, body: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            seq: 1,
            sender_id: Uuid::new_v4(),
            sender_role: Role::User,
            message_type: kind,
            body: body.to_string(),
            read: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn text_summary_is_truncated_on_char_boundary() {
        let long = "é".repeat(150);
        let summary = message(MessageType::Text, &long).summary();
        assert_eq!(summary.chars().count(), SUMMARY_CHARS);
    }

    #[test]
    fn voice_summary_hides_payload() {
        assert_eq!(
            message(MessageType::Voice, "https://cdn/v.ogg").summary(),
            "[voice message]"
        );
    }
}
