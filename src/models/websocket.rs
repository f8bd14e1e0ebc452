use crate::models::identity::Role;
use crate::models::messages::{Message, MessageType};
use crate::models::sessions::{SessionBlock, SessionStatus};
use uuid::Uuid;

/// Frames pushed from the server to a connected session client.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(tag = "type")]
pub enum WebSocketMessage {
    #[serde(rename = "message")]
    Message { message: Message },
    #[serde(rename = "read")]
    Read { session_id: Uuid, reader: Role },
    #[serde(rename = "session_state")]
    SessionState {
        session_id: Uuid,
        status: SessionStatus,
        blocked_reason: Option<SessionBlock>,
    },
    #[serde(rename = "error")]
    Error {
        message: String,
        code: Option<String>,
    },
    #[serde(rename = "pong")]
    Pong,
}

/// Frames a client may send over the socket.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    #[serde(rename = "send_message")]
    SendMessage {
        body: String,
        #[serde(default = "default_message_type")]
        message_type: MessageType,
    },
    #[serde(rename = "mark_read")]
    MarkRead,
    #[serde(rename = "ping")]
    Ping,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}
