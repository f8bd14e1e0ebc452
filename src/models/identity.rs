use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of a counsel session an actor is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "participant_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Counselor,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::User => Role::Counselor,
            Role::Counselor => Role::User,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Counselor => "counselor",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "counselor" => Ok(Role::Counselor),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Authenticated caller as handed to us by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}
