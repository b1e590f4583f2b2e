//! Wire protocol for the persistent event channel.
//!
//! Frames are JSON objects `{"event": "...", "data": {...}}`. Event names are
//! kebab-case, payload fields camelCase.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    SendMessage {
        #[serde(default)]
        conversation_id: Option<Uuid>,
        recipient_id: Uuid,
        content: String,
    },
    TypingStart {
        recipient_id: Uuid,
        #[serde(default)]
        conversation_id: Option<Uuid>,
    },
    TypingStop {
        recipient_id: Uuid,
        #[serde(default)]
        conversation_id: Option<Uuid>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Ack to the sender once their message is durably stored.
    MessageSent {
        id: Uuid,
        conversation_id: Uuid,
        content: String,
        timestamp: String,
        is_own: bool,
    },
    /// Push to the recipient's live connection.
    MessageReceived {
        id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_name: String,
        content: String,
        timestamp: String,
        is_own: bool,
        is_read: bool,
    },
    UserTyping {
        user_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<Uuid>,
    },
    UserStopTyping {
        user_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<Uuid>,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error { message: message.into() }
    }
}
