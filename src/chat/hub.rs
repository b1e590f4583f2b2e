//! Inbound event dispatch for one authenticated connection.
//!
//! Failures here are scoped to the event that caused them: the offending
//! connection gets an `error` frame and the socket stays up. Identity comes
//! from the session established at handshake, never from event payloads.

use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::appresult::AppError;
use crate::registry::{ConnectionHandle, Registry};

use super::events::{ClientEvent, ServerEvent};
use super::store::{self, User};

pub const MAX_CONTENT_CHARS: usize = 1000;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("{0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Storage(#[from] AppError),
}

impl HubError {
    fn validation(msg: impl Into<String>) -> Self {
        HubError::Validation(msg.into())
    }

    /// What the client is told. Storage detail stays in the server log.
    fn client_message(&self) -> String {
        match self {
            HubError::Validation(msg) => msg.clone(),
            HubError::Storage(_) => "message could not be stored, try again".to_owned(),
        }
    }
}

pub async fn dispatch(
    pool: &SqlitePool,
    registry: &Registry,
    sender: &User,
    connection: &ConnectionHandle,
    event: ClientEvent,
) {
    let outcome = match event {
        ClientEvent::SendMessage { conversation_id, recipient_id, content } => {
            send_message(pool, registry, sender, connection, conversation_id, recipient_id, content).await
        }
        ClientEvent::TypingStart { recipient_id, conversation_id } => {
            relay_typing(registry, sender.id, recipient_id, conversation_id, true).await
        }
        ClientEvent::TypingStop { recipient_id, conversation_id } => {
            relay_typing(registry, sender.id, recipient_id, conversation_id, false).await
        }
    };

    if let Err(err) = outcome {
        if let HubError::Storage(storage) = &err {
            tracing::warn!(user_id = %sender.id, error = %storage, "event handling failed");
        }
        connection.push(ServerEvent::error(err.client_message()));
    }
}

async fn send_message(
    pool: &SqlitePool,
    registry: &Registry,
    sender: &User,
    connection: &ConnectionHandle,
    conversation_id: Option<Uuid>,
    recipient_id: Uuid,
    content: String,
) -> Result<(), HubError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(HubError::validation("message content must not be empty"));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(HubError::validation(format!(
            "message content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    if recipient_id == sender.id {
        return Err(HubError::validation("cannot send a message to yourself"));
    }

    let recipient = store::find_user(pool, recipient_id)
        .await?
        .ok_or_else(|| HubError::validation("unknown recipient"))?;

    let conversation = match conversation_id {
        Some(id) => store::find_conversation(pool, id)
            .await?
            .filter(|c| c.participants.contains(&sender.id) && c.participants.contains(&recipient.id))
            .ok_or_else(|| HubError::validation("unknown conversation"))?,
        None => store::get_or_create_conversation(pool, sender.id, recipient.id).await?,
    };

    // Durable first; the ack and the push must never precede the store.
    let message = store::append_message(pool, conversation.id, sender.id, content).await?;

    connection.push(ServerEvent::MessageSent {
        id: message.id,
        conversation_id: message.conversation_id,
        content: message.content.clone(),
        timestamp: message.created_at.clone(),
        is_own: true,
    });

    if let Some(live) = registry.lookup(recipient.id).await {
        live.push(ServerEvent::MessageReceived {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: sender.id,
            sender_name: sender.display_name.clone(),
            content: message.content,
            timestamp: message.created_at,
            is_own: false,
            is_read: false,
        });
    }

    Ok(())
}

/// Best-effort relay; a recipient with no live connection is the normal
/// offline case, not an error, and nothing is queued.
async fn relay_typing(
    registry: &Registry,
    sender_id: Uuid,
    recipient_id: Uuid,
    conversation_id: Option<Uuid>,
    started: bool,
) -> Result<(), HubError> {
    if let Some(live) = registry.lookup(recipient_id).await {
        let event = if started {
            ServerEvent::UserTyping { user_id: sender_id, conversation_id }
        } else {
            ServerEvent::UserStopTyping { user_id: sender_id, conversation_id }
        };
        live.push(event);
    }

    Ok(())
}
