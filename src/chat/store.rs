//! Persistence gateway for conversations and messages.
//!
//! All chat state flows through these functions. Conversations are unique per
//! unordered participant pair: the pair is stored sorted with a UNIQUE
//! constraint, so two sides racing get-or-create converge on one row. A
//! message insert and its conversation's last-message cache update are one
//! transaction.
//!
//! User records are owned by the profile subsystem; this module only reads
//! them, plus [`ensure_user`] as the upsert seam that subsystem (and the test
//! fixtures) call.

use anyhow::anyhow;
use serde::Serialize;
use sqlx::SqlitePool;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::appresult::{AppError, AppResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    avatar_url TEXT
);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    participant_lo TEXT NOT NULL,
    participant_hi TEXT NOT NULL,
    last_message_text TEXT,
    last_message_at TEXT,
    last_message_sender_id TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (participant_lo, participant_hi)
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_history ON messages (conversation_id);
CREATE INDEX IF NOT EXISTS idx_messages_unread ON messages (conversation_id, sender_id, is_read);
"#;

pub async fn init(pool: &SqlitePool) -> AppResult<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub participants: [Uuid; 2],
    pub last_message_text: Option<String>,
    pub last_message_at: Option<String>,
    pub last_message_sender_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: String,
    pub is_read: bool,
}

/// One row of the conversation list: the dialogue seen from `user_id`'s side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: Uuid,
    pub other_user_id: Uuid,
    pub other_user_name: String,
    pub other_user_avatar_url: Option<String>,
    pub last_message_text: Option<String>,
    pub last_message_at: Option<String>,
    pub last_message_sender_id: Option<Uuid>,
    pub unread_count: i64,
}

/// RFC 3339 with fixed-width microseconds. Timestamps are compared as TEXT
/// when ordering conversations, so every stored value must have the same
/// subsecond width.
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z");

fn format_timestamp(at: OffsetDateTime) -> AppResult<String> {
    at.format(TIMESTAMP_FORMAT)
        .map_err(|err| AppError::Internal(err.into()))
}

pub(crate) fn now_rfc3339() -> AppResult<String> {
    format_timestamp(OffsetDateTime::now_utc())
}

pub async fn ensure_user(pool: &SqlitePool, user: &User) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO users (id, display_name, email, avatar_url) VALUES (?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name,
             email = excluded.email, avatar_url = excluded.avatar_url",
    )
    .bind(user.id.to_string())
    .bind(&user.display_name)
    .bind(&user.email)
    .bind(&user.avatar_url)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<Option<User>> {
    let row: Option<(String, String, String, Option<String>)> =
        sqlx::query_as("SELECT id, display_name, email, avatar_url FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(pool)
            .await?;

    let Some((id, display_name, email, avatar_url)) = row else {
        return Ok(None);
    };

    Ok(Some(User { id: Uuid::parse_str(&id)?, display_name, email, avatar_url }))
}

type ConversationRow = (String, String, String, Option<String>, Option<String>, Option<String>);

fn conversation_from_row(row: ConversationRow) -> AppResult<Conversation> {
    let (id, lo, hi, last_text, last_at, last_sender) = row;
    Ok(Conversation {
        id: Uuid::parse_str(&id)?,
        participants: [Uuid::parse_str(&lo)?, Uuid::parse_str(&hi)?],
        last_message_text: last_text,
        last_message_at: last_at,
        last_message_sender_id: match last_sender {
            Some(s) => Some(Uuid::parse_str(&s)?),
            None => None,
        },
    })
}

const CONVERSATION_COLUMNS: &str =
    "id, participant_lo, participant_hi, last_message_text, last_message_at, last_message_sender_id";

async fn find_by_pair(pool: &SqlitePool, lo: Uuid, hi: Uuid) -> AppResult<Option<Conversation>> {
    let row: Option<ConversationRow> = sqlx::query_as(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE participant_lo = ? AND participant_hi = ?"
    ))
    .bind(lo.to_string())
    .bind(hi.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(conversation_from_row).transpose()
}

pub async fn find_conversation(pool: &SqlitePool, id: Uuid) -> AppResult<Option<Conversation>> {
    let row: Option<ConversationRow> = sqlx::query_as(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(conversation_from_row).transpose()
}

/// Resolve the conversation between `a` and `b`, creating it if absent.
///
/// Safe under concurrent invocation from both directions: the insert defers
/// to whichever side won the UNIQUE race, then re-fetches.
pub async fn get_or_create_conversation(pool: &SqlitePool, a: Uuid, b: Uuid) -> AppResult<Conversation> {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

    if let Some(conversation) = find_by_pair(pool, lo, hi).await? {
        return Ok(conversation);
    }

    sqlx::query(
        "INSERT INTO conversations (id, participant_lo, participant_hi, created_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(participant_lo, participant_hi) DO NOTHING",
    )
    .bind(Uuid::now_v7().to_string())
    .bind(lo.to_string())
    .bind(hi.to_string())
    .bind(now_rfc3339()?)
    .execute(pool)
    .await?;

    find_by_pair(pool, lo, hi)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow!("conversation missing after insert")))
}

/// Append a message and refresh the conversation's last-message cache in one
/// transaction; neither effect is visible without the other.
pub async fn append_message(
    pool: &SqlitePool,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: &str,
) -> AppResult<Message> {
    let id = Uuid::now_v7();
    let created_at = now_rfc3339()?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO messages (id, conversation_id, sender_id, content, created_at, is_read)
         VALUES (?, ?, ?, ?, ?, 0)",
    )
    .bind(id.to_string())
    .bind(conversation_id.to_string())
    .bind(sender_id.to_string())
    .bind(content)
    .bind(&created_at)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query(
        "UPDATE conversations SET last_message_text = ?, last_message_at = ?, last_message_sender_id = ?
         WHERE id = ?",
    )
    .bind(content)
    .bind(&created_at)
    .bind(sender_id.to_string())
    .bind(conversation_id.to_string())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated != 1 {
        // Unknown conversation; dropping the transaction rolls back the insert.
        return Err(AppError::NotFound);
    }

    tx.commit().await?;

    Ok(Message {
        id,
        conversation_id,
        sender_id,
        content: content.to_owned(),
        created_at,
        is_read: false,
    })
}

pub async fn is_participant(pool: &SqlitePool, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM conversations
         WHERE id = ? AND (participant_lo = ? OR participant_hi = ?)",
    )
    .bind(conversation_id.to_string())
    .bind(user_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

/// Most recent messages first. Pages are ordered by rowid, which is
/// insertion order; v7 message ids are close to it but can transpose within
/// a millisecond.
pub async fn message_history(
    pool: &SqlitePool,
    conversation_id: Uuid,
    limit: i64,
    offset: i64,
) -> AppResult<Vec<Message>> {
    let rows: Vec<(String, String, String, String, bool)> = sqlx::query_as(
        "SELECT id, sender_id, content, created_at, is_read FROM messages
         WHERE conversation_id = ?
         ORDER BY rowid DESC
         LIMIT ? OFFSET ?",
    )
    .bind(conversation_id.to_string())
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(id, sender_id, content, created_at, is_read)| {
            Ok(Message {
                id: Uuid::parse_str(&id)?,
                conversation_id,
                sender_id: Uuid::parse_str(&sender_id)?,
                content,
                created_at,
                is_read,
            })
        })
        .collect()
}

/// Mark every message in `conversation_id` not authored by `reader_id` as
/// read. Idempotent; returns the number of newly-read messages.
pub async fn mark_read(pool: &SqlitePool, conversation_id: Uuid, reader_id: Uuid) -> AppResult<u64> {
    let updated = sqlx::query(
        "UPDATE messages SET is_read = 1
         WHERE conversation_id = ? AND sender_id <> ? AND is_read = 0",
    )
    .bind(conversation_id.to_string())
    .bind(reader_id.to_string())
    .execute(pool)
    .await?
    .rows_affected();

    Ok(updated)
}

/// Conversation list for `user_id`, most recent activity first, with the
/// unread count ("messages not authored by me and unread") per conversation.
pub async fn list_conversations(
    pool: &SqlitePool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> AppResult<Vec<ConversationSummary>> {
    let rows: Vec<(String, String, String, Option<String>, Option<String>, Option<String>, Option<String>, i64)> =
        sqlx::query_as(
            "SELECT c.id,
                    CASE WHEN c.participant_lo = ?1 THEN c.participant_hi ELSE c.participant_lo END,
                    u.display_name,
                    u.avatar_url,
                    c.last_message_text,
                    c.last_message_at,
                    c.last_message_sender_id,
                    (SELECT COUNT(*) FROM messages m
                     WHERE m.conversation_id = c.id AND m.sender_id <> ?1 AND m.is_read = 0)
             FROM conversations c
             JOIN users u
               ON u.id = CASE WHEN c.participant_lo = ?1 THEN c.participant_hi ELSE c.participant_lo END
             WHERE ?1 IN (c.participant_lo, c.participant_hi)
             ORDER BY c.last_message_at IS NULL, c.last_message_at DESC
             LIMIT ?2 OFFSET ?3",
        )
        .bind(user_id.to_string())
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    rows.into_iter()
        .map(|(id, other_id, name, avatar, last_text, last_at, last_sender, unread)| {
            Ok(ConversationSummary {
                id: Uuid::parse_str(&id)?,
                other_user_id: Uuid::parse_str(&other_id)?,
                other_user_name: name,
                other_user_avatar_url: avatar,
                last_message_text: last_text,
                last_message_at: last_at,
                last_message_sender_id: match last_sender {
                    Some(s) => Some(Uuid::parse_str(&s)?),
                    None => None,
                },
                unread_count: unread,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_text_order_matches_time_order() {
        let base = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let half = format_timestamp(base.replace_nanosecond(500_000_000).unwrap()).unwrap();
        let later = format_timestamp(base.replace_nanosecond(510_000_000).unwrap()).unwrap();

        // Fixed-width subseconds; ".5" must not sort after ".51".
        assert!(half.ends_with(".500000Z"), "{half}");
        assert!(later.ends_with(".510000Z"), "{later}");
        assert!(half < later);
    }

    #[test]
    fn whole_second_timestamps_keep_subsecond_width() {
        let base = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let formatted = format_timestamp(base).unwrap();
        assert!(formatted.ends_with(".000000Z"), "{formatted}");
    }
}
