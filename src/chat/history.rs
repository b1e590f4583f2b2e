use axum::extract::{Path, Query, State};
use axum::{debug_handler, Json};
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::appresult::{AppError, AppResult};
use crate::auth::AuthedUser;
use crate::AppState;

use super::convos::PageQuery;
use super::store::{self, Message};

#[debug_handler(state = AppState)]
pub(crate) async fn history(
    State(db_pool): State<SqlitePool>,
    AuthedUser(user_id): AuthedUser,
    Path(conversation_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<Vec<Message>>> {
    if !store::is_participant(&db_pool, conversation_id, user_id).await? {
        return Err(AppError::Forbidden("not a participant of this conversation".to_owned()));
    }

    let (limit, offset) = page.bounds();
    let messages = store::message_history(&db_pool, conversation_id, limit, offset).await?;
    Ok(Json(messages))
}

/// Bulk mark-as-read for the caller's side of a conversation. Only messages
/// authored by the other participant flip, and only false to true, so the
/// call is idempotent. Read receipts are not pushed to the sender's live
/// connection.
#[debug_handler(state = AppState)]
pub(crate) async fn mark_read(
    State(db_pool): State<SqlitePool>,
    AuthedUser(user_id): AuthedUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    if !store::is_participant(&db_pool, conversation_id, user_id).await? {
        return Err(AppError::Forbidden("not a participant of this conversation".to_owned()));
    }

    let updated = store::mark_read(&db_pool, conversation_id, user_id).await?;
    Ok(Json(json!({ "updated": updated })))
}
