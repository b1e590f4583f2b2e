use axum::extract::{Path, Query, State};
use axum::{debug_handler, Json};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::appresult::{AppError, AppResult};
use crate::auth::AuthedUser;
use crate::AppState;

use super::store::{self, Conversation, ConversationSummary};

#[derive(Deserialize)]
pub(crate) struct PageQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

impl PageQuery {
    pub(crate) fn bounds(&self) -> (i64, i64) {
        (self.limit.unwrap_or(50).clamp(1, 100), self.offset.unwrap_or(0).max(0))
    }
}

#[debug_handler(state = AppState)]
pub(crate) async fn list(
    State(db_pool): State<SqlitePool>,
    AuthedUser(user_id): AuthedUser,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    let (limit, offset) = page.bounds();
    let conversations = store::list_conversations(&db_pool, user_id, limit, offset).await?;
    Ok(Json(conversations))
}

/// Idempotent get-or-create, used when opening a chat from a connections
/// list. Repeated calls for the same pair return the same conversation.
#[debug_handler(state = AppState)]
pub(crate) async fn start(
    State(db_pool): State<SqlitePool>,
    AuthedUser(user_id): AuthedUser,
    Path(other_id): Path<Uuid>,
) -> AppResult<Json<Conversation>> {
    if other_id == user_id {
        return Err(AppError::BadRequest("cannot start a conversation with yourself".to_owned()));
    }
    if store::find_user(&db_pool, other_id).await?.is_none() {
        return Err(AppError::NotFound);
    }

    let conversation = store::get_or_create_conversation(&db_pool, user_id, other_id).await?;
    Ok(Json(conversation))
}
