mod convos;
mod history;
mod ws;

pub mod events;
pub mod hub;
pub mod store;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::chat_ws))
        .route("/conversations", get(convos::list))
        .route("/conversations/with/{user_id}", post(convos::start))
        .route("/conversations/{id}/messages", get(history::history))
        .route("/conversations/{id}/read", post(history::mark_read))
}
