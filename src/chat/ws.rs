use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::debug_handler;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::appresult::{AppError, AppResult};
use crate::registry::ConnectionHandle;
use crate::AppState;

use super::events::{ClientEvent, ServerEvent};
use super::hub;
use super::store::{self, User};

/// Upgrade handler for the persistent event channel.
///
/// The credential travels in handshake metadata (cookie or bearer header) and
/// is verified before the upgrade completes; a connection that fails here
/// never reaches the registry.
#[debug_handler(state = AppState)]
pub(crate) async fn chat_ws(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user_id = state.verifier.authenticate(&headers)?;
    let user = store::find_user(&state.db_pool, user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("unknown user".to_owned()))?;

    Ok(ws.on_upgrade(move |socket| connection_task(state, user, socket)))
}

async fn connection_task(state: AppState, user: User, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(tx);

    if let Some(previous) = state.registry.register(user.id, handle.clone()).await {
        debug!(user_id = %user.id, replaced = %previous.id(), "newer connection replaced live session");
    }
    info!(user_id = %user.id, connection_id = %handle.id(), "connected");

    let write_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(frame) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        let Message::Text(text) = frame else {
            continue;
        };

        match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => {
                hub::dispatch(&state.db_pool, &state.registry, &user, &handle, event).await;
            }
            Err(err) => {
                handle.push(ServerEvent::error(format!("malformed event: {err}")));
            }
        }
    }

    write_task.abort();
    // The user may have reconnected while this socket was draining; only
    // remove the entry if it is still ours.
    state.registry.unregister_if_current(user.id, &handle).await;
    info!(user_id = %user.id, connection_id = %handle.id(), "disconnected");
}
