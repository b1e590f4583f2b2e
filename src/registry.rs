//! Process-wide map from user id to their single live connection.
//!
//! Every access goes through the three operations below; nothing else touches
//! the map. A newer connection for the same user replaces the older one, so
//! disconnect paths must use [`Registry::unregister_if_current`] rather than
//! a blind delete: a slow-closing connection must not evict the session that
//! replaced it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::chat::events::ServerEvent;

/// A send capability for one live, authenticated connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { id: Uuid::now_v7(), tx }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an event for the connection's write loop. Returns `false` when
    /// the connection is already gone; delivery past that point is handled by
    /// durable storage, not by this queue.
    pub fn push(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<Uuid, ConnectionHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handle` as the live connection for `user_id`, returning the
    /// handle it replaced, if any.
    pub async fn register(&self, user_id: Uuid, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut map = self.inner.write().await;
        map.insert(user_id, handle)
    }

    pub async fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        let map = self.inner.read().await;
        map.get(&user_id).cloned()
    }

    /// Remove the entry for `user_id` only if it still refers to `handle`.
    /// Returns whether an entry was removed.
    pub async fn unregister_if_current(&self, user_id: Uuid, handle: &ConnectionHandle) -> bool {
        let mut map = self.inner.write().await;
        match map.get(&user_id) {
            Some(current) if current.id == handle.id => {
                map.remove(&user_id);
                true
            }
            _ => false,
        }
    }
}
