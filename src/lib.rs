pub mod appresult;
pub mod auth;
pub mod chat;
pub mod registry;

use axum::extract::FromRef;
use sqlx::SqlitePool;

pub use appresult::{AppError, AppResult};
pub use auth::TokenVerifier;
pub use registry::Registry;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub registry: Registry,
    pub verifier: TokenVerifier,
}
