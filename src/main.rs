use anyhow::Context;
use sotto::{chat, AppState, Registry, TokenVerifier};
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let database_url = dotenv::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let token_secret = dotenv::var("TOKEN_SECRET").context("TOKEN_SECRET is not set")?;
    let bind_addr = dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&database_url)
        .await
        .context("connecting to database")?;
    chat::store::init(&db_pool).await?;

    let app_state = AppState {
        db_pool,
        registry: Registry::new(),
        verifier: TokenVerifier::new(&token_secret),
    };

    let app = axum::Router::new()
        .nest("/chat", chat::router())
        .with_state(app_state)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    tracing::info!(%bind_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
