use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use connecthub_chat::{config::Config, db, media, messages, presence, relay, rooms, AppState};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("connecthub_chat=info,tower_http=warn")),
        )
        .init();

    let config = Config::from_env();
    let db_pool = db::connect(&config.database_url)
        .await
        .context("opening the chat database")?;

    let state = AppState::new(
        db_pool,
        media::MediaConfig {
            upload_dir: config.upload_dir.clone(),
            public_base_url: config.public_base_url.clone(),
        },
    );

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .frontend_url
                .parse::<HeaderValue>()
                .context("FRONTEND_URL is not a valid origin")?,
        )
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/health", get(health))
        .nest("/api/chat", rooms::router())
        .nest("/api/messages", messages::router())
        .nest("/api/upload", media::router())
        .nest("/api/presence", presence::router())
        .merge(relay::router())
        .with_state(state)
        .layer(cors)
        // Generous transport cap; the media intake enforces the 10 MiB
        // ceiling clients actually see.
        .layer(DefaultBodyLimit::max(64 * 1024 * 1024));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "chat service listening");
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "chat-service" }))
}
