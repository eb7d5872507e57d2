//! bramble - branching chat server
//!
//! A Rust backend for branching LLM conversations: any prior message can
//! be edited or regenerated into a sibling branch, and assistant turns
//! stream over SSE with one round of mid-turn tool execution.

mod api;
mod db;
mod events;
mod files;
mod formatter;
mod llm;
mod orchestrator;
mod title;
mod tools;
mod tree;

use api::{create_router, AppState};
use db::Database;
use files::FileStore;
use llm::LlamaClient;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tools::ToolRegistry;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bramble=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let db_path = std::env::var("BRAMBLE_DB_PATH").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.bramble/bramble.db")
    });

    let port: u16 = std::env::var("BRAMBLE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    let upload_dir = std::env::var("BRAMBLE_UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string());

    let max_upload_bytes: usize = std::env::var("BRAMBLE_MAX_UPLOAD_BYTES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

    let llama_url = std::env::var("LLAMA_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:8080/v1/chat/completions".to_string());

    let search_url = std::env::var("SEARCH_URL").ok();
    if search_url.is_none() {
        tracing::warn!("SEARCH_URL not set; the web_search tool will report itself unavailable");
    }

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Initialize storage
    tracing::info!(path = %db_path, "Opening database");
    let db = Database::open(&db_path)?;
    let files = Arc::new(FileStore::new(
        db.clone(),
        PathBuf::from(upload_dir),
        max_upload_bytes,
    )?);

    // Model client and tools
    tracing::info!(url = %llama_url, "Using model endpoint");
    let client = Arc::new(LlamaClient::new(llama_url));
    let tools = Arc::new(ToolRegistry::new(search_url));

    // Create application state
    let state = AppState::new(db, files, client, tools);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new().gzip(true).br(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("bramble server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
