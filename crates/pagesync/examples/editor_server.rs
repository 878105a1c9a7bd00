use axum::{extract::State, response::Json, routing::get, Router};
use pagesync::{DocumentRegistry, SyncConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

// Overview of every open document and its pages
async fn list_documents(State(registry): State<Arc<DocumentRegistry>>) -> Json<Value> {
    let documents: Vec<Value> = registry
        .list_documents()
        .into_iter()
        .filter_map(|id| registry.get(&id))
        .map(|session| {
            json!({
                "documentId": session.id(),
                "clients": session.client_count(),
                "pages": session.snapshot(),
            })
        })
        .collect();

    Json(json!({ "documents": documents }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing, RUST_LOG=pagesync=debug for per-operation logs
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting collaborative editor server...");

    let config = SyncConfig::load()?;
    config.validate()?;

    let registry = Arc::new(DocumentRegistry::new());

    let app = pagesync::router_with_sync(registry.clone(), &config).merge(
        Router::new()
            .route("/documents", get(list_documents))
            .with_state(registry),
    );

    let addr = std::env::var("EDITOR_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!("Server running on http://{}", addr);
    info!("WebSocket endpoint available at ws://{}{}", addr, config.ws_path);
    info!("  GET    /documents    - List open documents");

    axum::serve(listener, app).await?;

    Ok(())
}
