//! HTTP surface: wires the cognitive graph, status tool, and backend
//! registry into an axum `Router`, mirroring the teacher's `serve` crate
//! (`AppState` + `router(state) -> Router`, request logic split into its
//! own module rather than living in the handler).

mod chat;
mod health;
mod status;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;

use crate::endpoint::EndpointRegistry;
use crate::graph::CompiledStateGraph;
use crate::knowledge::KnowledgeClient;
use crate::memory::MemoryClient;
use crate::model::ModelClient;
use crate::state::RequestState;
use crate::status::StatusTool;

/// Shared, read-only handles every handler needs. Wrapped in a single `Arc`
/// and handed to every route via axum's `State` extractor.
pub struct AppState {
    pub graph: CompiledStateGraph<RequestState>,
    pub registry: Arc<EndpointRegistry>,
    pub memory: Arc<dyn MemoryClient>,
    pub knowledge: Arc<dyn KnowledgeClient>,
    pub status_tool: Arc<StatusTool>,
    pub model: Arc<dyn ModelClient>,
    pub http: reqwest::Client,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/status", get(status::status))
        .route("/health", get(health::health))
        .route("/health/full", get(health::health_full))
        .with_state(state)
}

/// Binds `addr`, builds the router, and serves until the process is killed.
/// Split from `router` so tests can exercise routing without a live socket.
pub async fn run(addr: &str, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "cortex listening");
    axum::serve(listener, router(state)).await
}
