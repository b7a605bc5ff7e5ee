//! Binary entry point: loads configuration, builds the real client handles,
//! compiles the cognitive graph, and serves the HTTP surface.

use std::sync::Arc;

use cortex::build_cognitive_graph;
use cortex::endpoint::EndpointRegistry;
use cortex::knowledge::GraphKnowledgeClient;
use cortex::memory::HttpMemoryClient;
use cortex::model::HttpModelClient;
use cortex::server::{self, AppState};
use cortex::status::StatusTool;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    cortex_config::load_and_apply("cortex", None)?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let registry = Arc::new(EndpointRegistry::from_env());

    let memory_url = std::env::var("CORTEX_MEMORY_URL").unwrap_or_else(|_| "http://mem0:8000".to_string());
    let memory: Arc<dyn cortex::memory::MemoryClient> = Arc::new(HttpMemoryClient::new(memory_url.clone()));

    let neo4j_uri = std::env::var("NEO4J_URI").unwrap_or_else(|_| "bolt://localhost:7687".to_string());
    let neo4j_user = std::env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string());
    let neo4j_password = std::env::var("NEO4J_PASSWORD").unwrap_or_default();
    let knowledge: Arc<dyn cortex::knowledge::KnowledgeClient> =
        match GraphKnowledgeClient::connect(&neo4j_uri, &neo4j_user, &neo4j_password).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::error!(error = %e, "failed to connect to knowledge graph");
                return Err(Box::new(e) as Box<dyn std::error::Error>);
            }
        };

    let dcgm_url =
        std::env::var("CORTEX_DCGM_URL").unwrap_or_else(|_| "http://dcgm:9400/metrics".to_string());
    let status_tool = Arc::new(StatusTool::new(dcgm_url, memory_url));

    let model: Arc<dyn cortex::model::ModelClient> = Arc::new(HttpModelClient::new());

    let graph = build_cognitive_graph(
        memory.clone(),
        knowledge.clone(),
        status_tool.clone(),
        model.clone(),
        registry.clone(),
    )
    .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    let state = Arc::new(AppState {
        graph,
        registry,
        memory,
        knowledge,
        status_tool,
        model,
        http: reqwest::Client::new(),
    });

    let addr = std::env::var("CORTEX_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    server::run(&addr, state).await?;

    Ok(())
}
