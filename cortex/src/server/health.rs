//! `GET /health` and `GET /health/full`, per spec.md §6: a cheap liveness
//! probe plus a deeper check of every dependency the graph touches, including
//! a routing self-test against the classifier.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::Json;

use crate::classify;
use crate::endpoint::EndpointRole;
use crate::state::{ComplexityTag, RequestState};

use super::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn backend_reachable(http: &reqwest::Client, base_url: &str) -> bool {
    http.get(format!("{base_url}/health"))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

pub async fn health_full(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let deep = state.registry.get(EndpointRole::Deep);
    let fast = state.registry.get(EndpointRole::Fast);

    let (memory_ok, knowledge_ok, deep_ok, fast_ok) = tokio::join!(
        state.memory.health(),
        state.knowledge.health_check(),
        backend_reachable(&state.http, &deep.base_url),
        backend_reachable(&state.http, &fast.base_url),
    );

    // A trivial prompt must route to the fast executor; anything else means
    // the classifier tables or endpoint registry are misconfigured.
    let mut probe = RequestState::new("hello", vec![], "health-check", "health-check");
    classify::classify(&mut probe, &state.registry);
    let routing_ok = probe.complexity == Some(ComplexityTag::Trivial) && probe.endpoint == "fast";

    let all_ok = memory_ok && knowledge_ok && deep_ok && fast_ok && routing_ok;
    let any_ok = memory_ok || knowledge_ok || deep_ok || fast_ok;
    let status = if all_ok {
        "healthy"
    } else if any_ok {
        "degraded"
    } else {
        "unhealthy"
    };

    Json(serde_json::json!({
        "status": status,
        "memory": memory_ok,
        "knowledge_graph": knowledge_ok,
        "deep_reasoner": deep_ok,
        "fast_executor": fast_ok,
        "routing_self_test": routing_ok,
    }))
}
