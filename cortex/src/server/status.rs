//! `GET /status`: structured sovereign-status JSON plus the same Markdown
//! rendering `HandleStatusNode` embeds in a chat response, per spec.md §4.4.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::status::format_status_markdown;

use super::AppState;

pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sovereign = state.status_tool.sovereign_status().await;
    let markdown = format_status_markdown(&sovereign);

    Json(serde_json::json!({
        "healthy": sovereign.healthy,
        "markdown": markdown,
        "gpu": {
            "total_vram_used_gb": sovereign.gpu.total_vram_used_gb,
            "total_vram_capacity_gb": sovereign.gpu.total_vram_capacity_gb,
            "utilization_pct": sovereign.gpu.utilization_pct,
            "gpu_count": sovereign.gpu.gpus.len(),
        },
        "memory_count": sovereign.memory.memory_count,
    }))
}
