//! C3: Memory Client — retrieve/store long-term memories against an external
//! memory service.
//!
//! Grounded on `memory/mem0_client.py`: REST endpoints (`/v1/memories/` family),
//! fail-soft error handling (log and return `None`/empty rather than abort),
//! and the `health_check` pattern. The client here holds only snapshots; the
//! memory service owns embeddings and persistence (spec.md §1 Non-goals).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A single memory record, external-owned by the memory service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub score: Option<f32>,
}

/// Caps the formatted memory-context block to roughly 4,000 characters
/// (~1,000 tokens), per spec.md §4.2.
const CONTEXT_CHAR_BUDGET: usize = 4000;

#[async_trait]
pub trait MemoryClient: Send + Sync {
    async fn store(
        &self,
        content: &str,
        user_id: &str,
        metadata: HashMap<String, String>,
    ) -> Option<String>;

    async fn search(&self, query: &str, user_id: &str, limit: usize) -> Vec<Memory>;

    async fn get(&self, id: &str) -> Option<Memory>;

    async fn get_all(&self, user_id: &str, limit: usize) -> Vec<Memory>;

    async fn delete(&self, id: &str) -> bool;

    async fn health(&self) -> bool;
}

/// REST client for an external memory service, matching the `/v1/memories/`
/// protocol in spec.md §6.
pub struct HttpMemoryClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpMemoryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
        }
    }
}

#[derive(Serialize)]
struct StoreRequest<'a> {
    messages: Vec<HashMap<&'static str, &'a str>>,
    user_id: &'a str,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
struct StoreResponse {
    id: Option<String>,
    memory_id: Option<String>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    user_id: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    memories: Vec<Memory>,
}

#[async_trait]
impl MemoryClient for HttpMemoryClient {
    async fn store(
        &self,
        content: &str,
        user_id: &str,
        metadata: HashMap<String, String>,
    ) -> Option<String> {
        let mut message = HashMap::new();
        message.insert("role", "user");
        message.insert("content", content);
        let payload = StoreRequest {
            messages: vec![message],
            user_id,
            metadata,
        };
        let result = self
            .http
            .post(format!("{}/v1/memories/", self.base_url))
            .json(&payload)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<StoreResponse>().await {
                    Ok(body) => body.id.or(body.memory_id),
                    Err(e) => {
                        tracing::warn!(error = %e, "memory store: malformed response");
                        None
                    }
                }
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "memory store failed");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "memory store request failed");
                None
            }
        }
    }

    async fn search(&self, query: &str, user_id: &str, limit: usize) -> Vec<Memory> {
        let payload = SearchRequest {
            query,
            user_id,
            limit,
        };
        let result = self
            .http
            .post(format!("{}/v1/memories/search/", self.base_url))
            .json(&payload)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => resp
                .json::<SearchResponse>()
                .await
                .map(|r| r.memories)
                .unwrap_or_default(),
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "memory search failed");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "memory search request failed");
                Vec::new()
            }
        }
    }

    async fn get(&self, id: &str) -> Option<Memory> {
        let result = self
            .http
            .get(format!("{}/v1/memories/{}/", self.base_url, id))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => resp.json::<Memory>().await.ok(),
            _ => None,
        }
    }

    async fn get_all(&self, user_id: &str, limit: usize) -> Vec<Memory> {
        let result = self
            .http
            .get(format!("{}/v1/memories/", self.base_url))
            .query(&[("user_id", user_id), ("limit", &limit.to_string())])
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => resp
                .json::<SearchResponse>()
                .await
                .map(|r| r.memories)
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    async fn delete(&self, id: &str) -> bool {
        matches!(
            self.http
                .delete(format!("{}/v1/memories/{}/", self.base_url, id))
                .send()
                .await,
            Ok(resp) if resp.status().is_success()
        )
    }

    async fn health(&self) -> bool {
        matches!(
            self.http
                .get(format!("{}/health", self.base_url))
                .timeout(Duration::from_secs(10))
                .send()
                .await,
            Ok(resp) if resp.status().is_success()
        )
    }
}

/// Builds the stored-content string for a successful COMPLEX/TOOL_HEAVY
/// interaction, per spec.md §4.2.
pub fn format_store_content(prompt: &str, response: &str) -> String {
    let prompt_trunc: String = prompt.chars().take(500).collect();
    let response_trunc: String = response.chars().take(500).collect();
    format!("User asked: {prompt_trunc}\n\nAssistant response summary: {response_trunc}")
}

pub fn store_metadata() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("source".to_string(), "cognitive_graph".to_string());
    m
}

/// Formats retrieved memories into a `<relevant_memories>` block capped at
/// `CONTEXT_CHAR_BUDGET` characters; excess memories collapse into a single
/// truncation line.
pub fn format_memory_context(memories: &[Memory]) -> String {
    if memories.is_empty() {
        return String::new();
    }

    let mut lines = Vec::new();
    let mut used = 0usize;
    let mut truncated = false;
    for memory in memories {
        let line = format!("- {}", memory.content);
        if used + line.len() > CONTEXT_CHAR_BUDGET {
            truncated = true;
            break;
        }
        used += line.len();
        lines.push(line);
    }
    if truncated {
        lines.push("... (additional memories truncated)".to_string());
    }

    format!("<relevant_memories>\n{}\n</relevant_memories>", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(content: &str) -> Memory {
        Memory {
            id: "m1".into(),
            content: content.to_string(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            updated_at: None,
            score: None,
        }
    }

    #[test]
    fn format_memory_context_empty_is_empty_string() {
        assert_eq!(format_memory_context(&[]), "");
    }

    #[test]
    fn format_memory_context_includes_all_under_budget() {
        let memories = vec![memory("first fact"), memory("second fact")];
        let out = format_memory_context(&memories);
        assert!(out.contains("first fact"));
        assert!(out.contains("second fact"));
        assert!(out.starts_with("<relevant_memories>"));
        assert!(out.ends_with("</relevant_memories>"));
    }

    #[test]
    fn format_memory_context_truncates_once_over_budget() {
        let big = "x".repeat(CONTEXT_CHAR_BUDGET);
        let memories = vec![memory(&big), memory("overflow fact")];
        let out = format_memory_context(&memories);
        assert_eq!(out.matches("truncated").count(), 1);
    }

    #[test]
    fn format_store_content_truncates_to_500_chars_each() {
        let prompt = "p".repeat(600);
        let response = "r".repeat(600);
        let stored = format_store_content(&prompt, &response);
        assert!(stored.contains(&"p".repeat(500)));
        assert!(!stored.contains(&"p".repeat(501)));
        assert!(stored.contains(&"r".repeat(500)));
    }
}
