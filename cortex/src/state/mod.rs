//! `RequestState`: the value that flows through the cognitive graph.
//!
//! Fields are grouped by when they're written, matching spec.md §3: Input
//! (set by the caller, never mutated), Routing (set by the classifier),
//! Context (set by the retrievers), Output (set by the model/status call),
//! Verification (set by metacognition), and Timing.

use chrono::{DateTime, Utc};

use crate::memory::Memory;
use crate::message::ChatMessage;

pub const MAX_RETRIES: u32 = 2;

/// A discrete classification of a request, assigned once by the classifier
/// and never mutated afterward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComplexityTag {
    Trivial,
    Routine,
    Complex,
    ToolHeavy,
}

impl ComplexityTag {
    /// TRIVIAL/ROUTINE route to the fast executor; COMPLEX/TOOL_HEAVY to the deep reasoner.
    pub fn needs_deep_reasoner(&self) -> bool {
        matches!(self, ComplexityTag::Complex | ComplexityTag::ToolHeavy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityTag::Trivial => "trivial",
            ComplexityTag::Routine => "routine",
            ComplexityTag::Complex => "complex",
            ComplexityTag::ToolHeavy => "tool_heavy",
        }
    }
}

/// Token usage, echoed from whichever backend answered the request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The value that flows through the cognitive graph, one instance per request.
#[derive(Clone, Debug)]
pub struct RequestState {
    // --- Input: set by caller, never mutated ---
    pub prompt: String,
    pub messages: Vec<ChatMessage>,
    pub user_id: String,
    pub chat_id: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
    pub model_override: Option<String>,
    pub requires_tool_orchestration: bool,

    // --- Routing: set by classifier, read downstream ---
    pub complexity: Option<ComplexityTag>,
    pub routing_reason: String,
    pub model_name: String,
    pub endpoint: String,
    pub is_status_query: bool,

    // --- Context: set by retrievers ---
    pub memory_context: String,
    pub code_context: String,
    pub memories: Vec<Memory>,

    // --- Output: set by model/status ---
    pub response: String,
    pub usage: Option<TokenUsage>,
    pub response_model_name: String,
    pub latency_ms: u64,
    pub error: Option<String>,

    // --- Verification: set by metacognition, read by conditional edge ---
    pub passed: bool,
    pub verdict: String,
    pub retry_count: u32,

    // --- Timing ---
    pub start_time: DateTime<Utc>,
    pub final_latency_ms: u64,
}

impl RequestState {
    /// Builds the initial state for a new request: routing/context/output/
    /// verification fields are empty, `retry_count = 0`, `start_time` is now.
    pub fn new(
        prompt: impl Into<String>,
        messages: Vec<ChatMessage>,
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            messages,
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            temperature: 0.7,
            max_tokens: 1024,
            stream: false,
            model_override: None,
            requires_tool_orchestration: false,

            complexity: None,
            routing_reason: String::new(),
            model_name: String::new(),
            endpoint: String::new(),
            is_status_query: false,

            memory_context: String::new(),
            code_context: String::new(),
            memories: Vec::new(),

            response: String::new(),
            usage: None,
            response_model_name: String::new(),
            latency_ms: 0,
            error: None,

            passed: false,
            verdict: String::new(),
            retry_count: 0,

            start_time: Utc::now(),
            final_latency_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_tag_routes_deep_reasoner_correctly() {
        assert!(ComplexityTag::Complex.needs_deep_reasoner());
        assert!(ComplexityTag::ToolHeavy.needs_deep_reasoner());
        assert!(!ComplexityTag::Trivial.needs_deep_reasoner());
        assert!(!ComplexityTag::Routine.needs_deep_reasoner());
    }

    #[test]
    fn new_state_starts_with_zero_retries() {
        let state = RequestState::new("hi", vec![], "user-1", "chat-1");
        assert_eq!(state.retry_count, 0);
        assert!(state.complexity.is_none());
    }
}
