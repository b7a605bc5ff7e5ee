//! OpenAI-compatible chat-completions wire types.
//!
//! Grounded on the teacher's `openai_sse` module (request/chunk DTO shapes)
//! and `llm::openai::ChatOpenAI`'s streaming doc comment describing the SSE
//! framing (`data: {json}\n\n`, `choices[0].delta.content`, terminal
//! `data: [DONE]`) — here read from the response side rather than written,
//! since this crate is a client of the backend, not a server for one.

use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;

#[derive(Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
    #[serde(default)]
    pub model: String,
}

#[derive(Deserialize, Debug)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: String,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    pub usage: Option<Usage>,
    #[serde(default)]
    pub model: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChunkDelta {
    pub content: Option<String>,
}

/// Parses one SSE `data:` line's JSON payload, or `None` for `[DONE]`.
pub fn parse_sse_data_line(line: &str) -> Option<Result<ChatCompletionChunk, serde_json::Error>> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        return None;
    }
    Some(serde_json::from_str(payload))
}
