//! `POST /v1/chat/completions`: the external request/response shape, distinct
//! from `model::wire`'s client-side DTOs for talking to a backend. Request
//! handling (deserialize, invoke the graph, shape the response) is kept out
//! of `mod.rs`'s router wiring, matching the teacher's `app.rs`/`run.rs` split.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cognitive::run_streaming;
use crate::message::{ChatMessage, Role};
use crate::model::ChatStreamEvent;
use crate::state::{RequestState, TokenUsage};

use super::AppState;

#[derive(Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

#[derive(Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<WireMessage>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Serialize)]
pub struct ResponseMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Serialize)]
pub struct ResponseChoice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: &'static str,
}

#[derive(Serialize, Default)]
pub struct UsageDto {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<TokenUsage> for UsageDto {
    fn from(u: TokenUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ResponseChoice>,
    pub usage: UsageDto,
    pub routing_reason: String,
}

fn parse_role(role: &str) -> Role {
    match role {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        _ => Role::User,
    }
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Response {
    if req.messages.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "messages must not be empty".to_string(),
            }),
        )
            .into_response();
    }

    let messages: Vec<ChatMessage> = req
        .messages
        .iter()
        .map(|m| ChatMessage {
            role: parse_role(&m.role),
            content: m.content.clone(),
        })
        .collect();

    let user_id = req.user.clone().unwrap_or_else(|| "anonymous".to_string());
    let chat_id = Uuid::new_v4().to_string();
    let mut request_state = RequestState::new("", messages, user_id, chat_id);
    request_state.temperature = req.temperature;
    request_state.max_tokens = req.max_tokens;
    request_state.stream = req.stream;
    request_state.model_override = req.model.clone();

    if req.stream {
        return match run_streaming(
            state.memory.clone(),
            state.knowledge.clone(),
            state.status_tool.clone(),
            state.model.clone(),
            state.registry.clone(),
            request_state,
        )
        .await
        {
            Ok(chat_stream) => stream_response(chat_stream).into_response(),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody { error: e.to_string() }),
            )
                .into_response(),
        };
    }

    let result = match state.graph.invoke(request_state).await {
        Ok(s) => s,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody { error: e.to_string() }),
            )
                .into_response()
        }
    };

    let body = ChatResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: "chat.completion",
        created: chrono::Utc::now().timestamp(),
        model: result.response_model_name,
        choices: vec![ResponseChoice {
            index: 0,
            message: ResponseMessage {
                role: "assistant",
                content: result.response,
            },
            finish_reason: "stop",
        }],
        usage: result.usage.map(UsageDto::from).unwrap_or_default(),
        routing_reason: result.routing_reason,
    };
    Json(body).into_response()
}

/// Converts `run_streaming`'s `ChatStreamEvent`s into OpenAI-shaped SSE
/// frames, one per delta as it arrives rather than after the call finishes,
/// per spec.md §4.5's "proxy backend SSE verbatim as it arrives".
fn stream_response(
    chat_stream: crate::model::ChatStream,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let id = format!("chatcmpl-{}", Uuid::new_v4());
    let created = chrono::Utc::now().timestamp();

    let events = chat_stream.flat_map(move |event| {
        let frames: Vec<Result<Event, std::convert::Infallible>> = match event {
            ChatStreamEvent::Delta(content) => {
                let chunk = serde_json::json!({
                    "id": id,
                    "object": "chat.completion.chunk",
                    "created": created,
                    "choices": [{
                        "index": 0,
                        "delta": {"content": content},
                        "finish_reason": serde_json::Value::Null,
                    }],
                });
                vec![Ok(Event::default().data(chunk.to_string()))]
            }
            ChatStreamEvent::Done { model_name, usage } => {
                let chunk = serde_json::json!({
                    "id": id,
                    "object": "chat.completion.chunk",
                    "created": created,
                    "model": model_name,
                    "choices": [{
                        "index": 0,
                        "delta": {},
                        "finish_reason": "stop",
                    }],
                    "usage": usage.map(UsageDto::from),
                });
                vec![
                    Ok(Event::default().data(chunk.to_string())),
                    Ok(Event::default().data("[DONE]")),
                ]
            }
        };
        futures_util::stream::iter(frames)
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
