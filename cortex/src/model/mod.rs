//! C6: Model Client — dispatches chat completions to a backend endpoint,
//! either as a single non-streaming call (TRIVIAL/ROUTINE) or as an
//! internally-streamed call whose tokens are aggregated into one response
//! before returning (COMPLEX/TOOL_HEAVY), per spec.md §4.6.
//!
//! Grounded on the teacher's `llm::LlmClient` trait shape (one async method,
//! a `StubLlm`/fake for tests rather than an HTTP-mocking crate) and the
//! `openai_sse` module's description of the wire format this client consumes
//! rather than produces.

mod wire;

use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::{Duration, Instant};

use crate::endpoint::BackendEndpoint;
use crate::message::ChatMessage;
use crate::state::TokenUsage;

pub use wire::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};

/// Outcome of one model call; errors are encoded as a field rather than `Err`,
/// matching spec.md §7 ("nothing inside the graph propagates as an exception
/// past the node boundary").
#[derive(Clone, Debug, Default)]
pub struct ModelCallResult {
    pub response: String,
    pub usage: Option<TokenUsage>,
    pub model_name: String,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// One increment of the external streaming surface: either a content delta
/// as it arrives from the backend, or the terminal event once the backend's
/// stream ends (or the call fails before producing any content).
#[derive(Clone, Debug)]
pub enum ChatStreamEvent {
    Delta(String),
    Done {
        model_name: String,
        usage: Option<TokenUsage>,
    },
}

pub type ChatStream = Pin<Box<dyn futures_util::Stream<Item = ChatStreamEvent> + Send>>;

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// `stream_internally` selects the wire mode: `false` issues one
    /// non-streaming request; `true` requests an SSE stream and aggregates it
    /// into a single `ModelCallResult` before returning.
    async fn call(
        &self,
        endpoint: &BackendEndpoint,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
        stream_internally: bool,
    ) -> ModelCallResult;

    /// True token-by-token passthrough for the external streaming surface:
    /// yields each backend delta as it arrives rather than buffering until
    /// the call finishes. Defaults to aggregating via `call` and replaying it
    /// as a single delta, since most callers (tests, the evolution oracle)
    /// never stream externally; `HttpModelClient` overrides this with a real
    /// SSE passthrough.
    async fn stream_chat(
        &self,
        endpoint: &BackendEndpoint,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> ChatStream {
        let result = self.call(endpoint, messages, temperature, max_tokens, false).await;
        Box::pin(futures_util::stream::iter(vec![
            ChatStreamEvent::Delta(result.response),
            ChatStreamEvent::Done {
                model_name: result.model_name,
                usage: result.usage,
            },
        ]))
    }
}

pub struct HttpModelClient {
    http: reqwest::Client,
}

impl Default for HttpModelClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpModelClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn call_non_streaming(
        &self,
        endpoint: &BackendEndpoint,
        request: ChatCompletionRequest,
    ) -> ModelCallResult {
        let start = Instant::now();
        let result = self
            .http
            .post(format!("{}/chat/completions", endpoint.base_url))
            .timeout(endpoint.timeout)
            .json(&request)
            .send()
            .await;
        let latency_ms = elapsed_ms(start);

        let resp = match result {
            Ok(r) => r,
            Err(e) => return error_result(endpoint, latency_ms, classify_reqwest_error(&e, start)),
        };

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(
                endpoint = %endpoint.name,
                status,
                body = %truncate_body(&body),
                "model backend returned error status"
            );
            return error_result(endpoint, latency_ms, format!("http_{status}"));
        }

        match resp.json::<ChatCompletionResponse>().await {
            Ok(body) => {
                let content = body
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .unwrap_or_default();
                ModelCallResult {
                    response: content,
                    usage: body.usage.map(to_token_usage),
                    model_name: if body.model.is_empty() {
                        endpoint.model_id.clone()
                    } else {
                        body.model
                    },
                    latency_ms,
                    error: None,
                }
            }
            Err(e) => error_result(endpoint, latency_ms, e.to_string()),
        }
    }

    async fn call_streaming(
        &self,
        endpoint: &BackendEndpoint,
        request: ChatCompletionRequest,
    ) -> ModelCallResult {
        let start = Instant::now();
        let result = self
            .http
            .post(format!("{}/chat/completions", endpoint.base_url))
            .timeout(endpoint.timeout)
            .json(&request)
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                return error_result(endpoint, elapsed_ms(start), classify_reqwest_error(&e, start))
            }
        };

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(
                endpoint = %endpoint.name,
                status,
                body = %truncate_body(&body),
                "model backend returned error status"
            );
            return error_result(endpoint, elapsed_ms(start), format!("http_{status}"));
        }

        let mut stream = resp.bytes_stream();
        let mut buf = String::new();
        let mut content = String::new();
        let mut usage = None;
        let mut model_name = endpoint.model_id.clone();

        loop {
            let chunk = match stream.next().await {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    return error_result(endpoint, elapsed_ms(start), classify_reqwest_error(&e, start))
                }
                None => break,
            };
            buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buf.find("\n\n") {
                let frame = buf[..pos].to_string();
                buf.drain(..pos + 2);
                for line in frame.lines() {
                    if let Some(parsed) = wire::parse_sse_data_line(line) {
                        match parsed {
                            Ok(sse_chunk) => {
                                if !sse_chunk.model.is_empty() {
                                    model_name = sse_chunk.model;
                                }
                                if let Some(u) = sse_chunk.usage {
                                    usage = Some(u);
                                }
                                for choice in sse_chunk.choices {
                                    if let Some(delta) = choice.delta.content {
                                        content.push_str(&delta);
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "malformed SSE chunk, skipping");
                            }
                        }
                    }
                }
            }
        }

        ModelCallResult {
            response: content,
            usage: usage.map(to_token_usage),
            model_name,
            latency_ms: elapsed_ms(start),
            error: None,
        }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn call(
        &self,
        endpoint: &BackendEndpoint,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
        stream_internally: bool,
    ) -> ModelCallResult {
        let request = ChatCompletionRequest {
            model: endpoint.model_id.clone(),
            messages,
            temperature,
            max_tokens,
            stream: stream_internally,
        };

        if stream_internally {
            self.call_streaming(endpoint, request).await
        } else {
            self.call_non_streaming(endpoint, request).await
        }
    }

    async fn stream_chat(
        &self,
        endpoint: &BackendEndpoint,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> ChatStream {
        let request = ChatCompletionRequest {
            model: endpoint.model_id.clone(),
            messages,
            temperature,
            max_tokens,
            stream: true,
        };

        let result = self
            .http
            .post(format!("{}/chat/completions", endpoint.base_url))
            .timeout(endpoint.timeout)
            .json(&request)
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(endpoint = %endpoint.name, error = %e, "model stream request failed");
                return Box::pin(futures_util::stream::iter(vec![ChatStreamEvent::Done {
                    model_name: endpoint.model_id.clone(),
                    usage: None,
                }]));
            }
        };

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(
                endpoint = %endpoint.name,
                status,
                body = %truncate_body(&body),
                "model backend returned error status"
            );
            return Box::pin(futures_util::stream::iter(vec![ChatStreamEvent::Done {
                model_name: endpoint.model_id.clone(),
                usage: None,
            }]));
        }

        let byte_stream = resp
            .bytes_stream()
            .map(|r| r.map(|b| String::from_utf8_lossy(&b).into_owned()));

        let state = SseFrameState {
            byte_stream: Box::pin(byte_stream),
            buf: String::new(),
            pending: VecDeque::new(),
            ended: false,
            emitted_done: false,
            model_name: endpoint.model_id.clone(),
            usage: None,
            endpoint_name: endpoint.name.clone(),
        };

        Box::pin(futures_util::stream::unfold(state, next_sse_event))
    }
}

/// Drives one backend SSE connection, one `\n\n`-delimited frame at a time,
/// so deltas reach the caller as soon as they arrive rather than after the
/// whole response has been buffered.
struct SseFrameState {
    byte_stream: Pin<Box<dyn futures_util::Stream<Item = Result<String, reqwest::Error>> + Send>>,
    buf: String,
    pending: VecDeque<ChatStreamEvent>,
    ended: bool,
    emitted_done: bool,
    model_name: String,
    usage: Option<TokenUsage>,
    endpoint_name: String,
}

async fn next_sse_event(mut state: SseFrameState) -> Option<(ChatStreamEvent, SseFrameState)> {
    loop {
        if let Some(event) = state.pending.pop_front() {
            return Some((event, state));
        }
        if state.ended {
            if state.emitted_done {
                return None;
            }
            state.emitted_done = true;
            return Some((
                ChatStreamEvent::Done {
                    model_name: state.model_name.clone(),
                    usage: state.usage,
                },
                state,
            ));
        }

        match state.byte_stream.next().await {
            Some(Ok(text)) => {
                state.buf.push_str(&text);
                while let Some(pos) = state.buf.find("\n\n") {
                    let frame = state.buf[..pos].to_string();
                    state.buf.drain(..pos + 2);
                    for line in frame.lines() {
                        if let Some(parsed) = wire::parse_sse_data_line(line) {
                            match parsed {
                                Ok(chunk) => {
                                    if !chunk.model.is_empty() {
                                        state.model_name = chunk.model;
                                    }
                                    if let Some(u) = chunk.usage {
                                        state.usage = Some(to_token_usage(u));
                                    }
                                    for choice in chunk.choices {
                                        if let Some(delta) = choice.delta.content {
                                            if !delta.is_empty() {
                                                state.pending.push_back(ChatStreamEvent::Delta(delta));
                                            }
                                        }
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "malformed SSE chunk, skipping");
                                }
                            }
                        }
                    }
                }
            }
            Some(Err(e)) => {
                tracing::error!(endpoint = %state.endpoint_name, error = %e, "model stream read failed");
                state.ended = true;
            }
            None => {
                state.ended = true;
            }
        }
    }
}

fn to_token_usage(u: wire::Usage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Truncates to at most 500 bytes on a char boundary, for logging an error
/// body without risking an unbounded or binary payload in the log line.
fn truncate_body(body: &str) -> &str {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body;
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

fn error_result(endpoint: &BackendEndpoint, latency_ms: u64, error: String) -> ModelCallResult {
    tracing::warn!(endpoint = %endpoint.name, %error, "model call failed");
    ModelCallResult {
        response: String::new(),
        usage: None,
        model_name: endpoint.model_id.clone(),
        latency_ms,
        error: Some(error),
    }
}

fn classify_reqwest_error(e: &reqwest::Error, start: Instant) -> String {
    if e.is_timeout() {
        timeout_error_message(start.elapsed())
    } else {
        e.to_string()
    }
}

pub fn timeout_error_message(elapsed: Duration) -> String {
    format!("timeout after {}ms", elapsed.as_millis())
}
