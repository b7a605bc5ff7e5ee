//! C8: Cognitive Graph — wires C2–C7 into the state machine described in
//! spec.md §4.7: `parse -> (memory?) -> classify -> (status | knowledge ->
//! model) -> store -> (metacog?) -> finalize`, with a retry backedge from
//! metacog to call_model.
//!
//! Built on the `graph` module's `StateGraph`/`Node`: each node below is a
//! thin adapter around the corresponding component, following the same
//! one-struct-per-node shape the graph engine's own tests use.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::classify::{self, TRIVIAL_INDICATORS};
use crate::endpoint::{EndpointRegistry, EndpointRole};
use crate::error::CortexError;
use crate::graph::{CompiledStateGraph, Next, Node, StateGraph, END, START};
use crate::knowledge::KnowledgeClient;
use crate::memory::{self, MemoryClient};
use crate::message::ChatMessage;
use crate::metacog;
use crate::model::ModelClient;
use crate::state::RequestState;
use crate::status::{self, StatusTool};

const MEMORY_SEARCH_LIMIT: usize = 5;
const CODE_CONTEXT_LIMIT: usize = 10;
const CODE_CONTEXT_MAX_CHARS: usize = 2000;

struct ParseNode;

#[async_trait]
impl Node<RequestState> for ParseNode {
    fn id(&self) -> &str {
        "parse"
    }

    async fn run(&self, mut state: RequestState) -> Result<(RequestState, Next), CortexError> {
        if state.prompt.is_empty() {
            if let Some(content) = crate::message::last_user_message(&state.messages) {
                state.prompt = content.to_string();
            }
        }
        state.start_time = chrono::Utc::now();
        Ok((state, Next::Continue))
    }
}

fn is_trivial_greeting(prompt: &str) -> bool {
    let lower = prompt.to_lowercase();
    TRIVIAL_INDICATORS.iter().any(|ind| lower.contains(ind)) && prompt.len() < 50
}

fn route_after_parse(state: &RequestState) -> String {
    if is_trivial_greeting(&state.prompt) {
        "classify".to_string()
    } else {
        "retrieve_memory".to_string()
    }
}

struct RetrieveMemoryNode {
    client: Arc<dyn MemoryClient>,
}

#[async_trait]
impl Node<RequestState> for RetrieveMemoryNode {
    fn id(&self) -> &str {
        "retrieve_memory"
    }

    async fn run(&self, mut state: RequestState) -> Result<(RequestState, Next), CortexError> {
        if !self.client.health().await {
            tracing::warn!("memory service unhealthy, skipping memory retrieval");
            state.memory_context = String::new();
            state.memories = Vec::new();
            return Ok((state, Next::Continue));
        }

        let memories = self
            .client
            .search(&state.prompt, &state.user_id, MEMORY_SEARCH_LIMIT)
            .await;
        state.memory_context = memory::format_memory_context(&memories);
        state.memories = memories;
        Ok((state, Next::Continue))
    }
}

struct ClassifyNode {
    registry: Arc<EndpointRegistry>,
}

#[async_trait]
impl Node<RequestState> for ClassifyNode {
    fn id(&self) -> &str {
        "classify"
    }

    async fn run(&self, mut state: RequestState) -> Result<(RequestState, Next), CortexError> {
        classify::classify(&mut state, &self.registry);
        Ok((state, Next::Continue))
    }
}

fn route_after_classify(state: &RequestState) -> String {
    if state.is_status_query {
        "handle_status".to_string()
    } else {
        "retrieve_knowledge".to_string()
    }
}

struct HandleStatusNode {
    status_tool: Arc<StatusTool>,
}

#[async_trait]
impl Node<RequestState> for HandleStatusNode {
    fn id(&self) -> &str {
        "handle_status"
    }

    async fn run(&self, mut state: RequestState) -> Result<(RequestState, Next), CortexError> {
        let sovereign_status = self.status_tool.sovereign_status().await;
        state.response = status::format_status_markdown(&sovereign_status);
        state.response_model_name = "status_tool".to_string();
        Ok((state, Next::Continue))
    }
}

/// Keywords that mark a prompt as code-related, for `should_retrieve_knowledge`.
const CODE_INDICATORS: &[&str] = &[
    "function", "class", "method", "import", "file", "where is", "find", "reference", "caller",
    "called", "defined", "implement", "code", "source",
];

/// Knowledge-graph retrieval only runs for TOOL_HEAVY tasks whose prompt
/// mentions something code-related; classify() has already run by the time
/// this gate is checked (classify -> retrieve_knowledge), so `state.complexity`
/// reflects the real classification rather than the pre-classification
/// heuristic `route_after_parse` uses.
fn should_retrieve_knowledge(state: &RequestState) -> bool {
    if state.complexity != Some(crate::state::ComplexityTag::ToolHeavy) {
        return false;
    }
    let prompt = state.prompt.to_lowercase();
    CODE_INDICATORS.iter().any(|ind| prompt.contains(ind))
}

struct RetrieveKnowledgeNode {
    client: Arc<dyn KnowledgeClient>,
}

#[async_trait]
impl Node<RequestState> for RetrieveKnowledgeNode {
    fn id(&self) -> &str {
        "retrieve_knowledge"
    }

    async fn run(&self, mut state: RequestState) -> Result<(RequestState, Next), CortexError> {
        if !should_retrieve_knowledge(&state) {
            state.code_context = String::new();
            return Ok((state, Next::Continue));
        }

        if !self.client.health_check().await {
            tracing::warn!("knowledge graph unhealthy, skipping knowledge retrieval");
            state.code_context = String::new();
            return Ok((state, Next::Continue));
        }

        let context = self
            .client
            .get_code_context(&state.prompt, CODE_CONTEXT_LIMIT)
            .await;
        state.code_context = context.to_prompt_context(CODE_CONTEXT_MAX_CHARS);
        Ok((state, Next::Continue))
    }
}

/// Assembles the message list sent to the backend: memory/knowledge context
/// as a leading system message, a retry-specific nudge if metacog sent this
/// prompt back, then the conversation so far. Shared by `CallModelNode` and
/// the streaming entry point so both build the exact same request.
fn build_call_messages(state: &RequestState) -> Vec<ChatMessage> {
    let mut messages = Vec::new();

    let mut context_blocks = Vec::new();
    if !state.memory_context.is_empty() {
        context_blocks.push(state.memory_context.clone());
    }
    if !state.code_context.is_empty() {
        context_blocks.push(state.code_context.clone());
    }
    if !context_blocks.is_empty() {
        messages.push(ChatMessage::system(context_blocks.join("\n\n")));
    }

    if state.retry_count > 0 {
        if let Some(failure_type) = metacog::failure_type_from_verdict(&state.verdict) {
            if let Some(enhancement) = metacog::retry_prompt_enhancement(failure_type) {
                messages.push(ChatMessage::system(enhancement));
            }
        }
    }

    messages.extend(state.messages.iter().cloned());
    if crate::message::last_user_message(&messages).is_none() {
        messages.push(ChatMessage::user(state.prompt.clone()));
    }
    messages
}

struct CallModelNode {
    client: Arc<dyn ModelClient>,
    registry: Arc<EndpointRegistry>,
}

#[async_trait]
impl Node<RequestState> for CallModelNode {
    fn id(&self) -> &str {
        "call_model"
    }

    async fn run(&self, mut state: RequestState) -> Result<(RequestState, Next), CortexError> {
        let role = if state
            .complexity
            .map(|c| c.needs_deep_reasoner())
            .unwrap_or(false)
        {
            EndpointRole::Deep
        } else {
            EndpointRole::Fast
        };
        let endpoint = self.registry.get(role).clone();
        let stream_internally = role == EndpointRole::Deep;
        let messages = build_call_messages(&state);

        let result = self
            .client
            .call(&endpoint, messages, state.temperature, state.max_tokens, stream_internally)
            .await;

        state.response = result.response;
        state.usage = result.usage;
        state.response_model_name = result.model_name;
        state.latency_ms = result.latency_ms;
        state.error = result.error;
        Ok((state, Next::Continue))
    }
}

struct StoreMemoryNode {
    client: Arc<dyn MemoryClient>,
}

#[async_trait]
impl Node<RequestState> for StoreMemoryNode {
    fn id(&self) -> &str {
        "store_memory"
    }

    async fn run(&self, state: RequestState) -> Result<(RequestState, Next), CortexError> {
        let should_store = state.error.is_none()
            && !state.response.is_empty()
            && state
                .complexity
                .map(|c| c.needs_deep_reasoner())
                .unwrap_or(false);

        if should_store {
            let content = memory::format_store_content(&state.prompt, &state.response);
            self.client
                .store(&content, &state.user_id, memory::store_metadata())
                .await;
        }

        Ok((state, Next::Continue))
    }
}

fn route_after_store(state: &RequestState) -> String {
    if metacog::should_verify(state.complexity, &state.error, &state.response) {
        "metacog".to_string()
    } else {
        "finalize".to_string()
    }
}

struct MetacogNode;

#[async_trait]
impl Node<RequestState> for MetacogNode {
    fn id(&self) -> &str {
        "metacog"
    }

    async fn run(&self, mut state: RequestState) -> Result<(RequestState, Next), CortexError> {
        let outcome = metacog::verify(
            state.complexity,
            &state.error,
            &state.response,
            &state.prompt,
            state.retry_count,
        );
        state.passed = outcome.passed;
        state.verdict = outcome.verdict;
        state.retry_count = outcome.next_retry_count;
        Ok((state, Next::Continue))
    }
}

fn route_after_metacog(state: &RequestState) -> String {
    if state.passed {
        "finalize".to_string()
    } else {
        "call_model".to_string()
    }
}

const MODEL_FAILURE_FALLBACK: &str = "I apologize, but I'm unable to process your request at this time.";

struct FinalizeNode;

#[async_trait]
impl Node<RequestState> for FinalizeNode {
    fn id(&self) -> &str {
        "finalize"
    }

    async fn run(&self, mut state: RequestState) -> Result<(RequestState, Next), CortexError> {
        if state.error.is_some() && state.response.is_empty() {
            state.response = MODEL_FAILURE_FALLBACK.to_string();
            state.usage = Some(crate::state::TokenUsage {
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
            });
            state.error = None;
        }

        let elapsed = chrono::Utc::now() - state.start_time;
        state.final_latency_ms = elapsed.num_milliseconds().max(0) as u64;
        Ok((state, Next::End))
    }
}

/// Builds and compiles the cognitive graph with the given component clients.
pub fn build_cognitive_graph(
    memory_client: Arc<dyn MemoryClient>,
    knowledge_client: Arc<dyn KnowledgeClient>,
    status_tool: Arc<StatusTool>,
    model_client: Arc<dyn ModelClient>,
    registry: Arc<EndpointRegistry>,
) -> Result<CompiledStateGraph<RequestState>, CortexError> {
    let mut graph = StateGraph::<RequestState>::new();

    graph.add_node("parse", Arc::new(ParseNode));
    graph.add_node(
        "retrieve_memory",
        Arc::new(RetrieveMemoryNode {
            client: memory_client.clone(),
        }),
    );
    graph.add_node(
        "classify",
        Arc::new(ClassifyNode {
            registry: registry.clone(),
        }),
    );
    graph.add_node(
        "handle_status",
        Arc::new(HandleStatusNode {
            status_tool: status_tool.clone(),
        }),
    );
    graph.add_node(
        "retrieve_knowledge",
        Arc::new(RetrieveKnowledgeNode {
            client: knowledge_client.clone(),
        }),
    );
    graph.add_node(
        "call_model",
        Arc::new(CallModelNode {
            client: model_client.clone(),
            registry: registry.clone(),
        }),
    );
    graph.add_node(
        "store_memory",
        Arc::new(StoreMemoryNode {
            client: memory_client.clone(),
        }),
    );
    graph.add_node("metacog", Arc::new(MetacogNode));
    graph.add_node("finalize", Arc::new(FinalizeNode));

    graph.add_edge(START, "parse");
    graph.add_conditional_edges("parse", Arc::new(route_after_parse), None);
    graph.add_edge("retrieve_memory", "classify");
    graph.add_conditional_edges("classify", Arc::new(route_after_classify), None);
    graph.add_edge("handle_status", "store_memory");
    graph.add_edge("retrieve_knowledge", "call_model");
    graph.add_edge("call_model", "store_memory");
    graph.add_conditional_edges("store_memory", Arc::new(route_after_store), None);
    graph.add_conditional_edges("metacog", Arc::new(route_after_metacog), None);
    graph.add_edge("finalize", END);

    graph.compile().map_err(CortexError::from)
}

enum StreamPhase {
    Streaming {
        inner: crate::model::ChatStream,
        accumulated: String,
    },
    StoreAndFinish {
        accumulated: String,
    },
    Done,
}

struct StreamingContext {
    phase: StreamPhase,
    memory_client: Arc<dyn MemoryClient>,
    prompt: String,
    user_id: String,
    should_store_if_nonempty: bool,
}

/// Drives one external streaming response: replays inner deltas verbatim,
/// and once the inner stream ends, stores the accumulated response to memory
/// (mirroring `store_memory` being deferred until after streaming finishes)
/// before ending the outer stream too. Metacognition never runs here, same
/// as the reference implementation's streaming path.
async fn next_external_event(
    mut ctx: StreamingContext,
) -> Option<(crate::model::ChatStreamEvent, StreamingContext)> {
    use futures_util::StreamExt;

    loop {
        let phase = std::mem::replace(&mut ctx.phase, StreamPhase::Done);
        match phase {
            StreamPhase::Streaming {
                mut inner,
                mut accumulated,
            } => match inner.next().await {
                Some(crate::model::ChatStreamEvent::Delta(text)) => {
                    accumulated.push_str(&text);
                    let to_yield = crate::model::ChatStreamEvent::Delta(text);
                    ctx.phase = StreamPhase::Streaming { inner, accumulated };
                    return Some((to_yield, ctx));
                }
                Some(done @ crate::model::ChatStreamEvent::Done { .. }) => {
                    ctx.phase = StreamPhase::StoreAndFinish { accumulated };
                    return Some((done, ctx));
                }
                None => {
                    ctx.phase = StreamPhase::StoreAndFinish { accumulated };
                }
            },
            StreamPhase::StoreAndFinish { accumulated } => {
                if ctx.should_store_if_nonempty && !accumulated.is_empty() {
                    let content = memory::format_store_content(&ctx.prompt, &accumulated);
                    ctx.memory_client
                        .store(&content, &ctx.user_id, memory::store_metadata())
                        .await;
                }
                return None;
            }
            StreamPhase::Done => return None,
        }
    }
}

/// The external-streaming counterpart to `build_cognitive_graph`'s `invoke`:
/// parse, conditional memory, classify, then branch on the status flag same
/// as the graph does, but streams the backend's tokens straight through
/// instead of aggregating them, defers `store_memory` until the stream
/// finishes, and never runs metacognition at all.
pub async fn run_streaming(
    memory_client: Arc<dyn MemoryClient>,
    knowledge_client: Arc<dyn KnowledgeClient>,
    status_tool: Arc<StatusTool>,
    model_client: Arc<dyn ModelClient>,
    registry: Arc<EndpointRegistry>,
    mut state: RequestState,
) -> Result<crate::model::ChatStream, CortexError> {
    if state.prompt.is_empty() {
        if let Some(content) = crate::message::last_user_message(&state.messages) {
            state.prompt = content.to_string();
        }
    }
    state.start_time = chrono::Utc::now();

    if !is_trivial_greeting(&state.prompt) {
        let node = RetrieveMemoryNode {
            client: memory_client.clone(),
        };
        state = node.run(state).await?.0;
    }

    classify::classify(&mut state, &registry);

    let should_store_if_nonempty = state
        .complexity
        .map(|c| c.needs_deep_reasoner())
        .unwrap_or(false);
    let prompt = state.prompt.clone();
    let user_id = state.user_id.clone();

    let inner: crate::model::ChatStream = if state.is_status_query {
        let sovereign_status = status_tool.sovereign_status().await;
        let text = status::format_status_markdown(&sovereign_status);
        Box::pin(futures_util::stream::iter(vec![
            crate::model::ChatStreamEvent::Delta(text),
            crate::model::ChatStreamEvent::Done {
                model_name: "status_tool".to_string(),
                usage: None,
            },
        ]))
    } else {
        let node = RetrieveKnowledgeNode {
            client: knowledge_client.clone(),
        };
        state = node.run(state).await?.0;

        let role = if should_store_if_nonempty {
            EndpointRole::Deep
        } else {
            EndpointRole::Fast
        };
        let endpoint = registry.get(role).clone();
        let messages = build_call_messages(&state);
        model_client
            .stream_chat(&endpoint, messages, state.temperature, state.max_tokens)
            .await
    };

    let ctx = StreamingContext {
        phase: StreamPhase::Streaming {
            inner,
            accumulated: String::new(),
        },
        memory_client,
        prompt,
        user_id,
        should_store_if_nonempty,
    };

    Ok(Box::pin(futures_util::stream::unfold(
        ctx,
        next_external_event,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::BackendEndpoint;
    use crate::memory::Memory;
    use crate::model::ModelCallResult;
    use crate::state::TokenUsage;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeMemory {
        hits: Vec<Memory>,
    }

    #[async_trait]
    impl MemoryClient for FakeMemory {
        async fn store(
            &self,
            _content: &str,
            _user_id: &str,
            _metadata: HashMap<String, String>,
        ) -> Option<String> {
            Some("mem-1".to_string())
        }
        async fn search(&self, _query: &str, _user_id: &str, _limit: usize) -> Vec<Memory> {
            self.hits.clone()
        }
        async fn get(&self, _id: &str) -> Option<Memory> {
            None
        }
        async fn get_all(&self, _user_id: &str, _limit: usize) -> Vec<Memory> {
            Vec::new()
        }
        async fn delete(&self, _id: &str) -> bool {
            true
        }
        async fn health(&self) -> bool {
            true
        }
    }

    struct FakeKnowledge;

    #[async_trait]
    impl KnowledgeClient for FakeKnowledge {
        async fn health_check(&self) -> bool {
            true
        }
        async fn get_code_context(&self, query_text: &str, _limit: usize) -> crate::knowledge::CodeContext {
            crate::knowledge::CodeContext {
                symbols: Vec::new(),
                relationships: Vec::new(),
                query: query_text.to_string(),
            }
        }
    }

    struct FakeModel {
        responses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModelClient for FakeModel {
        async fn call(
            &self,
            endpoint: &BackendEndpoint,
            _messages: Vec<ChatMessage>,
            _temperature: f32,
            _max_tokens: u32,
            _stream_internally: bool,
        ) -> ModelCallResult {
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| "default response, long enough to pass gates easily.".to_string());
            ModelCallResult {
                response,
                usage: Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 10,
                    total_tokens: 20,
                }),
                model_name: endpoint.model_id.clone(),
                latency_ms: 5,
                error: None,
            }
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ModelClient for FailingModel {
        async fn call(
            &self,
            endpoint: &BackendEndpoint,
            _messages: Vec<ChatMessage>,
            _temperature: f32,
            _max_tokens: u32,
            _stream_internally: bool,
        ) -> ModelCallResult {
            ModelCallResult {
                response: String::new(),
                usage: None,
                model_name: endpoint.model_id.clone(),
                latency_ms: 5,
                error: Some("connection refused".to_string()),
            }
        }
    }

    struct UnhealthyMemory;

    #[async_trait]
    impl MemoryClient for UnhealthyMemory {
        async fn store(
            &self,
            _content: &str,
            _user_id: &str,
            _metadata: HashMap<String, String>,
        ) -> Option<String> {
            None
        }
        async fn search(&self, _query: &str, _user_id: &str, _limit: usize) -> Vec<Memory> {
            panic!("search must not be called when the health check fails");
        }
        async fn get(&self, _id: &str) -> Option<Memory> {
            None
        }
        async fn get_all(&self, _user_id: &str, _limit: usize) -> Vec<Memory> {
            Vec::new()
        }
        async fn delete(&self, _id: &str) -> bool {
            false
        }
        async fn health(&self) -> bool {
            false
        }
    }

    struct KnowledgeWithSymbol;

    #[async_trait]
    impl KnowledgeClient for KnowledgeWithSymbol {
        async fn health_check(&self) -> bool {
            true
        }
        async fn get_code_context(&self, query_text: &str, _limit: usize) -> crate::knowledge::CodeContext {
            crate::knowledge::CodeContext {
                symbols: vec![crate::knowledge::CodeSymbol {
                    name: "run".to_string(),
                    qualified_name: "cognitive::run".to_string(),
                    kind: "function".to_string(),
                    signature: "fn run()".to_string(),
                    docstring: String::new(),
                    file_path: "cognitive/mod.rs".to_string(),
                    line_start: 1,
                    line_end: 2,
                }],
                relationships: Vec::new(),
                query: query_text.to_string(),
            }
        }
    }

    fn registry() -> Arc<EndpointRegistry> {
        Arc::new(EndpointRegistry::new(
            BackendEndpoint {
                name: "deep".into(),
                base_url: "http://deep:8000".into(),
                model_id: "deepseek".into(),
                timeout: Duration::from_secs(300),
            },
            BackendEndpoint {
                name: "fast".into(),
                base_url: "http://fast:8001".into(),
                model_id: "qwen".into(),
                timeout: Duration::from_secs(60),
            },
        ))
    }

    fn make_state(prompt: &str) -> RequestState {
        RequestState::new(prompt, vec![], "user-1", "chat-1")
    }

    #[test]
    fn route_after_parse_skips_memory_for_trivial_greeting() {
        assert_eq!(route_after_parse(&make_state("hi there")), "classify");
        assert_eq!(
            route_after_parse(&make_state("Please analyze this architecture in detail")),
            "retrieve_memory"
        );
    }

    #[test]
    fn route_after_classify_follows_status_flag() {
        let mut state = make_state("status report");
        state.is_status_query = true;
        assert_eq!(route_after_classify(&state), "handle_status");

        let state2 = make_state("anything else");
        assert_eq!(route_after_classify(&state2), "retrieve_knowledge");
    }

    #[test]
    fn route_after_metacog_retries_until_passed() {
        let mut state = make_state("x");
        state.passed = false;
        assert_eq!(route_after_metacog(&state), "call_model");
        state.passed = true;
        assert_eq!(route_after_metacog(&state), "finalize");
    }

    #[tokio::test]
    async fn trivial_greeting_skips_memory_and_metacog() {
        let graph = build_cognitive_graph(
            Arc::new(FakeMemory { hits: Vec::new() }),
            Arc::new(FakeKnowledge),
            Arc::new(StatusTool::new("http://dcgm:9400/metrics", "http://mem0:8000")),
            Arc::new(FakeModel {
                responses: Mutex::new(vec!["Hello! How can I help you today?".to_string()]),
            }),
            registry(),
        )
        .expect("graph compiles");

        let state = make_state("hi");
        let result = graph.invoke(state).await.expect("graph runs");
        assert_eq!(result.complexity, Some(crate::state::ComplexityTag::Trivial));
        assert!(result.memories.is_empty());
        assert_eq!(result.verdict, "skipped");
    }

    #[tokio::test]
    async fn complex_prompt_retries_after_short_response_then_passes() {
        let graph = build_cognitive_graph(
            Arc::new(FakeMemory { hits: Vec::new() }),
            Arc::new(FakeKnowledge),
            Arc::new(StatusTool::new("http://dcgm:9400/metrics", "http://mem0:8000")),
            Arc::new(FakeModel {
                responses: Mutex::new(vec![
                    "A full explanation of the architecture, covering every relevant subsystem in enough depth to satisfy the gates.".to_string(),
                    "short".to_string(),
                ]),
            }),
            registry(),
        )
        .expect("graph compiles");

        let state = make_state("Analyze the cognitive graph's retry backedge in detail");
        let result = graph.invoke(state).await.expect("graph runs");
        assert!(result.passed);
        assert_eq!(result.retry_count, 1);
        assert!(result.verdict.starts_with("passed") || result.verdict == "passed_all_gates");
    }

    #[tokio::test]
    async fn model_failure_finalizes_with_fallback_message_and_no_error() {
        let graph = build_cognitive_graph(
            Arc::new(FakeMemory { hits: Vec::new() }),
            Arc::new(FakeKnowledge),
            Arc::new(StatusTool::new("http://dcgm:9400/metrics", "http://mem0:8000")),
            Arc::new(FailingModel),
            registry(),
        )
        .expect("graph compiles");

        let state = make_state("Analyze the cognitive graph's retry backedge in detail");
        let result = graph.invoke(state).await.expect("graph runs");
        assert_eq!(result.response, super::MODEL_FAILURE_FALLBACK);
        assert!(result.error.is_none());
        assert_eq!(result.usage.unwrap().total_tokens, 0);
        // metacognition is skipped entirely when the model call errored.
        assert_eq!(result.verdict, "");
    }

    #[test]
    fn should_retrieve_knowledge_requires_tool_heavy_and_code_keyword() {
        let mut state = make_state("find the caller of this function");
        state.complexity = Some(crate::state::ComplexityTag::ToolHeavy);
        assert!(should_retrieve_knowledge(&state));

        let mut not_tool_heavy = make_state("find the caller of this function");
        not_tool_heavy.complexity = Some(crate::state::ComplexityTag::Complex);
        assert!(!should_retrieve_knowledge(&not_tool_heavy));

        let mut no_code_keyword = make_state("what's the weather like");
        no_code_keyword.complexity = Some(crate::state::ComplexityTag::ToolHeavy);
        assert!(!should_retrieve_knowledge(&no_code_keyword));
    }

    #[tokio::test]
    async fn retrieve_memory_skips_search_when_unhealthy() {
        let node = RetrieveMemoryNode {
            client: Arc::new(UnhealthyMemory),
        };
        let (result, _) = node.run(make_state("anything")).await.expect("node runs");
        assert!(result.memories.is_empty());
        assert_eq!(result.memory_context, "");
    }

    #[tokio::test]
    async fn retrieve_knowledge_skips_for_non_tool_heavy_even_with_code_keyword() {
        let node = RetrieveKnowledgeNode {
            client: Arc::new(KnowledgeWithSymbol),
        };
        let mut state = make_state("find this function");
        state.complexity = Some(crate::state::ComplexityTag::Complex);
        let (result, _) = node.run(state).await.expect("node runs");
        assert_eq!(result.code_context, "");
    }

    #[tokio::test]
    async fn retrieve_knowledge_runs_for_tool_heavy_code_query() {
        let node = RetrieveKnowledgeNode {
            client: Arc::new(KnowledgeWithSymbol),
        };
        let mut state = make_state("find the caller of this function");
        state.complexity = Some(crate::state::ComplexityTag::ToolHeavy);
        let (result, _) = node.run(state).await.expect("node runs");
        assert!(result.code_context.contains("cognitive::run"));
    }

    struct RecordingMemory {
        stored: Mutex<Vec<(String, String)>>,
    }

    impl RecordingMemory {
        fn new() -> Self {
            Self {
                stored: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MemoryClient for RecordingMemory {
        async fn store(
            &self,
            content: &str,
            user_id: &str,
            _metadata: HashMap<String, String>,
        ) -> Option<String> {
            self.stored
                .lock()
                .unwrap()
                .push((content.to_string(), user_id.to_string()));
            Some("mem-1".to_string())
        }
        async fn search(&self, _query: &str, _user_id: &str, _limit: usize) -> Vec<Memory> {
            Vec::new()
        }
        async fn get(&self, _id: &str) -> Option<Memory> {
            None
        }
        async fn get_all(&self, _user_id: &str, _limit: usize) -> Vec<Memory> {
            Vec::new()
        }
        async fn delete(&self, _id: &str) -> bool {
            true
        }
        async fn health(&self) -> bool {
            true
        }
    }

    async fn drain(stream: crate::model::ChatStream) -> (String, usize) {
        use futures_util::StreamExt;
        let mut text = String::new();
        let mut event_count = 0;
        let mut s = stream;
        while let Some(event) = s.next().await {
            event_count += 1;
            if let crate::model::ChatStreamEvent::Delta(d) = event {
                text.push_str(&d);
            }
        }
        (text, event_count)
    }

    #[tokio::test]
    async fn run_streaming_status_query_emits_single_delta_then_done_and_skips_store() {
        let memory = Arc::new(RecordingMemory::new());
        let stream = run_streaming(
            memory.clone(),
            Arc::new(FakeKnowledge),
            Arc::new(StatusTool::new("http://dcgm:9400/metrics", "http://mem0:8000")),
            Arc::new(FakeModel {
                responses: Mutex::new(vec!["must not be called".to_string()]),
            }),
            registry(),
            make_state("status report"),
        )
        .await
        .expect("streams");

        let (text, event_count) = drain(stream).await;
        assert!(text.contains("Status") || text.contains("status"));
        assert_eq!(event_count, 2); // one delta, one done
        assert!(memory.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_streaming_complex_prompt_streams_deltas_and_stores_after_finish() {
        let memory = Arc::new(RecordingMemory::new());
        let stream = run_streaming(
            memory.clone(),
            Arc::new(FakeKnowledge),
            Arc::new(StatusTool::new("http://dcgm:9400/metrics", "http://mem0:8000")),
            Arc::new(FakeModel {
                responses: Mutex::new(vec![
                    "A full explanation of the architecture, covering every relevant subsystem in enough depth.".to_string(),
                ]),
            }),
            registry(),
            make_state("Analyze the cognitive graph's retry backedge in detail"),
        )
        .await
        .expect("streams");

        let (text, _) = drain(stream).await;
        assert!(text.contains("full explanation"));

        let stored = memory.stored.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].1, "user-1");
    }

    #[tokio::test]
    async fn run_streaming_routine_prompt_does_not_store_memory() {
        let memory = Arc::new(RecordingMemory::new());
        let stream = run_streaming(
            memory.clone(),
            Arc::new(FakeKnowledge),
            Arc::new(StatusTool::new("http://dcgm:9400/metrics", "http://mem0:8000")),
            Arc::new(FakeModel {
                responses: Mutex::new(vec!["a short routine answer".to_string()]),
            }),
            registry(),
            make_state("What is the capital of France"),
        )
        .await
        .expect("streams");

        let _ = drain(stream).await;
        assert!(memory.stored.lock().unwrap().is_empty());
    }
}
