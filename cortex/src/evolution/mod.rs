//! C9: Pareto Evolution Engine — offline optimization of per-backend system
//! prompts from a buffered history of request trajectories.
//!
//! Grounded on `gepa/evolution.py`'s `GEPAEvolutionEngine` (the 8-step cycle:
//! sample, reflect, propose, benchmark, merge, select, persist) and
//! `gepa/pareto.py`'s `ParetoFrontier` (dominance, crowding-distance pruning,
//! `get_best`/`get_compromise`). The oracle call reuses this crate's own
//! [`crate::model::ModelClient`] against the deep-reasoner endpoint rather than
//! a separate hand-rolled HTTP path, since it is the same chat-completions
//! protocol `call_model` already speaks.

mod frontier;
mod prompts;

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::endpoint::BackendEndpoint;
use crate::message::ChatMessage;
use crate::model::ModelClient;

pub use frontier::{load_frontier, save_frontier_atomic, ParetoFrontier, PromptVariant};

pub const DEFAULT_SAMPLE_SIZE: usize = 100;
pub const DEFAULT_FRONTIER_SIZE: usize = 10;
const MAX_FAILURES_PER_CYCLE: usize = 20;
const MAX_REFLECTIONS_IN_SUMMARY: usize = 10;
const VARIANTS_PER_BACKEND: usize = 3;

/// One recorded agent execution, appended to the trajectory buffer for later
/// reflection.
#[derive(Clone, Debug)]
pub struct Trajectory {
    pub task: String,
    pub prompt: String,
    pub output: String,
    pub expected: Option<String>,
    pub error: Option<String>,
    pub success: bool,
    pub tool_calls: Vec<serde_json::Value>,
    pub latency_ms: f64,
    pub timestamp: chrono::DateTime<Utc>,
}

impl Trajectory {
    pub fn new(task: impl Into<String>, prompt: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            prompt: prompt.into(),
            output: output.into(),
            expected: None,
            error: None,
            success: true,
            tool_calls: Vec::new(),
            latency_ms: 0.0,
            timestamp: Utc::now(),
        }
    }
}

/// Natural-language diagnosis of one failed trajectory, from the oracle.
#[derive(Clone, Debug)]
pub struct Reflection {
    pub task: String,
    pub error: Option<String>,
    pub diagnosis: String,
    pub root_cause: String,
    pub missing_context: String,
    pub suggested_improvement: String,
}

/// Bounded ring buffer of trajectories: capacity is `2 * sample_size`, oldest
/// entries evict on overflow. Single writer (the orchestrator recording
/// trajectories), single reader (the evolution cycle); a mutex protects both.
pub struct TrajectoryBuffer {
    inner: Mutex<Vec<Trajectory>>,
    capacity: usize,
}

impl TrajectoryBuffer {
    pub fn new(sample_size: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            capacity: sample_size * 2,
        }
    }

    pub fn record(&self, trajectory: Trajectory) {
        let mut buf = self.inner.lock().expect("trajectory buffer lock poisoned");
        buf.push(trajectory);
        if buf.len() > self.capacity {
            let excess = buf.len() - self.capacity;
            buf.drain(0..excess);
        }
    }

    /// Returns a snapshot of the most recent `n` trajectories, oldest first.
    pub fn sample(&self, n: usize) -> Vec<Trajectory> {
        let buf = self.inner.lock().expect("trajectory buffer lock poisoned");
        let start = buf.len().saturating_sub(n);
        buf[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("trajectory buffer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Seam for the oracle's failure-diagnosis and variant-proposal calls,
/// separate from [`ModelClient`] only for the malformed-JSON handling that
/// wraps it; `HttpOracle` below is the production implementation, built on
/// the same `ModelClient` every backend call uses.
#[async_trait]
trait Oracle: Send + Sync {
    async fn complete(&self, prompt: String) -> Option<String>;
}

struct HttpOracle {
    client: std::sync::Arc<dyn ModelClient>,
    endpoint: BackendEndpoint,
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn complete(&self, prompt: String) -> Option<String> {
        let result = self
            .client
            .call(&self.endpoint, vec![ChatMessage::user(prompt)], 0.7, 2000, false)
            .await;
        if result.error.is_some() {
            return None;
        }
        Some(result.response)
    }
}

/// Benchmarks a prompt variant against an external evaluator service, e.g. a
/// golden-dataset harness. Returns `None` on any failure — spec.md §7 treats
/// a benchmark failure as an individually-skipped subfailure, not a cycle abort.
#[async_trait]
pub trait VariantEvaluator: Send + Sync {
    async fn benchmark(&self, variant: &PromptVariant) -> Option<HashMap<String, f64>>;
}

pub struct HttpVariantEvaluator {
    http: reqwest::Client,
    eval_endpoint: String,
    dataset: String,
}

impl HttpVariantEvaluator {
    pub fn new(eval_endpoint: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(300))
                .build()
                .expect("reqwest client"),
            eval_endpoint: eval_endpoint.into(),
            dataset: dataset.into(),
        }
    }
}

#[derive(serde::Serialize)]
struct BenchmarkRequest<'a> {
    variant_id: &'a str,
    prompt: &'a str,
    backend: &'a str,
    dataset: &'a str,
}

#[derive(serde::Deserialize)]
struct BenchmarkResponse {
    #[serde(default)]
    scores: HashMap<String, f64>,
}

#[async_trait]
impl VariantEvaluator for HttpVariantEvaluator {
    async fn benchmark(&self, variant: &PromptVariant) -> Option<HashMap<String, f64>> {
        let payload = BenchmarkRequest {
            variant_id: &variant.id,
            prompt: &variant.content,
            backend: &variant.backend,
            dataset: &self.dataset,
        };
        let result = self
            .http
            .post(format!("{}/benchmark", self.eval_endpoint))
            .json(&payload)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<BenchmarkResponse>().await {
                Ok(body) => Some(body.scores),
                Err(e) => {
                    tracing::warn!(variant = %variant.id, error = %e, "malformed benchmark response");
                    None
                }
            },
            Ok(resp) => {
                tracing::warn!(variant = %variant.id, status = %resp.status(), "benchmark request failed");
                None
            }
            Err(e) => {
                tracing::warn!(variant = %variant.id, error = %e, "benchmark request failed");
                None
            }
        }
    }
}

/// Tunables for one evolution engine instance. Defaults match spec.md §4.8.
pub struct EvolutionConfig {
    pub sample_size: usize,
    pub frontier_size: usize,
    pub minimize: std::collections::HashSet<String>,
    pub primary_objective: String,
    pub state_path: Option<PathBuf>,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            frontier_size: DEFAULT_FRONTIER_SIZE,
            minimize: std::collections::HashSet::new(),
            primary_objective: "accuracy".to_string(),
            state_path: None,
        }
    }
}

pub struct EvolutionEngine {
    oracle: Box<dyn Oracle>,
    evaluator: std::sync::Arc<dyn VariantEvaluator>,
    trajectories: TrajectoryBuffer,
    frontier: Mutex<ParetoFrontier>,
    config: EvolutionConfig,
}

impl EvolutionEngine {
    pub fn new(
        model_client: std::sync::Arc<dyn ModelClient>,
        oracle_endpoint: BackendEndpoint,
        evaluator: std::sync::Arc<dyn VariantEvaluator>,
        config: EvolutionConfig,
    ) -> Self {
        let frontier = ParetoFrontier::new(config.frontier_size, config.minimize.clone());
        Self {
            oracle: Box::new(HttpOracle {
                client: model_client,
                endpoint: oracle_endpoint,
            }),
            evaluator,
            trajectories: TrajectoryBuffer::new(config.sample_size),
            frontier: Mutex::new(frontier),
            config,
        }
    }

    pub fn record_trajectory(&self, trajectory: Trajectory) {
        self.trajectories.record(trajectory);
    }

    /// Runs one evolution cycle: sample, reflect, propose, benchmark, merge
    /// into the frontier, select improved prompts, persist. Returns
    /// `current_prompts` unchanged when there are no failures to learn from.
    pub async fn evolution_cycle(&self, current_prompts: &HashMap<String, String>) -> HashMap<String, String> {
        let trajectories = self.trajectories.sample(self.config.sample_size);
        tracing::info!(sampled = trajectories.len(), "evolution cycle: sampled trajectories");

        let failures: Vec<&Trajectory> = trajectories.iter().filter(|t| !t.success).collect();
        tracing::info!(failures = failures.len(), "evolution cycle: found failures");
        if failures.is_empty() {
            return current_prompts.clone();
        }

        let capped = &failures[..failures.len().min(MAX_FAILURES_PER_CYCLE)];
        let reflections = self.reflect_on_failures(capped).await;
        tracing::info!(reflections = reflections.len(), "evolution cycle: generated reflections");

        let mut variants = self.propose_variants(current_prompts, &reflections).await;
        tracing::info!(variants = variants.len(), "evolution cycle: proposed variants");

        self.benchmark_variants(&mut variants).await;

        {
            let mut frontier = self.frontier.lock().expect("frontier lock poisoned");
            for variant in variants {
                frontier.add(variant);
            }
            tracing::info!(frontier_size = frontier.len(), "evolution cycle: frontier updated");
        }

        let improved = self.select_improved_prompts(current_prompts);

        if let Some(path) = &self.config.state_path {
            let frontier = self.frontier.lock().expect("frontier lock poisoned");
            if let Err(e) = save_frontier_atomic(path, &frontier) {
                tracing::error!(error = %e, "failed to persist pareto frontier");
            }
        }

        improved
    }

    async fn reflect_on_failures(&self, failures: &[&Trajectory]) -> Vec<Reflection> {
        let mut reflections = Vec::new();
        for failure in failures {
            let Some(raw) = self.oracle.complete(prompts::reflection_prompt(failure)).await else {
                continue;
            };
            match serde_json::from_str::<prompts::ReflectionResponse>(&raw) {
                Ok(parsed) => reflections.push(Reflection {
                    task: failure.task.clone(),
                    error: failure.error.clone(),
                    diagnosis: parsed.diagnosis,
                    root_cause: parsed.root_cause,
                    missing_context: parsed.missing_context,
                    suggested_improvement: parsed.suggested_improvement,
                }),
                Err(e) => tracing::warn!(error = %e, "malformed reflection response, dropping"),
            }
        }
        reflections
    }

    async fn propose_variants(
        &self,
        current_prompts: &HashMap<String, String>,
        reflections: &[Reflection],
    ) -> Vec<PromptVariant> {
        let summary = prompts::reflection_summary(&reflections[..reflections.len().min(MAX_REFLECTIONS_IN_SUMMARY)]);
        let frontier_len = self.frontier.lock().expect("frontier lock poisoned").len();

        let mut variants = Vec::new();
        for (backend, current_prompt) in current_prompts {
            let Some(raw) = self
                .oracle
                .complete(prompts::proposal_prompt(current_prompt, &summary))
                .await
            else {
                continue;
            };
            let parsed: Result<prompts::ProposalResponse, _> = serde_json::from_str(&raw);
            let Ok(parsed) = parsed else {
                tracing::warn!(backend = %backend, "malformed proposal response, dropping");
                continue;
            };

            for (index, candidate) in parsed.variants.into_iter().take(VARIANTS_PER_BACKEND).enumerate() {
                let content = if candidate.content.is_empty() {
                    current_prompt.clone()
                } else {
                    candidate.content
                };
                variants.push(PromptVariant {
                    id: format!("{backend}_{}_{index}", Utc::now().timestamp()),
                    backend: backend.clone(),
                    content,
                    parent_id: Some(format!("{backend}_current")),
                    generation: frontier_len as u32 + 1,
                    scores: HashMap::new(),
                    created_at: Utc::now(),
                });
            }
        }
        variants
    }

    async fn benchmark_variants(&self, variants: &mut Vec<PromptVariant>) {
        let futures = variants.iter().map(|v| self.evaluator.benchmark(v));
        let results = futures_util::future::join_all(futures).await;

        let mut scored = Vec::with_capacity(variants.len());
        for (mut variant, scores) in variants.drain(..).zip(results) {
            match scores {
                Some(scores) => {
                    variant.scores = scores;
                    scored.push(variant);
                }
                None => tracing::warn!(variant = %variant.id, "benchmark failed, dropping variant"),
            }
        }
        *variants = scored;
    }

    fn select_improved_prompts(&self, current_prompts: &HashMap<String, String>) -> HashMap<String, String> {
        let frontier = self.frontier.lock().expect("frontier lock poisoned");
        let mut improved = current_prompts.clone();

        let mut by_backend: HashMap<&str, Vec<&PromptVariant>> = HashMap::new();
        for variant in frontier.solutions() {
            by_backend.entry(variant.backend.as_str()).or_default().push(variant);
        }

        for (backend, candidates) in by_backend {
            let objective = self.config.primary_objective.as_str();
            let best = candidates.into_iter().max_by(|a, b| {
                let av = a.scores.get(objective).copied().unwrap_or(0.0);
                let bv = b.scores.get(objective).copied().unwrap_or(0.0);
                av.partial_cmp(&bv).unwrap_or(std::cmp::Ordering::Equal)
            });
            if let Some(best) = best {
                improved.insert(backend.to_string(), best.content.clone());
            }
        }
        improved
    }
}
