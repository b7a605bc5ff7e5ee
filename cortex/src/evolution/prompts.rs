//! Oracle prompt templates and response shapes for the reflect/propose steps
//! of [`super::EvolutionEngine::evolution_cycle`]. Grounded on the structured
//! JSON the oracle is asked for in `gepa/evolution.py`'s `_reflect_on_failures`
//! and `_propose_variants`, reworded rather than translated.

use serde::Deserialize;

use super::{Reflection, Trajectory};

#[derive(Deserialize)]
pub(super) struct ReflectionResponse {
    pub diagnosis: String,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub missing_context: String,
    #[serde(default)]
    pub suggested_improvement: String,
}

#[derive(Deserialize)]
pub(super) struct ProposalResponse {
    pub variants: Vec<ProposedVariant>,
}

#[derive(Deserialize)]
pub(super) struct ProposedVariant {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub changes: String,
}

pub(super) fn reflection_prompt(failure: &Trajectory) -> String {
    let error = failure.error.as_deref().unwrap_or("(none reported)");
    format!(
        "A request failed during execution. Diagnose why.\n\n\
         Task: {}\n\
         Prompt sent to the model: {}\n\
         Output produced: {}\n\
         Error: {}\n\n\
         Respond with JSON only, matching exactly:\n\
         {{\"diagnosis\": string, \"root_cause\": string, \"missing_context\": string, \"suggested_improvement\": string}}",
        failure.task, failure.prompt, failure.output, error
    )
}

pub(super) fn reflection_summary(reflections: &[Reflection]) -> String {
    if reflections.is_empty() {
        return "No specific failure patterns identified.".to_string();
    }
    reflections
        .iter()
        .map(|r| format!("Issue: {}\nSuggestion: {}", r.root_cause, r.suggested_improvement))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub(super) fn proposal_prompt(current_prompt: &str, reflection_summary: &str) -> String {
    format!(
        "The system prompt below has been producing failures described by the \
         reflections that follow. Propose 3 improved variants that address these \
         issues while preserving what already works.\n\n\
         Current system prompt:\n{current_prompt}\n\n\
         Observed issues:\n{reflection_summary}\n\n\
         Respond with JSON only, matching exactly:\n\
         {{\"variants\": [{{\"content\": string, \"changes\": string}}, ...]}}"
    )
}
