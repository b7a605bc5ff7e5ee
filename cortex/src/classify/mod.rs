//! C2: Classifier — maps a prompt plus state to a complexity tag and routing decision.
//!
//! Grounded on `agent/nodes/classification.py`'s `classify_complexity`: the
//! keyword lists and check order below are a direct port of that function's
//! data, generalized into a pure function of `RequestState` plus the keyword
//! tables. No tracing-span wiring is carried over (tracing is handled
//! ambiently at the node level, not per-branch).

use crate::endpoint::{EndpointRegistry, EndpointRole};
use crate::message::last_user_message;
use crate::state::{ComplexityTag, RequestState};

/// Infrastructure-adjacent keywords that mark a prompt as deserving the deep
/// reasoner regardless of its surface simplicity.
pub const SOVEREIGN_VOCABULARY: &[&str] = &[
    "ssh", "root", "kernel", "admin", "system", "deploy", "trace", "audit", "calculate", "math",
    "physics", "efficiency", "ratio", "power", "voltage", "watt", "gpu", "vram", "blackwell",
    "5090", "nvidia", "check", "monitor", "connect", "execute",
];

/// Keywords suggesting the prompt calls for deep reasoning.
pub const COMPLEX_INDICATORS: &[&str] = &[
    "analyze",
    "design",
    "architect",
    "implement",
    "debug",
    "refactor",
    "optimize",
    "explain why",
    "compare",
    "evaluate",
    "plan",
    "strategy",
    "step by step",
    "reasoning",
    "prove",
];

/// Short greetings/acknowledgements that, combined with a short prompt, are trivial.
pub const TRIVIAL_INDICATORS: &[&str] = &[
    "hello",
    "hi",
    "thanks",
    "thank you",
    "bye",
    "what time",
    "who are you",
    "help",
];

/// Phrases that short-circuit routing to the status tool.
pub const STATUS_KEYWORDS: &[&str] = &[
    "status report",
    "system status",
    "sovereign status",
    "how is your vram",
    "your vram",
    "your gpu",
    "how much vram",
    "vram usage",
    "gpu status",
    "memory status",
    "introspect",
    "self-check",
    "health report",
    "your health",
    "how are you doing",
];

/// User-facing model aliases accepted by the explicit-override branch.
pub const MODEL_ALIASES: &[(&str, &str)] = &[
    ("deepseek-v3.2", "deep"),
    ("deepseek", "deep"),
    ("qwen2.5-coder-7b", "fast"),
    ("qwen", "fast"),
    ("qwen-executor", "fast"),
];

fn resolve_model_alias(requested: &str) -> Option<EndpointRole> {
    let requested = requested.to_lowercase();
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == requested)
        .map(|(_, role)| if *role == "deep" {
            EndpointRole::Deep
        } else {
            EndpointRole::Fast
        })
}

/// Runs the classifier against `state`, setting `complexity`, `routing_reason`,
/// `model_name`, `endpoint`, `is_status_query`, and `prompt`. Total: always
/// terminates with a complexity assigned.
pub fn classify(state: &mut RequestState, registry: &EndpointRegistry) {
    if state.prompt.is_empty() {
        if let Some(content) = last_user_message(&state.messages) {
            state.prompt = content.to_string();
        }
    }

    // 1. Explicit override.
    if let Some(requested) = state.model_override.clone() {
        if !requested.is_empty() && requested.to_lowercase() != "auto" {
            if let Some(role) = resolve_model_alias(&requested) {
                let backend = registry.get(role);
                state.complexity = Some(if role == EndpointRole::Deep {
                    ComplexityTag::Complex
                } else {
                    ComplexityTag::Routine
                });
                state.routing_reason = format!("Manual override: {requested}");
                state.model_name = backend.model_id.clone();
                state.endpoint = backend.name.clone();
                return;
            }
        }
    }

    let prompt_lower = state.prompt.to_lowercase();

    // 2. Status-query detection.
    if let Some(keyword) = STATUS_KEYWORDS.iter().find(|k| prompt_lower.contains(**k)) {
        state.complexity = Some(ComplexityTag::Trivial);
        state.routing_reason = format!("Status query: '{keyword}'");
        state.is_status_query = true;
        return;
    }

    let (complexity, reason) = classify_inner(state, &prompt_lower);
    state.complexity = Some(complexity);
    state.routing_reason = reason;

    let role = if complexity.needs_deep_reasoner() {
        EndpointRole::Deep
    } else {
        EndpointRole::Fast
    };
    let backend = registry.get(role);
    state.model_name = backend.model_id.clone();
    state.endpoint = backend.name.clone();
}

fn classify_inner(state: &RequestState, prompt_lower: &str) -> (ComplexityTag, String) {
    // 3. Trivial indicators.
    if TRIVIAL_INDICATORS.iter().any(|ind| prompt_lower.contains(ind)) && state.prompt.len() < 50 {
        return (ComplexityTag::Trivial, "Trivial greeting/command".to_string());
    }

    // 4. Tool-orchestration flag.
    if state.requires_tool_orchestration {
        return (
            ComplexityTag::ToolHeavy,
            "Requires tool orchestration".to_string(),
        );
    }

    // 5. Sovereign vocabulary.
    if let Some(keyword) = SOVEREIGN_VOCABULARY
        .iter()
        .find(|k| prompt_lower.contains(**k))
    {
        return (
            ComplexityTag::Complex,
            format!("Sovereign vocabulary: '{keyword}'"),
        );
    }

    // 6. Complex indicators.
    if let Some(indicator) = COMPLEX_INDICATORS
        .iter()
        .find(|ind| prompt_lower.contains(**ind))
    {
        return (
            ComplexityTag::Complex,
            format!("Complex indicator: '{indicator}'"),
        );
    }

    // 7. Length/context heuristics.
    let context_count = state.messages.len().saturating_sub(1);
    if state.prompt.len() > 500 || context_count > 5 {
        return (
            ComplexityTag::Complex,
            format!(
                "Long prompt ({} chars) or deep context ({} messages)",
                state.prompt.len(),
                context_count
            ),
        );
    }

    // 8. Default.
    (
        ComplexityTag::Routine,
        "Default routine classification".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::BackendEndpoint;
    use crate::message::ChatMessage;
    use std::time::Duration;

    fn registry() -> EndpointRegistry {
        EndpointRegistry::new(
            BackendEndpoint {
                name: "deep".into(),
                base_url: "http://deep:8000".into(),
                model_id: "deepseek-v3.2".into(),
                timeout: Duration::from_secs(300),
            },
            BackendEndpoint {
                name: "fast".into(),
                base_url: "http://fast:8001".into(),
                model_id: "qwen2.5-coder-7b".into(),
                timeout: Duration::from_secs(60),
            },
        )
    }

    fn state_with_prompt(prompt: &str) -> RequestState {
        RequestState::new(prompt, vec![], "u1", "c1")
    }

    #[test]
    fn trivial_greeting_routes_fast() {
        let mut state = state_with_prompt("Hello!");
        classify(&mut state, &registry());
        assert_eq!(state.complexity, Some(ComplexityTag::Trivial));
        assert_eq!(state.endpoint, "fast");
    }

    #[test]
    fn analyze_routes_complex_deep() {
        let mut state = state_with_prompt("Analyze the memory layout of the system");
        classify(&mut state, &registry());
        assert_eq!(state.complexity, Some(ComplexityTag::Complex));
        assert!(state.routing_reason.contains("analyze"));
        assert_eq!(state.endpoint, "deep");
    }

    #[test]
    fn sovereign_keyword_routes_complex() {
        let mut state = state_with_prompt("Connect via SSH to the server");
        classify(&mut state, &registry());
        assert_eq!(state.complexity, Some(ComplexityTag::Complex));
        assert!(state.routing_reason.contains("ssh"));
    }

    #[test]
    fn status_query_short_circuits() {
        let mut state = state_with_prompt("How is your VRAM doing?");
        classify(&mut state, &registry());
        assert!(state.is_status_query);
        assert_eq!(state.complexity, Some(ComplexityTag::Trivial));
    }

    #[test]
    fn explicit_override_takes_precedence() {
        let mut state = state_with_prompt("Refactor this module");
        state.model_override = Some("qwen".to_string());
        classify(&mut state, &registry());
        assert_eq!(state.endpoint, "fast");
        assert_eq!(state.routing_reason, "Manual override: qwen");
    }

    #[test]
    fn trivial_cutoff_boundary_49_vs_50_chars() {
        let short = "hi ".to_string() + &"x".repeat(46); // 49 chars, contains "hi"
        assert_eq!(short.len(), 49);
        let mut state = state_with_prompt(&short);
        classify(&mut state, &registry());
        assert_eq!(state.complexity, Some(ComplexityTag::Trivial));

        let long = "hi ".to_string() + &"x".repeat(47); // 50 chars
        assert_eq!(long.len(), 50);
        let mut state2 = state_with_prompt(&long);
        classify(&mut state2, &registry());
        assert_ne!(state2.complexity, Some(ComplexityTag::Trivial));
    }

    #[test]
    fn long_prompt_boundary_500_vs_501_chars() {
        let at_500 = "a".repeat(500);
        let mut state = state_with_prompt(&at_500);
        classify(&mut state, &registry());
        assert_eq!(state.complexity, Some(ComplexityTag::Routine));

        let at_501 = "a".repeat(501);
        let mut state2 = state_with_prompt(&at_501);
        classify(&mut state2, &registry());
        assert_eq!(state2.complexity, Some(ComplexityTag::Complex));
    }

    #[test]
    fn message_count_boundary_5_vs_6() {
        let mut state = state_with_prompt("ok");
        state.messages = (0..6).map(|_| ChatMessage::user("x")).collect();
        classify(&mut state, &registry());
        assert_eq!(state.complexity, Some(ComplexityTag::Routine));

        let mut state2 = state_with_prompt("ok");
        state2.messages = (0..7).map(|_| ChatMessage::user("x")).collect();
        classify(&mut state2, &registry());
        assert_eq!(state2.complexity, Some(ComplexityTag::Complex));
    }

    #[test]
    fn tool_orchestration_flag_routes_tool_heavy() {
        let mut state = state_with_prompt("do something");
        state.requires_tool_orchestration = true;
        classify(&mut state, &registry());
        assert_eq!(state.complexity, Some(ComplexityTag::ToolHeavy));
    }

    #[test]
    fn classify_is_deterministic() {
        let registry = registry();
        let mut a = state_with_prompt("Analyze the system");
        let mut b = state_with_prompt("Analyze the system");
        classify(&mut a, &registry);
        classify(&mut b, &registry);
        assert_eq!(a.complexity, b.complexity);
        assert_eq!(a.routing_reason, b.routing_reason);
    }
}
