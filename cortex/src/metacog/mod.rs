//! C7: Metacognition Chain — 4-gate verification of a model response, with
//! bounded retry.
//!
//! Grounded on `agent/nodes/metacognition.py`: gate order, regex markers, and
//! the retry/pass-through decision in `_handle_failure` are ported directly.
//! `should_verify`'s "skip TRIVIAL/ROUTINE" rule lives here rather than in the
//! graph so the skip reason (`"skipped"`) stays next to the gates it skips.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::state::{ComplexityTag, MAX_RETRIES};

const GATE_1_HALLUCINATION_MARKERS: &[&str] = &[
    "as an ai",
    "i cannot",
    "i don't have access",
    "i'm unable to",
    "i apologize",
    "i can't help",
    "as a language model",
];

const GATE_2_INCOMPLETE_MARKERS: &[&str] = &[
    r"\.{3,}$",
    r"etc\.$",
    r"and so on\.$",
    r"to be continued",
    r"\[incomplete\]",
    r"\[truncated\]",
];

const GATE_3_MIN_LENGTH: usize = 50;

/// Outcome of a metacognition pass: whether the response is acceptable, the
/// verdict string to record on `RequestState`, and the next `retry_count`
/// when a retry is warranted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub passed: bool,
    pub verdict: String,
    pub next_retry_count: u32,
}

/// TRIVIAL/ROUTINE responses and already-errored/empty responses skip verification.
pub fn should_verify(complexity: Option<ComplexityTag>, error: &Option<String>, response: &str) -> bool {
    match complexity {
        Some(ComplexityTag::Trivial) | Some(ComplexityTag::Routine) | None => return false,
        _ => {}
    }
    if error.is_some() {
        return false;
    }
    !response.is_empty()
}

/// Runs the 4 gates against `response`, or returns the skip verdict when
/// verification does not apply.
pub fn verify(
    complexity: Option<ComplexityTag>,
    error: &Option<String>,
    response: &str,
    prompt: &str,
    retry_count: u32,
) -> VerificationOutcome {
    if !should_verify(complexity, error, response) {
        return VerificationOutcome {
            passed: true,
            verdict: "skipped".to_string(),
            next_retry_count: retry_count,
        };
    }

    if let Some(reason) = gate_1_hallucination(response) {
        return handle_failure("hallucination", &reason, retry_count);
    }
    if let Some(reason) = gate_2_completeness(response) {
        return handle_failure("incomplete", &reason, retry_count);
    }
    if let Some(reason) = gate_3_length(response) {
        return handle_failure("too_short", &reason, retry_count);
    }
    if let Some(reason) = gate_4_coherence(response, prompt) {
        return handle_failure("incoherent", &reason, retry_count);
    }

    VerificationOutcome {
        passed: true,
        verdict: "passed_all_gates".to_string(),
        next_retry_count: retry_count,
    }
}

fn handle_failure(failure_type: &str, reason: &str, retry_count: u32) -> VerificationOutcome {
    if retry_count >= MAX_RETRIES {
        return VerificationOutcome {
            passed: true,
            verdict: format!("passed_after_max_retries:{failure_type}"),
            next_retry_count: retry_count,
        };
    }
    VerificationOutcome {
        passed: false,
        verdict: format!("failed:{failure_type}:{reason}"),
        next_retry_count: retry_count + 1,
    }
}

fn gate_1_hallucination(response: &str) -> Option<String> {
    let lower = response.to_lowercase();
    GATE_1_HALLUCINATION_MARKERS
        .iter()
        .find(|marker| lower.contains(**marker))
        .map(|marker| format!("Detected hallucination marker: '{marker}'"))
}

fn incomplete_markers_re() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        GATE_2_INCOMPLETE_MARKERS
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).expect("valid gate-2 regex"))
            .collect()
    })
}

fn proper_terminator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[.!?`"'\])>]$"#).unwrap())
}

fn gate_2_completeness(response: &str) -> Option<String> {
    let stripped = response.trim();

    for (pattern, re) in GATE_2_INCOMPLETE_MARKERS.iter().zip(incomplete_markers_re()) {
        if re.is_match(stripped) {
            return Some(format!("Detected incompleteness marker: '{pattern}'"));
        }
    }

    if !stripped.is_empty() && !proper_terminator_re().is_match(stripped) && stripped.len() > 500 {
        return Some("Long response ends without proper termination".to_string());
    }

    None
}

fn gate_3_length(response: &str) -> Option<String> {
    let len = response.trim().chars().count();
    if len < GATE_3_MIN_LENGTH {
        Some(format!("Response too short: {len} chars (min: {GATE_3_MIN_LENGTH})"))
    } else {
        None
    }
}

fn gate_4_coherence(response: &str, prompt: &str) -> Option<String> {
    if prompt.is_empty() || response.is_empty() {
        return None;
    }

    let key_terms = extract_key_terms(&prompt.to_lowercase());
    if key_terms.is_empty() {
        return None;
    }

    let response_lower = response.to_lowercase();
    let matching = key_terms.iter().filter(|t| response_lower.contains(t.as_str())).count();
    let ratio = matching as f64 / key_terms.len() as f64;

    if ratio < 0.2 && key_terms.len() >= 3 {
        Some(format!(
            "Low term overlap ({:.0}%): response may not address prompt",
            ratio * 100.0
        ))
    } else {
        None
    }
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-z]{3,}\b").unwrap())
}

fn stopwords() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            "the", "a", "an", "is", "are", "was", "were", "be", "been", "have", "has", "had",
            "do", "does", "did", "will", "would", "could", "should", "may", "might", "can",
            "must", "shall", "i", "you", "he", "she", "it", "we", "they", "me", "him", "her",
            "us", "them", "my", "your", "his", "its", "our", "their", "this", "that", "these",
            "those", "what", "which", "who", "whom", "whose", "when", "where", "why", "how",
            "and", "or", "but", "if", "then", "else", "for", "with", "to", "from", "in", "on",
            "at", "by", "of", "about", "please", "help", "want", "need", "like", "tell", "show",
        ]
        .into_iter()
        .collect()
    })
}

/// Extracts up to 20 distinct non-stopword terms (3+ lowercase letters) from `text`.
fn extract_key_terms(text: &str) -> Vec<String> {
    let stop = stopwords();
    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for m in word_re().find_iter(text) {
        let word = m.as_str();
        if !stop.contains(word) && seen.insert(word.to_string()) {
            terms.push(word.to_string());
            if terms.len() == 20 {
                break;
            }
        }
    }
    terms
}

/// Extra guidance appended as a system message when retrying after a gate
/// failure. Never mutates the original prompt — spec.md §3 keeps Input
/// fields immutable, so a retry adds context rather than rewriting history.
pub fn retry_prompt_enhancement(failure_type: &str) -> Option<&'static str> {
    match failure_type {
        "hallucination" => Some(
            "Important: Provide a direct, substantive answer. Do not deflect or claim inability to help.",
        ),
        "incomplete" => Some(
            "Important: Provide a complete response. Do not truncate or leave the answer unfinished.",
        ),
        "too_short" => Some(
            "Important: Provide a thorough, detailed response. Brief answers are not sufficient for this query.",
        ),
        "incoherent" => Some(
            "Important: Focus on directly addressing the specific question asked. Ensure your response is relevant to the query.",
        ),
        _ => None,
    }
}

/// Extracts the failure-type token from a `"failed:{type}:{reason}"` verdict.
pub fn failure_type_from_verdict(verdict: &str) -> Option<&str> {
    verdict.strip_prefix("failed:")?.split(':').next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_verify_skips_trivial_and_routine() {
        assert!(!should_verify(Some(ComplexityTag::Trivial), &None, "some response"));
        assert!(!should_verify(Some(ComplexityTag::Routine), &None, "some response"));
    }

    #[test]
    fn should_verify_skips_when_errored_or_empty() {
        assert!(!should_verify(Some(ComplexityTag::Complex), &Some("timeout".into()), "x"));
        assert!(!should_verify(Some(ComplexityTag::Complex), &None, ""));
    }

    #[test]
    fn should_verify_runs_for_complex_with_response() {
        assert!(should_verify(Some(ComplexityTag::Complex), &None, "a real response"));
    }

    #[test]
    fn verify_passes_good_response() {
        let response = "The cognitive graph routes requests by classifying their complexity \
            and dispatching to either the deep reasoner or fast executor backend.";
        let outcome = verify(
            Some(ComplexityTag::Complex),
            &None,
            response,
            "Explain how the cognitive graph routes requests",
            0,
        );
        assert!(outcome.passed);
        assert_eq!(outcome.verdict, "passed_all_gates");
    }

    #[test]
    fn verify_fails_on_hallucination_marker() {
        let outcome = verify(
            Some(ComplexityTag::Complex),
            &None,
            "I'm sorry, as an AI I cannot help with that particular request at all.",
            "Explain the routing logic",
            0,
        );
        assert!(!outcome.passed);
        assert!(outcome.verdict.starts_with("failed:hallucination:"));
        assert_eq!(outcome.next_retry_count, 1);
    }

    #[test]
    fn verify_fails_on_short_response() {
        let outcome = verify(Some(ComplexityTag::Complex), &None, "Too short.", "anything", 0);
        assert!(!outcome.passed);
        assert!(outcome.verdict.starts_with("failed:too_short:"));
    }

    #[test]
    fn verify_passes_through_after_max_retries() {
        let outcome = verify(Some(ComplexityTag::Complex), &None, "Too short.", "anything", MAX_RETRIES);
        assert!(outcome.passed);
        assert_eq!(outcome.verdict, "passed_after_max_retries:too_short");
        assert_eq!(outcome.next_retry_count, MAX_RETRIES);
    }

    #[test]
    fn verify_fails_on_low_coherence() {
        let response = "Bananas are a good source of potassium and make a tasty snack every morning.";
        let outcome = verify(
            Some(ComplexityTag::Complex),
            &None,
            response,
            "Explain the deployment rollback procedure for the kubernetes cluster configuration",
            0,
        );
        assert!(!outcome.passed);
        assert!(outcome.verdict.starts_with("failed:incoherent:"));
    }

    #[test]
    fn extract_key_terms_drops_stopwords_and_caps_at_20() {
        let text = "the quick brown fox jumps over the lazy dog and then runs away fast";
        let terms = extract_key_terms(text);
        assert!(!terms.contains(&"the".to_string()));
        assert!(terms.contains(&"quick".to_string()));
        assert!(terms.len() <= 20);
    }

    #[test]
    fn retry_prompt_enhancement_known_and_unknown() {
        assert!(retry_prompt_enhancement("hallucination").is_some());
        assert!(retry_prompt_enhancement("nonexistent").is_none());
    }

    #[test]
    fn failure_type_from_verdict_parses_prefix() {
        assert_eq!(
            failure_type_from_verdict("failed:too_short:Response too short: 10 chars"),
            Some("too_short")
        );
        assert_eq!(failure_type_from_verdict("passed_all_gates"), None);
    }
}
