//! Errors produced by `StateGraph::compile`.

use thiserror::Error;

/// A `StateGraph` failed to compile into a runnable `CompiledStateGraph`.
///
/// `compile()` checks that every edge target exists, that the graph has
/// exactly one entry and at least one exit, and that no node mixes a plain
/// edge with conditional routing.
#[derive(Debug, Error)]
pub enum CompilationError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("graph must have exactly one edge from START")]
    MissingStart,

    #[error("graph must have exactly one edge to END")]
    MissingEnd,

    /// Covers branching, disconnected, or cyclic unconditional edges; the
    /// metacog -> call_model retry backedge is exempt since it is conditional.
    #[error("edges must form a single linear chain from START to END: {0}")]
    InvalidChain(String),

    #[error("node has both edge and conditional edges: {0}")]
    NodeHasBothEdgeAndConditional(String),

    #[error("conditional path_map invalid target: {0}")]
    InvalidConditionalPathMap(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_the_offending_id() {
        assert!(CompilationError::NodeNotFound("retrieve_knowledge".into())
            .to_string()
            .contains("retrieve_knowledge"));
        let chain = CompilationError::InvalidChain("cycle detected".into());
        assert!(chain.to_string().contains("cycle detected"));
    }

    #[test]
    fn missing_start_and_end_messages_name_the_sentinel() {
        assert!(CompilationError::MissingStart.to_string().contains("START"));
        assert!(CompilationError::MissingEnd.to_string().contains("END"));
    }
}
