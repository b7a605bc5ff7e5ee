//! Crate-wide error type.
//!
//! Graph nodes only return `Err` for programmer-error conditions (an unknown
//! node id, a node run before its preconditions are met). Ordinary runtime
//! failures — a model timeout, an unreachable memory service — are encoded
//! as fields on `RequestState` and never propagated past a node boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CortexError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("no user message in request")]
    NoUserMessage,

    #[error("unknown backend endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("graph compilation failed: {0}")]
    Compilation(#[from] crate::graph::CompilationError),

    #[error("config load failed: {0}")]
    Config(#[from] cortex_config::LoadError),
}
