//! Graph node trait: one step in a `StateGraph`.
//!
//! Receives state `S`, returns updated `S` and `Next` (continue, jump, or end).

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::CortexError;

use super::Next;

/// One step in a graph: state in, (state out, next step).
///
/// The graph runner uses `Next` to choose the next node: `Continue` follows
/// the registered edge (plain or conditional), `Node(id)` jumps directly, and
/// `End` stops the graph.
#[async_trait]
pub trait Node<S>: Send + Sync
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Node id (e.g. `"classify"`, `"call_model"`). Must be unique within a graph.
    fn id(&self) -> &str;

    /// One step: state in, (state out, next step).
    async fn run(&self, state: S) -> Result<(S, Next), CortexError>;
}
