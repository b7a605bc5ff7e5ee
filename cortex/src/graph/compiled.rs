//! A validated, executable `StateGraph`.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::CortexError;
use crate::graph::conditional::NextEntry;
use crate::graph::node::Node;
use crate::graph::state_graph::END;
use crate::graph::Next;

/// An executable graph produced by `StateGraph::compile`.
///
/// Node dispatch is a loop over an explicit `next` variable rather than
/// recursive calls, so a retry backedge (e.g. metacog -> call_model) cannot
/// blow the call stack and the retry counter lives entirely in the state
/// record passed between iterations.
pub struct CompiledStateGraph<S> {
    pub(crate) nodes: HashMap<String, Arc<dyn Node<S>>>,
    pub(crate) first_node_id: String,
    pub(crate) next_map: HashMap<String, NextEntry<S>>,
}

impl<S> CompiledStateGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Runs the graph to completion, starting from `state` at the entry node.
    pub async fn invoke(&self, mut state: S) -> Result<S, CortexError> {
        let mut current = self.first_node_id.clone();
        loop {
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| CortexError::NodeNotFound(current.clone()))?;
            let (new_state, directive) = node.run(state).await?;
            state = new_state;

            let target = match directive {
                Next::End => break,
                Next::Node(id) => id,
                Next::Continue => match self.next_map.get(&current) {
                    Some(NextEntry::Unconditional(next)) => next.clone(),
                    Some(NextEntry::Conditional(router)) => router.resolve(&state),
                    None => break,
                },
            };

            if target == END {
                break;
            }
            current = target;
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StateGraph;
    use async_trait::async_trait;

    #[derive(Clone, Debug)]
    struct CounterState {
        visits: u32,
    }

    struct IncrementNode;

    #[async_trait]
    impl Node<CounterState> for IncrementNode {
        fn id(&self) -> &str {
            "inc"
        }
        async fn run(&self, mut state: CounterState) -> Result<(CounterState, Next), CortexError> {
            state.visits += 1;
            Ok((state, Next::Continue))
        }
    }

    struct LoopUntilNode;

    #[async_trait]
    impl Node<CounterState> for LoopUntilNode {
        fn id(&self) -> &str {
            "gate"
        }
        async fn run(&self, state: CounterState) -> Result<(CounterState, Next), CortexError> {
            Ok((state, Next::Continue))
        }
    }

    /// Invoke follows a plain edge chain to END.
    #[tokio::test]
    async fn invoke_runs_linear_chain() {
        let mut graph = StateGraph::<CounterState>::new();
        graph.add_node("inc", Arc::new(IncrementNode));
        graph.add_edge(super::super::state_graph::START, "inc");
        graph.add_edge("inc", super::super::state_graph::END);
        let compiled = graph.compile().unwrap();
        let result = compiled.invoke(CounterState { visits: 0 }).await.unwrap();
        assert_eq!(result.visits, 1);
    }

    /// A conditional backedge loops until the routing key selects END.
    #[tokio::test]
    async fn invoke_follows_conditional_backedge_until_bound() {
        let mut graph = StateGraph::<CounterState>::new();
        graph.add_node("inc", Arc::new(IncrementNode));
        graph.add_node("gate", Arc::new(LoopUntilNode));
        graph.add_edge(super::super::state_graph::START, "inc");
        graph.add_edge("inc", "gate");
        graph.add_conditional_edges(
            "gate",
            Arc::new(|s: &CounterState| {
                if s.visits >= 3 {
                    "done".to_string()
                } else {
                    "retry".to_string()
                }
            }),
            Some(
                [
                    ("done".to_string(), super::super::state_graph::END.to_string()),
                    ("retry".to_string(), "inc".to_string()),
                ]
                .into_iter()
                .collect(),
            ),
        );
        let compiled = graph.compile().unwrap();
        let result = compiled.invoke(CounterState { visits: 0 }).await.unwrap();
        assert_eq!(result.visits, 3);
    }
}
