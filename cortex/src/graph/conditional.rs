//! Conditional routing: a function from state to a routing key, optionally
//! remapped through a path map to the actual next-node id.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// `(state) -> routing key`, evaluated after the source node runs.
pub type ConditionalRouterFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

/// A routing function plus an optional key-to-node-id remap.
#[derive(Clone)]
pub struct ConditionalRouter<S> {
    pub path: ConditionalRouterFn<S>,
    pub path_map: Option<HashMap<String, String>>,
}

impl<S> ConditionalRouter<S> {
    pub fn new(path: ConditionalRouterFn<S>, path_map: Option<HashMap<String, String>>) -> Self {
        Self { path, path_map }
    }

    /// Resolves the next node id for `state`: the routing key, or its
    /// remapped target when a path map is present and contains the key.
    pub fn resolve(&self, state: &S) -> String {
        let key = (self.path)(state);
        match &self.path_map {
            Some(map) => map.get(&key).cloned().unwrap_or(key),
            None => key,
        }
    }
}

impl<S> fmt::Debug for ConditionalRouter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalRouter")
            .field("path_map", &self.path_map)
            .finish()
    }
}

/// A compiled node's outgoing route: either a fixed next id or a router
/// resolved against the post-run state.
#[derive(Clone)]
pub enum NextEntry<S> {
    Unconditional(String),
    Conditional(ConditionalRouter<S>),
}
