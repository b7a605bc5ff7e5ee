//! Pareto frontier of prompt variants: dominance, crowding-distance pruning,
//! and the `best`/`compromise` convenience queries.
//!
//! Grounded on `gepa/pareto.py`'s `Solution`/`ParetoFrontier` rather than
//! `gepa/evolution.py`'s simpler `_update_pareto_frontier` — the latter sorts
//! and truncates by total score and has no `minimize` support, which does not
//! match the configurable-direction dominance this module implements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// One candidate system prompt for a backend, scored on zero or more
/// objectives (e.g. `accuracy`, `latency_ms`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptVariant {
    pub id: String,
    pub backend: String,
    pub content: String,
    pub parent_id: Option<String>,
    pub generation: u32,
    #[serde(default)]
    pub scores: HashMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

impl PromptVariant {
    /// `self` dominates `other` iff, over the objectives they share, `self`
    /// is never worse and is strictly better on at least one — direction per
    /// objective flips when that objective is in `minimize`. Ties on every
    /// shared objective, or no shared objectives at all, are not dominance.
    pub fn dominates(&self, other: &PromptVariant, minimize: &HashSet<String>) -> bool {
        let common: Vec<&String> = self.scores.keys().filter(|k| other.scores.contains_key(k.as_str())).collect();
        if common.is_empty() {
            return false;
        }

        let mut strictly_better = false;
        for objective in common {
            let a = self.scores[objective];
            let b = other.scores[objective];
            if minimize.contains(objective) {
                if a > b {
                    return false;
                }
                if a < b {
                    strictly_better = true;
                }
            } else {
                if a < b {
                    return false;
                }
                if a > b {
                    strictly_better = true;
                }
            }
        }
        strictly_better
    }
}

/// A bounded, non-dominated set of [`PromptVariant`]s. Written only by the
/// evolution cycle; callers that need a stable view should clone
/// [`ParetoFrontier::solutions`] rather than hold a reference across work.
pub struct ParetoFrontier {
    max_size: usize,
    minimize: HashSet<String>,
    solutions: Vec<PromptVariant>,
}

impl ParetoFrontier {
    pub fn new(max_size: usize, minimize: HashSet<String>) -> Self {
        Self {
            max_size,
            minimize,
            solutions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.solutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }

    pub fn solutions(&self) -> &[PromptVariant] {
        &self.solutions
    }

    /// Adds `candidate` if no existing solution dominates it. Removes every
    /// existing solution `candidate` dominates, then prunes by crowding
    /// distance if the frontier now exceeds `max_size`. Adding the same
    /// variant id twice is a no-op on the second call.
    pub fn add(&mut self, candidate: PromptVariant) -> bool {
        if self.solutions.iter().any(|s| s.id == candidate.id) {
            return false;
        }
        if self.solutions.iter().any(|s| s.dominates(&candidate, &self.minimize)) {
            return false;
        }
        self.solutions.retain(|s| !candidate.dominates(s, &self.minimize));
        self.solutions.push(candidate);
        if self.solutions.len() > self.max_size {
            self.prune();
        }
        true
    }

    fn prune(&mut self) {
        if self.solutions.len() <= self.max_size {
            return;
        }
        let distances = self.crowding_distances();
        let mut ranked: Vec<(usize, f64)> = distances.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        let keep: HashSet<usize> = ranked.into_iter().take(self.max_size).map(|(i, _)| i).collect();

        let mut kept = Vec::with_capacity(self.max_size);
        for (i, solution) in self.solutions.drain(..).enumerate() {
            if keep.contains(&i) {
                kept.push(solution);
            }
        }
        self.solutions = kept;
    }

    /// For each objective present on the first solution: sort by that
    /// objective, give the two endpoints infinite crowding, and accumulate
    /// `(next - prev) / range` for interior points. Skips an objective
    /// entirely when every solution shares its value (`range == 0`).
    fn crowding_distances(&self) -> Vec<f64> {
        let n = self.solutions.len();
        let mut distances = vec![0.0_f64; n];
        if n == 0 {
            return distances;
        }
        let Some(first) = self.solutions.first() else {
            return distances;
        };
        let objectives: Vec<String> = first.scores.keys().cloned().collect();

        for objective in &objectives {
            let mut order: Vec<usize> = (0..n).collect();
            order.sort_by(|&a, &b| {
                let va = self.solutions[a].scores.get(objective).copied().unwrap_or(0.0);
                let vb = self.solutions[b].scores.get(objective).copied().unwrap_or(0.0);
                va.partial_cmp(&vb).unwrap_or(Ordering::Equal)
            });

            distances[order[0]] = f64::INFINITY;
            distances[order[n - 1]] = f64::INFINITY;

            let values: Vec<f64> = order
                .iter()
                .map(|&i| self.solutions[i].scores.get(objective).copied().unwrap_or(0.0))
                .collect();
            let min_v = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max_v = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let range = max_v - min_v;
            if range == 0.0 {
                continue;
            }

            for i in 1..n.saturating_sub(1) {
                distances[order[i]] += (values[i + 1] - values[i - 1]) / range;
            }
        }
        distances
    }

    /// The solution with the best value on `objective` — max by default,
    /// min when `objective` is in the frontier's `minimize` set. A solution
    /// missing the objective loses against every solution that has it.
    pub fn best(&self, objective: &str) -> Option<&PromptVariant> {
        if self.minimize.contains(objective) {
            self.solutions.iter().min_by(|a, b| {
                let av = a.scores.get(objective).copied().unwrap_or(f64::INFINITY);
                let bv = b.scores.get(objective).copied().unwrap_or(f64::INFINITY);
                av.partial_cmp(&bv).unwrap_or(Ordering::Equal)
            })
        } else {
            self.solutions.iter().max_by(|a, b| {
                let av = a.scores.get(objective).copied().unwrap_or(f64::NEG_INFINITY);
                let bv = b.scores.get(objective).copied().unwrap_or(f64::NEG_INFINITY);
                av.partial_cmp(&bv).unwrap_or(Ordering::Equal)
            })
        }
    }

    /// The solution maximizing a weighted sum across objectives (minimize
    /// objectives subtract, maximize objectives add). `weights` defaults to
    /// an equal share of the first solution's objectives when `None`.
    pub fn compromise(&self, weights: Option<&HashMap<String, f64>>) -> Option<&PromptVariant> {
        let owned_default;
        let weights = match weights {
            Some(w) => w,
            None => {
                let objectives: Vec<String> = self.solutions.first()?.scores.keys().cloned().collect();
                if objectives.is_empty() {
                    return self.solutions.first();
                }
                let share = 1.0 / objectives.len() as f64;
                owned_default = objectives.into_iter().map(|o| (o, share)).collect::<HashMap<_, _>>();
                &owned_default
            }
        };

        self.solutions.iter().max_by(|a, b| {
            weighted_score(a, weights, &self.minimize)
                .partial_cmp(&weighted_score(b, weights, &self.minimize))
                .unwrap_or(Ordering::Equal)
        })
    }
}

fn weighted_score(variant: &PromptVariant, weights: &HashMap<String, f64>, minimize: &HashSet<String>) -> f64 {
    weights
        .iter()
        .map(|(objective, weight)| {
            let value = variant.scores.get(objective).copied().unwrap_or(0.0);
            if minimize.contains(objective) {
                -weight * value
            } else {
                weight * value
            }
        })
        .sum()
}

#[derive(Serialize, Deserialize)]
struct FrontierDocument {
    frontier: Vec<PromptVariant>,
    updated_at: DateTime<Utc>,
}

/// Persists the frontier as `{frontier, updated_at}` JSON via a temp-file
/// write then rename, so a reader never observes a half-written file.
pub fn save_frontier_atomic(path: &Path, frontier: &ParetoFrontier) -> std::io::Result<()> {
    let document = FrontierDocument {
        frontier: frontier.solutions.clone(),
        updated_at: Utc::now(),
    };
    let json = serde_json::to_string_pretty(&document).expect("prompt variants are always serializable");
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)
}

/// Loads a previously persisted frontier, or an empty one if `path` does not
/// exist or holds malformed JSON.
pub fn load_frontier(path: &Path, max_size: usize, minimize: HashSet<String>) -> ParetoFrontier {
    let mut frontier = ParetoFrontier::new(max_size, minimize);
    if let Ok(text) = std::fs::read_to_string(path) {
        match serde_json::from_str::<FrontierDocument>(&text) {
            Ok(document) => frontier.solutions = document.frontier,
            Err(e) => tracing::warn!(error = %e, path = %path.display(), "malformed frontier state, starting empty"),
        }
    }
    frontier
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(id: &str, scores: &[(&str, f64)]) -> PromptVariant {
        PromptVariant {
            id: id.to_string(),
            backend: "fast".to_string(),
            content: format!("prompt {id}"),
            parent_id: None,
            generation: 0,
            scores: scores.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn dominance_is_not_symmetric() {
        let a = variant("a", &[("accuracy", 0.9), ("latency", 100.0)]);
        let b = variant("b", &[("accuracy", 0.5), ("latency", 200.0)]);
        let minimize: HashSet<String> = ["latency".to_string()].into_iter().collect();
        assert!(a.dominates(&b, &minimize));
        assert!(!b.dominates(&a, &minimize));
    }

    #[test]
    fn minimize_example_from_spec() {
        let a = variant("a", &[("acc", 0.9), ("lat", 1.0)]);
        let b = variant("b", &[("acc", 0.8), ("lat", 1.2)]);
        let minimize: HashSet<String> = ["lat".to_string()].into_iter().collect();
        assert!(a.dominates(&b, &minimize));
    }

    #[test]
    fn ties_on_every_objective_is_not_dominance() {
        let a = variant("a", &[("accuracy", 0.8)]);
        let b = variant("b", &[("accuracy", 0.8)]);
        let minimize = HashSet::new();
        assert!(!a.dominates(&b, &minimize));
        assert!(!b.dominates(&a, &minimize));
    }

    #[test]
    fn adding_same_variant_twice_is_idempotent() {
        let mut frontier = ParetoFrontier::new(10, HashSet::new());
        let v = variant("a", &[("accuracy", 0.9)]);
        assert!(frontier.add(v.clone()));
        assert!(!frontier.add(v));
        assert_eq!(frontier.len(), 1);
    }

    #[test]
    fn concave_front_all_three_survive_any_insertion_order() {
        let a = variant("a", &[("accuracy", 0.9), ("speed", 0.1)]);
        let b = variant("b", &[("accuracy", 0.5), ("speed", 0.5)]);
        let c = variant("c", &[("accuracy", 0.1), ("speed", 0.9)]);

        let mut forward = ParetoFrontier::new(10, HashSet::new());
        for v in [a.clone(), b.clone(), c.clone()] {
            forward.add(v);
        }
        assert_eq!(forward.len(), 3);

        let mut reversed = ParetoFrontier::new(10, HashSet::new());
        for v in [c, b, a] {
            reversed.add(v);
        }
        assert_eq!(reversed.len(), 3);
    }

    #[test]
    fn dominated_solution_is_evicted_when_a_later_add_dominates_it() {
        let mut frontier = ParetoFrontier::new(10, HashSet::new());
        frontier.add(variant("weak", &[("accuracy", 0.3), ("speed", 0.3)]));
        frontier.add(variant("strong", &[("accuracy", 0.9), ("speed", 0.9)]));
        assert_eq!(frontier.len(), 1);
        assert_eq!(frontier.solutions()[0].id, "strong");
    }

    #[test]
    fn prune_keeps_endpoints_and_drops_interior_crowd() {
        let mut frontier = ParetoFrontier::new(2, HashSet::new());
        // A non-dominated chain along a single-objective trade-off axis plus a
        // second objective moving the opposite way, so all four stay mutually
        // non-dominated and pruning is purely a crowding-distance decision.
        frontier.add(variant("p0", &[("accuracy", 0.0), ("speed", 1.0)]));
        frontier.add(variant("p1", &[("accuracy", 0.3), ("speed", 0.7)]));
        frontier.add(variant("p2", &[("accuracy", 0.7), ("speed", 0.3)]));
        frontier.add(variant("p3", &[("accuracy", 1.0), ("speed", 0.0)]));

        assert_eq!(frontier.len(), 2);
        let ids: HashSet<&str> = frontier.solutions().iter().map(|s| s.id.as_str()).collect();
        assert!(ids.contains("p0"));
        assert!(ids.contains("p3"));
    }

    #[test]
    fn best_respects_minimize_set() {
        let mut frontier = ParetoFrontier::new(10, ["latency".to_string()].into_iter().collect());
        frontier.add(variant("slow", &[("accuracy", 0.9), ("latency", 500.0)]));
        // "slow" is not dominated by "fast" here since accuracy differs too,
        // so both coexist and best() picks by the requested objective alone.
        let mut fast = variant("fast", &[("accuracy", 0.7), ("latency", 100.0)]);
        fast.id = "fast".to_string();
        frontier.add(fast);

        assert_eq!(frontier.best("latency").unwrap().id, "fast");
        assert_eq!(frontier.best("accuracy").unwrap().id, "slow");
    }

    #[test]
    fn compromise_uses_equal_weights_by_default() {
        let mut frontier = ParetoFrontier::new(10, HashSet::new());
        frontier.add(variant("balanced", &[("accuracy", 0.6), ("speed", 0.6)]));
        frontier.add(variant("lopsided", &[("accuracy", 0.95), ("speed", 0.1)]));
        let best = frontier.compromise(None).unwrap();
        assert_eq!(best.id, "balanced");
    }
}
