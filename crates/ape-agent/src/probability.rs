//! Per-state transition distributions.
//!
//! Both distributions only cover edges whose action is enabled and valid,
//! and are returned in the graph's edge order so sampling is reproducible.

use std::collections::HashMap;

use ape_model::{ActionFilter, Graph, StateId, StateTransition, TransitionId};

use crate::error::AgentError;
use crate::scoring::StateScores;

pub type Distribution = Vec<(TransitionId, f64)>;

pub use ape_model::trie::dup_count_to_reject_ratio;

fn live_edges<'g>(graph: &'g Graph, state: StateId) -> impl Iterator<Item = &'g StateTransition> {
    graph.out_transitions(state).filter(move |edge| {
        graph
            .action(edge.action)
            .map_or(false, |a| ActionFilter::EnabledValid.include(a))
    })
}

fn normalize(mut weights: Distribution) -> Distribution {
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return Vec::new();
    }
    for (_, w) in weights.iter_mut() {
        *w /= total;
    }
    weights
}

/// Distribution toward scored states.
///
/// An edge into a scored state weighs `score / n + ratio * k * total`,
/// where `n` counts this state's edges sharing that target, `ratio` is the
/// edge's own hit ratio, and `total` sums the target scores of all scored
/// edges. Edges into unscored states are left out.
pub fn transition_distribution(
    graph: &Graph,
    state: StateId,
    scores: &StateScores,
    met_target_weight: f64,
) -> Distribution {
    let scored: Vec<(&StateTransition, f64)> = live_edges(graph, state)
        .filter_map(|edge| scores.get(&edge.target).map(|&s| (edge, s)))
        .collect();

    let mut same_target: HashMap<StateId, u32> = HashMap::new();
    for (edge, _) in &scored {
        *same_target.entry(edge.target).or_insert(0) += 1;
    }
    let total: f64 = scored.iter().map(|(_, s)| s).sum();

    let weights = scored
        .iter()
        .map(|(edge, score)| {
            let share = score / same_target[&edge.target] as f64;
            let bonus = edge.met_target_ratio() * met_target_weight * total;
            (edge.id, share + bonus)
        })
        .collect();
    normalize(weights)
}

/// Proposal distribution for the accept/reject selector: action base
/// priority plus the same hit-ratio bonus, scaled by the total priority.
pub fn priority_distribution(graph: &Graph, state: StateId, met_target_weight: f64) -> Distribution {
    let edges: Vec<(&StateTransition, f64)> = live_edges(graph, state)
        .filter_map(|edge| {
            graph
                .action(edge.action)
                .map(|a| (edge, a.kind.base_priority() as f64))
        })
        .collect();
    let total: f64 = edges.iter().map(|(_, p)| p).sum();

    let weights = edges
        .iter()
        .map(|(edge, priority)| {
            let bonus = edge.met_target_ratio() * met_target_weight * total;
            (edge.id, priority + bonus)
        })
        .collect();
    normalize(weights)
}

/// Inverse-CDF draw: the first entry whose cumulative mass exceeds `u`,
/// falling back to the last entry on rounding shortfall.
pub fn sample(distribution: &[(TransitionId, f64)], u: f64) -> Option<(TransitionId, f64)> {
    let mut cumulative = 0.0;
    for &(id, p) in distribution {
        cumulative += p;
        if cumulative > u {
            return Some((id, p));
        }
    }
    distribution.last().copied()
}

/// Probabilities of multi-step continuations under
/// [`transition_distribution`], computed lazily per state for one decision.
pub struct PathProbability<'a> {
    graph: &'a Graph,
    scores: &'a StateScores,
    met_target_weight: f64,
    cache: HashMap<StateId, HashMap<TransitionId, f64>>,
}

impl<'a> PathProbability<'a> {
    pub fn new(graph: &'a Graph, scores: &'a StateScores, met_target_weight: f64) -> Self {
        Self {
            graph,
            scores,
            met_target_weight,
            cache: HashMap::new(),
        }
    }

    /// Chance of taking `transition` from its own source state.
    pub fn probability(&mut self, transition: TransitionId) -> f64 {
        let (graph, scores, weight) = (self.graph, self.scores, self.met_target_weight);
        let Some(edge) = graph.transition(transition) else {
            return 0.0;
        };
        self.cache
            .entry(edge.source)
            .or_insert_with(|| {
                transition_distribution(graph, edge.source, scores, weight)
                    .into_iter()
                    .collect()
            })
            .get(&transition)
            .copied()
            .unwrap_or(0.0)
    }

    /// Product of step probabilities along `edges`, which must chain.
    pub fn evaluate_subsequence_probability(
        &mut self,
        edges: &[TransitionId],
    ) -> Result<f64, AgentError> {
        let graph = self.graph;
        let mut expected: Option<StateId> = None;
        let mut p = 1.0;
        for &id in edges {
            let edge = graph
                .transition(id)
                .ok_or(ape_model::ModelError::UnknownTransition(id))?;
            if let Some(state) = expected {
                if edge.source != state {
                    return Err(AgentError::Invariant(format!(
                        "subsequence breaks at t{id}: expected source s{state}, found s{}",
                        edge.source
                    )));
                }
            }
            p *= self.probability(id);
            expected = Some(edge.target);
        }
        Ok(p)
    }
}
