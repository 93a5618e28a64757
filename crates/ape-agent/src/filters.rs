//! Greedy-work predicates and the path filters built on them.

use std::collections::BTreeSet;

use ape_model::{
    Action, ActionFilter, Graph, PathFilter, StateId, StateTransition, Subsequence,
};
use rand::Rng;

/// Actions of `state` that would still teach us something: enabled, valid,
/// widget-bound, and either an unvisited scroll or a widget/type pair no
/// state has exercised yet.
pub fn greedy_actions(graph: &Graph, state: StateId) -> Vec<&Action> {
    let Some(state) = graph.state(state) else {
        return Vec::new();
    };
    state
        .targeted_actions()
        .filter(|a| ActionFilter::EnabledValid.include(a))
        .filter(|a| {
            if a.is_scroll() {
                a.is_unvisited()
            } else {
                graph.is_action_unvisited_by_name(a)
            }
        })
        .collect()
}

pub fn is_greedy_state(graph: &Graph, state: StateId) -> bool {
    !greedy_actions(graph, state).is_empty()
}

fn usable_forward(graph: &Graph, path: &Subsequence, edge: &StateTransition, back: bool) -> bool {
    if path.is_closed() || !edge.is_strong() {
        return false;
    }
    graph
        .action(edge.action)
        .map_or(false, |a| a.is_back() == back && ActionFilter::EnabledValid.include(a))
}

/// Strong non-back paths ending at a state with greedy work.
pub struct GreedyPathFilter;

impl PathFilter for GreedyPathFilter {
    fn include(&self, graph: &Graph, path: &Subsequence) -> bool {
        !path.is_empty() && is_greedy_state(graph, path.last_state())
    }

    fn extend(&self, graph: &Graph, path: &Subsequence, edge: &StateTransition) -> bool {
        usable_forward(graph, path, edge, false)
    }
}

/// Strong back-only paths ending at a greedy or entry state.
pub struct BacktrackPathFilter;

impl PathFilter for BacktrackPathFilter {
    fn include(&self, graph: &Graph, path: &Subsequence) -> bool {
        if path.is_empty() {
            return false;
        }
        let last = path.last_state();
        is_greedy_state(graph, last) || graph.is_entry_state(last)
    }

    fn extend(&self, graph: &Graph, path: &Subsequence, edge: &StateTransition) -> bool {
        usable_forward(graph, path, edge, true)
    }
}

/// Strong non-back paths into a trivial activity that still has work.
pub struct TrivialActivityPathFilter<'a> {
    pub trivial: &'a BTreeSet<String>,
}

impl PathFilter for TrivialActivityPathFilter<'_> {
    fn include(&self, graph: &Graph, path: &Subsequence) -> bool {
        if path.is_empty() || path.is_closed() {
            return false;
        }
        let last = path.last_state();
        let Some(state) = graph.state(last) else {
            return false;
        };
        if !self.trivial.contains(state.activity()) {
            return false;
        }
        is_greedy_state(graph, last)
            || state.first_action(ActionFilter::EnabledValidUnvisited).is_some()
    }

    fn extend(&self, graph: &Graph, path: &Subsequence, edge: &StateTransition) -> bool {
        usable_forward(graph, path, edge, false)
    }
}

/// Uniform pick among the shortest of `paths`.
pub fn random_pick_shortest<R: Rng>(rng: &mut R, mut paths: Vec<Subsequence>) -> Option<Subsequence> {
    let shortest = paths.iter().map(Subsequence::len).min()?;
    paths.retain(|p| p.len() == shortest);
    let index = rng.gen_range(0..paths.len());
    Some(paths.swap_remove(index))
}
