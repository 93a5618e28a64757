//! Paths over the transition graph and the predicates that steer searches.

use crate::action::ActionId;
use crate::graph::{Graph, StateId, TransitionId};
use crate::transition::StateTransition;

/// A path of transitions starting at `start`.
///
/// `states[0]` is the start state and `states[i + 1]` is the target of
/// `edges[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subsequence {
    states: Vec<StateId>,
    edges: Vec<TransitionId>,
}

impl Subsequence {
    pub fn new(start: StateId) -> Self {
        Self {
            states: vec![start],
            edges: Vec::new(),
        }
    }

    pub fn start(&self) -> StateId {
        self.states[0]
    }

    pub fn last_state(&self) -> StateId {
        self.states[self.states.len() - 1]
    }

    /// The state before the last one, if the path has at least one edge.
    pub fn last_last_state(&self) -> Option<StateId> {
        self.states.len().checked_sub(2).map(|i| self.states[i])
    }

    pub fn states(&self) -> &[StateId] {
        &self.states
    }

    pub fn edges(&self) -> &[TransitionId] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn first_action(&self, graph: &Graph) -> Option<ActionId> {
        let first = *self.edges.first()?;
        graph.transition(first).map(|t| t.action)
    }

    pub fn contains_transition(&self, id: TransitionId) -> bool {
        self.edges.contains(&id)
    }

    /// True when the last state already appears earlier on the path.
    pub fn is_closed(&self) -> bool {
        let last = self.last_state();
        self.states[..self.states.len() - 1].contains(&last)
    }

    pub(crate) fn extended(&self, edge: &StateTransition) -> Self {
        let mut next = self.clone();
        next.edges.push(edge.id);
        next.states.push(edge.target);
        next
    }
}

/// Predicate pair steering a shortest-path search.
///
/// `extend` is consulted before an edge is followed; `include` decides
/// whether a path is an acceptable result.
pub trait PathFilter {
    fn include(&self, graph: &Graph, path: &Subsequence) -> bool;

    fn extend(&self, graph: &Graph, path: &Subsequence, edge: &StateTransition) -> bool;
}

/// Paths that end at a fixed state over strong edges.
pub struct DestinationFilter {
    pub destination: StateId,
    pub include_back: bool,
}

impl PathFilter for DestinationFilter {
    fn include(&self, _graph: &Graph, path: &Subsequence) -> bool {
        path.last_state() == self.destination
    }

    fn extend(&self, graph: &Graph, _path: &Subsequence, edge: &StateTransition) -> bool {
        if !edge.is_strong() {
            return false;
        }
        self.include_back || !graph.action(edge.action).map_or(false, |a| a.is_back())
    }
}

/// Filter assembled from two closures.
pub struct FnFilter<I, E> {
    include: I,
    extend: E,
}

impl<I, E> FnFilter<I, E>
where
    I: Fn(&Graph, &Subsequence) -> bool,
    E: Fn(&Graph, &Subsequence, &StateTransition) -> bool,
{
    pub fn new(include: I, extend: E) -> Self {
        Self { include, extend }
    }
}

impl<I, E> PathFilter for FnFilter<I, E>
where
    I: Fn(&Graph, &Subsequence) -> bool,
    E: Fn(&Graph, &Subsequence, &StateTransition) -> bool,
{
    fn include(&self, graph: &Graph, path: &Subsequence) -> bool {
        (self.include)(graph, path)
    }

    fn extend(&self, graph: &Graph, path: &Subsequence, edge: &StateTransition) -> bool {
        (self.extend)(graph, path, edge)
    }
}
