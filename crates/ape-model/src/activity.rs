use std::collections::BTreeSet;

use crate::action::ActionFilter;
use crate::graph::{Graph, StateId};

/// All states sharing one activity identity.
#[derive(Debug, Clone, Default)]
pub struct ActivityNode {
    pub name: String,
    pub states: BTreeSet<StateId>,
    pub visited_count: u32,
}

impl ActivityNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: BTreeSet::new(),
            visited_count: 0,
        }
    }

    /// Visited fraction of enabled, valid, targeted actions across the
    /// activity's states. An activity without such actions counts as fully
    /// visited.
    pub fn visited_rate(&self, graph: &Graph) -> f64 {
        let mut total = 0usize;
        let mut visited = 0usize;
        for state in self.states.iter().filter_map(|&id| graph.state(id)) {
            for action in state.targeted_actions() {
                if !ActionFilter::EnabledValid.include(action) {
                    continue;
                }
                total += 1;
                if action.is_visited() {
                    visited += 1;
                }
            }
        }
        if total == 0 {
            return 1.0;
        }
        visited as f64 / total as f64
    }
}
