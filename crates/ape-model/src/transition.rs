use crate::action::ActionId;
use crate::graph::{StateId, TransitionId};

/// A directed edge `(source, action, target)`, unique within a graph.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub id: TransitionId,
    pub source: StateId,
    pub action: ActionId,
    pub target: StateId,
    pub visited_count: u32,
    /// Positive once re-observed, negative once the same action was seen
    /// leading elsewhere.
    pub strength: i32,
    pub met_target_count: u32,
}

impl StateTransition {
    pub fn new(id: TransitionId, source: StateId, action: ActionId, target: StateId) -> Self {
        Self {
            id,
            source,
            action,
            target,
            visited_count: 0,
            strength: 0,
            met_target_count: 0,
        }
    }

    pub fn triple(&self) -> (StateId, ActionId, StateId) {
        (self.source, self.action, self.target)
    }

    /// Fraction of traversals followed by a target hit, in `[0, 1]`.
    pub fn met_target_ratio(&self) -> f64 {
        if self.visited_count == 0 || self.met_target_count == 0 {
            return 0.0;
        }
        (self.met_target_count as f64 / self.visited_count as f64).clamp(0.0, 1.0)
    }

    pub fn is_strong(&self) -> bool {
        self.strength >= 0
    }

    pub fn is_circle(&self) -> bool {
        self.source == self.target
    }
}

impl std::fmt::Display for StateTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "t{}: s{} -a{}-> s{} (v={}, st={}, hit={})",
            self.id,
            self.source,
            self.action,
            self.target,
            self.visited_count,
            self.strength,
            self.met_target_count
        )
    }
}
