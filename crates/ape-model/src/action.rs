use serde::{Deserialize, Serialize};

use crate::graph::StateId;
use crate::snapshot::Bounds;

pub type ActionId = u32;

/// Logical interaction kinds. `Back` is synthesized for every state; all
/// other kinds are generated from the widgets of a state key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Back,
    Click,
    LongClick,
    ScrollTopDown,
    ScrollBottomUp,
    ScrollLeftRight,
    ScrollRightLeft,
    TextInput,
}

impl ActionType {
    pub fn requires_target(self) -> bool {
        !matches!(self, ActionType::Back)
    }

    pub fn is_scroll(self) -> bool {
        matches!(
            self,
            ActionType::ScrollTopDown
                | ActionType::ScrollBottomUp
                | ActionType::ScrollLeftRight
                | ActionType::ScrollRightLeft
        )
    }

    /// Base sampling priority for an action of this kind.
    pub fn base_priority(self) -> u32 {
        match self {
            ActionType::Click | ActionType::TextInput => 4,
            ActionType::LongClick => 2,
            ActionType::ScrollTopDown
            | ActionType::ScrollBottomUp
            | ActionType::ScrollLeftRight
            | ActionType::ScrollRightLeft => 2,
            ActionType::Back => 1,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionType::Back => "BACK",
            ActionType::Click => "CLICK",
            ActionType::LongClick => "LONG_CLICK",
            ActionType::ScrollTopDown => "SCROLL_TOP_DOWN",
            ActionType::ScrollBottomUp => "SCROLL_BOTTOM_UP",
            ActionType::ScrollLeftRight => "SCROLL_LEFT_RIGHT",
            ActionType::ScrollRightLeft => "SCROLL_RIGHT_LEFT",
            ActionType::TextInput => "TEXT_INPUT",
        };
        f.write_str(name)
    }
}

/// An abstract interaction owned by exactly one state.
///
/// Identity (`state`, `kind`, `target`) is fixed at construction; the visit
/// and resolution counters change as exploration proceeds.
#[derive(Debug, Clone)]
pub struct Action {
    pub id: ActionId,
    pub state: StateId,
    pub kind: ActionType,
    /// Canonical widget name, `None` for actions that need no widget.
    pub target: Option<String>,
    pub priority: u32,
    pub visited_count: u32,
    /// How many times this action was resolved against a GUI tree.
    pub resolved_count: u32,
    /// Number of GUI nodes matching `target` in the latest snapshot.
    pub resolved_nodes: u32,
    pub enabled: bool,
    pub valid: bool,
}

impl Action {
    pub fn new(id: ActionId, state: StateId, kind: ActionType, target: Option<String>) -> Self {
        Self {
            id,
            state,
            kind,
            target,
            priority: kind.base_priority(),
            visited_count: 0,
            resolved_count: 0,
            resolved_nodes: 1,
            enabled: true,
            valid: true,
        }
    }

    pub fn is_back(&self) -> bool {
        self.kind == ActionType::Back
    }

    pub fn requires_target(&self) -> bool {
        self.kind.requires_target()
    }

    pub fn is_scroll(&self) -> bool {
        self.kind.is_scroll()
    }

    pub fn is_visited(&self) -> bool {
        self.visited_count > 0
    }

    pub fn is_unvisited(&self) -> bool {
        self.visited_count == 0
    }

    /// Saturated once every matching node of the latest snapshot could have
    /// been exercised.
    pub fn is_saturated(&self) -> bool {
        self.visited_count >= self.resolved_nodes.max(1)
    }

    /// Fraction of saturation reached, in `[0, 1]`.
    pub fn saturation(&self) -> f64 {
        let needed = self.resolved_nodes.max(1) as f64;
        (self.visited_count as f64 / needed).min(1.0)
    }

    /// Identity used by the name-level visit index.
    pub fn name_key(&self) -> Option<(ActionType, String)> {
        self.target.clone().map(|t| (self.kind, t))
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some(t) => write!(f, "{}@{}[s{}/a{}]", self.kind, t, self.state, self.id),
            None => write!(f, "{}[s{}/a{}]", self.kind, self.state, self.id),
        }
    }
}

/// An action bound to one concrete GUI node, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAction {
    pub action: ActionId,
    pub state: StateId,
    pub kind: ActionType,
    pub target: Option<String>,
    /// Bounds of the chosen node; `None` for actions without a widget.
    pub bounds: Option<Bounds>,
    /// Delay the dispatcher should apply after performing the action.
    pub throttle_millis: u64,
}

/// Predicates over actions used by selection and path search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionFilter {
    All,
    Valid,
    EnabledValid,
    EnabledValidUnvisited,
    EnabledValidUnsaturated,
    WithTarget,
}

impl ActionFilter {
    pub fn include(self, action: &Action) -> bool {
        match self {
            ActionFilter::All => true,
            ActionFilter::Valid => action.valid,
            ActionFilter::EnabledValid => action.enabled && action.valid,
            ActionFilter::EnabledValidUnvisited => {
                action.enabled && action.valid && action.is_unvisited()
            }
            ActionFilter::EnabledValidUnsaturated => {
                action.enabled && action.valid && !action.is_saturated()
            }
            ActionFilter::WithTarget => action.requires_target(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_needs_no_target() {
        assert!(!ActionType::Back.requires_target());
        assert!(ActionType::Click.requires_target());
        assert!(ActionType::ScrollLeftRight.is_scroll());
        assert!(!ActionType::LongClick.is_scroll());
    }

    #[test]
    fn test_saturation_follows_resolved_nodes() {
        let mut action = Action::new(0, 0, ActionType::Click, Some("ok".into()));
        action.resolved_nodes = 2;
        assert!(!action.is_saturated());
        action.visited_count = 1;
        assert!(!action.is_saturated());
        assert!((action.saturation() - 0.5).abs() < 1e-9);
        action.visited_count = 2;
        assert!(action.is_saturated());
    }

    #[test]
    fn test_filters() {
        let mut action = Action::new(0, 0, ActionType::Click, Some("ok".into()));
        assert!(ActionFilter::EnabledValidUnvisited.include(&action));
        action.visited_count = 1;
        assert!(!ActionFilter::EnabledValidUnvisited.include(&action));
        assert!(!ActionFilter::EnabledValidUnsaturated.include(&action));
        action.valid = false;
        assert!(!ActionFilter::EnabledValid.include(&action));
        assert!(ActionFilter::All.include(&action));
        assert!(ActionFilter::WithTarget.include(&action));
    }
}
