//! GUI snapshots as delivered by the tree extractor.
//!
//! Widget naming and canonicalization happen upstream; a snapshot arrives
//! with canonical widget names already attached to each node.

use serde::{Deserialize, Serialize};

use crate::action::ActionType;

/// A canonical widget identity plus the interactions it supports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Widget {
    pub name: String,
    pub actions: Vec<ActionType>,
}

impl Widget {
    pub fn new(name: impl Into<String>, actions: &[ActionType]) -> Self {
        let mut actions = actions.to_vec();
        actions.sort();
        actions.dedup();
        Self {
            name: name.into(),
            actions,
        }
    }
}

/// Screen rectangle of a GUI node, in device pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// One concrete node of a GUI tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuiNode {
    pub widget: Widget,
    #[serde(default)]
    pub bounds: Bounds,
}

/// A raw GUI tree capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuiSnapshot {
    pub activity: String,
    pub nodes: Vec<GuiNode>,
    /// Capture time on the device clock, in milliseconds.
    #[serde(default)]
    pub timestamp: i64,
}

impl GuiSnapshot {
    pub fn new(activity: impl Into<String>, nodes: Vec<GuiNode>) -> Self {
        Self {
            activity: activity.into(),
            nodes,
            timestamp: 0,
        }
    }

    /// Nodes whose widget carries the given canonical name.
    pub fn nodes_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a GuiNode> + 'a {
        self.nodes.iter().filter(move |n| n.widget.name == name)
    }

    pub fn count_named(&self, name: &str) -> usize {
        self.nodes_named(name).count()
    }

    pub fn state_key(&self) -> StateKey {
        StateKey::new(
            self.activity.clone(),
            self.nodes.iter().map(|n| n.widget.clone()).collect(),
        )
    }
}

/// Canonical key of a state: activity identity plus its widget set.
///
/// Widgets are kept sorted and de-duplicated so two snapshots with the same
/// widget set always yield equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    activity: String,
    widgets: Vec<Widget>,
}

impl StateKey {
    pub fn new(activity: impl Into<String>, mut widgets: Vec<Widget>) -> Self {
        widgets.sort();
        widgets.dedup();
        Self {
            activity: activity.into(),
            widgets,
        }
    }

    pub fn activity(&self) -> &str {
        &self.activity
    }

    pub fn widgets(&self) -> &[Widget] {
        &self.widgets
    }

    pub fn contains_widget(&self, name: &str) -> bool {
        self.widgets.iter().any(|w| w.name == name)
    }

    /// A key with no interactive widget only offers Back.
    pub fn is_trivial(&self) -> bool {
        self.widgets.iter().all(|w| w.actions.is_empty())
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[W={}]", self.activity, self.widgets.len())
    }
}
