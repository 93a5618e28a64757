//! GUI exploration model: states, actions, transitions, path search, and
//! the subsequence trie used to recognize unproductive loops.

pub mod action;
pub mod activity;
pub mod graph;
pub mod path;
pub mod snapshot;
pub mod state;
pub mod transition;
pub mod trie;

pub use action::{Action, ActionFilter, ActionId, ActionType, ResolvedAction};
pub use activity::ActivityNode;
pub use graph::{Graph, ModelError, StateId, TransitionId};
pub use path::{DestinationFilter, FnFilter, PathFilter, Subsequence};
pub use snapshot::{Bounds, GuiNode, GuiSnapshot, StateKey, Widget};
pub use state::{pick_weighted, State};
pub use transition::StateTransition;
pub use trie::{SubsequenceTrie, TrieError};
