use ape_model::{ModelError, StateId, TrieError};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Every stage came up empty. The harness should restart the target.
    #[error("no available action on state s{0}")]
    NoAvailableAction(StateId),
    #[error("agent invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Trie(#[from] TrieError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("no state observed yet")]
    NotStarted,
}
