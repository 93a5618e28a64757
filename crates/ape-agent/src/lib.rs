//! Feedback-directed exploration policy.
//!
//! [`StatefulAgent`] learns a GUI model from observed screens and steers
//! toward transitions that previously reached target methods, falling back
//! to greedy exploration when no target is in reach.

pub mod agent;
pub mod config;
pub mod error;
pub mod filters;
pub mod probability;
pub mod scoring;
pub mod stability;
pub mod stages;
pub mod target;
pub mod trivial;

pub use agent::{AgentStats, Observation, StatefulAgent};
pub use config::{
    AgentConfig, AgentVariant, ConfigError, EarlyStageConfig, StabilityConfig, StrategyToggles,
    TargetSelection,
};
pub use error::AgentError;
pub use scoring::{score_states, StateScores};
pub use stability::{RestartCause, StabilityTracker};
pub use stages::{AgentEvent, EventCounters};
pub use target::{selector_for, AcceptReject, TargetChoice, TargetContext, TargetSelector, WeightFolding};
