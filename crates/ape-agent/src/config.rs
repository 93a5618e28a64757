//! Agent configuration: policy variant, decay ratios, trie limits, and
//! stability thresholds.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read agent config: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed agent config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid agent config: {0}")]
    Invalid(String),
}

/// Which policy drives the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentVariant {
    /// Target mode replaces early-stage exploration entirely; no
    /// stability-driven restarts.
    Sata,
    /// Target mode interleaves with early-stage exploration and restarts
    /// the app when progress stalls.
    Target,
}

/// How the target stage turns transition scores into one choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetSelection {
    /// Fold trie rejection into the distribution, then draw once.
    WeightFolding,
    /// Metropolis-Hastings proposal/acceptance loop.
    AcceptReject { max_rejects: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Consecutive target hits before a restart is requested.
    pub met_target_threshold: u32,
    /// Consecutive target-stage failures before a restart is requested.
    pub strategy_failure_threshold: u32,
    /// Decisions without a hit before a restart is requested.
    pub no_target_threshold: u32,
    /// Misses after which trie rejection starts fading out.
    pub attenuation_start: u32,
    /// Misses after which trie rejection is ignored.
    pub attenuation_end: u32,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            met_target_threshold: 5,
            strategy_failure_threshold: 5,
            no_target_threshold: 300,
            attenuation_start: 30,
            attenuation_end: 80,
        }
    }
}

/// Decisions spent in early-stage exploration before the target stage may
/// run again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStageConfig {
    pub activation_buffer: u32,
    pub missing_target_buffer: u32,
    pub failure_buffer: u32,
}

impl Default for EarlyStageConfig {
    fn default() -> Self {
        Self {
            activation_buffer: 30,
            missing_target_buffer: 10,
            failure_buffer: 5,
        }
    }
}

/// Switches for the fallback stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyToggles {
    pub aba: bool,
    pub trivial_activity: bool,
    pub back_to_trivial_activity: bool,
    pub backward_greedy: bool,
}

impl Default for StrategyToggles {
    fn default() -> Self {
        Self {
            aba: true,
            trivial_activity: true,
            back_to_trivial_activity: true,
            backward_greedy: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub seed: u64,
    pub variant: AgentVariant,
    /// Probability of a random pick in the epsilon-greedy fallback.
    pub epsilon: f64,
    /// Decisions after which the driver fires the target-mode trigger.
    pub target_trigger_steps: u64,
    /// Initial per-hop decay of state scores.
    pub state_score_ratio: f64,
    /// Each hit divides the current decay by this factor.
    pub state_score_reduction_ratio: f64,
    pub max_score_ratio: f64,
    /// Amplification of an edge's own hit ratio in the distributions.
    pub met_target_weight: f64,
    /// Trie count above which a continuation counts as explored.
    pub trie_count_limit: u32,
    pub observing_seq_length: usize,
    pub seq_count_limit_ratio: f64,
    pub target_selection: TargetSelection,
    pub stability: StabilityConfig,
    pub early_stage: EarlyStageConfig,
    pub toggles: StrategyToggles,
    /// Activity count at or below which no activity is treated as trivial.
    pub trivial_activity_rank_threshold: usize,
    pub base_throttle_millis: u64,
    /// Upper bound on the length of any searched path.
    pub max_path_length: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            variant: AgentVariant::Target,
            epsilon: 0.05,
            target_trigger_steps: 500,
            state_score_ratio: 0.9,
            state_score_reduction_ratio: 0.95,
            max_score_ratio: 0.99,
            met_target_weight: 8.0,
            trie_count_limit: 3,
            observing_seq_length: 50,
            seq_count_limit_ratio: 0.5,
            target_selection: TargetSelection::WeightFolding,
            stability: StabilityConfig::default(),
            early_stage: EarlyStageConfig::default(),
            toggles: StrategyToggles::default(),
            trivial_activity_rank_threshold: 3,
            base_throttle_millis: 0,
            max_path_length: 32,
        }
    }
}

impl AgentConfig {
    /// Defaults for the accept/reject policy.
    pub fn sata() -> Self {
        Self {
            variant: AgentVariant::Sata,
            target_selection: TargetSelection::AcceptReject { max_rejects: 30 },
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(ConfigError::Invalid(format!(
                "epsilon {} outside [0, 1]",
                self.epsilon
            )));
        }
        for (name, ratio) in [
            ("state_score_ratio", self.state_score_ratio),
            ("state_score_reduction_ratio", self.state_score_reduction_ratio),
            ("max_score_ratio", self.max_score_ratio),
        ] {
            if !(ratio > 0.0 && ratio < 1.0) {
                return Err(ConfigError::Invalid(format!("{name} {ratio} outside (0, 1)")));
            }
        }
        if self.stability.attenuation_start >= self.stability.attenuation_end {
            return Err(ConfigError::Invalid(
                "attenuation_start must be below attenuation_end".into(),
            ));
        }
        Ok(())
    }
}
