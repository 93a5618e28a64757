//! Target-mode progress tracking and restart policy.

use crate::config::{AgentConfig, StabilityConfig};

/// Why a restart was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartCause {
    MetTarget,
    StrategyFailed,
    NoTarget,
}

/// Counts consecutive hits, misses, and target-stage failures, and owns the
/// current score decay ratio.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    thresholds: StabilityConfig,
    initial_ratio: f64,
    reduction_ratio: f64,
    max_ratio: f64,
    score_ratio: f64,
    met_target: u32,
    strategy_failed: u32,
    no_target: u32,
}

impl StabilityTracker {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            thresholds: config.stability.clone(),
            initial_ratio: config.state_score_ratio,
            reduction_ratio: config.state_score_reduction_ratio,
            max_ratio: config.max_score_ratio,
            score_ratio: config.state_score_ratio,
            met_target: 0,
            strategy_failed: 0,
            no_target: 0,
        }
    }

    /// A target hit widens the reach of state scores.
    pub fn record_hit(&mut self) {
        self.met_target += 1;
        self.no_target = 0;
        self.score_ratio = (self.score_ratio / self.reduction_ratio).min(self.max_ratio);
    }

    pub fn record_miss(&mut self) {
        self.no_target += 1;
    }

    pub fn record_strategy_failure(&mut self) {
        self.strategy_failed += 1;
    }

    pub fn record_strategy_success(&mut self) {
        self.strategy_failed = 0;
    }

    pub fn score_ratio(&self) -> f64 {
        self.score_ratio
    }

    pub fn met_target(&self) -> u32 {
        self.met_target
    }

    pub fn strategy_failed(&self) -> u32 {
        self.strategy_failed
    }

    pub fn no_target(&self) -> u32 {
        self.no_target
    }

    /// Multiplier for trie reject ratios. Long runs without a hit fade
    /// rejection out linearly between the attenuation bounds.
    pub fn reject_scale(&self) -> f64 {
        let start = self.thresholds.attenuation_start;
        let end = self.thresholds.attenuation_end;
        if self.no_target >= end {
            0.0
        } else if self.no_target >= start {
            (end - self.no_target) as f64 / (end - start) as f64
        } else {
            1.0
        }
    }

    /// Causes whose threshold has been reached. Each reported cause resets
    /// its own counter.
    pub fn check(&mut self) -> Vec<RestartCause> {
        let mut causes = Vec::new();
        if self.met_target >= self.thresholds.met_target_threshold {
            causes.push(RestartCause::MetTarget);
            self.met_target = 0;
            self.score_ratio = self.initial_ratio;
        }
        if self.strategy_failed >= self.thresholds.strategy_failure_threshold {
            causes.push(RestartCause::StrategyFailed);
            self.strategy_failed = 0;
        }
        if self.no_target >= self.thresholds.no_target_threshold {
            causes.push(RestartCause::NoTarget);
            self.no_target = 0;
            self.score_ratio = self.initial_ratio;
        }
        causes
    }

    pub fn reset(&mut self) {
        self.met_target = 0;
        self.strategy_failed = 0;
        self.no_target = 0;
        self.score_ratio = self.initial_ratio;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> StabilityTracker {
        StabilityTracker::new(&AgentConfig::default())
    }

    #[test]
    fn test_hit_raises_ratio_up_to_cap() {
        let mut t = tracker();
        t.record_hit();
        assert!((t.score_ratio() - 0.9 / 0.95).abs() < 1e-12);
        for _ in 0..10 {
            t.record_hit();
        }
        assert_eq!(t.score_ratio(), 0.99);
    }

    #[test]
    fn test_hit_clears_miss_streak() {
        let mut t = tracker();
        for _ in 0..10 {
            t.record_miss();
        }
        t.record_hit();
        assert_eq!(t.no_target(), 0);
        assert_eq!(t.met_target(), 1);
    }

    #[test]
    fn test_reject_scale_attenuates() {
        let mut t = tracker();
        assert_eq!(t.reject_scale(), 1.0);
        for _ in 0..30 {
            t.record_miss();
        }
        assert_eq!(t.reject_scale(), 1.0);
        for _ in 0..25 {
            t.record_miss();
        }
        assert!((t.reject_scale() - 0.5).abs() < 1e-12);
        for _ in 0..25 {
            t.record_miss();
        }
        assert_eq!(t.reject_scale(), 0.0);
    }

    #[test]
    fn test_thresholds_request_restart() {
        let mut t = tracker();
        for _ in 0..4 {
            t.record_hit();
        }
        assert!(t.check().is_empty());
        t.record_hit();
        assert_eq!(t.check(), vec![RestartCause::MetTarget]);
        assert_eq!(t.met_target(), 0);
        assert_eq!(t.score_ratio(), 0.9);

        for _ in 0..5 {
            t.record_strategy_failure();
        }
        assert_eq!(t.check(), vec![RestartCause::StrategyFailed]);

        for _ in 0..300 {
            t.record_miss();
        }
        assert_eq!(t.check(), vec![RestartCause::NoTarget]);
        assert!(t.check().is_empty());
    }
}
