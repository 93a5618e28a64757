//! Session limits and stop reasons.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    /// Maximum agent decisions before the session stops.
    pub max_steps: u64,
    /// Maximum wall-clock seconds before the session stops.
    pub max_wall_secs: u64,
    /// How long to wait for an idle heartbeat after each action.
    pub idle_timeout_millis: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            max_wall_secs: 3600,
            idle_timeout_millis: 5_000,
        }
    }
}

impl SessionLimits {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_millis)
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    StepLimit,
    WallTime,
    /// No stage could produce an action.
    Exhausted,
}

pub struct ResourceChecker {
    limits: SessionLimits,
    start_time: Instant,
}

impl ResourceChecker {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
        }
    }

    /// The first exceeded limit, if any.
    pub fn check(&self, steps: u64) -> Option<StopReason> {
        if self.wall_time_exceeded() {
            return Some(StopReason::WallTime);
        }
        if steps >= self.limits.max_steps {
            return Some(StopReason::StepLimit);
        }
        None
    }

    pub fn wall_time_exceeded(&self) -> bool {
        self.start_time.elapsed().as_secs() >= self.limits.max_wall_secs
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = SessionLimits::default();
        assert_eq!(limits.max_steps, 10_000);
        assert_eq!(limits.idle_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_step_limit() {
        let checker = ResourceChecker::new(SessionLimits {
            max_steps: 100,
            ..Default::default()
        });
        assert!(checker.check(99).is_none());
        assert_eq!(checker.check(100), Some(StopReason::StepLimit));
    }

    #[test]
    fn test_zero_wall_time_stops_immediately() {
        let checker = ResourceChecker::new(SessionLimits {
            max_wall_secs: 0,
            ..Default::default()
        });
        assert_eq!(checker.check(0), Some(StopReason::WallTime));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let limits: SessionLimits = serde_json::from_str(r#"{"max_steps": 7}"#).unwrap();
        assert_eq!(limits.max_steps, 7);
        assert_eq!(limits.max_wall_secs, 3600);
    }
}
