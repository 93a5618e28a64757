//! The exploration loop: observe, decide, dispatch, wait for idle.

use ape_agent::{AgentConfig, AgentError, AgentStats, StatefulAgent};
use ape_server::IdleOutcome;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::device::{Device, DeviceError, EventSource};
use crate::limits::{ResourceChecker, SessionLimits, StopReason};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// What a single step ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continued,
    /// The app was relaunched after a crash, an idle timeout, or a
    /// stability request from the agent.
    Restarted,
    Exhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub stop_reason: StopReason,
    pub steps: u64,
    pub restarts: u64,
    pub elapsed_secs: f64,
    pub agent: AgentStats,
}

pub struct Session<D, E> {
    agent: StatefulAgent,
    device: D,
    events: E,
    limits: SessionLimits,
    target_trigger_steps: u64,
    triggered: bool,
    last_idle: i64,
    pending_hit: bool,
    steps: u64,
    restarts: u64,
}

impl<D: Device, E: EventSource> Session<D, E> {
    pub fn new(config: AgentConfig, limits: SessionLimits, device: D, events: E) -> Self {
        Self {
            target_trigger_steps: config.target_trigger_steps,
            agent: StatefulAgent::new(config),
            device,
            events,
            limits,
            triggered: false,
            last_idle: 0,
            pending_hit: false,
            steps: 0,
            restarts: 0,
        }
    }

    /// One decision cycle.
    pub fn step(&mut self) -> Result<StepOutcome, SessionError> {
        let observation = self.device.observe()?;
        let hit = std::mem::take(&mut self.pending_hit);
        self.agent.observe(observation, hit)?;

        if !self.triggered && self.agent.decisions() >= self.target_trigger_steps {
            info!(decisions = self.agent.decisions(), "target trigger reached");
            self.agent.alert_target_trigger();
            self.triggered = true;
        }

        let action = match self.agent.select_next_action() {
            Ok(action) => action,
            Err(AgentError::NoAvailableAction(state)) => {
                warn!(state, "no action available");
                return Ok(StepOutcome::Exhausted);
            }
            Err(e) => return Err(e.into()),
        };
        self.steps += 1;
        debug!(step = self.steps, action = action.action, kind = %action.kind, "dispatch");
        self.device.dispatch(&action)?;

        let since = self.last_idle;
        match self.events.wait_for_idle(since, self.limits.idle_timeout()) {
            IdleOutcome::Idle(timestamp) => {
                self.pending_hit = self.events.met_target_methods(since);
                self.last_idle = timestamp;
            }
            outcome => {
                warn!(?outcome, "target did not settle, restarting");
                self.restart()?;
                return Ok(StepOutcome::Restarted);
            }
        }

        if self.agent.take_restart_request() {
            info!("agent requested a restart");
            self.restart()?;
            return Ok(StepOutcome::Restarted);
        }
        Ok(StepOutcome::Continued)
    }

    fn restart(&mut self) -> Result<(), DeviceError> {
        self.device.restart()?;
        self.agent.on_process_restart();
        self.pending_hit = false;
        self.last_idle = 0;
        self.restarts += 1;
        Ok(())
    }

    /// Step until a limit is reached or the agent runs out of actions.
    pub fn run(&mut self) -> Result<SessionReport, SessionError> {
        let checker = ResourceChecker::new(self.limits.clone());
        let stop_reason = loop {
            if let Some(reason) = checker.check(self.steps) {
                break reason;
            }
            if self.step()? == StepOutcome::Exhausted {
                break StopReason::Exhausted;
            }
        };
        self.agent.tear_down();
        info!(?stop_reason, steps = self.steps, restarts = self.restarts, "session finished");
        Ok(SessionReport {
            stop_reason,
            steps: self.steps,
            restarts: self.restarts,
            elapsed_secs: checker.elapsed_secs(),
            agent: self.agent.stats(),
        })
    }

    pub fn agent(&self) -> &StatefulAgent {
        &self.agent
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }
}
