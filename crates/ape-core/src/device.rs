//! Collaborator boundaries: the device under test and the trace event
//! source.

use std::time::Duration;

use ape_agent::Observation;
use ape_model::ResolvedAction;
use ape_server::{IdleOutcome, ServerHandle};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("device disconnected: {0}")]
    Disconnected(String),

    #[error("{0}")]
    Other(String),
}

/// The app under exploration.
///
/// Implementations honour [`ResolvedAction::throttle_millis`] themselves.
pub trait Device {
    /// Current screen and activity stack.
    fn observe(&mut self) -> Result<Observation, DeviceError>;

    fn dispatch(&mut self, action: &ResolvedAction) -> Result<(), DeviceError>;

    /// Kill and relaunch the app.
    fn restart(&mut self) -> Result<(), DeviceError>;
}

/// Where target hits and idle heartbeats come from.
pub trait EventSource {
    /// Whether a target method ran strictly after `since`.
    fn met_target_methods(&self, since: i64) -> bool;

    fn wait_for_idle(&self, since: i64, timeout: Duration) -> IdleOutcome;
}

impl EventSource for ServerHandle {
    fn met_target_methods(&self, since: i64) -> bool {
        ServerHandle::met_target_methods(self, since)
    }

    fn wait_for_idle(&self, since: i64, timeout: Duration) -> IdleOutcome {
        ServerHandle::wait_for_idle(self, since, timeout)
    }
}
