//! Session driver wiring the event server, the agent and a device.

pub mod config;
pub mod device;
pub mod limits;
pub mod logging;
pub mod session;

pub use config::SessionConfig;
pub use device::{Device, DeviceError, EventSource};
pub use limits::{ResourceChecker, SessionLimits, StopReason};
pub use session::{Session, SessionError, SessionReport, StepOutcome};
