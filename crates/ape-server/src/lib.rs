//! Trace event server: receives target-method and idle events from the
//! instrumented app over a Unix socket and exposes them to the agent.

pub mod artifacts;
pub mod client;
pub mod descriptor;
pub mod server;
pub mod shared;
pub mod wire;

pub use client::TraceClient;
pub use descriptor::{
    load_target_methods, parse_target_methods, DescriptorError, TargetMethodDescriptor,
};
pub use server::{EventServer, ServerConfig, ServerError, ServerHandle};
pub use shared::{IdleOutcome, SharedProtocolState, CRASHED};
pub use wire::{Event, ProtocolError, TargetEventKind};
