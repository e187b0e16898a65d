//! # c64-server
//!
//! Terminal-facing half of the gateway:
//!
//! - [`gate`]: TCP listener with IP allow-list admission
//! - [`registry`]: live terminal sessions and their outbound queues
//! - [`scheduler`]: one byte per session per 100 ms, plus idle notices
//! - [`event_bridge`]: relay events rendered and fanned out to sessions
//! - [`api`]: admin/status HTTP endpoints
//! - [`server`]: wiring for all of the above

#![deny(unsafe_code)]

pub mod api;
pub mod error;
pub mod event_bridge;
pub mod gate;
pub mod link;
pub mod registry;
pub mod scheduler;
pub mod server;

#[cfg(test)]
mod testing;

pub use error::ServerError;
pub use gate::{normalize_ip, ConnectionGate, GateConfig};
pub use link::{SocketLink, TerminalLink};
pub use registry::{SessionInfo, SessionRegistry, SessionSummary};
pub use scheduler::TransmissionScheduler;
pub use server::{start, ServerConfig, ServerHandle};
