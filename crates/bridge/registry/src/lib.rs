//! The instance registry: the broker's routing core.
//!
//! Owns the authoritative state machine for every registered editor
//! instance (§3 of the protocol contract) behind a single actor task, so
//! registration, dispatch, status transitions, and grace-period eviction
//! never race each other. Transport-agnostic: nothing here knows about
//! TCP, framing, or heartbeats — those live in the broker crate and talk
//! to this one only through [`RegistryHandle`].

pub mod cache;
pub mod commands;
pub mod config;
pub mod handle;
pub mod service;
pub mod sink;
pub mod statusfile;
pub mod types;

#[cfg(test)]
mod tests;

pub use commands::{DispatchAttempt, IdempotencyLookup, RegisterReply, RegisteredOk, RegistryCmd};
pub use config::RegistryConfig;
pub use handle::{ClientRequest, RegistryHandle};
pub use service::RegistryService;
pub use sink::AgentSink;
pub use types::{DispatchOutcome, Instance, InstanceStatus, PendingCommand, QueuedCommand};
