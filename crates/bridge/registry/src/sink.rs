//! Outbound channel to a bound agent connection.
//!
//! Per §4.1/§5, a connection's sends must be serialized so concurrent
//! producers (dispatched commands, heartbeat pings, registration replies)
//! never interleave a header with another frame's body. Rather than a raw
//! `Mutex` around the socket, the connection owns a single writer task
//! that drains this channel and performs the actual `write_frame` calls —
//! the channel's single-consumer property *is* the mutual exclusion,
//! following the teacher's `SessionSink`/`SessionService` pattern where a
//! session's outbound sink is itself an mpsc sender into its writer task.
//!
//! This crate only ever pushes onto the channel; it never touches a
//! socket directly, keeping the registry transport-agnostic.

use tokio::sync::mpsc;
use unity_bridge_proto::types::BrokerToAgentMessage;

/// Outbound sink for one bound agent connection.
pub type AgentSink = mpsc::Sender<BrokerToAgentMessage>;
