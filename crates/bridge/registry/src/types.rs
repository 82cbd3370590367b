//! Registry-internal state representations.
//!
//! These are distinct from the wire types in `unity-bridge-proto`: the
//! registry tracks bookkeeping (generation tokens, pending awaiters,
//! queue contents) that never crosses the wire.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use unity_bridge_proto::types::{InstanceId, RequestId, WireError};

/// Per-instance lifecycle state, per §3 of the protocol contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
	Ready,
	Busy,
	Reloading,
	Disconnected,
}

/// Outcome delivered to whoever is awaiting a dispatched command.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
	Success(serde_json::Value),
	Failure(WireError),
}

/// A queued command awaiting dispatch once the instance returns to
/// `READY`, per §4.2 step 4.
pub struct QueuedCommand {
	pub request_id: RequestId,
	pub command: String,
	pub params: serde_json::Value,
	pub timeout_ms: u64,
	pub reply: oneshot::Sender<DispatchOutcome>,
}

/// An in-flight dispatched command awaiting its `COMMAND_RESULT`.
pub struct PendingCommand {
	pub reply: oneshot::Sender<DispatchOutcome>,
	pub dispatched_at: Instant,
}

/// One registered agent and everything the registry tracks about it.
pub struct Instance {
	pub instance_id: InstanceId,
	pub project_name: String,
	pub unity_version: String,
	pub capabilities: Vec<String>,
	pub status: InstanceStatus,
	pub is_default: bool,
	/// Outbound channel to the bound connection's writer task, or `None`
	/// while the entry is held open purely on grace-period hope.
	pub sink: Option<super::sink::AgentSink>,
	pub queue: VecDeque<QueuedCommand>,
	pub pending_by_id: HashMap<RequestId, PendingCommand>,
	/// Registered at creation time, bumped on every takeover and on every
	/// grace-period entry; a spawned expiry timer compares its captured
	/// generation against the live one before acting, so a stale timer
	/// from a since-superseded episode is a no-op. Mirrors the teacher's
	/// `lease_gen` pattern.
	pub generation: u64,
	/// When the instance was first registered, used to break default-
	/// promotion ties by recency (earliest registrant wins).
	pub registered_at: Instant,
	/// Bumped only when a new transport session is bound (fresh register
	/// or takeover), never by a `STATUS` transition. Lets a stale
	/// `ConnectionLost` from a connection that has since been superseded
	/// by a takeover be told apart from a live one, which `generation`
	/// can't do on its own since it is also bumped by reload bookkeeping.
	pub epoch: u64,
	/// Cancels the bound connection's read loop and heartbeat supervisor.
	/// Fired on takeover to force the superseded transport session closed.
	pub cancel: CancellationToken,
}

impl Instance {
	pub fn new(
		instance_id: InstanceId,
		project_name: String,
		unity_version: String,
		capabilities: Vec<String>,
		sink: super::sink::AgentSink,
		is_default: bool,
		cancel: CancellationToken,
	) -> Self {
		Self {
			instance_id,
			project_name,
			unity_version,
			capabilities,
			status: InstanceStatus::Ready,
			is_default,
			sink: Some(sink),
			queue: VecDeque::new(),
			pending_by_id: HashMap::new(),
			generation: 0,
			registered_at: Instant::now(),
			epoch: 0,
			cancel,
		}
	}
}
