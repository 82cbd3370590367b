//! The `RegistryCmd` vocabulary: every operation the registry actor can
//! perform, paired with an `oneshot::Sender` reply channel where the
//! caller needs an answer, following the teacher's `SessionCmd`/
//! `RoutingCmd` handle-over-mpsc idiom.

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use unity_bridge_proto::types::{AgentStatus, InstanceId, InstanceSummary, RequestId, WireError};

use crate::sink::AgentSink;
use crate::types::DispatchOutcome;

/// Reply to a `REGISTER` attempt.
pub type RegisterReply = oneshot::Sender<Result<RegisteredOk, WireError>>;

#[derive(Debug, Clone, Copy)]
pub struct RegisteredOk {
	pub heartbeat_interval_ms: u64,
	/// True if a previous binding for this `instance_id` was forcibly
	/// closed to admit this one (§4.2 step 2, "takeover").
	pub took_over: bool,
	/// This connection's bound epoch; hand back to the registry on
	/// disconnect (`RegistryHandle::connection_lost`) so a takeover that
	/// has since superseded this session is not mistaken for its own
	/// loss.
	pub epoch: u64,
}

/// What a dispatch attempt resolved to. The caller awaits `receiver` (when
/// present) for the eventual `COMMAND_RESULT`/timeout outcome.
pub enum DispatchAttempt {
	/// Dispatched immediately or admitted to the queue; await the paired
	/// receiver for the eventual outcome.
	Accepted(oneshot::Receiver<DispatchOutcome>),
	NotFound,
	Busy,
	QueueFull,
	Reloading,
	CapabilityNotSupported,
}

/// What an idempotency cache lookup found. Mirrors `cache::Lookup`; kept
/// distinct since it crosses the actor boundary over a oneshot reply.
pub enum IdempotencyLookup {
	/// No prior record; caller should dispatch and then call
	/// `CompleteIdempotency`/`AbandonIdempotency` when done.
	Fresh,
	/// Another caller is already executing this id, and this caller is
	/// already registered as a waiter for it (registration happened inside
	/// the `lookup` call itself, before this reply was ever sent); await
	/// the receiver for the eventual outcome.
	Join(oneshot::Receiver<crate::cache::JoinOutcome>),
	/// A cached successful response.
	Cached(unity_bridge_proto::types::BrokerToClientMessage),
}

impl From<crate::cache::Lookup> for IdempotencyLookup {
	fn from(l: crate::cache::Lookup) -> Self {
		match l {
			crate::cache::Lookup::Fresh => IdempotencyLookup::Fresh,
			crate::cache::Lookup::Join(rx) => IdempotencyLookup::Join(rx),
			crate::cache::Lookup::Cached(r) => IdempotencyLookup::Cached(r),
		}
	}
}

#[derive(Debug)]
pub enum RegistryCmd {
	Register {
		protocol_version: String,
		instance_id: InstanceId,
		project_name: String,
		unity_version: String,
		capabilities: Vec<String>,
		sink: AgentSink,
		/// Cancelled by a later takeover to force this connection's read
		/// loop and heartbeat supervisor to shut down.
		cancel: CancellationToken,
		reply: RegisterReply,
	},
	/// Agent-reported status, from a `STATUS` frame.
	StatusUpdate {
		instance_id: InstanceId,
		status: AgentStatus,
	},
	/// Result of a dispatched command, from a `COMMAND_RESULT` frame.
	CommandResult {
		instance_id: InstanceId,
		id: RequestId,
		outcome: DispatchOutcome,
	},
	/// The bound connection for this instance was lost (heartbeat timeout
	/// or socket error); enter grace-period bookkeeping. `epoch` is the
	/// connection's own bound epoch, checked against the live instance so
	/// a connection superseded by a takeover can't report its own loss
	/// as the new connection's.
	ConnectionLost { instance_id: InstanceId, epoch: u64 },
	/// Look up (non-blocking) the current in-memory status, used by the
	/// heartbeat supervisor to decide which timeout budget applies.
	PeekStatus {
		instance_id: InstanceId,
		reply: oneshot::Sender<Option<crate::types::InstanceStatus>>,
	},
	/// Attempt to dispatch (or enqueue) a command against an instance.
	TryDispatch {
		instance_id: Option<InstanceId>,
		request_id: RequestId,
		command: String,
		params: serde_json::Value,
		timeout_ms: u64,
		reply: oneshot::Sender<DispatchAttempt>,
	},
	/// The caller gave up waiting on a pending or queued command (timeout
	/// elapsed); drop the bookkeeping so a late result is discarded.
	DropPending {
		instance_id: InstanceId,
		id: RequestId,
	},
	ListInstances {
		reply: oneshot::Sender<Vec<InstanceSummary>>,
	},
	SetDefault {
		instance_id: InstanceId,
		reply: oneshot::Sender<Result<(), WireError>>,
	},
	LookupIdempotency {
		id: RequestId,
		reply: oneshot::Sender<IdempotencyLookup>,
	},
	CompleteIdempotency {
		id: RequestId,
		response: unity_bridge_proto::types::BrokerToClientMessage,
	},
	AbandonIdempotency {
		id: RequestId,
	},
	/// A generation-scoped grace-period timer fired; evict the instance
	/// if its generation hasn't moved on since.
	GraceExpired { instance_id: InstanceId, generation: u64 },
	/// A generation-scoped reload timer fired (§4.2: `RELOADING` ->
	/// `DISCONNECTED` after `reload_timeout_ms`).
	ReloadTimeout { instance_id: InstanceId, generation: u64 },
	/// The registry's own per-dispatch deadline elapsed. This, not the
	/// client-side wait in `RegistryHandle::request`, is what actually
	/// frees the `pending_by_id` slot and returns the instance to `READY`
	/// when a command never gets a `COMMAND_RESULT` — the client-side
	/// timeout is a redundant safety net on top of it.
	DispatchTimeout {
		instance_id: InstanceId,
		request_id: RequestId,
	},
	/// Broker shutdown: resolve every waiter with a shutdown error and
	/// stop the actor loop.
	Shutdown,
}
