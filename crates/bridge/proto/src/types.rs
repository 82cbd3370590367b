//! Wire message vocabulary for the relay protocol.
//!
//! Every frame is a JSON object carrying a `type` tag. There are four
//! conversations, each a distinct enum below: an agent connection speaks
//! [`AgentMessage`] and receives [`BrokerToAgentMessage`]; a client
//! connection speaks [`ClientMessage`] and receives [`BrokerToClientMessage`].
//! Messages are intentionally flat (no shared envelope struct) so each
//! variant's `Serialize`/`Deserialize` impl matches the wire shape exactly.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a registered editor instance: the absolute project path.
///
/// Equality is plain string comparison; this type does not normalize or
/// resolve symlinks on the caller's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for InstanceId {
	fn from(s: String) -> Self {
		Self(s)
	}
}

impl From<&str> for InstanceId {
	fn from(s: &str) -> Self {
		Self(s.to_string())
	}
}

/// A client- or broker-assigned correlation id for one in-flight command.
///
/// Client-originated ids follow the `{client_id}:{uuid}` convention from
/// the protocol contract; this type does not enforce that shape, since
/// broker-internal operations may mint ids of their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for RequestId {
	fn from(s: String) -> Self {
		Self(s)
	}
}

/// The protocol version this implementation speaks. `REGISTER` frames that
/// name a different version are rejected with `PROTOCOL_VERSION_MISMATCH`.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Errors surfaced on the wire, shared by both the agent and client halves
/// of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	InstanceNotFound,
	InstanceReloading,
	InstanceBusy,
	InstanceDisconnected,
	CommandNotFound,
	InvalidParams,
	Timeout,
	InternalError,
	ProtocolError,
	MalformedJson,
	PayloadTooLarge,
	ProtocolVersionMismatch,
	CapabilityNotSupported,
	QueueFull,
}

impl ErrorCode {
	/// Whether a client should retry a request that failed with this code.
	///
	/// Matches the set named in the protocol contract: reloading, busy,
	/// timeout, and disconnected are all conditions a short retry window
	/// can plausibly bridge; everything else is either permanent or a
	/// client-side usage mistake.
	pub fn is_retryable(self) -> bool {
		matches!(
			self,
			ErrorCode::InstanceReloading
				| ErrorCode::InstanceBusy
				| ErrorCode::Timeout
				| ErrorCode::InstanceDisconnected
		)
	}
}

/// A structured error payload attached to `ERROR` and `COMMAND_RESULT`
/// failure frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
	pub code: ErrorCode,
	pub message: String,
}

impl WireError {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
		}
	}
}

impl fmt::Display for WireError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}: {}", self.code, self.message)
	}
}

/// Agent-reported instance status, as sent in `STATUS` and mirrored in the
/// status-file fallback channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
	Ready,
	Busy,
	Reloading,
	Error,
}

// ---------------------------------------------------------------------
// Agent -> Broker
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMessage {
	Register {
		protocol_version: String,
		instance_id: InstanceId,
		project_name: String,
		unity_version: String,
		#[serde(default)]
		capabilities: Vec<String>,
	},
	Status {
		instance_id: InstanceId,
		status: AgentStatus,
		#[serde(skip_serializing_if = "Option::is_none")]
		detail: Option<String>,
	},
	CommandResult {
		id: RequestId,
		success: bool,
		#[serde(skip_serializing_if = "Option::is_none")]
		data: Option<serde_json::Value>,
		#[serde(skip_serializing_if = "Option::is_none")]
		error: Option<WireError>,
	},
	Pong {
		ts: i64,
		echo_ts: i64,
	},
}

// ---------------------------------------------------------------------
// Broker -> Agent
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrokerToAgentMessage {
	Registered {
		success: bool,
		#[serde(skip_serializing_if = "Option::is_none")]
		heartbeat_interval_ms: Option<u64>,
		#[serde(skip_serializing_if = "Option::is_none")]
		error: Option<WireError>,
	},
	Ping {
		ts: i64,
	},
	Command {
		id: RequestId,
		command: String,
		#[serde(default)]
		params: serde_json::Value,
		#[serde(skip_serializing_if = "Option::is_none")]
		timeout_ms: Option<u64>,
	},
}

// ---------------------------------------------------------------------
// Client -> Broker
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
	Request {
		id: RequestId,
		#[serde(skip_serializing_if = "Option::is_none")]
		instance: Option<InstanceId>,
		command: String,
		#[serde(default)]
		params: serde_json::Value,
		#[serde(skip_serializing_if = "Option::is_none")]
		timeout_ms: Option<u64>,
	},
	ListInstances {
		id: RequestId,
	},
	SetDefault {
		id: RequestId,
		instance: InstanceId,
	},
}

impl ClientMessage {
	pub fn id(&self) -> &RequestId {
		match self {
			ClientMessage::Request { id, .. } => id,
			ClientMessage::ListInstances { id } => id,
			ClientMessage::SetDefault { id, .. } => id,
		}
	}
}

/// Best-effort recovery of a client frame's `id` field from a body that
/// failed to parse as a well-formed [`ClientMessage`] — e.g. an unknown
/// `command` value, or extra/missing fields the enum's tagged
/// representation rejects, while the object itself is valid JSON. Per
/// §4.1, a frame in this state gets an `ERROR{code: MALFORMED_JSON}` back
/// instead of a silent connection close, so the caller can tell a usage
/// mistake apart from a dead broker.
///
/// Returns `None` when the body isn't even a JSON object, or has no `id`
/// field of the expected shape — in those cases nothing can be
/// correlated back to the caller and the connection is the only option.
pub fn try_extract_client_id(body: &[u8]) -> Option<RequestId> {
	#[derive(Deserialize)]
	struct IdOnly {
		id: String,
	}
	serde_json::from_slice::<IdOnly>(body)
		.ok()
		.map(|v| RequestId(v.id))
}

// ---------------------------------------------------------------------
// Broker -> Client
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSummary {
	pub instance_id: InstanceId,
	pub project_name: String,
	pub unity_version: String,
	pub status: AgentStatus,
	pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrokerToClientMessage {
	Response {
		id: RequestId,
		success: bool,
		data: serde_json::Value,
	},
	Error {
		id: RequestId,
		success: bool,
		error: WireError,
	},
	Instances {
		id: RequestId,
		success: bool,
		data: InstancesData,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancesData {
	pub instances: Vec<InstanceSummary>,
}

impl BrokerToClientMessage {
	pub fn response(id: RequestId, data: serde_json::Value) -> Self {
		BrokerToClientMessage::Response {
			id,
			success: true,
			data,
		}
	}

	pub fn error(id: RequestId, error: WireError) -> Self {
		BrokerToClientMessage::Error {
			id,
			success: false,
			error,
		}
	}

	pub fn instances(id: RequestId, instances: Vec<InstanceSummary>) -> Self {
		BrokerToClientMessage::Instances {
			id,
			success: true,
			data: InstancesData { instances },
		}
	}

	pub fn id(&self) -> &RequestId {
		match self {
			BrokerToClientMessage::Response { id, .. } => id,
			BrokerToClientMessage::Error { id, .. } => id,
			BrokerToClientMessage::Instances { id, .. } => id,
		}
	}
}

/// The agent-side status-file record: a cross-process fallback channel for
/// reload notification when the transport connection cannot deliver one in
/// time. See [`crate::paths`] for filename derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusFileRecord {
	pub instance_id: InstanceId,
	pub project_name: String,
	pub unity_version: String,
	pub status: StatusFileStatus,
	pub relay_host: String,
	pub relay_port: u16,
	pub timestamp: String,
	pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFileStatus {
	Ready,
	Reloading,
}
