//! Wire types and framing shared by the broker, the agent runtime, and the
//! client engine.
//!
//! This crate has no knowledge of sockets, actors, or retry policy — it is
//! the one vocabulary both ends of every connection agree on.

pub mod backoff;
pub mod codec;
pub mod error;
pub mod paths;
pub mod types;

pub use backoff::{BackoffCursor, BackoffSchedule};
pub use codec::{MAX_FRAME_BYTES, read_frame, read_frame_raw, write_frame};
pub use error::{FrameError, StatusFileError};
pub use types::{
	AgentMessage, AgentStatus, BrokerToAgentMessage, BrokerToClientMessage, ClientMessage,
	ErrorCode, InstanceId, InstanceSummary, InstancesData, RequestId, StatusFileRecord,
	StatusFileStatus, WireError, PROTOCOL_VERSION,
};
