//! Client-side error taxonomy and the exit-code mapping named in §4.3/§6.

use unity_bridge_proto::types::WireError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	#[error("could not reach broker at {addr}: {source}")]
	Connect {
		addr: String,
		#[source]
		source: std::io::Error,
	},
	#[error("connection to broker failed: {0}")]
	Io(#[from] std::io::Error),
	#[error("framing error: {0}")]
	Frame(#[from] unity_bridge_proto::error::FrameError),
	#[error("call timed out waiting for the broker's response")]
	SocketTimeout,
	#[error("retries exhausted after {attempts} attempt(s): {last}")]
	RetriesExhausted { attempts: u32, last: WireError },
	#[error("broker reported an error: {0}")]
	Broker(WireError),
}

impl ClientError {
	/// Maps this error to the CLI's observable exit-code contract (§4.3,
	/// §6): `2` retryable-but-exhausted, `3` broker unreachable. A
	/// successful transport whose command itself reported failure (exit
	/// `5`) is not represented here — that distinction is made by the
	/// caller from a successful [`unity_bridge_proto::types::BrokerToClientMessage`],
	/// not from this error type.
	#[must_use]
	pub fn exit_code(&self) -> i32 {
		match self {
			ClientError::Connect { .. } => 3,
			ClientError::Io(_) | ClientError::Frame(_) | ClientError::SocketTimeout => 3,
			ClientError::RetriesExhausted { .. } => 2,
			ClientError::Broker(err) => {
				if err.code.is_retryable() {
					2
				} else {
					5
				}
			}
		}
	}
}
