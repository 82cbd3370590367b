use std::io;

/// Failures that can occur while framing or parsing a message on the wire.
///
/// These never cross the wire directly — callers map them to an
/// [`ErrorCode`](crate::types::ErrorCode) before replying to a peer, so the
/// set of internal variants here can grow without breaking wire
/// compatibility.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
	#[error("connection closed")]
	Eof,
	#[error("frame payload of {0} bytes exceeds the {1} byte limit")]
	TooLarge(u32, u32),
	#[error("frame header declared zero-length payload")]
	ZeroLength,
	#[error("malformed json: {0}")]
	Json(#[from] serde_json::Error),
	#[error("io error: {0}")]
	Io(#[from] io::Error),
}

impl FrameError {
	/// True when the underlying error indicates the peer is simply gone,
	/// as opposed to a protocol violation worth logging loudly.
	pub fn is_disconnect(&self) -> bool {
		match self {
			FrameError::Eof => true,
			FrameError::Io(e) => matches!(
				e.kind(),
				io::ErrorKind::UnexpectedEof
					| io::ErrorKind::BrokenPipe
					| io::ErrorKind::ConnectionReset
					| io::ErrorKind::ConnectionAborted
			),
			_ => false,
		}
	}
}

/// Errors from resolving or reading the status-file fallback channel.
#[derive(Debug, thiserror::Error)]
pub enum StatusFileError {
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("malformed status file: {0}")]
	Json(#[from] serde_json::Error),
}
