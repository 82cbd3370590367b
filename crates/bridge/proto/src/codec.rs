//! Length-prefixed JSON framing.
//!
//! A frame is a 4-byte big-endian unsigned length, followed by exactly
//! that many bytes of UTF-8 JSON. The maximum payload size is
//! [`MAX_FRAME_BYTES`] (16 MiB); larger declared lengths are rejected
//! before the body is read so a hostile or buggy peer cannot force an
//! unbounded allocation.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

/// Maximum frame payload size: 16 MiB.
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Reads one frame from `reader` and deserializes it as `T`.
///
/// Returns [`FrameError::Eof`] if the peer closed the connection before a
/// full header was read (the ordinary, non-exceptional end of a
/// connection's life), and other [`FrameError`] variants for protocol
/// violations.
/// Reads one frame's raw JSON body, without decoding it. Exposed so a
/// caller can peek a frame's shape (e.g. its `type` tag) before committing
/// to a concrete message type — the broker's accept loop uses this to
/// tell an agent's `REGISTER` apart from a client's first request on the
/// same listening port.
pub async fn read_frame_raw<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
	R: AsyncRead + Unpin,
{
	let mut header = [0u8; 4];
	match reader.read_exact(&mut header).await {
		Ok(_) => {}
		Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Eof),
		Err(e) => return Err(FrameError::Io(e)),
	}
	let len = u32::from_be_bytes(header);
	if len == 0 {
		return Err(FrameError::ZeroLength);
	}
	if len > MAX_FRAME_BYTES {
		return Err(FrameError::TooLarge(len, MAX_FRAME_BYTES));
	}
	let mut body = vec![0u8; len as usize];
	reader.read_exact(&mut body).await.map_err(|e| {
		if e.kind() == std::io::ErrorKind::UnexpectedEof {
			FrameError::Eof
		} else {
			FrameError::Io(e)
		}
	})?;
	Ok(body)
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, FrameError>
where
	R: AsyncRead + Unpin,
	T: DeserializeOwned,
{
	let body = read_frame_raw(reader).await?;
	let value = serde_json::from_slice(&body)?;
	Ok(value)
}

/// Serializes `value` as JSON and writes it as one frame to `writer`.
///
/// Callers on a shared connection must hold that connection's send mutex
/// across this call; the codec itself does no serialization of concurrent
/// writers.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), FrameError>
where
	W: AsyncWrite + Unpin,
	T: Serialize,
{
	let body = serde_json::to_vec(value)?;
	if body.len() > MAX_FRAME_BYTES as usize {
		return Err(FrameError::TooLarge(body.len() as u32, MAX_FRAME_BYTES));
	}
	let len = body.len() as u32;
	writer.write_all(&len.to_be_bytes()).await?;
	writer.write_all(&body).await?;
	writer.flush().await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::Deserialize;

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Ping {
		n: u32,
	}

	#[tokio::test]
	async fn round_trips_a_frame() {
		let mut buf = Vec::new();
		write_frame(&mut buf, &Ping { n: 7 }).await.unwrap();
		// 4-byte big-endian header + body.
		let declared = u32::from_be_bytes(buf[0..4].try_into().unwrap());
		assert_eq!(declared as usize, buf.len() - 4);

		let mut cursor = std::io::Cursor::new(buf);
		let got: Ping = read_frame(&mut cursor).await.unwrap();
		assert_eq!(got, Ping { n: 7 });
	}

	#[tokio::test]
	async fn rejects_zero_length_frame() {
		let mut cursor = std::io::Cursor::new(0u32.to_be_bytes().to_vec());
		let err = read_frame::<_, Ping>(&mut cursor).await.unwrap_err();
		assert!(matches!(err, FrameError::ZeroLength));
	}

	#[tokio::test]
	async fn rejects_oversize_frame() {
		let mut cursor = std::io::Cursor::new((MAX_FRAME_BYTES + 1).to_be_bytes().to_vec());
		let err = read_frame::<_, Ping>(&mut cursor).await.unwrap_err();
		assert!(matches!(err, FrameError::TooLarge(_, _)));
	}

	#[tokio::test]
	async fn accepts_max_size_header() {
		// Only the header is exercised here; reading a real 16 MiB body is
		// covered by integration tests against a live connection.
		let mut buf = MAX_FRAME_BYTES.to_be_bytes().to_vec();
		buf.extend(std::iter::repeat(b'x').take(2));
		let mut cursor = std::io::Cursor::new(buf);
		// Declares exactly MAX_FRAME_BYTES but supplies only 2 bytes, so
		// the read_exact on the body should fail with Eof, not TooLarge:
		// this asserts the boundary is accepted at the header-check stage.
		let err = read_frame::<_, Ping>(&mut cursor).await.unwrap_err();
		assert!(matches!(err, FrameError::Eof));
	}

	#[tokio::test]
	async fn surfaces_eof_on_truncated_header() {
		let mut cursor = std::io::Cursor::new(vec![0u8; 2]);
		let err = read_frame::<_, Ping>(&mut cursor).await.unwrap_err();
		assert!(matches!(err, FrameError::Eof));
	}

	#[tokio::test]
	async fn malformed_json_surfaces_json_error() {
		let body = b"not json".to_vec();
		let mut buf = (body.len() as u32).to_be_bytes().to_vec();
		buf.extend(body);
		let mut cursor = std::io::Cursor::new(buf);
		let err = read_frame::<_, Ping>(&mut cursor).await.unwrap_err();
		assert!(matches!(err, FrameError::Json(_)));
	}
}
