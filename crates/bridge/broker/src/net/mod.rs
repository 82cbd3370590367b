//! Per-connection protocol handling: one `tokio::spawn`'d task per
//! accepted socket, following the teacher's broker accept-loop shape
//! (`ipc::serve`/`ipc::handle_connection`), adapted from a Unix-socket
//! `MainLoop` dispatcher to a bespoke read/write-task split suited to this
//! protocol's two distinct peer roles (agent vs. client).

pub mod agent_conn;
pub mod client_conn;
pub mod heartbeat;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use unity_bridge_proto::types::{AgentMessage, ClientMessage};
use unity_bridge_registry::RegistryHandle;

use crate::config::BrokerConfig;

/// Bound on an outbound connection's write-task queue depth. Generous
/// relative to realistic in-flight command counts per connection; a full
/// queue indicates a stalled peer, not ordinary backpressure.
pub const SINK_CHANNEL_CAPACITY: usize = 64;

/// Peeks a connection's first frame to tell an agent's `REGISTER` apart
/// from a client's first request, then hands the split reader/writer off
/// to the matching per-role handler. Both peer roles share one listening
/// port, so this dispatch has to happen before either handler starts its
/// own read loop.
pub async fn accept<R, W>(reader: R, writer: W, registry: RegistryHandle, config: BrokerConfig)
where
	R: AsyncRead + Unpin + Send + 'static,
	W: AsyncWrite + Unpin + Send + 'static,
{
	let mut reader = BufReader::new(reader);
	let body = match unity_bridge_proto::read_frame_raw(&mut reader).await {
		Ok(body) => body,
		Err(e) => {
			if !e.is_disconnect() {
				tracing::debug!(error = %e, "connection closed before a usable first frame");
			}
			return;
		}
	};

	if is_register_frame(&body) {
		match serde_json::from_slice::<AgentMessage>(&body) {
			Ok(first) => agent_conn::handle(reader, writer, first, registry, config).await,
			Err(e) => tracing::warn!(error = %e, "malformed REGISTER frame, closing connection"),
		}
	} else {
		match serde_json::from_slice::<ClientMessage>(&body) {
			Ok(first) => client_conn::handle(reader, writer, first, registry, config).await,
			Err(e) => tracing::warn!(error = %e, "malformed first client frame, closing connection"),
		}
	}
}

fn is_register_frame(body: &[u8]) -> bool {
	#[derive(serde::Deserialize)]
	struct Tag<'a> {
		#[serde(rename = "type")]
		ty: &'a str,
	}
	matches!(serde_json::from_slice::<Tag>(body), Ok(Tag { ty: "REGISTER" }))
}

/// Drains `rx` to `writer`, one frame per message, until the channel
/// closes or a write fails. This *is* the per-connection send mutex: since
/// `rx` has exactly one consumer, no two frames can ever interleave on the
/// wire, matching the teacher's `SessionSink`-over-mpsc idiom without a
/// literal `Mutex` around the socket.
pub async fn drain_to_socket<W, T>(mut writer: W, mut rx: tokio::sync::mpsc::Receiver<T>)
where
	W: tokio::io::AsyncWrite + Unpin,
	T: serde::Serialize + Send + 'static,
{
	while let Some(msg) = rx.recv().await {
		if let Err(e) = unity_bridge_proto::write_frame(&mut writer, &msg).await {
			tracing::debug!(error = %e, "connection write task ending");
			break;
		}
	}
}
