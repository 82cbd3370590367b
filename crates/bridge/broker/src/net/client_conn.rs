//! Handles one client TCP connection: reads `ClientMessage` frames in a
//! loop (a short-lived CLI invocation may issue more than one request
//! over the same connection, per §4.3) and replies to each in turn. No
//! handshake: unlike the agent side, a client connection is anonymous and
//! stateless beyond the lifetime of the socket.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use unity_bridge_proto::error::FrameError;
use unity_bridge_proto::types::{BrokerToClientMessage, ClientMessage, RequestId};
use unity_bridge_registry::{ClientRequest, RegistryHandle};

use super::{SINK_CHANNEL_CAPACITY, drain_to_socket};
use crate::config::BrokerConfig;

/// Outcome of reading one client frame that didn't decode cleanly.
enum ReadOutcome {
	/// The body was malformed but carried an `id` we can reply to
	/// (§4.1: respond `ERROR{MALFORMED_JSON}` and keep the connection).
	Recoverable(RequestId),
	/// No usable `id` (or the connection is simply gone); the connection
	/// itself has to close.
	Fatal(FrameError),
}

/// Reads one client frame, translating a JSON decode failure into
/// [`ReadOutcome::Recoverable`] when the body's `id` field can still be
/// read out of the otherwise-malformed bytes.
async fn read_client_frame<R>(reader: &mut R) -> Result<ClientMessage, ReadOutcome>
where
	R: AsyncRead + Unpin,
{
	let body = unity_bridge_proto::read_frame_raw(reader)
		.await
		.map_err(ReadOutcome::Fatal)?;
	match serde_json::from_slice::<ClientMessage>(&body) {
		Ok(msg) => Ok(msg),
		Err(e) => match unity_bridge_proto::types::try_extract_client_id(&body) {
			Some(id) => Err(ReadOutcome::Recoverable(id)),
			None => Err(ReadOutcome::Fatal(FrameError::Json(e))),
		},
	}
}

/// Handles a client connection. `first` is the already-peeked first
/// frame; subsequent frames (if the invocation issues more than one
/// request over the same connection) are read in the loop below.
pub async fn handle<R, W>(
	reader: R,
	writer: W,
	first: ClientMessage,
	registry: RegistryHandle,
	config: BrokerConfig,
) where
	R: AsyncRead + Unpin + Send + 'static,
	W: AsyncWrite + Unpin + Send + 'static,
{
	let mut reader = reader;
	let (sink_tx, sink_rx) = mpsc::channel::<BrokerToClientMessage>(SINK_CHANNEL_CAPACITY);
	let writer_task = tokio::spawn(drain_to_socket(writer, sink_rx));

	let mut next = Some(Ok(first));
	loop {
		let msg = match next.take() {
			Some(outcome) => outcome,
			None => read_client_frame(&mut reader).await,
		};

		let response = match msg {
			Ok(msg) => dispatch(msg, &registry, &config).await,
			Err(ReadOutcome::Recoverable(id)) => BrokerToClientMessage::error(
				id,
				unity_bridge_proto::types::WireError::new(
					unity_bridge_proto::types::ErrorCode::MalformedJson,
					"request body failed to parse",
				),
			),
			Err(ReadOutcome::Fatal(e)) => {
				if !e.is_disconnect() {
					tracing::debug!(error = %e, "client connection read error");
				}
				break;
			}
		};

		if sink_tx.send(response).await.is_err() {
			break;
		}
	}

	drop(sink_tx);
	let _ = writer_task.await;
}

async fn dispatch(
	msg: ClientMessage,
	registry: &RegistryHandle,
	config: &BrokerConfig,
) -> BrokerToClientMessage {
	match msg {
		ClientMessage::Request {
			id,
			instance,
			command,
			params,
			timeout_ms,
		} => {
			let req = ClientRequest {
				request_id: id,
				instance,
				command,
				params,
				timeout_ms,
			};
			registry.request(req, config.command_timeout_ms).await
		}
		ClientMessage::ListInstances { id } => {
			let instances = registry.list_instances().await;
			BrokerToClientMessage::instances(id, instances)
		}
		ClientMessage::SetDefault { id, instance } => match registry.set_default(instance).await {
			Ok(()) => BrokerToClientMessage::response(id, serde_json::json!({"ok": true})),
			Err(err) => BrokerToClientMessage::error(id, err),
		},
	}
}
