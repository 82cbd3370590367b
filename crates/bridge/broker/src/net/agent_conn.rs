//! Handles one agent (editor-side) TCP connection: `REGISTER` handshake,
//! then a read loop dispatching `STATUS`/`COMMAND_RESULT`/`PONG` frames to
//! the registry, alongside a heartbeat supervisor and a dedicated writer
//! task. Grounded on the teacher's `ipc::handle_connection` connection
//! shell, rewritten against this protocol's bespoke framing instead of
//! the teacher's generic `xeno_rpc::MainLoop`.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use unity_bridge_proto::types::{
	AgentMessage, BrokerToAgentMessage, ErrorCode, InstanceId, WireError,
};
use unity_bridge_registry::{DispatchOutcome, RegistryHandle};

use super::{SINK_CHANNEL_CAPACITY, drain_to_socket, heartbeat};
use crate::config::BrokerConfig;

/// Handles an agent connection whose first frame (already known to be a
/// `REGISTER`) was peeked by the accept loop to decide routing.
pub async fn handle<R, W>(
	reader: R,
	writer: W,
	first: AgentMessage,
	registry: RegistryHandle,
	config: BrokerConfig,
) where
	R: AsyncRead + Unpin + Send + 'static,
	W: AsyncWrite + Unpin + Send + 'static,
{
	let mut reader = reader;

	let AgentMessage::Register {
		protocol_version,
		instance_id,
		project_name,
		unity_version,
		capabilities,
	} = first
	else {
		unreachable!("accept loop only routes here for a REGISTER frame");
	};

	let (sink_tx, sink_rx) = mpsc::channel::<BrokerToAgentMessage>(SINK_CHANNEL_CAPACITY);
	let writer_task = tokio::spawn(drain_to_socket(writer, sink_rx));

	// Created before registering so a later takeover can cancel this
	// exact connection via the registry's stored copy.
	let cancel = CancellationToken::new();

	let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
	registry
		.register(
			protocol_version,
			instance_id.clone(),
			project_name,
			unity_version,
			capabilities,
			sink_tx.clone(),
			cancel.clone(),
			reply_tx,
		)
		.await;

	let outcome = reply_rx.await;
	let registered = match outcome {
		Ok(Ok(ok)) => {
			let _ = sink_tx
				.send(BrokerToAgentMessage::Registered {
					success: true,
					heartbeat_interval_ms: Some(ok.heartbeat_interval_ms),
					error: None,
				})
				.await;
			info!(%instance_id, took_over = ok.took_over, "agent registered");
			Some(ok)
		}
		Ok(Err(err)) => {
			let _ = sink_tx
				.send(BrokerToAgentMessage::Registered {
					success: false,
					heartbeat_interval_ms: None,
					error: Some(err),
				})
				.await;
			None
		}
		Err(_) => None,
	};

	let Some(registered) = registered else {
		drop(sink_tx);
		let _ = writer_task.await;
		return;
	};

	let (pong_tx, pong_rx) = watch::channel(0i64);
	let heartbeat_task = tokio::spawn(heartbeat::supervise(
		instance_id.clone(),
		sink_tx.clone(),
		pong_rx,
		registry.clone(),
		registered.epoch,
		registered.heartbeat_interval_ms,
		config.heartbeat_timeout_ms,
		config.reload_timeout_ms,
		cancel.clone(),
	));

	read_loop(&mut reader, &instance_id, &registry, &pong_tx, &cancel).await;

	cancel.cancel();
	drop(sink_tx);
	registry.connection_lost(instance_id, registered.epoch).await;
	let _ = heartbeat_task.await;
	let _ = writer_task.await;
}

async fn read_loop<R>(
	reader: &mut R,
	instance_id: &InstanceId,
	registry: &RegistryHandle,
	pong_tx: &watch::Sender<i64>,
	cancel: &CancellationToken,
) where
	R: AsyncRead + Unpin,
{
	loop {
		let frame = tokio::select! {
			_ = cancel.cancelled() => return,
			frame = unity_bridge_proto::read_frame::<_, AgentMessage>(reader) => frame,
		};
		match frame {
			Ok(AgentMessage::Status { instance_id: reported, status, detail }) => {
				if let Some(detail) = detail {
					tracing::debug!(%instance_id, %detail, "agent status detail");
				}
				if reported != *instance_id {
					warn!(%instance_id, reported = %reported, "agent reported STATUS for a different instance_id than its own connection, ignoring the field and using the bound identity");
				}
				registry.status_update(instance_id.clone(), status).await;
			}
			Ok(AgentMessage::CommandResult { id, success, data, error }) => {
				let outcome = if success {
					DispatchOutcome::Success(data.unwrap_or(serde_json::Value::Null))
				} else {
					DispatchOutcome::Failure(
						error.unwrap_or_else(|| WireError::new(ErrorCode::InternalError, "agent reported failure without error detail")),
					)
				};
				registry.command_result(instance_id.clone(), id, outcome).await;
			}
			Ok(AgentMessage::Pong { echo_ts, .. }) => {
				let _ = pong_tx.send(echo_ts);
			}
			Ok(AgentMessage::Register { .. }) => {
				warn!(%instance_id, "agent sent a second REGISTER on an already-registered connection, ignoring");
			}
			Err(e) => {
				if !e.is_disconnect() {
					warn!(%instance_id, error = %e, "agent connection read error");
				}
				return;
			}
		}
	}
}
