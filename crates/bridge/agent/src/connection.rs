//! Connection lifecycle: connect, `REGISTER`, read loop, reconnect with
//! backoff. Grounded on the broker's own connection-handling shape
//! (`unity_bridge_broker::net::agent_conn`) mirrored from the other end
//! of the same wire: one writer task draining an `mpsc` sink (the send
//! mutex, per §4.1/§5), one reader loop dispatching incoming frames, here
//! adapted to the agent's passive-heartbeat, command-table-dispatch role
//! instead of the broker's supervising-heartbeat, routing role.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use unity_bridge_proto::types::{
	AgentMessage, AgentStatus, BrokerToAgentMessage, ErrorCode, InstanceId, WireError,
	PROTOCOL_VERSION,
};

use crate::commands::CommandTable;
use crate::config::AgentConfig;

/// Bound on the outbound sink channel; generous relative to realistic
/// in-flight command counts for one agent connection.
const SINK_CHANNEL_CAPACITY: usize = 64;

/// A live connection's outbound sink, handed to callers (e.g. the reload
/// sequence's best-effort `STATUS` send) that need to push a frame
/// without touching the socket directly.
#[derive(Clone)]
pub struct AgentHandle {
	sink: mpsc::Sender<AgentMessage>,
	instance_id: InstanceId,
}

impl AgentHandle {
	pub async fn status(&self, status: AgentStatus, detail: Option<String>) {
		let message = AgentMessage::Status {
			instance_id: self.instance_id.clone(),
			status,
			detail,
		};
		let _ = self.sink.send(message).await;
	}
}

/// Runs the agent connection lifecycle until `shutdown` is cancelled:
/// connect, register, serve the connection, and on any disconnection
/// (including a rejected `REGISTER`) reconnect after the configured
/// backoff. Returns only once `shutdown` fires.
pub async fn run(config: AgentConfig, commands: CommandTable, shutdown: CancellationToken) {
	let commands = Arc::new(commands);
	let mut cursor = config.reconnect_backoff.cursor();

	loop {
		if shutdown.is_cancelled() {
			return;
		}

		match connect_and_serve(&config, commands.clone(), &shutdown).await {
			ConnectionOutcome::ShutdownRequested => return,
			ConnectionOutcome::Disconnected => {
				// We were registered and ran for a while before losing the
				// connection; start the next reconnect attempt from the
				// top of the backoff schedule rather than wherever a
				// stale cursor happened to be.
				cursor = config.reconnect_backoff.cursor();
			}
			ConnectionOutcome::RegistrationRejected(err) => {
				warn!(code = ?err.code, message = %err.message, "broker rejected REGISTER");
			}
			ConnectionOutcome::ConnectFailed => {}
		}

		// Unlike the CLI client, the agent has no overall retry deadline
		// to give up at: a long-lived editor process keeps trying to
		// reach the broker indefinitely. When the schedule's total
		// budget is exhausted, restart it rather than stopping.
		let delay = cursor.next_delay().unwrap_or_else(|| {
			cursor = config.reconnect_backoff.cursor();
			cursor
				.next_delay()
				.expect("a freshly reset cursor always yields a first delay")
		});
		tokio::select! {
			_ = shutdown.cancelled() => return,
			_ = tokio::time::sleep(delay) => {}
		}
	}
}

enum ConnectionOutcome {
	ShutdownRequested,
	Disconnected,
	RegistrationRejected(WireError),
	ConnectFailed,
}

async fn connect_and_serve(
	config: &AgentConfig,
	commands: Arc<CommandTable>,
	shutdown: &CancellationToken,
) -> ConnectionOutcome {
	let addr = format!("{}:{}", config.relay_host, config.relay_port);
	let stream = match TcpStream::connect(&addr).await {
		Ok(s) => s,
		Err(e) => {
			debug!(%addr, error = %e, "agent connect failed");
			return ConnectionOutcome::ConnectFailed;
		}
	};
	let (reader, writer) = stream.into_split();
	serve(reader, writer, config, commands, shutdown).await
}

async fn serve<R, W>(
	reader: R,
	writer: W,
	config: &AgentConfig,
	commands: Arc<CommandTable>,
	shutdown: &CancellationToken,
) -> ConnectionOutcome
where
	R: AsyncRead + Unpin + Send + 'static,
	W: AsyncWrite + Unpin + Send + 'static,
{
	let mut reader = BufReader::new(reader);
	let (sink_tx, sink_rx) = mpsc::channel::<AgentMessage>(SINK_CHANNEL_CAPACITY);
	let writer_task = tokio::spawn(drain_to_socket(writer, sink_rx));

	let register = AgentMessage::Register {
		protocol_version: PROTOCOL_VERSION.to_string(),
		instance_id: config.instance_id.clone(),
		project_name: config.project_name.clone(),
		unity_version: config.unity_version.clone(),
		capabilities: config.capabilities.clone(),
	};
	if sink_tx.send(register).await.is_err() {
		drop(sink_tx);
		let _ = writer_task.await;
		return ConnectionOutcome::ConnectFailed;
	}

	let reply = match unity_bridge_proto::read_frame::<_, BrokerToAgentMessage>(&mut reader).await {
		Ok(reply) => reply,
		Err(e) => {
			debug!(error = %e, "no REGISTERED reply, treating as disconnect");
			drop(sink_tx);
			let _ = writer_task.await;
			return ConnectionOutcome::ConnectFailed;
		}
	};

	match reply {
		BrokerToAgentMessage::Registered { success: true, .. } => {
			info!(instance_id = %config.instance_id, "registered with broker");
		}
		BrokerToAgentMessage::Registered {
			success: false,
			error,
			..
		} => {
			drop(sink_tx);
			let _ = writer_task.await;
			return ConnectionOutcome::RegistrationRejected(
				error.unwrap_or_else(|| WireError::new(ErrorCode::InternalError, "registration rejected")),
			);
		}
		other => {
			warn!(?other, "unexpected reply to REGISTER");
			drop(sink_tx);
			let _ = writer_task.await;
			return ConnectionOutcome::ConnectFailed;
		}
	}

	let handle = AgentHandle {
		sink: sink_tx.clone(),
		instance_id: config.instance_id.clone(),
	};

	let outcome = read_loop(&mut reader, &handle, &commands, shutdown).await;

	drop(sink_tx);
	let _ = writer_task.await;
	outcome
}

/// Reads frames until the connection closes or `shutdown` fires,
/// answering `PING` with `PONG` immediately (the agent never initiates a
/// heartbeat, per §4.1) and dispatching `COMMAND` to the command table on
/// its own task so commands may execute concurrently with each other and
/// with further frame reads, per §5 ("results can be produced out of
/// order by the agent").
async fn read_loop<R>(
	reader: &mut R,
	handle: &AgentHandle,
	commands: &Arc<CommandTable>,
	shutdown: &CancellationToken,
) -> ConnectionOutcome
where
	R: AsyncRead + Unpin,
{
	loop {
		let frame = tokio::select! {
			_ = shutdown.cancelled() => return ConnectionOutcome::ShutdownRequested,
			frame = unity_bridge_proto::read_frame::<_, BrokerToAgentMessage>(reader) => frame,
		};

		match frame {
			Ok(BrokerToAgentMessage::Ping { ts }) => {
				let pong = AgentMessage::Pong { ts, echo_ts: ts };
				if handle.sink.send(pong).await.is_err() {
					return ConnectionOutcome::Disconnected;
				}
			}
			Ok(BrokerToAgentMessage::Command {
				id,
				command,
				params,
				..
			}) => {
				let commands = commands.clone();
				let sink = handle.sink.clone();
				tokio::spawn(async move {
					let result = match commands.get(&command) {
						Some(handler) => handler.call(params).await,
						None => Err(WireError::new(ErrorCode::CommandNotFound, format!("unknown command {command}"))),
					};
					let message = match result {
						Ok(data) => AgentMessage::CommandResult {
							id,
							success: true,
							data: Some(data),
							error: None,
						},
						Err(error) => AgentMessage::CommandResult {
							id,
							success: false,
							data: None,
							error: Some(error),
						},
					};
					let _ = sink.send(message).await;
				});
			}
			Ok(BrokerToAgentMessage::Registered { .. }) => {
				warn!("received a second REGISTERED on an already-registered connection, ignoring");
			}
			Err(e) => {
				if !e.is_disconnect() {
					warn!(error = %e, "agent connection read error");
				}
				return ConnectionOutcome::Disconnected;
			}
		}
	}
}

async fn drain_to_socket<W>(mut writer: W, mut rx: mpsc::Receiver<AgentMessage>)
where
	W: AsyncWrite + Unpin,
{
	while let Some(msg) = rx.recv().await {
		if let Err(e) = unity_bridge_proto::write_frame(&mut writer, &msg).await {
			debug!(error = %e, "agent connection write task ending");
			break;
		}
	}
}
