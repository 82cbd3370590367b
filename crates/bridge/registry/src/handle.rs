//! Public handle for the registry actor.
//!
//! Every method sends one [`RegistryCmd`] and, where an answer is needed,
//! awaits a paired `oneshot` reply — the teacher's Handle/Cmd/Service
//! idiom (`xeno_broker::services::routing::RoutingHandle`). [`request`]
//! additionally orchestrates the multi-step client `REQUEST` flow
//! (idempotency, routing, reload poll-wait, dispatch-await) described in
//! §4.2, since that flow spans several actor round-trips and must not
//! block the actor loop itself while waiting.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use unity_bridge_proto::types::{
	AgentStatus, BrokerToClientMessage, ErrorCode, InstanceId, InstanceSummary, RequestId,
	WireError,
};

use crate::commands::{DispatchAttempt, IdempotencyLookup, RegisterReply, RegistryCmd};
use crate::sink::AgentSink;
use crate::types::{DispatchOutcome, InstanceStatus};

/// Fixed poll interval while waiting out a `RELOADING` instance (§4.2 step
/// 3: "at a fixed interval ≤200ms").
const RELOAD_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone)]
pub struct RegistryHandle {
	tx: mpsc::Sender<RegistryCmd>,
	reload_max_wait: Duration,
	status_file_max_age: Duration,
}

/// One fully-formed client `REQUEST`, as handed to [`RegistryHandle::request`].
pub struct ClientRequest {
	pub request_id: RequestId,
	pub instance: Option<InstanceId>,
	pub command: String,
	pub params: serde_json::Value,
	pub timeout_ms: Option<u64>,
}

impl RegistryHandle {
	pub fn new(tx: mpsc::Sender<RegistryCmd>, reload_max_wait: Duration) -> Self {
		Self::with_status_file_max_age(tx, reload_max_wait, crate::statusfile::DEFAULT_MAX_AGE)
	}

	pub fn with_status_file_max_age(
		tx: mpsc::Sender<RegistryCmd>,
		reload_max_wait: Duration,
		status_file_max_age: Duration,
	) -> Self {
		Self {
			tx,
			reload_max_wait,
			status_file_max_age,
		}
	}

	#[instrument(skip(self, sink, cancel, reply), fields(%instance_id))]
	pub async fn register(
		&self,
		protocol_version: String,
		instance_id: InstanceId,
		project_name: String,
		unity_version: String,
		capabilities: Vec<String>,
		sink: AgentSink,
		cancel: CancellationToken,
		reply: RegisterReply,
	) {
		let _ = self
			.tx
			.send(RegistryCmd::Register {
				protocol_version,
				instance_id,
				project_name,
				unity_version,
				capabilities,
				sink,
				cancel,
				reply,
			})
			.await;
	}

	pub async fn status_update(&self, instance_id: InstanceId, status: AgentStatus) {
		let _ = self
			.tx
			.send(RegistryCmd::StatusUpdate { instance_id, status })
			.await;
	}

	pub async fn command_result(
		&self,
		instance_id: InstanceId,
		id: RequestId,
		outcome: DispatchOutcome,
	) {
		let _ = self
			.tx
			.send(RegistryCmd::CommandResult {
				instance_id,
				id,
				outcome,
			})
			.await;
	}

	pub async fn connection_lost(&self, instance_id: InstanceId, epoch: u64) {
		let _ = self
			.tx
			.send(RegistryCmd::ConnectionLost { instance_id, epoch })
			.await;
	}

	pub async fn peek_status(&self, instance_id: InstanceId) -> Option<InstanceStatus> {
		let (reply, rx) = tokio::sync::oneshot::channel();
		if self
			.tx
			.send(RegistryCmd::PeekStatus { instance_id, reply })
			.await
			.is_err()
		{
			return None;
		}
		rx.await.ok().flatten()
	}

	pub async fn list_instances(&self) -> Vec<InstanceSummary> {
		let (reply, rx) = tokio::sync::oneshot::channel();
		if self
			.tx
			.send(RegistryCmd::ListInstances { reply })
			.await
			.is_err()
		{
			return Vec::new();
		}
		rx.await.unwrap_or_default()
	}

	pub async fn set_default(&self, instance_id: InstanceId) -> Result<(), WireError> {
		let (reply, rx) = tokio::sync::oneshot::channel();
		self.tx
			.send(RegistryCmd::SetDefault { instance_id, reply })
			.await
			.map_err(|_| WireError::new(ErrorCode::InternalError, "registry shut down"))?;
		rx.await
			.map_err(|_| WireError::new(ErrorCode::InternalError, "registry shut down"))?
	}

	async fn try_dispatch(
		&self,
		instance: Option<InstanceId>,
		request_id: RequestId,
		command: String,
		params: serde_json::Value,
		timeout_ms: u64,
	) -> DispatchAttempt {
		let (reply, rx) = tokio::sync::oneshot::channel();
		if self
			.tx
			.send(RegistryCmd::TryDispatch {
				instance_id: instance,
				request_id,
				command,
				params,
				timeout_ms,
				reply,
			})
			.await
			.is_err()
		{
			return DispatchAttempt::NotFound;
		}
		rx.await.unwrap_or(DispatchAttempt::NotFound)
	}

	async fn drop_pending(&self, instance_id: InstanceId, id: RequestId) {
		let _ = self
			.tx
			.send(RegistryCmd::DropPending { instance_id, id })
			.await;
	}

	async fn lookup_idempotency(&self, id: RequestId) -> IdempotencyLookup {
		let (reply, rx) = tokio::sync::oneshot::channel();
		if self
			.tx
			.send(RegistryCmd::LookupIdempotency { id, reply })
			.await
			.is_err()
		{
			return IdempotencyLookup::Fresh;
		}
		rx.await.unwrap_or(IdempotencyLookup::Fresh)
	}

	async fn complete_idempotency(&self, id: RequestId, response: BrokerToClientMessage) {
		let _ = self
			.tx
			.send(RegistryCmd::CompleteIdempotency { id, response })
			.await;
	}

	async fn abandon_idempotency(&self, id: RequestId) {
		let _ = self.tx.send(RegistryCmd::AbandonIdempotency { id }).await;
	}

	pub async fn shutdown(&self) {
		let _ = self.tx.send(RegistryCmd::Shutdown).await;
	}

	/// Orchestrates one client `REQUEST` end to end: idempotency lookup,
	/// routing, reload poll-wait, dispatch, and result wait. This is the
	/// broker's entire answer to "what happens when a client asks for
	/// something" (§4.2 "Request routing").
	#[instrument(skip(self, req), fields(id = %req.request_id))]
	pub async fn request(&self, req: ClientRequest, default_timeout_ms: u64) -> BrokerToClientMessage {
		let request_id = req.request_id.clone();

		loop {
			match self.lookup_idempotency(request_id.clone()).await {
				IdempotencyLookup::Cached(resp) => return resp,
				IdempotencyLookup::Join(rx) => match rx.await {
					Ok(crate::cache::JoinOutcome::Completed(resp)) => return resp,
					Ok(crate::cache::JoinOutcome::Abandoned) | Err(_) => continue,
				},
				IdempotencyLookup::Fresh => break,
			}
		}

		let timeout_ms = req.timeout_ms.unwrap_or(default_timeout_ms);
		let response = self.dispatch_with_reload_wait(&req, timeout_ms).await;

		match &response {
			BrokerToClientMessage::Response { .. } | BrokerToClientMessage::Instances { .. } => {
				self.complete_idempotency(request_id, response.clone()).await;
			}
			BrokerToClientMessage::Error { .. } => {
				self.abandon_idempotency(request_id).await;
			}
		}
		response
	}

	async fn dispatch_with_reload_wait(
		&self,
		req: &ClientRequest,
		timeout_ms: u64,
	) -> BrokerToClientMessage {
		let deadline = Instant::now() + self.reload_max_wait;

		loop {
			let attempt = self
				.try_dispatch(
					req.instance.clone(),
					req.request_id.clone(),
					req.command.clone(),
					req.params.clone(),
					timeout_ms,
				)
				.await;

			match attempt {
				DispatchAttempt::Accepted(rx) => {
					return self
						.await_dispatch_result(rx, req, Duration::from_millis(timeout_ms))
						.await;
				}
				DispatchAttempt::Busy => {
					return error_response(&req.request_id, ErrorCode::InstanceBusy, "instance is busy");
				}
				DispatchAttempt::QueueFull => {
					return error_response(&req.request_id, ErrorCode::QueueFull, "command queue is full");
				}
				DispatchAttempt::CapabilityNotSupported => {
					return error_response(
						&req.request_id,
						ErrorCode::CapabilityNotSupported,
						"command not in instance capabilities",
					);
				}
				DispatchAttempt::NotFound => {
					let reloading = req
						.instance
						.as_ref()
						.is_some_and(|id| crate::statusfile::is_reloading(id, self.status_file_max_age));
					if !reloading {
						return error_response(
							&req.request_id,
							ErrorCode::InstanceNotFound,
							"no such instance",
						);
					}
					// Fall through to the reload poll-wait below: the
					// status file claims a reload is in progress even
					// though the in-memory entry is gone (§4.2 scenario 4).
				}
				DispatchAttempt::Reloading => {}
			}

			if Instant::now() >= deadline {
				return error_response(
					&req.request_id,
					ErrorCode::InstanceReloading,
					"instance did not return from reload in time",
				);
			}
			tokio::time::sleep(RELOAD_POLL_INTERVAL).await;
		}
	}

	async fn await_dispatch_result(
		&self,
		rx: tokio::sync::oneshot::Receiver<DispatchOutcome>,
		req: &ClientRequest,
		timeout: Duration,
	) -> BrokerToClientMessage {
		match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(DispatchOutcome::Success(data))) => {
				BrokerToClientMessage::response(req.request_id.clone(), data)
			}
			Ok(Ok(DispatchOutcome::Failure(err))) => {
				BrokerToClientMessage::error(req.request_id.clone(), err)
			}
			Ok(Err(_)) => error_response(
				&req.request_id,
				ErrorCode::InternalError,
				"registry dropped the result channel",
			),
			Err(_) => {
				if let Some(instance_id) = req.instance.clone() {
					self.drop_pending(instance_id, req.request_id.clone()).await;
				}
				error_response(&req.request_id, ErrorCode::Timeout, "command timed out")
			}
		}
	}
}

fn error_response(id: &RequestId, code: ErrorCode, message: &str) -> BrokerToClientMessage {
	BrokerToClientMessage::error(id.clone(), WireError::new(code, message))
}
