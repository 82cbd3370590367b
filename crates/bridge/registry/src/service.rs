//! The registry actor: the single task through which every instance
//! mutation passes, per §5's "single logical critical section per
//! `instance_id`" shared-resource policy.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use unity_bridge_proto::types::{
	AgentStatus, BrokerToAgentMessage, ErrorCode, InstanceId, InstanceSummary, RequestId,
	WireError,
};

use crate::cache::IdempotencyCache;
use crate::commands::{DispatchAttempt, RegisterReply, RegisteredOk, RegistryCmd};
use crate::config::RegistryConfig;
use crate::handle::RegistryHandle;
use crate::statusfile;
use crate::types::{DispatchOutcome, Instance, InstanceStatus, PendingCommand, QueuedCommand};

/// How often the actor sweeps the idempotency cache for expired entries.
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

pub struct RegistryService {
	rx: mpsc::Receiver<RegistryCmd>,
	tx: mpsc::Sender<RegistryCmd>,
	instances: HashMap<InstanceId, Instance>,
	default_id: Option<InstanceId>,
	cache: IdempotencyCache,
	config: RegistryConfig,
}

impl RegistryService {
	/// Spawns the registry actor and returns a handle to it.
	pub fn start(config: RegistryConfig) -> RegistryHandle {
		let (tx, rx) = mpsc::channel(1024);
		let reload_max_wait = Duration::from_millis(config.reload_max_wait_ms);
		let status_file_max_age = config.status_file_max_age;
		let service = Self {
			rx,
			tx: tx.clone(),
			instances: HashMap::new(),
			default_id: None,
			cache: IdempotencyCache::new(),
			config,
		};
		tokio::spawn(service.run());
		RegistryHandle::with_status_file_max_age(tx, reload_max_wait, status_file_max_age)
	}

	async fn run(mut self) {
		let mut sweep = tokio::time::interval(CACHE_SWEEP_INTERVAL);
		loop {
			tokio::select! {
				cmd = self.rx.recv() => {
					match cmd {
						Some(cmd) => {
							if self.handle_cmd(cmd).await.is_break() {
								return;
							}
						}
						None => return,
					}
				}
				_ = sweep.tick() => {
					self.cache.evict_expired(self.config.request_cache_ttl);
				}
			}
		}
	}

	async fn handle_cmd(&mut self, cmd: RegistryCmd) -> std::ops::ControlFlow<()> {
		match cmd {
			RegistryCmd::Register {
				protocol_version,
				instance_id,
				project_name,
				unity_version,
				capabilities,
				sink,
				cancel,
				reply,
			} => {
				self.handle_register(
					protocol_version,
					instance_id,
					project_name,
					unity_version,
					capabilities,
					sink,
					cancel,
					reply,
				)
				.await;
			}
			RegistryCmd::StatusUpdate { instance_id, status } => {
				self.handle_status_update(instance_id, status).await;
			}
			RegistryCmd::CommandResult {
				instance_id,
				id,
				outcome,
			} => {
				self.resolve_pending(&instance_id, &id, outcome);
				self.drain_queue_if_ready(&instance_id).await;
			}
			RegistryCmd::ConnectionLost { instance_id, epoch } => {
				self.handle_connection_lost(instance_id, epoch).await;
			}
			RegistryCmd::PeekStatus { instance_id, reply } => {
				let _ = reply.send(self.instances.get(&instance_id).map(|i| i.status));
			}
			RegistryCmd::TryDispatch {
				instance_id,
				request_id,
				command,
				params,
				timeout_ms,
				reply,
			} => {
				self.handle_try_dispatch(instance_id, request_id, command, params, timeout_ms, reply)
					.await;
			}
			RegistryCmd::DropPending { instance_id, id } => {
				if let Some(inst) = self.instances.get_mut(&instance_id) {
					inst.pending_by_id.remove(&id);
				}
			}
			RegistryCmd::ListInstances { reply } => {
				let list = self
					.instances
					.values()
					.map(|i| InstanceSummary {
						instance_id: i.instance_id.clone(),
						project_name: i.project_name.clone(),
						unity_version: i.unity_version.clone(),
						status: status_to_agent_status(i.status),
						is_default: i.is_default,
					})
					.collect();
				let _ = reply.send(list);
			}
			RegistryCmd::SetDefault { instance_id, reply } => {
				self.handle_set_default(instance_id, reply);
			}
			RegistryCmd::LookupIdempotency { id, reply } => {
				let lookup = self.cache.lookup(&id, self.config.request_cache_ttl);
				let _ = reply.send(lookup.into());
			}
			RegistryCmd::CompleteIdempotency { id, response } => {
				self.cache.complete(id, response);
			}
			RegistryCmd::AbandonIdempotency { id } => {
				self.cache.abandon(&id);
			}
			RegistryCmd::GraceExpired {
				instance_id,
				generation,
			} => {
				if self.generation_still_current(&instance_id, generation)
					&& matches!(
						self.instances.get(&instance_id).map(|i| i.status),
						Some(InstanceStatus::Reloading)
					)
				{
					info!(%instance_id, "grace period expired, evicting");
					self.evict_instance(&instance_id, ErrorCode::Timeout, "grace period expired");
				}
			}
			RegistryCmd::ReloadTimeout {
				instance_id,
				generation,
			} => {
				if self.generation_still_current(&instance_id, generation)
					&& matches!(
						self.instances.get(&instance_id).map(|i| i.status),
						Some(InstanceStatus::Reloading)
					)
				{
					info!(%instance_id, "reload timeout exceeded, evicting");
					self.evict_instance(&instance_id, ErrorCode::Timeout, "reload did not complete in time");
				}
			}
			RegistryCmd::DispatchTimeout {
				instance_id,
				request_id,
			} => {
				self.resolve_pending(
					&instance_id,
					&request_id,
					DispatchOutcome::Failure(WireError::new(ErrorCode::Timeout, "command timed out")),
				);
				self.drain_queue_if_ready(&instance_id).await;
			}
			RegistryCmd::Shutdown => {
				self.shutdown_all();
				return std::ops::ControlFlow::Break(());
			}
		}
		std::ops::ControlFlow::Continue(())
	}

	fn generation_still_current(&self, instance_id: &InstanceId, generation: u64) -> bool {
		self.instances
			.get(instance_id)
			.is_some_and(|i| i.generation == generation)
	}

	async fn handle_register(
		&mut self,
		protocol_version: String,
		instance_id: InstanceId,
		project_name: String,
		unity_version: String,
		capabilities: Vec<String>,
		sink: crate::sink::AgentSink,
		cancel: tokio_util::sync::CancellationToken,
		reply: RegisterReply,
	) {
		if protocol_version != unity_bridge_proto::types::PROTOCOL_VERSION {
			let _ = reply.send(Err(WireError::new(
				ErrorCode::ProtocolVersionMismatch,
				format!(
					"unsupported protocol version {protocol_version}, expected {}",
					unity_bridge_proto::types::PROTOCOL_VERSION
				),
			)));
			return;
		}

		let took_over;
		let epoch;
		if let Some(existing) = self.instances.get_mut(&instance_id) {
			info!(%instance_id, "takeover: superseding prior binding");
			// Forces the superseded connection's read loop and heartbeat
			// supervisor to stop, per §4.2 step 2 ("forcibly close the
			// previous transport session").
			existing.cancel.cancel();
			existing.cancel = cancel;
			existing.sink = Some(sink);
			existing.status = InstanceStatus::Ready;
			existing.project_name = project_name;
			existing.unity_version = unity_version;
			existing.capabilities = capabilities;
			existing.generation += 1;
			existing.epoch += 1;
			epoch = existing.epoch;
			took_over = true;
		} else {
			let is_default = self.default_id.is_none();
			let instance = Instance::new(
				instance_id.clone(),
				project_name,
				unity_version,
				capabilities,
				sink,
				is_default,
				cancel,
			);
			epoch = instance.epoch;
			if is_default {
				self.default_id = Some(instance_id.clone());
			}
			self.instances.insert(instance_id.clone(), instance);
			took_over = false;
		}

		debug!(%instance_id, took_over, epoch, "registered");
		self.drain_queue_if_ready(&instance_id).await;
		let _ = reply.send(Ok(RegisteredOk {
			heartbeat_interval_ms: self.config.heartbeat_interval_ms,
			took_over,
			epoch,
		}));
	}

	async fn handle_status_update(&mut self, instance_id: InstanceId, status: AgentStatus) {
		let Some(inst) = self.instances.get_mut(&instance_id) else {
			return;
		};
		match status {
			AgentStatus::Reloading => {
				inst.status = InstanceStatus::Reloading;
				inst.generation += 1;
				self.schedule_reload_timeout(&instance_id, inst.generation);
			}
			AgentStatus::Ready => {
				inst.status = InstanceStatus::Ready;
			}
			AgentStatus::Busy => {
				inst.status = InstanceStatus::Busy;
			}
			AgentStatus::Error => {
				warn!(%instance_id, "agent reported error status");
			}
		}
		if matches!(status, AgentStatus::Ready) {
			self.drain_queue_if_ready(&instance_id).await;
		}
	}

	async fn handle_connection_lost(&mut self, instance_id: InstanceId, epoch: u64) {
		let Some(inst) = self.instances.get_mut(&instance_id) else {
			return;
		};
		if inst.epoch != epoch {
			debug!(%instance_id, epoch, current = inst.epoch, "ignoring stale connection-lost from a superseded connection");
			return;
		}
		inst.sink = None;

		let in_memory_reloading = matches!(inst.status, InstanceStatus::Reloading);
		let file_reloading = statusfile::is_reloading(&instance_id, self.config.status_file_max_age);

		if in_memory_reloading || file_reloading {
			inst.status = InstanceStatus::Reloading;
			inst.generation += 1;
			let generation = inst.generation;
			info!(%instance_id, "connection lost, entering grace period");
			self.schedule_grace_expiry(&instance_id, generation);
		} else {
			info!(%instance_id, "connection lost, no reload evidence, evicting");
			self.evict_instance(&instance_id, ErrorCode::InstanceDisconnected, "agent disconnected");
		}
	}

	fn schedule_grace_expiry(&self, instance_id: &InstanceId, generation: u64) {
		let tx = self.tx.clone();
		let instance_id = instance_id.clone();
		let deadline = Instant::now() + Duration::from_millis(self.config.grace_period_ms);
		tokio::spawn(async move {
			tokio::time::sleep_until(deadline).await;
			let _ = tx
				.send(RegistryCmd::GraceExpired {
					instance_id,
					generation,
				})
				.await;
		});
	}

	fn schedule_reload_timeout(&self, instance_id: &InstanceId, generation: u64) {
		let tx = self.tx.clone();
		let instance_id = instance_id.clone();
		let deadline = Instant::now() + Duration::from_millis(self.config.reload_timeout_ms);
		tokio::spawn(async move {
			tokio::time::sleep_until(deadline).await;
			let _ = tx
				.send(RegistryCmd::ReloadTimeout {
					instance_id,
					generation,
				})
				.await;
		});
	}

	fn schedule_dispatch_timeout(&self, instance_id: &InstanceId, request_id: &RequestId, timeout_ms: u64) {
		let tx = self.tx.clone();
		let instance_id = instance_id.clone();
		let request_id = request_id.clone();
		let deadline = Instant::now() + Duration::from_millis(timeout_ms);
		tokio::spawn(async move {
			tokio::time::sleep_until(deadline).await;
			let _ = tx
				.send(RegistryCmd::DispatchTimeout {
					instance_id,
					request_id,
				})
				.await;
		});
	}

	async fn handle_try_dispatch(
		&mut self,
		instance_id: Option<InstanceId>,
		request_id: RequestId,
		command: String,
		params: serde_json::Value,
		timeout_ms: u64,
		reply: oneshot::Sender<DispatchAttempt>,
	) {
		let Some(target_id) = instance_id.or_else(|| self.default_id.clone()) else {
			let _ = reply.send(DispatchAttempt::NotFound);
			return;
		};
		let Some(inst) = self.instances.get(&target_id) else {
			let _ = reply.send(DispatchAttempt::NotFound);
			return;
		};

		if self.config.enforce_capabilities
			&& !inst.capabilities.is_empty()
			&& !inst.capabilities.iter().any(|c| c == &command)
		{
			let _ = reply.send(DispatchAttempt::CapabilityNotSupported);
			return;
		}

		match inst.status {
			InstanceStatus::Reloading | InstanceStatus::Disconnected => {
				let _ = reply.send(DispatchAttempt::Reloading);
			}
			InstanceStatus::Busy => {
				if self.config.queue_enabled {
					let inst = self.instances.get_mut(&target_id).expect("checked above");
					if inst.queue.len() >= self.config.queue_max_size {
						let _ = reply.send(DispatchAttempt::QueueFull);
					} else {
						let (tx, rx) = oneshot::channel();
						inst.queue.push_back(QueuedCommand {
							request_id,
							command,
							params,
							timeout_ms,
							reply: tx,
						});
						let _ = reply.send(DispatchAttempt::Accepted(rx));
					}
				} else {
					let _ = reply.send(DispatchAttempt::Busy);
				}
			}
			InstanceStatus::Ready => {
				let (tx, rx) = oneshot::channel();
				self.dispatch_now(&target_id, request_id, command, params, timeout_ms, tx)
					.await;
				let _ = reply.send(DispatchAttempt::Accepted(rx));
			}
		}
	}

	/// Sends `COMMAND` to the instance's bound connection and transitions
	/// `READY -> BUSY`. Assumes the caller already confirmed the instance
	/// is `READY` (or is draining its queue into a freshly-`READY` slot).
	async fn dispatch_now(
		&mut self,
		instance_id: &InstanceId,
		request_id: RequestId,
		command: String,
		params: serde_json::Value,
		timeout_ms: u64,
		reply: oneshot::Sender<DispatchOutcome>,
	) {
		let Some(inst) = self.instances.get_mut(instance_id) else {
			let _ = reply.send(DispatchOutcome::Failure(WireError::new(
				ErrorCode::InstanceNotFound,
				"instance vanished before dispatch",
			)));
			return;
		};
		let Some(sink) = inst.sink.clone() else {
			let _ = reply.send(DispatchOutcome::Failure(WireError::new(
				ErrorCode::InstanceDisconnected,
				"instance has no bound connection",
			)));
			return;
		};

		inst.status = InstanceStatus::Busy;
		inst.pending_by_id.insert(
			request_id.clone(),
			PendingCommand {
				reply,
				dispatched_at: Instant::now().into_std(),
			},
		);

		let message = BrokerToAgentMessage::Command {
			id: request_id.clone(),
			command,
			params,
			timeout_ms: Some(timeout_ms),
		};
		if sink.send(message).await.is_err() {
			self.resolve_pending(
				instance_id,
				&request_id,
				DispatchOutcome::Failure(WireError::new(
					ErrorCode::InstanceDisconnected,
					"agent connection closed",
				)),
			);
			return;
		}

		self.schedule_dispatch_timeout(instance_id, &request_id, timeout_ms);
	}

	/// Resolves (and removes) a pending dispatch, if still present, and
	/// returns the instance to `READY`. A late arrival for an id no
	/// longer pending (already resolved by timeout or a prior result) is
	/// a silent no-op, per §4.2 step 7 / §7.
	fn resolve_pending(&mut self, instance_id: &InstanceId, id: &RequestId, outcome: DispatchOutcome) {
		let Some(inst) = self.instances.get_mut(instance_id) else {
			return;
		};
		let Some(pending) = inst.pending_by_id.remove(id) else {
			debug!(%instance_id, %id, "discarding result for unknown or already-resolved request");
			return;
		};
		let _ = pending.reply.send(outcome);
		if matches!(inst.status, InstanceStatus::Busy) {
			inst.status = InstanceStatus::Ready;
		}
	}

	async fn drain_queue_if_ready(&mut self, instance_id: &InstanceId) {
		let Some(inst) = self.instances.get_mut(instance_id) else {
			return;
		};
		if !matches!(inst.status, InstanceStatus::Ready) {
			return;
		}
		let Some(next) = inst.queue.pop_front() else {
			return;
		};
		self.dispatch_now(
			instance_id,
			next.request_id,
			next.command,
			next.params,
			next.timeout_ms,
			next.reply,
		)
		.await;
	}

	fn handle_set_default(&mut self, instance_id: InstanceId, reply: oneshot::Sender<Result<(), WireError>>) {
		if !self.instances.contains_key(&instance_id) {
			let _ = reply.send(Err(WireError::new(ErrorCode::InstanceNotFound, "no such instance")));
			return;
		}
		if let Some(old) = self.default_id.take()
			&& let Some(old_inst) = self.instances.get_mut(&old)
		{
			old_inst.is_default = false;
		}
		if let Some(inst) = self.instances.get_mut(&instance_id) {
			inst.is_default = true;
		}
		self.default_id = Some(instance_id);
		let _ = reply.send(Ok(()));
	}

	/// Removes an instance entirely, failing every queued and in-flight
	/// command with `code`/`message`, and promotes the earliest-registered
	/// survivor to default if the evicted entry held that role.
	fn evict_instance(&mut self, instance_id: &InstanceId, code: ErrorCode, message: &str) {
		let Some(mut inst) = self.instances.remove(instance_id) else {
			return;
		};
		for queued in inst.queue.drain(..) {
			let _ = queued.reply.send(DispatchOutcome::Failure(WireError::new(code, message)));
		}
		for (_, pending) in inst.pending_by_id.drain() {
			let _ = pending.reply.send(DispatchOutcome::Failure(WireError::new(code, message)));
		}

		if self.default_id.as_ref() == Some(instance_id) {
			self.default_id = None;
			if let Some((earliest_id, _)) = self
				.instances
				.iter()
				.min_by_key(|(_, i)| i.registered_at)
			{
				let earliest_id = earliest_id.clone();
				if let Some(promoted) = self.instances.get_mut(&earliest_id) {
					promoted.is_default = true;
				}
				self.default_id = Some(earliest_id);
			}
		}
	}

	fn shutdown_all(&mut self) {
		info!("registry shutting down, failing all outstanding work");
		for inst in self.instances.values_mut() {
			for queued in inst.queue.drain(..) {
				let _ = queued.reply.send(DispatchOutcome::Failure(WireError::new(
					ErrorCode::InternalError,
					"broker shutting down",
				)));
			}
			for (_, pending) in inst.pending_by_id.drain() {
				let _ = pending.reply.send(DispatchOutcome::Failure(WireError::new(
					ErrorCode::InternalError,
					"broker shutting down",
				)));
			}
		}
	}
}

fn status_to_agent_status(status: InstanceStatus) -> AgentStatus {
	match status {
		InstanceStatus::Ready => AgentStatus::Ready,
		InstanceStatus::Busy => AgentStatus::Busy,
		InstanceStatus::Reloading => AgentStatus::Reloading,
		// Unreachable in practice: a non-reload disconnect is evicted
		// immediately rather than parked in this state (see
		// `handle_connection_lost`), but `Error` is the closest available
		// wire status if this is ever observed mid-transition.
		InstanceStatus::Disconnected => AgentStatus::Error,
	}
}
