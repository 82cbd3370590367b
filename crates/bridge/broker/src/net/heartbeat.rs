//! Per-agent-connection heartbeat supervisor.
//!
//! Lives in the broker, not the registry (per `DESIGN.md`): it is a
//! per-connection IO concern that needs direct access to this
//! connection's `PING` cadence and its write sink, whereas the registry
//! stays transport-agnostic. The supervisor periodically consults
//! [`RegistryHandle::peek_status`] to decide which timeout budget applies
//! — the normal `heartbeat_timeout_ms`, or the longer `reload_timeout_ms`
//! while the instance is `RELOADING`, since a reloading editor may
//! legitimately go quiet for longer than an ordinary missed heartbeat.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use unity_bridge_proto::types::{BrokerToAgentMessage, InstanceId};
use unity_bridge_registry::{InstanceStatus, RegistryHandle};

/// Consecutive missed heartbeats tolerated before a connection is declared
/// lost. Worst-case detection latency is `heartbeat_timeout_ms *
/// MAX_CONSECUTIVE_FAILURES` (45s at the compiled defaults).
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Runs until `cancel` fires or `MAX_CONSECUTIVE_FAILURES` heartbeat
/// deadlines are missed in a row, in which case it reports the connection
/// lost and returns. A single missed `PONG` does not tear the connection
/// down: the next `PING` still goes out on schedule, per the
/// single-outstanding-PING rule, and the failure streak only resets on a
/// `PONG` that actually arrives in time.
pub async fn supervise(
	instance_id: InstanceId,
	sink: mpsc::Sender<BrokerToAgentMessage>,
	last_pong: watch::Receiver<i64>,
	registry: RegistryHandle,
	epoch: u64,
	heartbeat_interval_ms: u64,
	heartbeat_timeout_ms: u64,
	reload_timeout_ms: u64,
	cancel: CancellationToken,
) {
	let interval = Duration::from_millis(heartbeat_interval_ms);
	let mut consecutive_failures: u32 = 0;
	loop {
		tokio::select! {
			_ = cancel.cancelled() => return,
			_ = tokio::time::sleep(interval) => {}
		}

		let ts = now_millis();
		if sink.send(BrokerToAgentMessage::Ping { ts }).await.is_err() {
			debug!(%instance_id, "heartbeat ping failed, connection already gone");
			registry.connection_lost(instance_id, epoch).await;
			return;
		}

		let budget = match registry.peek_status(instance_id.clone()).await {
			Some(InstanceStatus::Reloading) => reload_timeout_ms,
			_ => heartbeat_timeout_ms,
		};

		let mut rx = last_pong.clone();
		let waited = tokio::time::timeout(Duration::from_millis(budget), async move {
			loop {
				if *rx.borrow() >= ts {
					return;
				}
				if rx.changed().await.is_err() {
					return;
				}
			}
		})
		.await;

		if waited.is_err() {
			consecutive_failures += 1;
			if consecutive_failures < MAX_CONSECUTIVE_FAILURES {
				warn!(
					%instance_id,
					budget_ms = budget,
					consecutive_failures,
					"heartbeat missed, awaiting next ping before declaring connection lost"
				);
				continue;
			}
			warn!(%instance_id, budget_ms = budget, consecutive_failures, "heartbeat timed out, declaring connection lost");
			cancel.cancel();
			registry.connection_lost(instance_id, epoch).await;
			return;
		}

		consecutive_failures = 0;
	}
}

fn now_millis() -> i64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_millis() as i64)
		.unwrap_or(0)
}
