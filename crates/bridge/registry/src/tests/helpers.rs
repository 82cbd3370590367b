//! Shared harness for the registry actor's integration tests: a running
//! [`RegistryService`] plus a fake agent connection (a bare `mpsc`
//! channel standing in for the broker's real writer task), grounded on
//! the teacher's `TestSession` harness
//! (`examples/Alb-O-xeno/crates/broker/broker/src/core/tests/helpers.rs`).

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use unity_bridge_proto::types::{BrokerToAgentMessage, InstanceId, RequestId};

use crate::{RegisteredOk, RegistryConfig, RegistryHandle, RegistryService};

/// Serializes tests that poke `UNITY_BRIDGE_STATUS_DIR` (a process-global
/// env var) so they don't stomp on each other when the test binary runs
/// them concurrently. An async mutex since the guard is held across
/// `await` points (the lint workspace denies holding a std lock there).
pub static STATUS_DIR_ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// How long test assertions wait for an expected channel message before
/// failing, well above anything the actor should need but far below a
/// hung-test timeout.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// A registry configuration with every timing knob cut down to a few
/// hundred milliseconds, so grace-period and reload-timeout tests run in
/// real time without dragging out the suite.
pub fn fast_config() -> RegistryConfig {
	RegistryConfig {
		heartbeat_interval_ms: 5_000,
		command_timeout_ms: 200,
		grace_period_ms: 150,
		reload_max_wait_ms: 300,
		reload_timeout_ms: 150,
		queue_enabled: false,
		queue_max_size: 2,
		request_cache_ttl: Duration::from_millis(300),
		status_file_max_age: Duration::from_secs(120),
		enforce_capabilities: false,
	}
}

pub fn fast_config_with_queue() -> RegistryConfig {
	RegistryConfig {
		queue_enabled: true,
		..fast_config()
	}
}

/// A fake agent connection: the sink half is handed to the registry as
/// this instance's bound connection, the receiver half stands in for the
/// broker's writer task so a test can observe dispatched `COMMAND`s.
pub struct FakeAgent {
	pub instance_id: InstanceId,
	pub sink: mpsc::Sender<BrokerToAgentMessage>,
	pub outbox: mpsc::Receiver<BrokerToAgentMessage>,
}

impl FakeAgent {
	/// Waits for the next frame the registry sent toward this agent.
	pub async fn recv(&mut self) -> BrokerToAgentMessage {
		tokio::time::timeout(RECV_TIMEOUT, self.outbox.recv())
			.await
			.expect("timed out waiting for a frame to the agent")
			.expect("agent outbox closed unexpectedly")
	}

	/// Asserts no frame arrives within a short window (e.g. a second
	/// `COMMAND` should not dispatch while the instance is still `BUSY`).
	pub async fn assert_silent(&mut self) {
		let result = tokio::time::timeout(Duration::from_millis(80), self.outbox.recv()).await;
		assert!(result.is_err(), "expected no frame, got one");
	}
}

/// Registers a fresh instance against `registry` and returns its fake
/// agent connection plus the registration outcome.
pub async fn register(
	registry: &RegistryHandle,
	instance_id: &str,
	project_name: &str,
) -> (FakeAgent, RegisteredOk) {
	let instance_id = InstanceId::from(instance_id);
	let (sink, outbox) = mpsc::channel(32);
	let (reply_tx, reply_rx) = oneshot::channel();
	registry
		.register(
			"1.0".to_string(),
			instance_id.clone(),
			project_name.to_string(),
			"2022.3".to_string(),
			vec![],
			sink.clone(),
			CancellationToken::new(),
			reply_tx,
		)
		.await;
	let ok = reply_rx
		.await
		.expect("registry dropped the register reply")
		.expect("registration unexpectedly rejected");
	(
		FakeAgent {
			instance_id,
			sink,
			outbox,
		},
		ok,
	)
}

pub fn request_id(s: &str) -> RequestId {
	RequestId::from(s.to_string())
}

pub fn start(config: RegistryConfig) -> RegistryHandle {
	RegistryService::start(config)
}

/// Points `UNITY_BRIDGE_STATUS_DIR` at `dir` and writes a status-file
/// record for `instance_id`, so `statusfile::is_reloading` can observe
/// fallback-channel evidence without an agent actually writing the file
/// through the agent crate. Caller must hold [`STATUS_DIR_ENV_LOCK`].
pub fn write_status_file(
	dir: &std::path::Path,
	instance_id: &InstanceId,
	status: unity_bridge_proto::types::StatusFileStatus,
) {
	unsafe {
		std::env::set_var(unity_bridge_proto::paths::STATUS_DIR_ENV, dir);
	}
	let record = unity_bridge_proto::types::StatusFileRecord {
		instance_id: instance_id.clone(),
		project_name: "p".into(),
		unity_version: "2022.3".into(),
		status,
		relay_host: "127.0.0.1".into(),
		relay_port: 6500,
		timestamp: chrono::Utc::now().to_rfc3339(),
		seq: 1,
	};
	let name = unity_bridge_proto::paths::status_file_name(instance_id);
	std::fs::write(dir.join(name), serde_json::to_string(&record).unwrap()).unwrap();
}
