use std::time::Duration;

/// Tunables governing registry behavior. Defaults match the protocol
/// contract; every field is independently overridable from the broker's
/// layered configuration (file, env, flags).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
	pub heartbeat_interval_ms: u64,
	pub command_timeout_ms: u64,
	pub grace_period_ms: u64,
	/// Client-facing poll-wait budget while an instance is `RELOADING`
	/// (§4.2 step 3). Distinct from `reload_timeout_ms`, which bounds how
	/// long the *registry* itself holds an instance in `RELOADING` before
	/// declaring it disconnected.
	pub reload_max_wait_ms: u64,
	/// How long the registry holds an instance in `RELOADING` (whether
	/// entered via a `STATUS` frame or a lost connection with reload
	/// evidence) before evicting it as disconnected.
	pub reload_timeout_ms: u64,
	pub queue_enabled: bool,
	pub queue_max_size: usize,
	pub request_cache_ttl: Duration,
	pub status_file_max_age: Duration,
	/// Whether an instance's `capabilities[]` is enforced against
	/// dispatched commands. The protocol contract states capabilities
	/// "MAY be used to reject unknown commands"; off by default so an
	/// agent that never reports any capability isn't locked out of every
	/// command.
	pub enforce_capabilities: bool,
}

impl Default for RegistryConfig {
	fn default() -> Self {
		Self {
			heartbeat_interval_ms: 5_000,
			command_timeout_ms: 30_000,
			grace_period_ms: 60_000,
			reload_max_wait_ms: 15_000,
			reload_timeout_ms: 30_000,
			queue_enabled: false,
			queue_max_size: 10,
			request_cache_ttl: Duration::from_secs(60),
			status_file_max_age: Duration::from_secs(120),
			enforce_capabilities: false,
		}
	}
}
