//! Agent identity and connection tunables.

use unity_bridge_proto::backoff::BackoffSchedule;
use unity_bridge_proto::types::InstanceId;

/// Everything the agent runtime needs to register with and reconnect to
/// a broker. Constructed by the embedding editor process; this crate
/// does not read environment variables or config files itself (unlike
/// the broker and client, the agent is a library embedded in a larger
/// process that owns its own configuration surface).
#[derive(Debug, Clone)]
pub struct AgentConfig {
	pub relay_host: String,
	pub relay_port: u16,
	pub instance_id: InstanceId,
	pub project_name: String,
	pub unity_version: String,
	pub capabilities: Vec<String>,
	/// Reconnect backoff after `REGISTERED{success:false}` or connection
	/// loss. Shares the schedule named in §4.3 so the agent and the CLI
	/// client retry against the same broker on comparable timescales.
	pub reconnect_backoff: BackoffSchedule,
}

impl AgentConfig {
	pub fn new(
		relay_host: impl Into<String>,
		relay_port: u16,
		instance_id: impl Into<InstanceId>,
		project_name: impl Into<String>,
		unity_version: impl Into<String>,
	) -> Self {
		Self {
			relay_host: relay_host.into(),
			relay_port,
			instance_id: instance_id.into(),
			project_name: project_name.into(),
			unity_version: unity_version.into(),
			capabilities: Vec::new(),
			reconnect_backoff: BackoffSchedule::DEFAULT,
		}
	}

	pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
		self.capabilities = capabilities;
		self
	}
}
