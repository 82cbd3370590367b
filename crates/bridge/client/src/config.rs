//! Layered client configuration: defaults, then the shared config file's
//! `[client]` table, then environment variables, then CLI flags —
//! mirroring `unity_bridge_broker::config`'s resolution order exactly, so
//! one `~/.unity-bridge/config.toml` can carry both a `[broker]` and a
//! `[client]` table without either side rejecting the other's keys.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use unity_bridge_proto::backoff::BackoffSchedule;

/// `UNITY_BRIDGE_CONFIG` overrides the default `~/.unity-bridge/config.toml`
/// location. Shared literally with the broker's config loader.
pub const CONFIG_PATH_ENV: &str = "UNITY_BRIDGE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("reading config file {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("parsing config file {path}: {source}")]
	Toml {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
	#[error("environment variable {name} has an invalid value {value:?}: {reason}")]
	InvalidEnv {
		name: &'static str,
		value: String,
		reason: String,
	},
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub relay_host: String,
	pub relay_port: u16,
	pub socket_timeout: Duration,
	pub backoff: BackoffSchedule,
	pub default_instance: Option<String>,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			relay_host: "127.0.0.1".to_string(),
			relay_port: 6500,
			socket_timeout: Duration::from_secs(15),
			backoff: BackoffSchedule::DEFAULT,
			default_instance: None,
		}
	}
}

#[derive(Debug, Default)]
pub struct CliOverrides {
	pub relay_host: Option<String>,
	pub relay_port: Option<u16>,
	pub instance: Option<String>,
}

impl CliOverrides {
	fn apply(self, config: &mut ClientConfig) {
		if let Some(v) = self.relay_host {
			config.relay_host = v;
		}
		if let Some(v) = self.relay_port {
			config.relay_port = v;
		}
		if let Some(v) = self.instance {
			config.default_instance = Some(v);
		}
	}
}

impl ClientConfig {
	pub fn resolve(cli: CliOverrides) -> Result<Self, ConfigError> {
		let mut config = Self::default();
		if let Some(file) = load_config_file()? {
			file.client.apply(&mut config);
		}
		apply_env(&mut config)?;
		cli.apply(&mut config);
		Ok(config)
	}
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
	/// The `[broker]` table belongs to the broker's own loader; accepted
	/// here without validation for the same reason the broker accepts an
	/// unvalidated `[client]` table.
	#[serde(default)]
	#[allow(dead_code)]
	broker: toml::Value,
	#[serde(default)]
	client: ClientOverrides,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientOverrides {
	relay_host: Option<String>,
	relay_port: Option<u16>,
	socket_timeout_s: Option<u64>,
	backoff_initial_ms: Option<u64>,
	backoff_max_ms: Option<u64>,
	max_retry_time_ms: Option<u64>,
	instance: Option<String>,
}

impl ClientOverrides {
	fn apply(self, config: &mut ClientConfig) {
		if let Some(v) = self.relay_host {
			config.relay_host = v;
		}
		if let Some(v) = self.relay_port {
			config.relay_port = v;
		}
		if let Some(v) = self.socket_timeout_s {
			config.socket_timeout = Duration::from_secs(v);
		}
		if let Some(v) = self.backoff_initial_ms {
			config.backoff.initial = Duration::from_millis(v);
		}
		if let Some(v) = self.backoff_max_ms {
			config.backoff.max = Duration::from_millis(v);
		}
		if let Some(v) = self.max_retry_time_ms {
			config.backoff.max_elapsed = Duration::from_millis(v);
		}
		if let Some(v) = self.instance {
			config.default_instance = Some(v);
		}
	}
}

fn config_file_path() -> Option<PathBuf> {
	if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
		return Some(PathBuf::from(p));
	}
	dirs::home_dir().map(|home| home.join(".unity-bridge").join("config.toml"))
}

fn load_config_file() -> Result<Option<ConfigFile>, ConfigError> {
	let Some(path) = config_file_path() else {
		return Ok(None);
	};
	let contents = match std::fs::read_to_string(&path) {
		Ok(c) => c,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
		Err(source) => return Err(ConfigError::Io { path, source }),
	};
	toml::from_str(&contents)
		.map(Some)
		.map_err(|source| ConfigError::Toml { path, source })
}

fn apply_env(config: &mut ClientConfig) -> Result<(), ConfigError> {
	if let Ok(v) = std::env::var("UNITY_BRIDGE_RELAY_HOST") {
		config.relay_host = v;
	}
	if let Some(v) = env_u16("UNITY_BRIDGE_RELAY_PORT")? {
		config.relay_port = v;
	}
	if let Some(v) = env_u64("UNITY_BRIDGE_CLI_SOCKET_TIMEOUT_S")? {
		config.socket_timeout = Duration::from_secs(v);
	}
	Ok(())
}

fn env_u16(name: &'static str) -> Result<Option<u16>, ConfigError> {
	env_parsed(name)
}

fn env_u64(name: &'static str) -> Result<Option<u64>, ConfigError> {
	env_parsed(name)
}

fn env_parsed<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError>
where
	T::Err: std::fmt::Display,
{
	match std::env::var(name) {
		Ok(value) => value
			.parse()
			.map(Some)
			.map_err(|e: T::Err| ConfigError::InvalidEnv {
				name,
				value,
				reason: e.to_string(),
			}),
		Err(_) => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_the_enumerated_contract() {
		let config = ClientConfig::default();
		assert_eq!(config.relay_port, 6500);
		assert_eq!(config.socket_timeout, Duration::from_secs(15));
		assert_eq!(config.backoff.initial, Duration::from_millis(500));
		assert_eq!(config.backoff.max, Duration::from_millis(8_000));
		assert_eq!(config.backoff.max_elapsed, Duration::from_millis(45_000));
	}

	#[test]
	fn cli_overrides_win_over_defaults() {
		let mut config = ClientConfig::default();
		CliOverrides {
			relay_port: Some(7000),
			instance: Some("/p".to_string()),
			..Default::default()
		}
		.apply(&mut config);
		assert_eq!(config.relay_port, 7000);
		assert_eq!(config.default_instance.as_deref(), Some("/p"));
	}

	#[test]
	fn unknown_client_key_in_config_file_is_rejected() {
		let raw = "[client]\nrelay_port = 7000\nbogus_key = 1\n";
		let err = toml::from_str::<ConfigFile>(raw).unwrap_err();
		assert!(err.to_string().contains("bogus_key"));
	}

	#[test]
	fn broker_table_in_shared_file_is_ignored_without_erroring() {
		let raw = "[broker]\nrelay_port = 7000\nheartbeat_interval_ms = 1\n[client]\nrelay_port = 7001\n";
		let file: ConfigFile = toml::from_str(raw).unwrap();
		let mut config = ClientConfig::default();
		file.client.apply(&mut config);
		assert_eq!(config.relay_port, 7001);
	}
}
