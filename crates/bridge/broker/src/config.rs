//! Layered broker configuration: compiled defaults, then `config.toml`,
//! then environment variables, then CLI flags — lowest to highest
//! precedence, following the teacher's resolution order for its own
//! socket path (`XENO_BROKER_SOCKET` env var, then XDG dir, then a temp
//! fallback).

use std::path::PathBuf;

use serde::Deserialize;

/// `UNITY_BRIDGE_CONFIG` overrides the default `~/.unity-bridge/config.toml`
/// location.
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

/// Resolved broker tunables, per the enumerated defaults in the
/// configuration contract.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
	pub relay_host: String,
	pub relay_port: u16,
	pub heartbeat_interval_ms: u64,
	pub heartbeat_timeout_ms: u64,
	pub reload_timeout_ms: u64,
	pub reload_max_wait_ms: u64,
	pub command_timeout_ms: u64,
	pub request_cache_ttl_s: u64,
	pub queue_max_size: usize,
	pub queue_enabled: bool,
	pub max_payload_bytes: u32,
	pub grace_period_ms: u64,
	pub status_file_max_age_s: u64,
	pub enforce_capabilities: bool,
	pub log_dir: Option<PathBuf>,
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			relay_host: "127.0.0.1".to_string(),
			relay_port: 6500,
			heartbeat_interval_ms: 5_000,
			heartbeat_timeout_ms: 15_000,
			reload_timeout_ms: 30_000,
			reload_max_wait_ms: 15_000,
			command_timeout_ms: 30_000,
			request_cache_ttl_s: 60,
			queue_max_size: 10,
			queue_enabled: false,
			max_payload_bytes: 16 * 1024 * 1024,
			grace_period_ms: 60_000,
			status_file_max_age_s: 120,
			enforce_capabilities: false,
			log_dir: None,
		}
	}
}

impl BrokerConfig {
	pub fn to_registry_config(&self) -> unity_bridge_registry::RegistryConfig {
		unity_bridge_registry::RegistryConfig {
			heartbeat_interval_ms: self.heartbeat_interval_ms,
			command_timeout_ms: self.command_timeout_ms,
			grace_period_ms: self.grace_period_ms,
			reload_max_wait_ms: self.reload_max_wait_ms,
			reload_timeout_ms: self.reload_timeout_ms,
			queue_enabled: self.queue_enabled,
			queue_max_size: self.queue_max_size,
			request_cache_ttl: std::time::Duration::from_secs(self.request_cache_ttl_s),
			status_file_max_age: std::time::Duration::from_secs(self.status_file_max_age_s),
			enforce_capabilities: self.enforce_capabilities,
		}
	}

	/// Resolves the final configuration: defaults, overridden by the config
	/// file (if any), overridden by recognized environment variables,
	/// overridden by explicit CLI overrides.
	pub fn resolve(cli: CliOverrides) -> Result<Self, ConfigError> {
		let mut config = Self::default();
		if let Some(file) = load_config_file()? {
			file.broker.apply(&mut config);
		}
		apply_env(&mut config)?;
		cli.apply(&mut config);
		Ok(config)
	}
}

/// Overrides sourced from CLI flags; `None` means "not specified, defer to
/// file/env/default".
#[derive(Debug, Default)]
pub struct CliOverrides {
	pub relay_host: Option<String>,
	pub relay_port: Option<u16>,
	pub log_dir: Option<PathBuf>,
	pub queue_enabled: Option<bool>,
}

impl CliOverrides {
	fn apply(self, config: &mut BrokerConfig) {
		if let Some(v) = self.relay_host {
			config.relay_host = v;
		}
		if let Some(v) = self.relay_port {
			config.relay_port = v;
		}
		if let Some(v) = self.log_dir {
			config.log_dir = Some(v);
		}
		if let Some(v) = self.queue_enabled {
			config.queue_enabled = v;
		}
	}
}

fn config_file_path() -> Option<PathBuf> {
	if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
		return Some(PathBuf::from(p));
	}
	dirs::home_dir().map(|home| home.join(".unity-bridge").join("config.toml"))
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
	#[serde(default)]
	broker: BrokerOverrides,
	/// The `[client]` table belongs to the client engine's own loader;
	/// accepted here without validation so one shared file can carry both
	/// tables without the broker rejecting keys it doesn't own.
	#[serde(default)]
	#[allow(dead_code)]
	client: toml::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BrokerOverrides {
	relay_host: Option<String>,
	relay_port: Option<u16>,
	heartbeat_interval_ms: Option<u64>,
	heartbeat_timeout_ms: Option<u64>,
	reload_timeout_ms: Option<u64>,
	reload_max_wait_ms: Option<u64>,
	command_timeout_ms: Option<u64>,
	request_cache_ttl_s: Option<u64>,
	queue_max_size: Option<usize>,
	queue_enabled: Option<bool>,
	max_payload_bytes: Option<u32>,
	grace_period_ms: Option<u64>,
	status_file_max_age_s: Option<u64>,
	enforce_capabilities: Option<bool>,
	log_dir: Option<PathBuf>,
}

impl BrokerOverrides {
	fn apply(self, config: &mut BrokerConfig) {
		macro_rules! over {
			($field:ident) => {
				if let Some(v) = self.$field {
					config.$field = v;
				}
			};
		}
		over!(relay_host);
		over!(relay_port);
		over!(heartbeat_interval_ms);
		over!(heartbeat_timeout_ms);
		over!(reload_timeout_ms);
		over!(reload_max_wait_ms);
		over!(command_timeout_ms);
		over!(request_cache_ttl_s);
		over!(queue_max_size);
		over!(queue_enabled);
		over!(max_payload_bytes);
		over!(grace_period_ms);
		over!(status_file_max_age_s);
		over!(enforce_capabilities);
		over!(log_dir);
	}
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

fn apply_env(config: &mut BrokerConfig) -> Result<(), ConfigError> {
	if let Some(v) = env_u16("UNITY_BRIDGE_RELAY_PORT")? {
		config.relay_port = v;
	}
	if let Ok(v) = std::env::var("UNITY_BRIDGE_RELAY_HOST") {
		config.relay_host = v;
	}
	if let Some(v) = env_u64("UNITY_BRIDGE_HEARTBEAT_INTERVAL_MS")? {
		config.heartbeat_interval_ms = v;
	}
	if let Some(v) = env_u64("UNITY_BRIDGE_HEARTBEAT_TIMEOUT_MS")? {
		config.heartbeat_timeout_ms = v;
	}
	if let Some(v) = env_u64("UNITY_BRIDGE_RELOAD_TIMEOUT_MS")? {
		config.reload_timeout_ms = v;
	}
	if let Some(v) = env_u64("UNITY_BRIDGE_COMMAND_TIMEOUT_MS")? {
		config.command_timeout_ms = v;
	}
	if let Some(v) = env_bool("UNITY_BRIDGE_QUEUE_ENABLED")? {
		config.queue_enabled = v;
	}
	if let Ok(v) = std::env::var("UNITY_BRIDGE_LOG_DIR") {
		config.log_dir = Some(PathBuf::from(v));
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

fn env_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
	match std::env::var(name) {
		Ok(value) => match value.as_str() {
			"1" | "true" | "TRUE" | "yes" => Ok(Some(true)),
			"0" | "false" | "FALSE" | "no" => Ok(Some(false)),
			_ => Err(ConfigError::InvalidEnv {
				name,
				value,
				reason: "expected a boolean (true/false/1/0)".to_string(),
			}),
		},
		Err(_) => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_the_enumerated_contract() {
		let config = BrokerConfig::default();
		assert_eq!(config.relay_port, 6500);
		assert_eq!(config.heartbeat_interval_ms, 5_000);
		assert_eq!(config.heartbeat_timeout_ms, 15_000);
		assert_eq!(config.reload_timeout_ms, 30_000);
		assert_eq!(config.command_timeout_ms, 30_000);
		assert_eq!(config.max_payload_bytes, 16 * 1024 * 1024);
		assert_eq!(config.grace_period_ms, 60_000);
		assert_eq!(config.status_file_max_age_s, 120);
		assert!(!config.queue_enabled);
		assert!(!config.enforce_capabilities);
	}

	#[test]
	fn cli_overrides_win_over_defaults() {
		let mut config = BrokerConfig::default();
		CliOverrides {
			relay_port: Some(7000),
			queue_enabled: Some(true),
			..Default::default()
		}
		.apply(&mut config);
		assert_eq!(config.relay_port, 7000);
		assert!(config.queue_enabled);
		assert_eq!(config.relay_host, "127.0.0.1");
	}

	#[test]
	fn unknown_broker_key_in_config_file_is_rejected() {
		let raw = "[broker]\nrelay_port = 7000\nbogus_key = 1\n";
		let err = toml::from_str::<ConfigFile>(raw).unwrap_err();
		assert!(err.to_string().contains("bogus_key"));
	}

	#[test]
	fn config_file_overrides_apply_selectively() {
		let raw = "[broker]\nrelay_port = 7001\n";
		let file: ConfigFile = toml::from_str(raw).unwrap();
		let mut config = BrokerConfig::default();
		file.broker.apply(&mut config);
		assert_eq!(config.relay_port, 7001);
		assert_eq!(config.heartbeat_interval_ms, 5_000);
	}
}
