//! Broker-side read contract for the status-file fallback channel.
//!
//! Files are read on demand — on instance lookup for routing, and on
//! disconnect to decide grace — never watched, so a slow or absent
//! filesystem can't block the registry actor's event loop.

use std::time::Duration;

use chrono::{DateTime, Utc};
use unity_bridge_proto::paths::status_file_path;
use unity_bridge_proto::types::{InstanceId, StatusFileRecord, StatusFileStatus};

/// `status_file_max_age_s` from the configuration defaults (§6), used when
/// a caller has no [`RegistryConfig`](crate::config::RegistryConfig) of its
/// own to read the configured value from.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(120);

/// Reads and validates the status file for `instance_id`.
///
/// Returns `None` for any condition that should be treated as "no
/// information": missing file, unreadable, malformed, or stale beyond
/// `max_age`. The broker never distinguishes these cases from the
/// caller's perspective — they are all just "the file told us nothing".
pub fn read_status(instance_id: &InstanceId, max_age: Duration) -> Option<StatusFileRecord> {
	let path = status_file_path(instance_id)?;
	let contents = std::fs::read_to_string(&path).ok()?;
	let record: StatusFileRecord = serde_json::from_str(&contents).ok()?;
	let timestamp: DateTime<Utc> = record.timestamp.parse().ok()?;
	let age = Utc::now().signed_duration_since(timestamp);
	if age.to_std().map_or(true, |age| age > max_age) {
		return None;
	}
	Some(record)
}

/// Whether the status file currently claims `reloading`, per the fallback
/// consultation in §4.2's registration and routing rules.
pub fn is_reloading(instance_id: &InstanceId, max_age: Duration) -> bool {
	matches!(
		read_status(instance_id, max_age),
		Some(StatusFileRecord {
			status: StatusFileStatus::Reloading,
			..
		})
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	fn with_status_dir<F: FnOnce(&std::path::Path)>(f: F) {
		let dir = tempfile::tempdir().unwrap();
		unsafe {
			std::env::set_var(unity_bridge_proto::paths::STATUS_DIR_ENV, dir.path());
		}
		f(dir.path());
		unsafe {
			std::env::remove_var(unity_bridge_proto::paths::STATUS_DIR_ENV);
		}
	}

	fn write_record(dir: &std::path::Path, id: &InstanceId, record: &StatusFileRecord) {
		let name = unity_bridge_proto::paths::status_file_name(id);
		let mut file = std::fs::File::create(dir.join(name)).unwrap();
		file.write_all(serde_json::to_string(record).unwrap().as_bytes())
			.unwrap();
	}

	#[test]
	fn fresh_reloading_record_is_visible() {
		with_status_dir(|dir| {
			let id = InstanceId::from("/p");
			let record = StatusFileRecord {
				instance_id: id.clone(),
				project_name: "p".into(),
				unity_version: "2022.3".into(),
				status: StatusFileStatus::Reloading,
				relay_host: "127.0.0.1".into(),
				relay_port: 6500,
				timestamp: Utc::now().to_rfc3339(),
				seq: 7,
			};
			write_record(dir, &id, &record);
			assert!(is_reloading(&id, DEFAULT_MAX_AGE));
		});
	}

	#[test]
	fn stale_record_is_absent() {
		with_status_dir(|dir| {
			let id = InstanceId::from("/p");
			let stale = Utc::now() - chrono::Duration::seconds(DEFAULT_MAX_AGE.as_secs() as i64 + 1);
			let record = StatusFileRecord {
				instance_id: id.clone(),
				project_name: "p".into(),
				unity_version: "2022.3".into(),
				status: StatusFileStatus::Reloading,
				relay_host: "127.0.0.1".into(),
				relay_port: 6500,
				timestamp: stale.to_rfc3339(),
				seq: 7,
			};
			write_record(dir, &id, &record);
			assert!(read_status(&id, DEFAULT_MAX_AGE).is_none());
		});
	}

	#[test]
	fn record_stale_by_half_a_second_is_absent() {
		with_status_dir(|dir| {
			let id = InstanceId::from("/p");
			let stale = Utc::now()
				- chrono::Duration::seconds(DEFAULT_MAX_AGE.as_secs() as i64)
				- chrono::Duration::milliseconds(500);
			let record = StatusFileRecord {
				instance_id: id.clone(),
				project_name: "p".into(),
				unity_version: "2022.3".into(),
				status: StatusFileStatus::Reloading,
				relay_host: "127.0.0.1".into(),
				relay_port: 6500,
				timestamp: stale.to_rfc3339(),
				seq: 7,
			};
			write_record(dir, &id, &record);
			assert!(read_status(&id, DEFAULT_MAX_AGE).is_none());
		});
	}

	#[test]
	fn missing_file_is_none() {
		with_status_dir(|_dir| {
			let id = InstanceId::from("/does-not-exist");
			assert!(read_status(&id, DEFAULT_MAX_AGE).is_none());
		});
	}
}
