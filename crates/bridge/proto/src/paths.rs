//! Status-file directory and filename resolution.

use std::path::PathBuf;

use sha1::{Digest, Sha1};

use crate::types::InstanceId;

/// Environment variable that overrides the default status directory.
pub const STATUS_DIR_ENV: &str = "UNITY_BRIDGE_STATUS_DIR";

/// Returns the status-file directory.
///
/// # Resolution order
///
/// 1. `UNITY_BRIDGE_STATUS_DIR` environment variable.
/// 2. `~/.unity-bridge/`.
///
/// Unlike a runtime socket directory this does not need to fall back to a
/// temp directory: the status channel is a convenience fallback, and a
/// missing home directory is surfaced to the caller instead of silently
/// picked for them.
#[must_use]
pub fn status_dir() -> Option<PathBuf> {
	if let Ok(p) = std::env::var(STATUS_DIR_ENV) {
		return Some(PathBuf::from(p));
	}
	dirs::home_dir().map(|home| home.join(".unity-bridge"))
}

/// Derives the status-file name for `instance_id`: `status-<hash8>.json`
/// where `hash8` is the lowercase hex of the first 4 bytes of
/// SHA-1(`instance_id`).
#[must_use]
pub fn status_file_name(instance_id: &InstanceId) -> String {
	let digest = Sha1::digest(instance_id.0.as_bytes());
	format!(
		"status-{:02x}{:02x}{:02x}{:02x}.json",
		digest[0], digest[1], digest[2], digest[3]
	)
}

/// Full path to the status file for `instance_id`, or `None` if the
/// status directory cannot be resolved.
#[must_use]
pub fn status_file_path(instance_id: &InstanceId) -> Option<PathBuf> {
	status_dir().map(|dir| dir.join(status_file_name(instance_id)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hash_is_eight_lowercase_hex_chars() {
		let name = status_file_name(&InstanceId::from("/home/dev/MyProject"));
		assert!(name.starts_with("status-"));
		assert!(name.ends_with(".json"));
		let hash = &name["status-".len()..name.len() - ".json".len()];
		assert_eq!(hash.len(), 8);
		assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
	}

	#[test]
	fn hash_is_stable_for_same_id() {
		let a = status_file_name(&InstanceId::from("/home/dev/MyProject"));
		let b = status_file_name(&InstanceId::from("/home/dev/MyProject"));
		assert_eq!(a, b);
	}

	#[test]
	fn hash_differs_for_different_ids() {
		let a = status_file_name(&InstanceId::from("/home/dev/ProjectA"));
		let b = status_file_name(&InstanceId::from("/home/dev/ProjectB"));
		assert_ne!(a, b);
	}

	#[test]
	fn env_override_takes_precedence() {
		// SAFETY (test-only): serial within this process; no other test in
		// this crate reads or writes UNITY_BRIDGE_STATUS_DIR concurrently.
		unsafe {
			std::env::set_var(STATUS_DIR_ENV, "/tmp/custom-bridge-dir");
		}
		assert_eq!(status_dir(), Some(PathBuf::from("/tmp/custom-bridge-dir")));
		unsafe {
			std::env::remove_var(STATUS_DIR_ENV);
		}
	}
}
