//! Agent-side write contract for the status-file fallback channel (§4.4,
//! §9's reload-sequencing design note).
//!
//! Every write is whole-file and atomic: a sibling temp file is written
//! first and renamed over the target, so a reader on the broker side
//! never observes a partially-written record. `seq` is generated with an
//! atomic increment per agent process, per §3 invariant (e): "`seq` in
//! status files is strictly monotonic per agent process lifetime."
//! File IO is offloaded to a blocking task per §5's concurrency model
//! ("may offload work (file writes, encoding) via
//! `tokio::task::spawn_blocking`") so the async reload sequence never
//! blocks on disk.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use unity_bridge_proto::error::StatusFileError;
use unity_bridge_proto::paths::status_file_path;
use unity_bridge_proto::types::{InstanceId, StatusFileRecord, StatusFileStatus};

/// Writes and clears the status file for one instance across the
/// lifetime of one agent process. Cheaply `Clone`: the sequence counter
/// is shared.
#[derive(Clone)]
pub struct StatusFileWriter {
	instance_id: InstanceId,
	project_name: String,
	unity_version: String,
	relay_host: String,
	relay_port: u16,
	seq: Arc<AtomicU64>,
}

impl StatusFileWriter {
	pub fn new(
		instance_id: InstanceId,
		project_name: String,
		unity_version: String,
		relay_host: String,
		relay_port: u16,
	) -> Self {
		Self {
			instance_id,
			project_name,
			unity_version,
			relay_host,
			relay_port,
			seq: Arc::new(AtomicU64::new(0)),
		}
	}

	fn next_record(&self, status: StatusFileStatus) -> StatusFileRecord {
		// `fetch_add` returns the pre-increment value; starting the
		// counter at 0 and adding 1 here means the first record written
		// by this process carries seq 1, leaving 0 free as "never
		// written" for any reader that cares to distinguish the two.
		let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
		StatusFileRecord {
			instance_id: self.instance_id.clone(),
			project_name: self.project_name.clone(),
			unity_version: self.unity_version.clone(),
			status,
			relay_host: self.relay_host.clone(),
			relay_port: self.relay_port,
			timestamp: chrono::Utc::now().to_rfc3339(),
			seq,
		}
	}

	/// Marks the instance `reloading`. Called before a potentially
	/// destructive reload begins, so the broker has a fallback signal if
	/// the in-band `STATUS` send never lands.
	pub async fn write_reloading(&self) -> Result<(), StatusFileError> {
		let record = self.next_record(StatusFileStatus::Reloading);
		self.write(record).await
	}

	/// Marks the instance `ready` again, after a reload completes and the
	/// agent has re-registered.
	pub async fn write_ready(&self) -> Result<(), StatusFileError> {
		let record = self.next_record(StatusFileStatus::Ready);
		self.write(record).await
	}

	/// Removes the status file on clean shutdown, per §4.4's write
	/// contract ("or deletes the file on clean shutdown").
	pub async fn delete(&self) -> Result<(), StatusFileError> {
		let Some(path) = status_file_path(&self.instance_id) else {
			return Ok(());
		};
		tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StatusFileError::Io(e)),
		})
		.await
		.expect("blocking status-file delete task panicked")
	}

	async fn write(&self, record: StatusFileRecord) -> Result<(), StatusFileError> {
		let Some(path) = status_file_path(&self.instance_id) else {
			return Ok(());
		};
		tokio::task::spawn_blocking(move || write_atomic(&path, &record))
			.await
			.expect("blocking status-file write task panicked")
	}
}

fn write_atomic(path: &PathBuf, record: &StatusFileRecord) -> Result<(), StatusFileError> {
	if let Some(dir) = path.parent() {
		std::fs::create_dir_all(dir)?;
	}
	let tmp_path = path.with_extension(format!("tmp.{}", std::process::id()));
	let body = serde_json::to_vec(record)?;
	std::fs::write(&tmp_path, &body)?;
	std::fs::rename(&tmp_path, path)?;
	Ok(())
}
