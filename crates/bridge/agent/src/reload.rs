//! Reload sequencing (§9's design note, §4.5).
//!
//! The source's synchronous `STATUS("reloading")` send has no guarantee
//! of landing before a destructive reload starts tearing down the
//! process — hence the status-file fallback existing at all. The
//! sequence here is the redesign the spec names: write the status file
//! first (so the broker has *something* to go on even if every following
//! step fails), then best-effort the in-band `STATUS` send, then run the
//! caller's actual reload, then reconnect and re-register, then clear
//! the status file back to `ready`.

use std::time::Duration;

use tracing::warn;

use crate::statusfile::StatusFileWriter;

/// How long the best-effort `STATUS{reloading}` send is given before the
/// reload proceeds without it, per §9 ("~500ms").
pub const STATUS_SEND_BUDGET: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
	#[error("status-file write failed: {0}")]
	StatusFile(#[from] unity_bridge_proto::error::StatusFileError),
	#[error("reload handler failed: {0}")]
	Handler(String),
}

/// The opaque reload operation itself (domain-specific; out of scope per
/// §1). Implemented by the embedding editor process.
#[async_trait::async_trait]
pub trait ReloadHandler: Send + Sync {
	async fn reload(&self) -> Result<(), String>;
}

#[async_trait::async_trait]
impl<F, Fut> ReloadHandler for F
where
	F: Fn() -> Fut + Send + Sync,
	Fut: std::future::Future<Output = Result<(), String>> + Send,
{
	async fn reload(&self) -> Result<(), String> {
		(self)().await
	}
}

/// Runs steps (i)-(iii) of the reload sequence: status-file write,
/// best-effort `STATUS` send, then the reload itself. The caller
/// (the connection runtime) is responsible for steps (iv)-(v) —
/// reconnect/`REGISTER` and the status-file rewrite to `ready` — since
/// those require a fresh connection this function has no access to.
///
/// `send_status` is given [`STATUS_SEND_BUDGET`] to complete; a timeout
/// or send failure is logged and swallowed; the status file already
/// written is the fallback for exactly this case.
pub async fn begin_reload<H, S, Fut>(
	status_file: &StatusFileWriter,
	handler: &H,
	send_status: S,
) -> Result<(), ReloadError>
where
	H: ReloadHandler + ?Sized,
	S: FnOnce() -> Fut,
	Fut: std::future::Future<Output = ()>,
{
	status_file.write_reloading().await?;

	if tokio::time::timeout(STATUS_SEND_BUDGET, send_status())
		.await
		.is_err()
	{
		warn!("best-effort STATUS(reloading) send did not complete in time, relying on status file");
	}

	handler.reload().await.map_err(ReloadError::Handler)
}
