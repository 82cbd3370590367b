//! The agent's command dispatch table.
//!
//! §9's REDESIGN FLAGS call for replacing the source's attribute-tag
//! reflection scan with an explicit table populated at startup; this is
//! that table. The teacher's closest analogue is `LspLauncher`
//! (`examples/Alb-O-xeno/crates/broker/broker/src/launcher.rs`): a boxed
//! trait object resolved once at construction rather than looked up by
//! name at call time through reflection. Individual handlers — scene
//! manipulation, asset queries, screenshots, the profiler, the test
//! runner — are the out-of-scope tool handlers named in §1; this crate
//! only needs enough shape to dispatch to them and to let tests register
//! fakes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use unity_bridge_proto::types::WireError;

/// One registered command's implementation.
///
/// Handlers run on whatever task the runtime's dispatch loop schedules
/// them on; a handler that must touch the editor's main thread is
/// expected to hop there itself (e.g. via its own `mpsc` handoff), which
/// is why this trait is `async` rather than a plain closure — it lets a
/// handler `.await` that handoff without blocking the connection's read
/// loop.
#[async_trait]
pub trait CommandHandler: Send + Sync {
	async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, WireError>;
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
	F: Fn(serde_json::Value) -> Fut + Send + Sync,
	Fut: std::future::Future<Output = Result<serde_json::Value, WireError>> + Send,
{
	async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, WireError> {
		(self)(params).await
	}
}

/// The command name -> handler map populated at agent startup.
#[derive(Clone, Default)]
pub struct CommandTable {
	handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, name: impl Into<String>, handler: impl CommandHandler + 'static) {
		self.handlers.insert(name.into(), Arc::new(handler));
	}

	#[must_use]
	pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
		self.handlers.get(name).cloned()
	}

	#[must_use]
	pub fn contains(&self, name: &str) -> bool {
		self.handlers.contains_key(name)
	}
}
