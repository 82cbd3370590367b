//! The unity-bridge broker: binds a TCP port, accepts both agent and
//! client connections on it, and relays requests through the
//! transport-agnostic [`unity_bridge_registry`] actor.
//!
//! Mirrors the teacher's `xeno-broker` library/binary split: this crate
//! holds the serving logic, `main.rs` holds only argument parsing and
//! process wiring.

pub mod config;
pub mod net;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use unity_bridge_registry::{RegistryConfig, RegistryHandle, RegistryService};

use config::BrokerConfig;

/// Starts the registry actor and binds the TCP listener, then accepts
/// connections until `shutdown` is cancelled.
pub async fn serve(config: BrokerConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
	let addr = format!("{}:{}", config.relay_host, config.relay_port);
	let listener = TcpListener::bind(&addr).await?;
	info!(%addr, "broker listening");
	serve_on(listener, config, shutdown).await;
	Ok(())
}

/// Runs the broker against an already-bound listener. Split out from
/// [`serve`] so tests can bind an ephemeral port (`127.0.0.1:0`) and learn
/// the actual address via `TcpListener::local_addr` before connecting,
/// the way the protocol contract's end-to-end scenarios are specified.
pub async fn serve_on(listener: TcpListener, config: BrokerConfig, shutdown: CancellationToken) {
	let registry_config: RegistryConfig = config.to_registry_config();
	let registry = RegistryService::start(registry_config);

	accept_loop(listener, registry.clone(), config, shutdown.clone()).await;

	info!("broker shutting down");
	registry.shutdown().await;
}

async fn accept_loop(
	listener: TcpListener,
	registry: RegistryHandle,
	config: BrokerConfig,
	shutdown: CancellationToken,
) {
	loop {
		tokio::select! {
			_ = shutdown.cancelled() => return,
			accepted = listener.accept() => {
				match accepted {
					Ok((stream, peer)) => {
						tracing::debug!(%peer, "accepted connection");
						let registry = registry.clone();
						let config = config.clone();
						tokio::spawn(async move {
							let (reader, writer) = stream.into_split();
							net::accept(reader, writer, registry, config).await;
						});
					}
					Err(e) => {
						tracing::error!(error = %e, "failed to accept connection");
					}
				}
			}
		}
	}
}
