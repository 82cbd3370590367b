//! unity-bridge broker binary.
//!
//! Relays requests between short-lived CLI clients and long-lived editor
//! agents over a single TCP port.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use unity_bridge_broker::config::{BrokerConfig, CliOverrides};

#[derive(Parser, Debug)]
#[command(name = "unity-bridge-broker")]
#[command(about = "Relay broker for the unity-bridge protocol")]
struct Args {
	#[command(subcommand)]
	command: Option<Command>,

	/// Verbose logging.
	#[arg(short, long, global = true)]
	verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the broker (the default when no subcommand is given).
	Serve {
		/// Host to bind the relay TCP listener on.
		#[arg(long)]
		host: Option<String>,
		/// Port to bind the relay TCP listener on.
		#[arg(long)]
		port: Option<u16>,
		/// Directory to write log files to, in addition to stderr.
		#[arg(long)]
		log_dir: Option<PathBuf>,
		/// Enable the bounded per-instance command queue.
		#[arg(long)]
		queue: bool,
	},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let (host, port, log_dir, queue) = match &args.command {
		Some(Command::Serve { host, port, log_dir, queue }) => {
			(host.clone(), *port, log_dir.clone(), *queue)
		}
		None => (None, None, None, false),
	};

	let cli = CliOverrides {
		relay_host: host,
		relay_port: port,
		log_dir,
		queue_enabled: if queue { Some(true) } else { None },
	};
	let config = BrokerConfig::resolve(cli)?;

	setup_tracing(args.verbose, config.log_dir.as_deref());
	info!(host = %config.relay_host, port = config.relay_port, "starting unity-bridge broker");

	let shutdown = CancellationToken::new();
	let shutdown_signal = shutdown.clone();
	tokio::spawn(async move {
		let _ = tokio::signal::ctrl_c().await;
		info!("received shutdown signal");
		shutdown_signal.cancel();
	});

	unity_bridge_broker::serve(config, shutdown).await
}

fn setup_tracing(verbose: bool, log_dir: Option<&std::path::Path>) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::fmt::format::FmtSpan;
	use tracing_subscriber::prelude::*;

	if let Some(log_dir) = log_dir
		&& std::fs::create_dir_all(log_dir).is_ok()
	{
		let pid = std::process::id();
		let log_path = log_dir.join(format!("unity-bridge-broker.{pid}.log"));

		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
				if verbose {
					EnvFilter::new("unity_bridge_broker=trace,debug")
				} else {
					EnvFilter::new("unity_bridge_broker=debug,info")
				}
			});

			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_span_events(FmtSpan::CLOSE)
				.with_target(true);

			tracing_subscriber::registry().with(filter).with(file_layer).init();
			tracing::info!(path = ?log_path, "broker tracing initialized");
			return;
		}
	}

	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}
