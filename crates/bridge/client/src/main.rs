//! `unity-bridge` CLI binary.
//!
//! Issues `list`, `set-default`, and `call` requests against a running
//! broker and maps the result to the exit-code contract in §6.

use std::collections::HashMap;

use anyhow::Context;
use clap::{Parser, Subcommand};
use unity_bridge_client::config::CliOverrides;
use unity_bridge_client::{ClientConfig, ClientEngine, ClientError};
use unity_bridge_proto::types::InstanceId;

#[derive(Parser, Debug)]
#[command(name = "unity-bridge")]
#[command(about = "Client for the unity-bridge relay protocol")]
struct Args {
	#[command(subcommand)]
	command: Command,

	/// Target a specific registered instance instead of the default.
	#[arg(long, global = true)]
	instance: Option<String>,

	/// Emit machine-readable JSON instead of human-readable text.
	#[arg(long, global = true)]
	json: bool,

	/// Verbose logging.
	#[arg(short, long, global = true)]
	verbose: bool,

	/// Broker host, overriding config file and environment.
	#[arg(long, global = true)]
	relay_host: Option<String>,

	/// Broker port, overriding config file and environment.
	#[arg(long, global = true)]
	relay_port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// List registered instances.
	List,
	/// Mark an instance as the default target for commands that omit `--instance`.
	SetDefault {
		/// Instance id (project path) to mark default.
		instance: String,
	},
	/// Issue a generic command to an instance's editor-side handler.
	Call {
		/// Command name, dispatched by the target agent's command table.
		command: String,
		/// A `key=value` parameter; repeatable.
		#[arg(long = "param", value_parser = parse_param)]
		params: Vec<(String, serde_json::Value)>,
		/// Per-call timeout in milliseconds, forwarded to the broker.
		#[arg(long)]
		timeout_ms: Option<u64>,
	},
}

fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
	let (key, value) = raw
		.split_once('=')
		.ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
	let value = serde_json::from_str(value)
		.unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
	Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() {
	let args = Args::parse();
	setup_tracing(args.verbose);

	let cli = CliOverrides {
		relay_host: args.relay_host.clone(),
		relay_port: args.relay_port,
		instance: args.instance.clone(),
	};
	let config = match ClientConfig::resolve(cli).context("loading unity-bridge client config") {
		Ok(config) => config,
		Err(err) => {
			eprintln!("unity-bridge: {err:#}");
			std::process::exit(3);
		}
	};

	let instance = args
		.instance
		.clone()
		.or_else(|| config.default_instance.clone())
		.map(InstanceId::from);

	let engine = ClientEngine::new(config);
	let exit_code = run(&engine, args.command, instance, args.json).await;
	std::process::exit(exit_code);
}

async fn run(
	engine: &ClientEngine,
	command: Command,
	instance: Option<InstanceId>,
	json: bool,
) -> i32 {
	match command {
		Command::List => match engine.list_instances().await {
			Ok(instances) => {
				print_instances(&instances, json);
				0
			}
			Err(err) => report(&err),
		},
		Command::SetDefault { instance } => {
			match engine.set_default(InstanceId::from(instance.clone())).await {
				Ok(()) => {
					println!("default instance set to {instance}");
					0
				}
				Err(err) => report(&err),
			}
		}
		Command::Call {
			command,
			params,
			timeout_ms,
		} => {
			let params: HashMap<String, serde_json::Value> = params.into_iter().collect();
			let params = serde_json::to_value(params).unwrap_or(serde_json::Value::Null);
			match engine.call(instance, command, params, timeout_ms).await {
				Ok(data) => {
					print_data(&data, json);
					0
				}
				Err(err) => report(&err),
			}
		}
	}
}

fn report(err: &ClientError) -> i32 {
	eprintln!("unity-bridge: {err}");
	err.exit_code()
}

fn print_data(data: &serde_json::Value, json: bool) {
	if json {
		println!("{data}");
	} else {
		match serde_json::to_string_pretty(data) {
			Ok(s) => println!("{s}"),
			Err(_) => println!("{data}"),
		}
	}
}

fn print_instances(instances: &[unity_bridge_proto::types::InstanceSummary], json: bool) {
	if json {
		let value = serde_json::json!({ "instances": instances });
		println!("{value}");
		return;
	}
	if instances.is_empty() {
		println!("no registered instances");
		return;
	}
	for instance in instances {
		let marker = if instance.is_default { "*" } else { " " };
		println!(
			"{marker} {:<40} {:<10?} unity {}",
			instance.instance_id, instance.status, instance.unity_version
		);
	}
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();
}
