//! The client request engine (§4.3): builds requests, retries the
//! classified-retryable error codes with exponential backoff, and
//! reuses one `request_id` across retries so the broker's idempotency
//! cache (`unity_bridge_registry::cache`) collapses them into at most one
//! side-effectful execution.
//!
//! Each call opens a fresh connection: a short-lived CLI invocation has
//! no long-lived session to preserve across a retry, and a fresh connect
//! is itself how the client discovers "broker unreachable" versus "broker
//! reachable but the instance isn't ready yet".

use tokio::io::BufReader;
use tokio::net::TcpStream;
use unity_bridge_proto::types::{
	BrokerToClientMessage, ClientMessage, InstanceId, InstanceSummary, RequestId, WireError,
};

use crate::config::ClientConfig;
use crate::error::ClientError;

pub struct ClientEngine {
	config: ClientConfig,
	client_id: String,
}

impl ClientEngine {
	pub fn new(config: ClientConfig) -> Self {
		Self {
			config,
			client_id: uuid::Uuid::new_v4().to_string(),
		}
	}

	/// Issues a `REQUEST` for `command`, retrying retryable errors per
	/// §4.3's backoff schedule. Returns the response's `data` payload on
	/// success, or a classified [`ClientError`] otherwise.
	pub async fn call(
		&self,
		instance: Option<InstanceId>,
		command: String,
		params: serde_json::Value,
		timeout_ms: Option<u64>,
	) -> Result<serde_json::Value, ClientError> {
		let id = self.new_request_id();
		let message = ClientMessage::Request {
			id,
			instance,
			command,
			params,
			timeout_ms,
		};
		match self.send_with_retry(message).await? {
			BrokerToClientMessage::Response { data, .. } => Ok(data),
			BrokerToClientMessage::Error { error, .. } => Err(ClientError::Broker(error)),
			BrokerToClientMessage::Instances { .. } => {
				unreachable!("a REQUEST frame never gets an INSTANCES reply")
			}
		}
	}

	pub async fn list_instances(&self) -> Result<Vec<InstanceSummary>, ClientError> {
		let message = ClientMessage::ListInstances {
			id: self.new_request_id(),
		};
		match self.send_with_retry(message).await? {
			BrokerToClientMessage::Instances { data, .. } => Ok(data.instances),
			BrokerToClientMessage::Error { error, .. } => Err(ClientError::Broker(error)),
			BrokerToClientMessage::Response { .. } => {
				unreachable!("a LIST_INSTANCES frame never gets a RESPONSE reply")
			}
		}
	}

	pub async fn set_default(&self, instance: InstanceId) -> Result<(), ClientError> {
		let message = ClientMessage::SetDefault {
			id: self.new_request_id(),
			instance,
		};
		match self.send_with_retry(message).await? {
			BrokerToClientMessage::Response { .. } => Ok(()),
			BrokerToClientMessage::Error { error, .. } => Err(ClientError::Broker(error)),
			BrokerToClientMessage::Instances { .. } => {
				unreachable!("a SET_DEFAULT frame never gets an INSTANCES reply")
			}
		}
	}

	fn new_request_id(&self) -> RequestId {
		RequestId::from(format!("{}:{}", self.client_id, uuid::Uuid::new_v4()))
	}

	/// Sends `message`, retrying as long as the broker's reply carries a
	/// retryable [`WireError`] and the backoff schedule still has budget.
	/// The request id inside `message` is fixed by the caller and never
	/// changes across attempts.
	async fn send_with_retry(
		&self,
		message: ClientMessage,
	) -> Result<BrokerToClientMessage, ClientError> {
		let mut cursor = self.config.backoff.cursor();
		let mut attempts: u32 = 0;

		loop {
			attempts += 1;
			let reply = self.send_once(&message).await?;

			let retryable_error = match &reply {
				BrokerToClientMessage::Error { error, .. } if error.code.is_retryable() => {
					Some(error.clone())
				}
				_ => None,
			};

			let Some(error) = retryable_error else {
				return Ok(reply);
			};

			match cursor.next_delay() {
				Some(delay) => {
					tracing::debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, code = ?error.code, "retrying after broker error");
					tokio::time::sleep(delay).await;
				}
				None => {
					return Err(ClientError::RetriesExhausted {
						attempts,
						last: error,
					});
				}
			}
		}
	}

	/// Connects, sends one frame, and reads one reply, all bounded by the
	/// configured socket timeout (§4.3: "15s per call; longer than
	/// worst-case broker wait so the broker has the opportunity to bridge
	/// a reload instead of the client failing prematurely").
	async fn send_once(&self, message: &ClientMessage) -> Result<BrokerToClientMessage, ClientError> {
		let addr = format!("{}:{}", self.config.relay_host, self.config.relay_port);
		let attempt = async {
			let stream = TcpStream::connect(&addr)
				.await
				.map_err(|source| ClientError::Connect {
					addr: addr.clone(),
					source,
				})?;
			let (reader, mut writer) = stream.into_split();
			let mut reader = BufReader::new(reader);

			unity_bridge_proto::write_frame(&mut writer, message).await?;
			let reply: BrokerToClientMessage = unity_bridge_proto::read_frame(&mut reader).await?;
			Ok(reply)
		};

		match tokio::time::timeout(self.config.socket_timeout, attempt).await {
			Ok(result) => result,
			Err(_) => Err(ClientError::SocketTimeout),
		}
	}
}
