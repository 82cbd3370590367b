//! Request routing (§4.2 "Request routing" / "Tie-breaks and edge
//! cases"): dispatch-to-`READY`, `BUSY` without a queue, queueing,
//! queue-full, capability gating, and unknown-instance handling.

use tokio_util::sync::CancellationToken;
use unity_bridge_proto::types::{BrokerToAgentMessage, ErrorCode, InstanceId};

use crate::ClientRequest;

use super::helpers::{fast_config, fast_config_with_queue, register, request_id, start};

fn noop_request(id: &str, instance: &str) -> ClientRequest {
	ClientRequest {
		request_id: request_id(id),
		instance: Some(InstanceId::from(instance)),
		command: "noop".to_string(),
		params: serde_json::json!({}),
		timeout_ms: None,
	}
}

#[tokio::test]
async fn dispatches_to_a_ready_instance_and_relays_the_result() {
	let registry = start(fast_config());
	let (mut agent, _) = register(&registry, "/p", "p").await;

	let registry_task = registry.clone();
	let call = tokio::spawn(async move { registry_task.request(noop_request("c1:u1", "/p"), 5_000).await });

	let id = match agent.recv().await {
		BrokerToAgentMessage::Command { id, command, .. } => {
			assert_eq!(command, "noop");
			id
		}
		other => panic!("expected Command, got {other:?}"),
	};

	registry
		.command_result(
			InstanceId::from("/p"),
			id,
			crate::DispatchOutcome::Success(serde_json::json!({"ok": true})),
		)
		.await;

	let response = call.await.unwrap();
	match response {
		unity_bridge_proto::types::BrokerToClientMessage::Response { data, .. } => {
			assert_eq!(data, serde_json::json!({"ok": true}));
		}
		other => panic!("expected Response, got {other:?}"),
	}
}

#[tokio::test]
async fn busy_instance_without_queueing_rejects_a_second_request() {
	let registry = start(fast_config());
	let (mut agent, _) = register(&registry, "/p", "p").await;

	let registry1 = registry.clone();
	let first = tokio::spawn(async move { registry1.request(noop_request("c1:u1", "/p"), 5_000).await });
	// Let the first command occupy the BUSY slot before issuing the second.
	let first_id = match agent.recv().await {
		BrokerToAgentMessage::Command { id, .. } => id,
		other => panic!("expected Command, got {other:?}"),
	};

	let second_response = registry.request(noop_request("c1:u2", "/p"), 5_000).await;
	match second_response {
		unity_bridge_proto::types::BrokerToClientMessage::Error { error, .. } => {
			assert_eq!(error.code, ErrorCode::InstanceBusy);
		}
		other => panic!("expected INSTANCE_BUSY error, got {other:?}"),
	}

	registry
		.command_result(
			InstanceId::from("/p"),
			first_id,
			crate::DispatchOutcome::Success(serde_json::Value::Null),
		)
		.await;
	first.await.unwrap();
}

#[tokio::test]
async fn queue_enabled_admits_a_second_command_and_drains_it_on_result() {
	let registry = start(fast_config_with_queue());
	let (mut agent, _) = register(&registry, "/p", "p").await;

	let registry1 = registry.clone();
	let first = tokio::spawn(async move { registry1.request(noop_request("c1:u1", "/p"), 5_000).await });
	let first_id = match agent.recv().await {
		BrokerToAgentMessage::Command { id, .. } => id,
		other => panic!("expected Command, got {other:?}"),
	};

	let registry2 = registry.clone();
	let second = tokio::spawn(async move { registry2.request(noop_request("c1:u2", "/p"), 5_000).await });
	agent.assert_silent().await; // still queued, not yet dispatched

	registry
		.command_result(
			InstanceId::from("/p"),
			first_id,
			crate::DispatchOutcome::Success(serde_json::Value::Null),
		)
		.await;
	first.await.unwrap();

	let second_id = match agent.recv().await {
		BrokerToAgentMessage::Command { id, command, .. } => {
			assert_eq!(command, "noop");
			id
		}
		other => panic!("expected queued Command to dispatch, got {other:?}"),
	};
	registry
		.command_result(
			InstanceId::from("/p"),
			second_id,
			crate::DispatchOutcome::Success(serde_json::json!({"done": true})),
		)
		.await;
	let response = second.await.unwrap();
	match response {
		unity_bridge_proto::types::BrokerToClientMessage::Response { data, .. } => {
			assert_eq!(data, serde_json::json!({"done": true}));
		}
		other => panic!("expected Response, got {other:?}"),
	}
}

#[tokio::test]
async fn queue_full_rejects_further_commands() {
	let registry = start(fast_config_with_queue()); // queue_max_size: 2
	let (mut agent, _) = register(&registry, "/p", "p").await;

	let registry1 = registry.clone();
	let first = tokio::spawn(async move { registry1.request(noop_request("c1:u1", "/p"), 5_000).await });
	let first_id = match agent.recv().await {
		BrokerToAgentMessage::Command { id, .. } => id,
		other => panic!("expected Command, got {other:?}"),
	};

	let registry2 = registry.clone();
	let second = tokio::spawn(async move { registry2.request(noop_request("c1:u2", "/p"), 5_000).await });
	let registry3 = registry.clone();
	let third = tokio::spawn(async move { registry3.request(noop_request("c1:u3", "/p"), 5_000).await });

	let fourth_response = registry.request(noop_request("c1:u4", "/p"), 5_000).await;
	match fourth_response {
		unity_bridge_proto::types::BrokerToClientMessage::Error { error, .. } => {
			assert_eq!(error.code, ErrorCode::QueueFull);
		}
		other => panic!("expected QUEUE_FULL, got {other:?}"),
	}

	// Drain the rest so the spawned tasks don't hang around past the test.
	registry
		.command_result(InstanceId::from("/p"), first_id, crate::DispatchOutcome::Success(serde_json::Value::Null))
		.await;
	first.await.unwrap();
	for _ in 0..2 {
		if let BrokerToAgentMessage::Command { id, .. } = agent.recv().await {
			registry
				.command_result(InstanceId::from("/p"), id, crate::DispatchOutcome::Success(serde_json::Value::Null))
				.await;
		}
	}
	second.await.unwrap();
	third.await.unwrap();
}

#[tokio::test]
async fn unknown_instance_is_reported_not_found() {
	let registry = start(fast_config());
	let response = registry.request(noop_request("c1:u1", "/ghost"), 5_000).await;
	match response {
		unity_bridge_proto::types::BrokerToClientMessage::Error { error, .. } => {
			assert_eq!(error.code, ErrorCode::InstanceNotFound);
		}
		other => panic!("expected INSTANCE_NOT_FOUND, got {other:?}"),
	}
}

#[tokio::test]
async fn capability_gate_rejects_a_command_outside_the_advertised_set() {
	let mut config = fast_config();
	config.enforce_capabilities = true;
	let registry = start(config);

	let instance_id = InstanceId::from("/p");
	let (sink, _outbox) = tokio::sync::mpsc::channel(4);
	let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
	registry
		.register(
			"1.0".to_string(),
			instance_id.clone(),
			"p".to_string(),
			"2022.3".to_string(),
			vec!["allowed_command".to_string()],
			sink,
			CancellationToken::new(),
			reply_tx,
		)
		.await;
	reply_rx.await.unwrap().unwrap();

	let response = registry.request(noop_request("c1:u1", "/p"), 5_000).await;
	match response {
		unity_bridge_proto::types::BrokerToClientMessage::Error { error, .. } => {
			assert_eq!(error.code, ErrorCode::CapabilityNotSupported);
		}
		other => panic!("expected CAPABILITY_NOT_SUPPORTED, got {other:?}"),
	}
}
