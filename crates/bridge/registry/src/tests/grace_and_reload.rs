//! Grace periods and reload transitions (§4.2 "Reload handling" /
//! "Disconnection and reconnection"): immediate eviction on a clean
//! disconnect, grace-period survival across a reconnect, grace-period
//! expiry, `STATUS: reloading` transitions, and default promotion.

use std::time::Duration;

use unity_bridge_proto::types::{BrokerToAgentMessage, ErrorCode, InstanceId, StatusFileStatus};

use crate::ClientRequest;

use super::helpers::{fast_config, register, request_id, start, write_status_file, STATUS_DIR_ENV_LOCK};

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
async fn disconnect_with_no_reload_evidence_evicts_immediately() {
	let _guard = STATUS_DIR_ENV_LOCK.lock().await;
	let dir = tempfile::tempdir().unwrap();
	unsafe {
		std::env::set_var(unity_bridge_proto::paths::STATUS_DIR_ENV, dir.path());
	}

	let registry = start(fast_config());
	let (agent, ok) = register(&registry, "/p", "p").await;
	drop(agent);

	registry.connection_lost(InstanceId::from("/p"), ok.epoch).await;

	// No STATUS: reloading and no status file, so the instance is gone
	// right away rather than parked in a grace period.
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert!(registry.list_instances().await.is_empty());

	unsafe {
		std::env::remove_var(unity_bridge_proto::paths::STATUS_DIR_ENV);
	}
}

#[tokio::test]
async fn reconnect_within_grace_period_resumes_normal_routing() {
	let registry = start(fast_config()); // grace_period_ms: 150
	let (mut first, ok1) = register(&registry, "/p", "p").await;

	registry.status_update(InstanceId::from("/p"), unity_bridge_proto::types::AgentStatus::Reloading).await;
	registry.connection_lost(InstanceId::from("/p"), ok1.epoch).await;

	// Re-register promptly, well inside the grace window.
	let (mut second, ok) = register(&registry, "/p", "p").await;
	assert!(ok.took_over);

	// Outlive the original grace deadline; the re-register must have
	// cancelled it via the generation bump, so the instance survives.
	tokio::time::sleep(Duration::from_millis(200)).await;
	let instances = registry.list_instances().await;
	assert_eq!(instances.len(), 1);

	let registry_task = registry.clone();
	tokio::spawn(async move {
		registry_task.request(noop_request("c1:u1", "/p"), 5_000).await;
	});
	match second.recv().await {
		BrokerToAgentMessage::Command { command, .. } => assert_eq!(command, "noop"),
		other => panic!("expected Command on the reconnected agent, got {other:?}"),
	}
	first.assert_silent().await;
}

#[tokio::test]
async fn grace_period_expiry_without_reconnect_evicts_and_fails_pending_work() {
	let registry = start(fast_config()); // grace_period_ms: 150
	let (mut agent, ok) = register(&registry, "/p", "p").await;

	let registry_task = registry.clone();
	let call = tokio::spawn(async move { registry_task.request(noop_request("c1:u1", "/p"), 5_000).await });
	let _id = match agent.recv().await {
		BrokerToAgentMessage::Command { id, .. } => id,
		other => panic!("expected Command, got {other:?}"),
	};

	registry.status_update(InstanceId::from("/p"), unity_bridge_proto::types::AgentStatus::Reloading).await;
	registry.connection_lost(InstanceId::from("/p"), ok.epoch).await;

	// Outlast the grace period without ever re-registering.
	tokio::time::sleep(Duration::from_millis(250)).await;
	assert!(registry.list_instances().await.is_empty());

	let response = call.await.unwrap();
	match response {
		unity_bridge_proto::types::BrokerToClientMessage::Error { error, .. } => {
			assert_eq!(error.code, ErrorCode::Timeout);
		}
		other => panic!("expected the in-flight command to fail on eviction, got {other:?}"),
	}
}

#[tokio::test]
async fn status_reloading_frame_parks_the_instance_and_times_out_without_a_reconnect() {
	let registry = start(fast_config()); // reload_timeout_ms: 150
	let (_agent, _) = register(&registry, "/p", "p").await;

	registry.status_update(InstanceId::from("/p"), unity_bridge_proto::types::AgentStatus::Reloading).await;

	let status = registry.peek_status(InstanceId::from("/p")).await;
	assert_eq!(status, Some(crate::InstanceStatus::Reloading));

	tokio::time::sleep(Duration::from_millis(250)).await;
	assert!(registry.list_instances().await.is_empty());
}

#[tokio::test]
async fn connection_lost_with_only_status_file_evidence_enters_grace_period() {
	let _guard = STATUS_DIR_ENV_LOCK.lock().await;
	let dir = tempfile::tempdir().unwrap();
	let instance_id = InstanceId::from("/p");
	write_status_file(dir.path(), &instance_id, StatusFileStatus::Reloading);

	let registry = start(fast_config());
	let (agent, ok) = register(&registry, "/p", "p").await;
	drop(agent);

	registry.connection_lost(instance_id.clone(), ok.epoch).await;
	// Still present immediately after: the status file evidence should
	// have parked it in a grace period instead of evicting outright.
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert_eq!(registry.list_instances().await.len(), 1);

	tokio::time::sleep(Duration::from_millis(200)).await;
	assert!(registry.list_instances().await.is_empty());

	unsafe {
		std::env::remove_var(unity_bridge_proto::paths::STATUS_DIR_ENV);
	}
}

#[tokio::test]
async fn evicting_the_default_promotes_the_earliest_survivor() {
	let registry = start(fast_config());
	let (agent_p, ok_p) = register(&registry, "/p", "p").await;
	let (_agent_q, _) = register(&registry, "/q", "q").await;

	let instances = registry.list_instances().await;
	assert!(instances.iter().find(|i| i.instance_id == InstanceId::from("/p")).unwrap().is_default);

	drop(agent_p);
	registry.connection_lost(InstanceId::from("/p"), ok_p.epoch).await;
	tokio::time::sleep(Duration::from_millis(20)).await;

	let instances = registry.list_instances().await;
	assert_eq!(instances.len(), 1);
	assert!(instances[0].is_default);
	assert_eq!(instances[0].instance_id, InstanceId::from("/q"));
}
