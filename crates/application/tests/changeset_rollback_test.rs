//! End-to-end test of the C6 changeset coordinator driving the C5
//! command engine against real `sled`-backed repositories, with a
//! background task standing in for device replies. Exercises the
//! spec.md changeset rollback scenario: forward execution followed by
//! a best-effort rollback that runs in strict reverse order.

use application::changeset::ChangesetCoordinator;
use application::command::CommandEngine;
use application::event_bus::EventBus;
use domain::changeset::{ChangesetCommandSpec, ChangesetOptions, ChangesetStatus};
use domain::command::{CommandRepository, CommandStatus, CommandTarget, Expect};
use domain::ids::{DeviceId, SiteId, TenantId};
use infrastructure::kv::SledStore;
use infrastructure::messaging::MqttPublisherClient;
use infrastructure::repositories::{KvChangesetRepository, KvCommandRepository};
use rumqttc::QoS;
use serde_json::{Map, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

struct FakeMqtt;

#[async_trait::async_trait]
impl MqttPublisherClient for FakeMqtt {
    async fn publish_bytes(&self, _topic: &str, _payload: &[u8], _qos: QoS, _retain: bool) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

fn ids() -> (TenantId, SiteId) {
    (
        TenantId::new("acme-corp-network-001").unwrap(),
        SiteId::new("building-west-annex-9").unwrap(),
    )
}

fn step(operation: &str) -> ChangesetCommandSpec {
    ChangesetCommandSpec {
        target: CommandTarget::Device(DeviceId::new("router-core-floor2-07").unwrap()),
        operation: operation.to_string(),
        args: Map::new(),
        timeout_ms: 2_000,
        expect: Expect::Result,
    }
}

/// Stands in for a fleet of devices: acks and completes every `sent`
/// command it observes, recording the operation name in issue order so
/// tests can assert on execution/rollback ordering.
async fn run_device_simulator(
    engine: Arc<CommandEngine>,
    repo: Arc<KvCommandRepository<SledStore>>,
    log: Arc<Mutex<Vec<String>>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_millis(5)) => {
                let pending = repo.find_non_terminal().await.unwrap();
                for command in pending {
                    if command.status == CommandStatus::Sent {
                        engine.ack_intake(&command.id).await.unwrap();
                        engine
                            .result_intake(&command.id, true, Some(json!({"ok": true})), None)
                            .await
                            .unwrap();
                        log.lock().await.push(command.operation.clone());
                    }
                }
            }
        }
    }
}

#[tokio::test]
async fn execute_then_rollback_runs_rollback_commands_in_reverse_order() {
    let (tenant, site) = ids();
    let store = Arc::new(SledStore::open_temporary().unwrap());
    let command_repo = Arc::new(KvCommandRepository::new(store.clone()));
    let changeset_repo = Arc::new(KvChangesetRepository::new(store));
    let events = Arc::new(EventBus::new(64));

    let engine = Arc::new(CommandEngine::new(
        command_repo.clone(),
        Arc::new(FakeMqtt),
        events.clone(),
        5_000,
    ));
    let coordinator = Arc::new(ChangesetCoordinator::new(
        changeset_repo,
        engine.clone(),
        events,
        50,
    ));

    let log = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();
    let simulator = tokio::spawn(run_device_simulator(
        engine,
        command_repo,
        log.clone(),
        cancel.clone(),
    ));

    let changeset = coordinator
        .create(ChangesetOptions {
            description: Some("enable uplink failover".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    coordinator.add_command(&changeset.id, step("wifi.enable")).await.unwrap();
    coordinator.add_command(&changeset.id, step("vlan.tag")).await.unwrap();
    coordinator
        .add_rollback_command(&changeset.id, step("wifi.disable"))
        .await
        .unwrap();
    coordinator
        .add_rollback_command(&changeset.id, step("vlan.untag"))
        .await
        .unwrap();

    let executed = coordinator
        .execute(&changeset.id, tenant.clone(), site.clone())
        .await
        .unwrap();
    assert_eq!(executed.status, ChangesetStatus::Completed);
    assert_eq!(*log.lock().await, vec!["wifi.enable", "vlan.tag"]);

    log.lock().await.clear();
    let rolled_back = coordinator.rollback(&changeset.id, tenant, site).await.unwrap();
    assert_eq!(rolled_back.status, ChangesetStatus::RolledBack);
    assert_eq!(*log.lock().await, vec!["vlan.untag", "wifi.disable"]);

    cancel.cancel();
    let _ = simulator.await;
}

#[tokio::test]
async fn rollback_without_prior_terminal_execution_is_rejected() {
    let (tenant, site) = ids();
    let store = Arc::new(SledStore::open_temporary().unwrap());
    let command_repo = Arc::new(KvCommandRepository::new(store.clone()));
    let changeset_repo = Arc::new(KvChangesetRepository::new(store));
    let events = Arc::new(EventBus::new(16));
    let engine = Arc::new(CommandEngine::new(command_repo, Arc::new(FakeMqtt), events.clone(), 5_000));
    let coordinator = ChangesetCoordinator::new(changeset_repo, engine, events, 50);

    let changeset = coordinator.create(ChangesetOptions::default()).await.unwrap();
    coordinator
        .add_rollback_command(&changeset.id, step("wifi.disable"))
        .await
        .unwrap();

    let err = coordinator.rollback(&changeset.id, tenant, site).await.unwrap_err();
    assert_eq!(err.kind(), "state");
}
