//! The C5 command engine: issues RPC-style commands over MQTT,
//! correlates acks/results by id, and enforces timeouts and
//! idempotent retries.

use crate::clock::now_ms;
use domain::command::{
    Command, CommandFilter, CommandOutcomeError, CommandPage, CommandRepository, CommandStatus,
    CommandTarget, Expect, TransitionOutcome,
};
use domain::error::CoreError;
use domain::event::{DomainEvent, EventPublisher};
use domain::ids::{SiteId, TenantId};
use domain::topic::{self, DeviceRef, Kind, TopicAddress};
use infrastructure::messaging::MqttPublisherClient;
use rumqttc::QoS;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PUBLISH_RETRY_ATTEMPTS: u32 = 3;
const PUBLISH_RETRY_BACKOFF: Duration = Duration::from_millis(200);

fn target_to_device_ref(target: &CommandTarget) -> DeviceRef {
    match target {
        CommandTarget::Device(id) => DeviceRef::Device(id.clone()),
        CommandTarget::Group(id) => DeviceRef::Group(id.clone()),
    }
}

#[derive(Debug, Clone)]
pub struct BatchStep {
    pub operation: String,
    pub args: Map<String, Value>,
    pub expect: Expect,
    pub wait_for_completion: bool,
    pub delay_seconds: u64,
}

pub struct CommandEngine {
    repo: Arc<dyn CommandRepository>,
    mqtt: Arc<dyn MqttPublisherClient>,
    events: Arc<dyn EventPublisher>,
    default_timeout_ms: u64,
    /// Short-TTL guard against re-publishing the same id twice within a
    /// single reconnect burst; device-side de-dup by id is assumed for
    /// anything beyond this window (spec.md 4.5).
    recently_published: moka::future::Cache<String, ()>,
}

impl CommandEngine {
    pub fn new(
        repo: Arc<dyn CommandRepository>,
        mqtt: Arc<dyn MqttPublisherClient>,
        events: Arc<dyn EventPublisher>,
        default_timeout_ms: u64,
    ) -> Self {
        Self {
            repo,
            mqtt,
            events,
            default_timeout_ms,
            recently_published: moka::future::Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(5))
                .build(),
        }
    }

    fn build_request_payload(command: &Command) -> Result<Vec<u8>, CoreError> {
        let mut body = Map::new();
        body.insert("id".to_string(), Value::String(command.id.clone()));
        body.insert("op".to_string(), Value::String(command.operation.clone()));
        body.insert("args".to_string(), Value::Object(command.args.clone()));
        body.insert("timeout_ms".to_string(), Value::from(command.timeout_ms));
        let expect = match command.expect {
            Expect::Ack => "ack",
            Expect::Result => "result",
            Expect::None => "none",
        };
        body.insert("expect".to_string(), Value::String(expect.to_string()));
        body.insert("schema".to_string(), Value::String("cmd/1.0".to_string()));
        body.insert("ts".to_string(), Value::from(command.created_at));
        serde_json::to_vec(&body).map_err(|e| CoreError::protocol(format!("failed to encode command request: {e}")))
    }

    async fn publish_request(&self, command: &Command) -> Result<(), CoreError> {
        let addr = TopicAddress {
            tenant: command.tenant.clone(),
            site: command.site.clone(),
            target: target_to_device_ref(&command.target),
            kind: Kind::CmdReq,
            subkey: None,
        };
        let topic_str = topic::build(&addr);
        let payload = Self::build_request_payload(command)?;

        let mut last_err = None;
        for attempt in 1..=PUBLISH_RETRY_ATTEMPTS {
            match self
                .mqtt
                .publish_bytes(&topic_str, &payload, QoS::AtLeastOnce, false)
                .await
            {
                Ok(()) => {
                    self.recently_published.insert(command.id.clone(), ()).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(command_id = %command.id, attempt, error = %e, "cmd/req publish failed");
                    last_err = Some(e);
                    if attempt < PUBLISH_RETRY_ATTEMPTS {
                        tokio::time::sleep(PUBLISH_RETRY_BACKOFF).await;
                    }
                }
            }
        }
        Err(CoreError::transport(format!(
            "failed to publish cmd/req after {PUBLISH_RETRY_ATTEMPTS} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    pub async fn send(
        &self,
        tenant: TenantId,
        site: SiteId,
        target: CommandTarget,
        operation: String,
        args: Map<String, Value>,
        timeout_ms: Option<u64>,
        expect: Expect,
    ) -> Result<Command, CoreError> {
        let now = now_ms();
        let id = uuid::Uuid::new_v4().to_string();
        let mut command = Command::new(
            id,
            tenant,
            site,
            target,
            operation,
            args,
            timeout_ms.unwrap_or(self.default_timeout_ms),
            expect,
            now,
        );
        self.repo.save(&command).await?;

        match self.publish_request(&command).await {
            Ok(()) => {
                command
                    .mark_sent(now_ms())
                    .map_err(|e| CoreError::state(e.to_string()))?;
            }
            Err(_) => {
                command
                    .mark_send_failed(now_ms())
                    .map_err(|e| CoreError::state(e.to_string()))?;
            }
        }
        self.repo.save(&command).await?;
        self.events
            .publish(DomainEvent::CommandStateChanged {
                command_id: command.id.clone(),
                status: command.status,
                at: now_ms(),
            })
            .await?;
        Ok(command)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Command>, CoreError> {
        self.repo.find_by_id(id).await
    }

    pub async fn list(
        &self,
        filter: CommandFilter,
        limit: usize,
        offset: usize,
    ) -> Result<CommandPage, CoreError> {
        self.repo.list(filter, limit, offset).await
    }

    pub async fn cancel(&self, id: &str) -> Result<Command, CoreError> {
        let mut command = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("command {id} not found")))?;
        command
            .cancel(now_ms())
            .map_err(|e| CoreError::state(e.to_string()))?;
        self.repo.save(&command).await?;
        self.events
            .publish(DomainEvent::CommandStateChanged {
                command_id: command.id.clone(),
                status: command.status,
                at: now_ms(),
            })
            .await?;
        Ok(command)
    }

    /// Polls until `id` reaches a terminal state or `max_wait` elapses.
    pub async fn wait(
        &self,
        id: &str,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Result<Command, CoreError> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let command = self
                .repo
                .find_by_id(id)
                .await?
                .ok_or_else(|| CoreError::not_found(format!("command {id} not found")))?;
            if command.status.is_terminal() {
                return Ok(command);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CoreError::timeout(format!(
                    "command {id} did not reach a terminal state within the wait deadline"
                )));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub async fn ack_intake(&self, id: &str) -> Result<(), CoreError> {
        let Some(mut command) = self.repo.find_by_id(id).await? else {
            warn!(command_id = id, "cmd/ack for unknown command id, ignoring");
            return Ok(());
        };
        if command.mark_ack(now_ms()) == TransitionOutcome::Applied {
            self.repo.save(&command).await?;
            self.events
                .publish(DomainEvent::CommandStateChanged {
                    command_id: command.id.clone(),
                    status: command.status,
                    at: now_ms(),
                })
                .await?;
        } else {
            self.repo.save(&command).await?;
        }
        Ok(())
    }

    pub async fn result_intake(
        &self,
        id: &str,
        ok: bool,
        result: Option<Value>,
        error: Option<CommandOutcomeError>,
    ) -> Result<(), CoreError> {
        let Some(mut command) = self.repo.find_by_id(id).await? else {
            warn!(command_id = id, "cmd/res for unknown command id, ignoring");
            return Ok(());
        };
        let outcome = command.mark_result(ok, result, error, now_ms());
        self.repo.save(&command).await?;
        if outcome == TransitionOutcome::Applied {
            self.events
                .publish(DomainEvent::CommandStateChanged {
                    command_id: command.id.clone(),
                    status: command.status,
                    at: now_ms(),
                })
                .await?;
        }
        Ok(())
    }

    async fn sweep_once(&self) -> Result<(), CoreError> {
        let now = now_ms();
        let pending = self.repo.find_non_terminal().await?;
        for mut command in pending {
            if command.is_timed_out(now) && command.mark_timeout(now) == TransitionOutcome::Applied {
                self.repo.save(&command).await?;
                self.events
                    .publish(DomainEvent::CommandStateChanged {
                        command_id: command.id.clone(),
                        status: command.status,
                        at: now,
                    })
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn run_timeout_sweep(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("command timeout sweep shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "command timeout sweep failed");
                    }
                }
            }
        }
    }

    /// Re-publishes `cmd/req` for every still-pending/sent command,
    /// e.g. after an MQTT reconnect.
    pub async fn retransmit_pending(&self) -> Result<usize, CoreError> {
        let candidates = self.repo.find_retransmittable().await?;
        let mut retransmitted = 0;
        for command in candidates {
            if self.recently_published.get(&command.id).await.is_some() {
                continue;
            }
            if self.publish_request(&command).await.is_ok() {
                retransmitted += 1;
            }
        }
        Ok(retransmitted)
    }

    /// Runs a sequential chain of steps against one target, aborting on
    /// the first `failed`/`timeout`.
    pub async fn batch_execute(
        &self,
        tenant: TenantId,
        site: SiteId,
        target: CommandTarget,
        steps: Vec<BatchStep>,
        timeout_ms: Option<u64>,
    ) -> Result<Vec<Command>, CoreError> {
        let mut results = Vec::with_capacity(steps.len());
        for step in steps {
            let command = self
                .send(
                    tenant.clone(),
                    site.clone(),
                    target.clone(),
                    step.operation,
                    step.args,
                    timeout_ms,
                    step.expect,
                )
                .await?;

            let final_command = if step.wait_for_completion {
                self.wait(
                    &command.id,
                    Duration::from_millis(200),
                    Duration::from_millis(command.timeout_ms),
                )
                .await?
            } else {
                command
            };

            let aborts = matches!(final_command.status, CommandStatus::Failed | CommandStatus::Timeout);
            results.push(final_command);
            if aborts {
                break;
            }
            if step.delay_seconds > 0 {
                tokio::time::sleep(Duration::from_secs(step.delay_seconds)).await;
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::command::MockCommandRepository;
    use domain::ids::DeviceId;

    struct FakeMqtt {
        should_fail: bool,
    }

    #[async_trait::async_trait]
    impl MqttPublisherClient for FakeMqtt {
        async fn publish_bytes(
            &self,
            _topic: &str,
            _payload: &[u8],
            _qos: QoS,
            _retain: bool,
        ) -> anyhow::Result<()> {
            if self.should_fail {
                Err(anyhow::anyhow!("simulated publish failure"))
            } else {
                Ok(())
            }
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn ids() -> (TenantId, SiteId, CommandTarget) {
        (
            TenantId::new("acme-corp-network-001").unwrap(),
            SiteId::new("building-west-annex-9").unwrap(),
            CommandTarget::Device(DeviceId::new("router-core-floor2-07").unwrap()),
        )
    }

    #[tokio::test]
    async fn send_transitions_to_sent_on_publish_success() {
        let (tenant, site, target) = ids();
        let mut repo = MockCommandRepository::new();
        repo.expect_save().returning(|_| Ok(()));

        let engine = CommandEngine::new(
            Arc::new(repo),
            Arc::new(FakeMqtt { should_fail: false }),
            Arc::new(crate::event_bus::EventBus::new(16)),
            5000,
        );

        let command = engine
            .send(tenant, site, target, "reboot".into(), Map::new(), None, Expect::Result)
            .await
            .unwrap();
        assert_eq!(command.status, CommandStatus::Sent);
    }

    #[tokio::test]
    async fn send_transitions_to_timeout_on_publish_failure() {
        let (tenant, site, target) = ids();
        let mut repo = MockCommandRepository::new();
        repo.expect_save().returning(|_| Ok(()));

        let engine = CommandEngine::new(
            Arc::new(repo),
            Arc::new(FakeMqtt { should_fail: true }),
            Arc::new(crate::event_bus::EventBus::new(16)),
            5000,
        );

        let command = engine
            .send(tenant, site, target, "reboot".into(), Map::new(), None, Expect::Result)
            .await
            .unwrap();
        assert_eq!(command.status, CommandStatus::Timeout);
        assert_eq!(command.error.as_ref().unwrap().kind, "transport");
    }

    #[tokio::test]
    async fn ack_intake_on_unknown_id_is_ignored_without_error() {
        let mut repo = MockCommandRepository::new();
        repo.expect_find_by_id().returning(|_| Ok(None));

        let engine = CommandEngine::new(
            Arc::new(repo),
            Arc::new(FakeMqtt { should_fail: false }),
            Arc::new(crate::event_bus::EventBus::new(16)),
            5000,
        );
        assert!(engine.ack_intake("missing").await.is_ok());
    }
}
