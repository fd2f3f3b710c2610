//! The C7 ingest pipeline: fans MQTT messages out to the right
//! consumer by topic kind, with per-device ordering and a
//! back-pressure policy that protects state/lwt/command traffic at the
//! expense of telemetry and events.

use crate::command::CommandEngine;
use crate::device::DeviceRegistry;
use crate::event_bus::EventBus;
use domain::envelope::{decode_envelope, CURRENT_SCHEMA_MAJOR, Envelope, SchemaVersion};
use domain::error::CoreError;
use domain::event::{DomainEvent, EventPublisher};
use domain::topic::{self, DeviceRef, Kind};
use infrastructure::messaging::{MqttClient, MqttMessage};
use serde_json::Value;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The inbound subscription set (spec.md 6): wildcards across every
/// tenant/site/device, fanned in to one broadcast receiver.
pub const SUBSCRIPTIONS: &[&str] = &[
    "v1/+/+/+/state",
    "v1/+/+/+/attr",
    "v1/+/+/+/lwt",
    "v1/+/+/+/evt/#",
    "v1/+/+/+/cmd/ack",
    "v1/+/+/+/cmd/res",
    "v1/+/+/+/telemetry/#",
];

#[derive(Debug, Default)]
pub struct IngestStats {
    pub parse_errors: AtomicU64,
    pub unknown_kind: AtomicU64,
    pub dropped_telemetry: AtomicU64,
    pub dropped_events: AtomicU64,
    pub routed: AtomicU64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            unknown_kind: self.unknown_kind.load(Ordering::Relaxed),
            dropped_telemetry: self.dropped_telemetry.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            routed: self.routed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub parse_errors: u64,
    pub unknown_kind: u64,
    pub dropped_telemetry: u64,
    pub dropped_events: u64,
    pub routed: u64,
}

pub struct IngestPipeline {
    mqtt: MqttClient,
    devices: Arc<DeviceRegistry>,
    commands: Arc<CommandEngine>,
    events: Arc<EventBus>,
    worker_count: usize,
    queue_size: usize,
    stats: Arc<IngestStats>,
}

impl IngestPipeline {
    pub fn new(
        mqtt: MqttClient,
        devices: Arc<DeviceRegistry>,
        commands: Arc<CommandEngine>,
        events: Arc<EventBus>,
        worker_count: usize,
        queue_size: usize,
    ) -> Self {
        Self {
            mqtt,
            devices,
            commands,
            events,
            worker_count: worker_count.max(1),
            queue_size,
            stats: Arc::new(IngestStats::default()),
        }
    }

    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn subscribe_all(&self) -> Result<(), CoreError> {
        for topic in SUBSCRIPTIONS {
            self.mqtt
                .subscribe(topic)
                .await
                .map_err(|e| CoreError::transport(e.to_string()))?;
        }
        Ok(())
    }

    fn shard_for(device_key: &str, worker_count: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        device_key.hash(&mut hasher);
        (hasher.finish() as usize) % worker_count
    }

    /// Consumes the shared MQTT broadcast receiver, hashing each message
    /// to a worker by device key so a single device's messages are
    /// always processed in order, then returns once `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut senders = Vec::with_capacity(self.worker_count);
        let mut worker_handles = Vec::with_capacity(self.worker_count);
        for worker_id in 0..self.worker_count {
            let (tx, rx) = mpsc::channel::<MqttMessage>(self.queue_size);
            senders.push(tx);
            let pipeline = Arc::clone(&self);
            let worker_cancel = cancel.clone();
            worker_handles.push(tokio::spawn(pipeline.run_worker(worker_id, rx, worker_cancel)));
        }

        let mut rx = self.mqtt.subscribe_messages();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = rx.recv() => {
                    match received {
                        Ok(message) => self.dispatch(&senders, message).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "ingest dispatcher lagged behind mqtt broadcast");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        for handle in worker_handles {
            let _ = handle.await;
        }
    }

    /// Routes one raw message to its shard, applying the drop-oldest
    /// back-pressure policy for telemetry/events and blocking for
    /// everything else (spec.md 4.7).
    async fn dispatch(&self, senders: &[mpsc::Sender<MqttMessage>], message: MqttMessage) {
        let addr = match topic::parse(&message.topic) {
            Ok(addr) => addr,
            Err(e) => {
                self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                warn!(topic = %message.topic, error = %e, "failed to parse inbound topic");
                return;
            }
        };
        let device_key = match &addr.target {
            DeviceRef::Device(id) => id.as_str().to_string(),
            DeviceRef::Group(id) => id.as_str().to_string(),
        };
        let shard = Self::shard_for(&device_key, senders.len());
        let sender = &senders[shard];

        let droppable = matches!(&addr.kind, Kind::Telemetry | Kind::Evt);
        if droppable {
            if sender.try_send(message).is_err() {
                match &addr.kind {
                    Kind::Telemetry => {
                        self.stats.dropped_telemetry.fetch_add(1, Ordering::Relaxed);
                    }
                    Kind::Evt => {
                        self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => unreachable!(),
                }
            }
        } else if sender.send(message).await.is_err() {
            warn!("ingest worker channel closed while dispatching a protected message");
        }
    }

    async fn run_worker(
        self: Arc<Self>,
        worker_id: usize,
        mut rx: mpsc::Receiver<MqttMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(worker_id, "ingest worker shutting down");
                    return;
                }
                message = rx.recv() => {
                    match message {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            debug!(worker_id, "ingest worker channel closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&self, message: MqttMessage) {
        let addr = match topic::parse(&message.topic) {
            Ok(addr) => addr,
            Err(e) => {
                self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                warn!(topic = %message.topic, error = %e, "failed to parse inbound topic");
                return;
            }
        };

        let kind = addr.kind.clone();
        let result = match kind {
            Kind::State | Kind::Attr | Kind::Lwt | Kind::Telemetry => self
                .devices
                .update_from_message(&message.topic, &message.payload)
                .await,
            Kind::CmdAck => self.handle_cmd_ack(&message.payload).await,
            Kind::CmdRes => self.handle_cmd_res(&message.payload).await,
            Kind::Evt => self.handle_event(addr, &message.payload).await,
            Kind::CmdReq => {
                warn!(topic = %message.topic, "dropping inbound cmd/req, this topic is outbound-only");
                Ok(())
            }
            Kind::Unknown(kind) => {
                self.stats.unknown_kind.fetch_add(1, Ordering::Relaxed);
                warn!(kind = %kind, "dropping message with unrecognized kind");
                Ok(())
            }
        };

        match result {
            Ok(()) => {
                self.stats.routed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "failed to route inbound message");
            }
        }
    }

    /// Warns on a schema major-version mismatch without refusing to
    /// route the message (spec.md 4.2): the payload already decoded
    /// structurally, so routing proceeds regardless.
    fn warn_on_schema_mismatch(&self, topic: &str, envelope: &Envelope) {
        if let Ok((name, version)) = envelope.schema_version() {
            let known = SchemaVersion { major: CURRENT_SCHEMA_MAJOR, minor: 0 };
            if !version.compatible_with(known) {
                warn!(
                    topic,
                    schema = %name,
                    major = version.major,
                    known_major = CURRENT_SCHEMA_MAJOR,
                    "schema major-version mismatch, routing anyway since payload is structurally decodable"
                );
            }
        }
    }

    async fn handle_cmd_ack(&self, payload: &[u8]) -> Result<(), CoreError> {
        let envelope = decode_envelope(payload)?;
        self.warn_on_schema_mismatch("cmd/ack", &envelope);
        let id = envelope
            .body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::protocol("cmd/ack missing 'id'".to_string()))?;
        self.commands.ack_intake(id).await
    }

    async fn handle_cmd_res(&self, payload: &[u8]) -> Result<(), CoreError> {
        let envelope = decode_envelope(payload)?;
        self.warn_on_schema_mismatch("cmd/res", &envelope);
        let id = envelope
            .body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::protocol("cmd/res missing 'id'".to_string()))?
            .to_string();
        let ok = envelope
            .body
            .get("ok")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let result = envelope.body.get("result").cloned();
        let error = envelope
            .body
            .get("error")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        self.commands.result_intake(&id, ok, result, error).await
    }

    /// `evt/*` is relayed to C8 subscribers only; it never mutates
    /// stored state (spec.md 4.7).
    async fn handle_event(&self, addr: topic::TopicAddress, payload: &[u8]) -> Result<(), CoreError> {
        let envelope = decode_envelope(payload)?;
        self.warn_on_schema_mismatch("evt", &envelope);
        let device_id = match addr.target {
            DeviceRef::Device(id) => id,
            DeviceRef::Group(_) => {
                return Err(CoreError::protocol("evt messages must be device-addressed".to_string()));
            }
        };
        let event_type = addr.subkey.unwrap_or_else(|| "evt".to_string());
        self.events
            .publish(DomainEvent::DeviceEvent {
                tenant: addr.tenant,
                site: addr.site,
                device_id,
                event_type,
                envelope,
            })
            .await
    }
}
