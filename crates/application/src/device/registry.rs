//! The C3 device registry: merges per-device MQTT updates into
//! coherent records, tracks online/offline via a staleness sweep, and
//! persists write-through to C1.

use crate::clock::now_ms;
use domain::device::{Device, DeviceFilter, DevicePage, DeviceRepository, DeviceType, Health};
use domain::envelope::{decode_envelope, CURRENT_SCHEMA_MAJOR, SchemaVersion};
use domain::error::CoreError;
use domain::event::{DomainEvent, EventPublisher, OfflineReason};
use domain::ids::{DeviceId, SiteId, TenantId};
use domain::topic::{self, DeviceRef, Kind};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct DeviceStats {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
}

type DeviceKey = (TenantId, SiteId, DeviceId);

pub struct DeviceRegistry {
    repo: Arc<dyn DeviceRepository>,
    events: Arc<dyn EventPublisher>,
    cache: RwLock<BTreeMap<DeviceKey, Device>>,
    staleness_threshold_ms: i64,
}

fn parse_health(value: Option<&Value>) -> Health {
    match value.and_then(Value::as_str) {
        Some("ok") => Health::Ok,
        Some("warn") => Health::Warn,
        Some("error") => Health::Error,
        _ => Health::Unknown,
    }
}

fn parse_device_type(value: Option<&Value>) -> Option<DeviceType> {
    match value.and_then(Value::as_str) {
        Some("router") => Some(DeviceType::Router),
        Some("ap") => Some(DeviceType::Ap),
        Some("switch") => Some(DeviceType::Switch),
        Some("iot") => Some(DeviceType::Iot),
        Some("client") => Some(DeviceType::Client),
        Some("gateway") => Some(DeviceType::Gateway),
        _ => None,
    }
}

impl DeviceRegistry {
    pub fn new(
        repo: Arc<dyn DeviceRepository>,
        events: Arc<dyn EventPublisher>,
        staleness_threshold_ms: i64,
    ) -> Self {
        Self {
            repo,
            events,
            cache: RwLock::new(BTreeMap::new()),
            staleness_threshold_ms,
        }
    }

    /// Rehydrate the in-memory cache from C1 on startup.
    pub async fn load_from_store(&self) -> Result<(), CoreError> {
        let page = self
            .repo
            .list(DeviceFilter::default(), usize::MAX, 0)
            .await?;
        let mut cache = self.cache.write().await;
        for device in page.items {
            let key = (device.tenant.clone(), device.site.clone(), device.device_id.clone());
            cache.insert(key, device);
        }
        info!(count = cache.len(), "device registry loaded from store");
        Ok(())
    }

    /// Flush every cached device back to C1, e.g. on graceful shutdown.
    pub async fn save_to_store(&self) -> Result<(), CoreError> {
        let cache = self.cache.read().await;
        for device in cache.values() {
            self.repo.save(device).await?;
        }
        Ok(())
    }

    pub async fn get(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        device_id: &DeviceId,
    ) -> Option<Device> {
        let key = (tenant.clone(), site.clone(), device_id.clone());
        self.cache.read().await.get(&key).cloned()
    }

    pub async fn list(&self, filter: DeviceFilter, limit: usize, offset: usize) -> DevicePage {
        let cache = self.cache.read().await;
        let matching: Vec<Device> = cache
            .values()
            .filter(|d| filter.tenant.as_ref().is_none_or(|t| &d.tenant == t))
            .filter(|d| filter.site.as_ref().is_none_or(|s| &d.site == s))
            .filter(|d| filter.online.is_none_or(|online| d.online == online))
            .cloned()
            .collect();
        let total = matching.len();
        let items = matching.into_iter().skip(offset).take(limit).collect();
        DevicePage { items, total }
    }

    pub async fn stats(&self) -> DeviceStats {
        let cache = self.cache.read().await;
        let total = cache.len();
        let online = cache.values().filter(|d| d.online).count();
        DeviceStats {
            total,
            online,
            offline: total - online,
        }
    }

    /// Decode and merge a single MQTT message into its device record.
    /// Only `state|attr|lwt|telemetry` kinds mutate the registry; `evt`
    /// and command kinds are routed elsewhere by the ingest pipeline.
    pub async fn update_from_message(&self, topic_str: &str, payload: &[u8]) -> Result<(), CoreError> {
        let addr = topic::parse(topic_str)?;
        let device_id = match &addr.target {
            DeviceRef::Device(id) => id.clone(),
            DeviceRef::Group(_) => {
                return Err(CoreError::protocol(
                    "device registry does not accept group-addressed messages".to_string(),
                ));
            }
        };
        let envelope = decode_envelope(payload)?;
        if let Ok((name, version)) = envelope.schema_version() {
            let known = SchemaVersion { major: CURRENT_SCHEMA_MAJOR, minor: 0 };
            if !version.compatible_with(known) {
                warn!(
                    topic = topic_str,
                    schema = %name,
                    major = version.major,
                    known_major = CURRENT_SCHEMA_MAJOR,
                    "schema major-version mismatch, routing anyway since payload is structurally decodable"
                );
            }
        }
        let now = now_ms();
        let key = (addr.tenant.clone(), addr.site.clone(), device_id.clone());

        let mut cache = self.cache.write().await;
        let device = cache
            .entry(key.clone())
            .or_insert_with(|| Device::new(addr.tenant.clone(), addr.site.clone(), device_id.clone(), now));
        let was_online = device.online;

        match addr.kind {
            Kind::State => {
                let health = parse_health(envelope.body.get("health"));
                let uptime_s = envelope.body.get("uptime_s").and_then(Value::as_u64);
                let firmware = envelope
                    .body
                    .get("firmware")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let components = envelope
                    .body
                    .get("components")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                device.apply_state(envelope.ts, health, uptime_s, firmware, components, now);
            }
            Kind::Attr => {
                let device_type = parse_device_type(envelope.body.get("device_type"));
                let mut attrs: BTreeMap<String, Value> = envelope.body.into_iter().collect();
                attrs.remove("device_type");
                device.apply_attr(attrs, device_type, envelope.ts, now);
            }
            Kind::Telemetry => {
                let metric = addr.subkey.as_deref().ok_or_else(|| {
                    CoreError::protocol("telemetry message missing metric subkey".to_string())
                })?;
                let value = envelope
                    .body
                    .get("value")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::from_iter(envelope.body.clone())));
                device.apply_telemetry(metric, value, envelope.ts, now);
            }
            Kind::Lwt => {
                let status = envelope
                    .body
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("offline")
                    .to_string();
                let message = envelope
                    .body
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                device.apply_lwt(status, message, envelope.ts, now);
            }
            other => {
                debug!(kind = ?other, "device registry ignoring non-mutating kind");
                return Ok(());
            }
        }

        let device_snapshot = device.clone();
        let is_online = device_snapshot.online;
        drop(cache);

        self.repo.save(&device_snapshot).await?;

        if was_online && !is_online {
            let reason = if matches!(addr.kind, Kind::Lwt) {
                OfflineReason::Lwt
            } else {
                OfflineReason::Staleness
            };
            self.events
                .publish(DomainEvent::DeviceOffline {
                    tenant: addr.tenant,
                    site: addr.site,
                    device_id,
                    reason,
                    at: now,
                })
                .await?;
        } else if !was_online && is_online {
            self.events
                .publish(DomainEvent::DeviceOnline {
                    tenant: addr.tenant,
                    site: addr.site,
                    device_id,
                    at: now,
                })
                .await?;
        }

        Ok(())
    }

    /// One sweep of the staleness check (spec.md 4.3): devices whose
    /// `last_seen` is older than the threshold are marked offline.
    async fn sweep_once(&self) -> Result<(), CoreError> {
        let now = now_ms();
        let mut offline = Vec::new();
        {
            let mut cache = self.cache.write().await;
            for (key, device) in cache.iter_mut() {
                if device.online && device.is_stale(now, self.staleness_threshold_ms) {
                    device.mark_stale_offline(now);
                    offline.push((key.clone(), device.clone()));
                }
            }
        }
        for (_, device) in &offline {
            self.repo.save(device).await?;
        }
        for ((tenant, site, device_id), _) in offline {
            self.events
                .publish(DomainEvent::DeviceOffline {
                    tenant,
                    site,
                    device_id,
                    reason: OfflineReason::Staleness,
                    at: now,
                })
                .await?;
        }
        Ok(())
    }

    /// Runs the cooperative staleness-sweep loop until cancelled.
    pub async fn run_staleness_sweep(self: Arc<Self>, interval: std::time::Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("staleness sweep shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "staleness sweep failed");
                    }
                }
            }
        }
    }
}
