//! The device entity (C3's record shape): identified by
//! `(tenant, site, device_id)`, mutated only by ingest, retained
//! indefinitely.

use crate::ids::{DeviceId, SiteId, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Router,
    Ap,
    Switch,
    Iot,
    Client,
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Ok,
    Warn,
    Error,
    #[default]
    Unknown,
}

/// The last-will record recorded by an `lwt` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastWill {
    pub status: String,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A single telemetry metric sample, carrying its own `ts` so late
/// arrivals across different metrics don't clobber each other's
/// tie-break state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub value: Value,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub schema_version: u32,
    pub tenant: TenantId,
    pub site: SiteId,
    pub device_id: DeviceId,

    pub device_type: Option<DeviceType>,
    pub role: Option<String>,
    pub hostname: Option<String>,
    pub primary_mac: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub location: Option<String>,
    pub capabilities: std::collections::BTreeSet<String>,

    pub health: Health,
    pub online: bool,
    pub last_seen: i64,
    pub uptime_s: Option<u64>,
    pub firmware: Option<String>,
    pub components: BTreeMap<String, Value>,

    pub attributes: BTreeMap<String, Value>,
    pub telemetry: BTreeMap<String, TelemetrySample>,
    pub last_will: Option<LastWill>,

    /// Guards the wholesale `state` replace so an out-of-order `state`
    /// message with an older `ts` is dropped rather than applied.
    state_ts: Option<i64>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Device {
    pub fn new(tenant: TenantId, site: SiteId, device_id: DeviceId, now: i64) -> Self {
        Self {
            schema_version: 1,
            tenant,
            site,
            device_id,
            device_type: None,
            role: None,
            hostname: None,
            primary_mac: None,
            manufacturer: None,
            model: None,
            location: None,
            capabilities: Default::default(),
            health: Health::Unknown,
            online: false,
            last_seen: now,
            uptime_s: None,
            firmware: None,
            components: BTreeMap::new(),
            attributes: BTreeMap::new(),
            telemetry: BTreeMap::new(),
            last_will: None,
            state_ts: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `now` has pushed this device past the staleness
    /// threshold since its last observed message, per invariant 3:
    /// a device marked online implies a recent `last_seen` or a
    /// fresher non-offline message.
    pub fn is_stale(&self, now: i64, threshold_ms: i64) -> bool {
        now.saturating_sub(self.last_seen) > threshold_ms
    }

    /// Apply a `state` message: replaces health/uptime/firmware/components
    /// wholesale and marks the device online, guarded by the state ts
    /// tie-break. Returns `true` if the message was applied.
    pub fn apply_state(
        &mut self,
        ts: i64,
        health: Health,
        uptime_s: Option<u64>,
        firmware: Option<String>,
        components: BTreeMap<String, Value>,
        now: i64,
    ) -> bool {
        if let Some(state_ts) = self.state_ts {
            if ts < state_ts {
                return false;
            }
        }
        self.state_ts = Some(ts);
        self.health = health;
        self.uptime_s = uptime_s;
        self.firmware = firmware;
        self.components = components;
        self.online = true;
        self.last_seen = self.last_seen.max(ts);
        self.updated_at = now;
        true
    }

    /// Apply an `attr` message: merges into `attributes` (last-writer-wins
    /// per key, always applied) and promotes `device_type` if present.
    pub fn apply_attr(
        &mut self,
        attrs: BTreeMap<String, Value>,
        device_type: Option<DeviceType>,
        ts: i64,
        now: i64,
    ) {
        for (k, v) in attrs {
            self.attributes.insert(k, v);
        }
        if device_type.is_some() {
            self.device_type = device_type;
        }
        self.last_seen = self.last_seen.max(ts);
        self.updated_at = now;
    }

    /// Apply a `telemetry/<metric>` message: replaces `telemetry[metric]`
    /// with the new sample unless a fresher sample for the same metric
    /// is already recorded; never touches sibling metrics.
    pub fn apply_telemetry(&mut self, metric: &str, value: Value, ts: i64, now: i64) -> bool {
        if let Some(existing) = self.telemetry.get(metric) {
            if ts < existing.ts {
                return false;
            }
        }
        self.telemetry
            .insert(metric.to_string(), TelemetrySample { value, ts });
        self.last_seen = self.last_seen.max(ts);
        self.updated_at = now;
        true
    }

    /// Apply an `lwt` message: sets `online=false`, records the
    /// last-will, and demotes `ok` health to `unknown`.
    pub fn apply_lwt(&mut self, status: String, message: Option<String>, ts: i64, now: i64) {
        self.online = false;
        if self.health == Health::Ok {
            self.health = Health::Unknown;
        }
        self.last_will = Some(LastWill { status, ts, message });
        self.last_seen = self.last_seen.max(ts);
        self.updated_at = now;
    }

    /// Mark offline from the staleness sweep rather than an inbound
    /// message.
    pub fn mark_stale_offline(&mut self, now: i64) {
        self.online = false;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::new(
            crate::ids::TenantId::new("acme-corp-network-001").unwrap(),
            crate::ids::SiteId::new("building-west-annex-9").unwrap(),
            crate::ids::DeviceId::new("router-core-floor2-07").unwrap(),
            1_000,
        )
    }

    #[test]
    fn new_device_defaults_to_unknown_health_and_offline() {
        let d = device();
        assert_eq!(d.health, Health::Unknown);
        assert!(!d.online);
    }

    #[test]
    fn state_message_marks_online_and_replaces_fields() {
        let mut d = device();
        let applied = d.apply_state(2_000, Health::Ok, Some(120), Some("1.2.3".into()), BTreeMap::new(), 2_000);
        assert!(applied);
        assert!(d.online);
        assert_eq!(d.health, Health::Ok);
        assert_eq!(d.uptime_s, Some(120));
    }

    #[test]
    fn older_state_ts_is_dropped() {
        let mut d = device();
        assert!(d.apply_state(5_000, Health::Ok, None, None, BTreeMap::new(), 5_000));
        assert!(!d.apply_state(3_000, Health::Error, None, None, BTreeMap::new(), 5_001));
        assert_eq!(d.health, Health::Ok);
    }

    #[test]
    fn attr_merge_always_applies_even_when_older() {
        let mut d = device();
        d.apply_attr(BTreeMap::from([("k".to_string(), Value::from(1))]), None, 10, 10);
        d.apply_attr(BTreeMap::from([("k".to_string(), Value::from(2))]), None, 5, 11);
        assert_eq!(d.attributes.get("k").unwrap(), &Value::from(2));
    }

    #[test]
    fn telemetry_per_metric_ts_tie_break() {
        let mut d = device();
        assert!(d.apply_telemetry("rssi", Value::from(-40), 100, 100));
        assert!(!d.apply_telemetry("rssi", Value::from(-80), 50, 101));
        assert_eq!(d.telemetry.get("rssi").unwrap().value, Value::from(-40));
    }

    #[test]
    fn telemetry_never_clears_sibling_metrics() {
        let mut d = device();
        d.apply_telemetry("rssi", Value::from(-40), 100, 100);
        d.apply_telemetry("cpu", Value::from(0.5), 100, 100);
        assert_eq!(d.telemetry.len(), 2);
    }

    #[test]
    fn lwt_sets_offline_and_demotes_ok_health() {
        let mut d = device();
        d.apply_state(1, Health::Ok, None, None, BTreeMap::new(), 1);
        d.apply_lwt("offline".into(), None, 2, 2);
        assert!(!d.online);
        assert_eq!(d.health, Health::Unknown);
        assert!(d.last_will.is_some());
    }

    #[test]
    fn is_stale_uses_last_seen_and_threshold() {
        let mut d = device();
        d.last_seen = 0;
        assert!(d.is_stale(300_001, 300_000));
        assert!(!d.is_stale(300_000, 300_000));
    }
}
