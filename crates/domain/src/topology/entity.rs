//! The topology entity (C4): the operator-declared / discovered graph
//! of devices and links for a `(tenant, site)` pair.

use crate::device::Device;
use crate::ids::{DeviceId, SiteId, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Ethernet,
    Wifi,
    Mesh,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LinkMetrics {
    pub rssi: Option<f64>,
    pub link_speed: Option<f64>,
    pub bandwidth: Option<f64>,
    pub latency: Option<f64>,
}

/// A directed pair `(from_device_id, to_device_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub from_device_id: DeviceId,
    pub to_device_id: DeviceId,
    pub from_interface: Option<String>,
    pub to_interface: Option<String>,
    pub connection_type: ConnectionType,
    pub is_direct_link: bool,
    pub metrics: LinkMetrics,
    pub last_seen: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub schema_version: u32,
    pub tenant: TenantId,
    pub site: SiteId,
    pub devices: BTreeMap<DeviceId, Device>,
    pub links: Vec<Link>,
    pub gateway_id: Option<DeviceId>,
    pub updated_at: i64,
}

impl Topology {
    pub fn new(tenant: TenantId, site: SiteId, now: i64) -> Self {
        Self {
            schema_version: 1,
            tenant,
            site,
            devices: BTreeMap::new(),
            links: Vec::new(),
            gateway_id: None,
            updated_at: now,
        }
    }

    /// Remove a device and every link incident to it. Idempotent.
    pub fn remove_device_cascade(&mut self, device_id: &DeviceId, now: i64) {
        self.devices.remove(device_id);
        self.links
            .retain(|l| &l.from_device_id != device_id && &l.to_device_id != device_id);
        if self.gateway_id.as_ref() == Some(device_id) {
            self.gateway_id = None;
        }
        self.updated_at = now;
    }

    pub fn has_device(&self, device_id: &DeviceId) -> bool {
        self.devices.contains_key(device_id)
    }
}
