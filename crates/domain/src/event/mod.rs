mod publisher;
pub use publisher::EventPublisher;

#[cfg(any(test, feature = "test-util"))]
pub use publisher::MockEventPublisher;

use crate::changeset::ChangesetStatus;
use crate::command::CommandStatus;
use crate::envelope::Envelope;
use crate::ids::{DeviceId, SiteId, TenantId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineReason {
    Staleness,
    Lwt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyChangeKind {
    DeviceAdded,
    DeviceUpdated,
    DeviceRemoved,
    LinkAdded,
    LinkRemoved,
}

/// The notifications C8 subscribers receive: LWT/offline-sweep,
/// command-state-change, changeset-state-change, topology changes, and
/// forwarded `evt/*` messages (which are never stored, only relayed).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    DeviceOffline {
        tenant: TenantId,
        site: SiteId,
        device_id: DeviceId,
        reason: OfflineReason,
        at: i64,
    },
    DeviceOnline {
        tenant: TenantId,
        site: SiteId,
        device_id: DeviceId,
        at: i64,
    },
    CommandStateChanged {
        command_id: String,
        status: CommandStatus,
        at: i64,
    },
    ChangesetStateChanged {
        changeset_id: String,
        status: ChangesetStatus,
        at: i64,
    },
    TopologyChanged {
        tenant: TenantId,
        site: SiteId,
        kind: TopologyChangeKind,
        at: i64,
    },
    DeviceEvent {
        tenant: TenantId,
        site: SiteId,
        device_id: DeviceId,
        event_type: String,
        envelope: Envelope,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DeviceOffline { .. } => "device_offline",
            Self::DeviceOnline { .. } => "device_online",
            Self::CommandStateChanged { .. } => "command_state_changed",
            Self::ChangesetStateChanged { .. } => "changeset_state_changed",
            Self::TopologyChanged { .. } => "topology_changed",
            Self::DeviceEvent { .. } => "device_event",
        }
    }
}
