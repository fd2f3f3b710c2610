//! The C4 topology store: the operator-declared/discovered device and
//! link graph, reconciled from C3's runtime online/offline signal
//! through a one-way event subscription (spec.md 9's "avoid ownership
//! cycles" note).

use crate::clock::now_ms;
use domain::device::Device;
use domain::error::CoreError;
use domain::event::{DomainEvent, EventPublisher, TopologyChangeKind};
use domain::ids::{DeviceId, SiteId, TenantId};
use domain::topology::{Link, Topology, TopologyRepository};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct TopologyManager {
    repo: Arc<dyn TopologyRepository>,
    events: Arc<dyn EventPublisher>,
}

impl TopologyManager {
    pub fn new(repo: Arc<dyn TopologyRepository>, events: Arc<dyn EventPublisher>) -> Self {
        Self { repo, events }
    }

    pub async fn put_topology(&self, topology: &Topology) -> Result<(), CoreError> {
        self.repo.put_topology(topology).await
    }

    pub async fn get_topology(
        &self,
        tenant: &TenantId,
        site: &SiteId,
    ) -> Result<Option<Topology>, CoreError> {
        self.repo.get_topology(tenant, site).await
    }

    pub async fn update_device(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        device: &Device,
    ) -> Result<(), CoreError> {
        self.repo.update_device(tenant, site, device).await?;
        self.events
            .publish(DomainEvent::TopologyChanged {
                tenant: tenant.clone(),
                site: site.clone(),
                kind: TopologyChangeKind::DeviceUpdated,
                at: now_ms(),
            })
            .await
    }

    pub async fn add_link(&self, tenant: &TenantId, site: &SiteId, link: Link) -> Result<(), CoreError> {
        self.repo.add_link(tenant, site, link).await?;
        self.events
            .publish(DomainEvent::TopologyChanged {
                tenant: tenant.clone(),
                site: site.clone(),
                kind: TopologyChangeKind::LinkAdded,
                at: now_ms(),
            })
            .await
    }

    pub async fn remove_link(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        from: &DeviceId,
        to: &DeviceId,
    ) -> Result<(), CoreError> {
        self.repo.remove_link(tenant, site, from, to).await?;
        self.events
            .publish(DomainEvent::TopologyChanged {
                tenant: tenant.clone(),
                site: site.clone(),
                kind: TopologyChangeKind::LinkRemoved,
                at: now_ms(),
            })
            .await
    }

    pub async fn delete_device(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        device_id: &DeviceId,
    ) -> Result<(), CoreError> {
        self.repo.delete_device(tenant, site, device_id).await?;
        self.events
            .publish(DomainEvent::TopologyChanged {
                tenant: tenant.clone(),
                site: site.clone(),
                kind: TopologyChangeKind::DeviceRemoved,
                at: now_ms(),
            })
            .await
    }

    /// Flip the online flag of `device_id` inside its current topology,
    /// if it has one. A device with no topology entry yet (e.g. it has
    /// never been added via `update_device`) is not an error here —
    /// topology membership is operator-declared, not ingest-driven.
    async fn reconcile_online_state(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        device_id: &DeviceId,
        online: bool,
        at: i64,
    ) -> Result<(), CoreError> {
        let Some(mut topology) = self.repo.get_topology(tenant, site).await? else {
            return Ok(());
        };
        if let Some(device) = topology.devices.get_mut(device_id) {
            device.online = online;
            device.updated_at = at;
            topology.updated_at = at;
            self.repo.put_topology(&topology).await?;
        }
        Ok(())
    }

    /// Drains `rx` until cancelled, reconciling C3's online/offline
    /// transitions into the topology's device snapshots.
    pub async fn run_reconciler(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<DomainEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("topology reconciler shutting down");
                    return;
                }
                received = rx.recv() => {
                    match received {
                        Ok(DomainEvent::DeviceOnline { tenant, site, device_id, at }) => {
                            if let Err(e) = self.reconcile_online_state(&tenant, &site, &device_id, true, at).await {
                                warn!(error = %e, "topology reconciliation failed");
                            }
                        }
                        Ok(DomainEvent::DeviceOffline { tenant, site, device_id, at, .. }) => {
                            if let Err(e) = self.reconcile_online_state(&tenant, &site, &device_id, false, at).await {
                                warn!(error = %e, "topology reconciliation failed");
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "topology reconciler lagged behind event bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("event bus closed, topology reconciler exiting");
                            return;
                        }
                    }
                }
            }
        }
    }
}
