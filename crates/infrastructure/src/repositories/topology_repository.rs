use async_trait::async_trait;
use domain::device::Device;
use domain::error::CoreError;
use domain::ids::{DeviceId, SiteId, TenantId};
use domain::kv::{prefixes, KvStore};
use domain::topology::{Link, Topology, TopologyRepository};
use std::sync::Arc;

fn key(tenant: &TenantId, site: &SiteId) -> Vec<u8> {
    format!("topology:{tenant}:{site}").into_bytes()
}

/// Global `device_id -> "<tenant>:<site>"` index key, checked in
/// `update_device` so a device already owned by one (tenant, site)
/// can't be silently re-registered under another.
fn owner_key(device_id: &DeviceId) -> Vec<u8> {
    format!("{}{device_id}", prefixes::DEVICE_OWNER).into_bytes()
}

pub struct KvTopologyRepository<S: KvStore> {
    store: Arc<S>,
}

impl<S: KvStore> KvTopologyRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn load(&self, tenant: &TenantId, site: &SiteId) -> Result<Topology, CoreError> {
        match self.store.get(&key(tenant, site)).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CoreError::storage(format!("failed to decode topology: {e}"))),
            None => Err(CoreError::not_found(format!(
                "topology {tenant}:{site} not found"
            ))),
        }
    }

    async fn store_topology(&self, topology: &Topology) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(topology)
            .map_err(|e| CoreError::storage(format!("failed to encode topology: {e}")))?;
        self.store
            .set(&key(&topology.tenant, &topology.site), bytes)
            .await
    }
}

#[async_trait]
impl<S: KvStore + 'static> TopologyRepository for KvTopologyRepository<S> {
    async fn put_topology(&self, topology: &Topology) -> Result<(), CoreError> {
        self.store_topology(topology).await
    }

    async fn get_topology(
        &self,
        tenant: &TenantId,
        site: &SiteId,
    ) -> Result<Option<Topology>, CoreError> {
        match self.store.get(&key(tenant, site)).await? {
            Some(bytes) => {
                let topology = serde_json::from_slice(&bytes)
                    .map_err(|e| CoreError::storage(format!("failed to decode topology: {e}")))?;
                Ok(Some(topology))
            }
            None => Ok(None),
        }
    }

    /// Admits `device` into the `(tenant, site)` topology only if no
    /// *other* (tenant, site) already owns it (spec.md 4.4), enforced
    /// via the global `device-owner:<device_id>` index rather than the
    /// single topology being written, since that topology alone can
    /// never observe a device owned elsewhere.
    async fn update_device(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        device: &Device,
    ) -> Result<(), CoreError> {
        let tenant = tenant.clone();
        let site = site.clone();
        let device = device.clone();
        let topo_key = key(&tenant, &site);
        self.store
            .update(Box::new(move |txn| {
                let owner_key = owner_key(&device.device_id);
                let owner_value = format!("{tenant}:{site}");
                if let Some(bytes) = txn.get(&owner_key)? {
                    let owner = String::from_utf8(bytes).map_err(|e| {
                        CoreError::storage(format!("corrupt device-owner index: {e}"))
                    })?;
                    if owner != owner_value {
                        return Err(CoreError::state(format!(
                            "device {} already registered under a different tenant/site",
                            device.device_id
                        )));
                    }
                }

                let mut topology = match txn.get(&topo_key)? {
                    Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                        CoreError::storage(format!("failed to decode topology: {e}"))
                    })?,
                    None => Topology::new(tenant.clone(), site.clone(), device.updated_at),
                };
                topology.devices.insert(device.device_id.clone(), device.clone());
                topology.updated_at = device.updated_at;
                let topo_bytes = serde_json::to_vec(&topology)
                    .map_err(|e| CoreError::storage(format!("failed to encode topology: {e}")))?;
                txn.set(&topo_key, topo_bytes)?;
                txn.set(&owner_key, owner_value.into_bytes())?;
                Ok(())
            }))
            .await
    }

    async fn add_link(&self, tenant: &TenantId, site: &SiteId, link: Link) -> Result<(), CoreError> {
        let mut topology = self.load(tenant, site).await?;
        if !topology.has_device(&link.from_device_id) || !topology.has_device(&link.to_device_id) {
            return Err(CoreError::state(
                "both link endpoints must exist in the topology before a link can be added"
                    .to_string(),
            ));
        }
        topology.links.retain(|l| {
            !(l.from_device_id == link.from_device_id && l.to_device_id == link.to_device_id)
        });
        let now = link.last_seen;
        topology.links.push(link);
        topology.updated_at = now;
        self.store_topology(&topology).await
    }

    async fn remove_link(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        from: &DeviceId,
        to: &DeviceId,
    ) -> Result<(), CoreError> {
        let mut topology = self.load(tenant, site).await?;
        topology
            .links
            .retain(|l| !(&l.from_device_id == from && &l.to_device_id == to));
        self.store_topology(&topology).await
    }

    async fn delete_device(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        device_id: &DeviceId,
    ) -> Result<(), CoreError> {
        let mut topology = self.load(tenant, site).await?;
        let now = topology.updated_at;
        topology.remove_device_cascade(device_id, now);
        self.store_topology(&topology).await?;
        self.store.delete(&owner_key(device_id)).await
    }

    async fn load_all(&self) -> Result<Vec<Topology>, CoreError> {
        let entries = self.store.iterate_prefix(b"topology:").await?;
        entries
            .into_iter()
            .map(|(_, bytes)| {
                serde_json::from_slice(&bytes)
                    .map_err(|e| CoreError::storage(format!("failed to decode topology: {e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::SledStore;
    use domain::topology::{ConnectionType, LinkMetrics};

    fn ids() -> (TenantId, SiteId) {
        (
            TenantId::new("acme-corp-network-001").unwrap(),
            SiteId::new("building-west-annex-9").unwrap(),
        )
    }

    fn link(from: &DeviceId, to: &DeviceId) -> Link {
        Link {
            from_device_id: from.clone(),
            to_device_id: to.clone(),
            from_interface: None,
            to_interface: None,
            connection_type: ConnectionType::Ethernet,
            is_direct_link: true,
            metrics: LinkMetrics::default(),
            last_seen: 1000,
        }
    }

    #[tokio::test]
    async fn update_device_creates_topology_on_first_write() {
        let (tenant, site) = ids();
        let repo = KvTopologyRepository::new(Arc::new(SledStore::open_temporary().unwrap()));
        let device_id = DeviceId::new("router-core-floor2-07").unwrap();
        let device = Device::new(tenant.clone(), site.clone(), device_id.clone(), 1000);

        repo.update_device(&tenant, &site, &device).await.unwrap();
        let topology = repo.get_topology(&tenant, &site).await.unwrap().unwrap();
        assert!(topology.devices.contains_key(&device_id));
    }

    #[tokio::test]
    async fn update_device_rejects_re_registration_under_a_different_tenant_site() {
        let (tenant, site) = ids();
        let other_tenant = TenantId::new("globex-industries-002").unwrap();
        let other_site = SiteId::new("campus-east-wing-3").unwrap();
        let repo = KvTopologyRepository::new(Arc::new(SledStore::open_temporary().unwrap()));
        let device_id = DeviceId::new("router-core-floor2-07").unwrap();
        let device = Device::new(tenant.clone(), site.clone(), device_id.clone(), 1000);
        repo.update_device(&tenant, &site, &device).await.unwrap();

        let moved = Device::new(other_tenant.clone(), other_site.clone(), device_id.clone(), 2000);
        let err = repo
            .update_device(&other_tenant, &other_site, &moved)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "state");

        let other_topology = repo.get_topology(&other_tenant, &other_site).await.unwrap();
        assert!(other_topology.is_none());
    }

    #[tokio::test]
    async fn update_device_is_idempotent_under_its_own_tenant_site() {
        let (tenant, site) = ids();
        let repo = KvTopologyRepository::new(Arc::new(SledStore::open_temporary().unwrap()));
        let device_id = DeviceId::new("router-core-floor2-07").unwrap();
        let device = Device::new(tenant.clone(), site.clone(), device_id.clone(), 1000);
        repo.update_device(&tenant, &site, &device).await.unwrap();

        let updated = Device::new(tenant.clone(), site.clone(), device_id.clone(), 2000);
        repo.update_device(&tenant, &site, &updated).await.unwrap();

        let topology = repo.get_topology(&tenant, &site).await.unwrap().unwrap();
        assert_eq!(topology.devices.get(&device_id).unwrap().updated_at, 2000);
    }

    #[tokio::test]
    async fn delete_device_frees_its_owner_index_for_another_tenant_site() {
        let (tenant, site) = ids();
        let other_tenant = TenantId::new("globex-industries-002").unwrap();
        let other_site = SiteId::new("campus-east-wing-3").unwrap();
        let repo = KvTopologyRepository::new(Arc::new(SledStore::open_temporary().unwrap()));
        let device_id = DeviceId::new("router-core-floor2-07").unwrap();
        let device = Device::new(tenant.clone(), site.clone(), device_id.clone(), 1000);
        repo.update_device(&tenant, &site, &device).await.unwrap();
        repo.delete_device(&tenant, &site, &device_id).await.unwrap();

        let moved = Device::new(other_tenant.clone(), other_site.clone(), device_id.clone(), 2000);
        repo.update_device(&other_tenant, &other_site, &moved).await.unwrap();

        let topology = repo.get_topology(&other_tenant, &other_site).await.unwrap().unwrap();
        assert!(topology.devices.contains_key(&device_id));
    }

    #[tokio::test]
    async fn add_link_requires_both_endpoints_present() {
        let (tenant, site) = ids();
        let repo = KvTopologyRepository::new(Arc::new(SledStore::open_temporary().unwrap()));
        let from = DeviceId::new("router-core-floor2-07").unwrap();
        let to = DeviceId::new("ap-floor2-annex-012").unwrap();
        let device = Device::new(tenant.clone(), site.clone(), from.clone(), 1000);
        repo.update_device(&tenant, &site, &device).await.unwrap();

        let err = repo.add_link(&tenant, &site, link(&from, &to)).await.unwrap_err();
        assert_eq!(err.kind(), "state");
    }

    #[tokio::test]
    async fn add_link_then_remove_link_round_trips() {
        let (tenant, site) = ids();
        let repo = KvTopologyRepository::new(Arc::new(SledStore::open_temporary().unwrap()));
        let from = DeviceId::new("router-core-floor2-07").unwrap();
        let to = DeviceId::new("ap-floor2-annex-012").unwrap();
        for id in [&from, &to] {
            let device = Device::new(tenant.clone(), site.clone(), id.clone(), 1000);
            repo.update_device(&tenant, &site, &device).await.unwrap();
        }

        repo.add_link(&tenant, &site, link(&from, &to)).await.unwrap();
        let topology = repo.get_topology(&tenant, &site).await.unwrap().unwrap();
        assert_eq!(topology.links.len(), 1);

        repo.remove_link(&tenant, &site, &from, &to).await.unwrap();
        let topology = repo.get_topology(&tenant, &site).await.unwrap().unwrap();
        assert!(topology.links.is_empty());
    }

    #[tokio::test]
    async fn delete_device_cascades_its_links() {
        let (tenant, site) = ids();
        let repo = KvTopologyRepository::new(Arc::new(SledStore::open_temporary().unwrap()));
        let from = DeviceId::new("router-core-floor2-07").unwrap();
        let to = DeviceId::new("ap-floor2-annex-012").unwrap();
        for id in [&from, &to] {
            let device = Device::new(tenant.clone(), site.clone(), id.clone(), 1000);
            repo.update_device(&tenant, &site, &device).await.unwrap();
        }
        repo.add_link(&tenant, &site, link(&from, &to)).await.unwrap();

        repo.delete_device(&tenant, &site, &from).await.unwrap();
        let topology = repo.get_topology(&tenant, &site).await.unwrap().unwrap();
        assert!(!topology.devices.contains_key(&from));
        assert!(topology.links.is_empty());
    }
}
