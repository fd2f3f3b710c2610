use async_trait::async_trait;
use domain::device::{Device, DeviceFilter, DevicePage, DeviceRepository};
use domain::error::CoreError;
use domain::ids::{DeviceId, SiteId, TenantId};
use domain::kv::KvStore;
use std::sync::Arc;

fn key(tenant: &TenantId, site: &SiteId, device_id: &DeviceId) -> Vec<u8> {
    format!("device:{tenant}:{site}:{device_id}").into_bytes()
}

pub struct KvDeviceRepository<S: KvStore> {
    store: Arc<S>,
}

impl<S: KvStore> KvDeviceRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: KvStore + 'static> DeviceRepository for KvDeviceRepository<S> {
    async fn save(&self, device: &Device) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(device)
            .map_err(|e| CoreError::storage(format!("failed to encode device: {e}")))?;
        self.store
            .set(&key(&device.tenant, &device.site, &device.device_id), bytes)
            .await
    }

    async fn find_by_id(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        device_id: &DeviceId,
    ) -> Result<Option<Device>, CoreError> {
        match self.store.get(&key(tenant, site, device_id)).await? {
            Some(bytes) => {
                let device = serde_json::from_slice(&bytes)
                    .map_err(|e| CoreError::storage(format!("failed to decode device: {e}")))?;
                Ok(Some(device))
            }
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        filter: DeviceFilter,
        limit: usize,
        offset: usize,
    ) -> Result<DevicePage, CoreError> {
        let entries = self.store.iterate_prefix(b"device:").await?;
        let mut matching = Vec::new();
        for (_, bytes) in entries {
            let device: Device = serde_json::from_slice(&bytes)
                .map_err(|e| CoreError::storage(format!("failed to decode device: {e}")))?;
            if let Some(tenant) = &filter.tenant {
                if &device.tenant != tenant {
                    continue;
                }
            }
            if let Some(site) = &filter.site {
                if &device.site != site {
                    continue;
                }
            }
            if let Some(online) = filter.online {
                if device.online != online {
                    continue;
                }
            }
            matching.push(device);
        }
        let total = matching.len();
        let items = matching.into_iter().skip(offset).take(limit).collect();
        Ok(DevicePage { items, total })
    }

    async fn delete(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        device_id: &DeviceId,
    ) -> Result<(), CoreError> {
        self.store.delete(&key(tenant, site, device_id)).await
    }
}
