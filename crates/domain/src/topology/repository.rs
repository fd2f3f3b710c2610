use super::{Link, Topology};
use crate::device::Device;
use crate::error::CoreError;
use crate::ids::{DeviceId, SiteId, TenantId};
use async_trait::async_trait;

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait TopologyRepository: Send + Sync {
    async fn put_topology(&self, topology: &Topology) -> Result<(), CoreError>;
    async fn get_topology(
        &self,
        tenant: &TenantId,
        site: &SiteId,
    ) -> Result<Option<Topology>, CoreError>;
    async fn update_device(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        device: &Device,
    ) -> Result<(), CoreError>;
    async fn add_link(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        link: Link,
    ) -> Result<(), CoreError>;
    async fn remove_link(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        from: &DeviceId,
        to: &DeviceId,
    ) -> Result<(), CoreError>;
    async fn delete_device(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        device_id: &DeviceId,
    ) -> Result<(), CoreError>;
    async fn load_all(&self) -> Result<Vec<Topology>, CoreError>;
}
