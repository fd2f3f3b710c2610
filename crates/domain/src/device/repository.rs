use super::Device;
use crate::error::CoreError;
use crate::ids::{DeviceId, SiteId, TenantId};
use async_trait::async_trait;

/// A page of listed devices plus the total matching the filter, for
/// `list(filter, limit, offset) -> (page, total)`.
pub struct DevicePage {
    pub items: Vec<Device>,
    pub total: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub tenant: Option<TenantId>,
    pub site: Option<SiteId>,
    pub online: Option<bool>,
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn save(&self, device: &Device) -> Result<(), CoreError>;
    async fn find_by_id(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        device_id: &DeviceId,
    ) -> Result<Option<Device>, CoreError>;
    async fn list(
        &self,
        filter: DeviceFilter,
        limit: usize,
        offset: usize,
    ) -> Result<DevicePage, CoreError>;
    async fn delete(
        &self,
        tenant: &TenantId,
        site: &SiteId,
        device_id: &DeviceId,
    ) -> Result<(), CoreError>;
}
