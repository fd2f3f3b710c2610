mod entity;
mod repository;

pub use entity::{Device, DeviceType, Health, LastWill, TelemetrySample};
pub use repository::{DeviceFilter, DevicePage, DeviceRepository};

#[cfg(any(test, feature = "test-util"))]
pub use repository::MockDeviceRepository;
