pub mod registry;

pub use registry::{DeviceRegistry, DeviceStats};
