//! Infrastructure layer - concrete adapters for the domain's repository
//! and transport traits.

pub mod config;
pub mod kv;
pub mod messaging;
pub mod repositories;

pub use kv::SledStore;
pub use messaging::{MqttClient, MqttMessage, MqttPublisherClient};
pub use repositories::{
    KvChangesetRepository, KvCommandRepository, KvDeviceRepository, KvTopologyRepository,
};
