mod entity;
mod repository;

pub use entity::{ConnectionType, Link, LinkMetrics, Topology};
pub use repository::TopologyRepository;

#[cfg(any(test, feature = "test-util"))]
pub use repository::MockTopologyRepository;
