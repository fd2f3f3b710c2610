//! Application layer - use cases and workflows built on the domain's
//! entities and repository traits: device registry (C3), topology
//! manager (C4), command engine (C5), changeset coordinator (C6),
//! ingest pipeline (C7), and the event bus backing C8's streaming
//! surface.

pub mod changeset;
pub mod clock;
pub mod command;
pub mod device;
pub mod event_bus;
pub mod ingest;
pub mod topology;

pub use changeset::ChangesetCoordinator;
pub use command::CommandEngine;
pub use device::DeviceRegistry;
pub use event_bus::EventBus;
pub use ingest::IngestPipeline;
pub use topology::TopologyManager;
