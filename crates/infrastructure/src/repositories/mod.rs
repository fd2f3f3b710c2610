pub mod changeset_repository;
pub mod command_repository;
pub mod device_repository;
pub mod topology_repository;

pub use changeset_repository::KvChangesetRepository;
pub use command_repository::KvCommandRepository;
pub use device_repository::KvDeviceRepository;
pub use topology_repository::KvTopologyRepository;
