mod entity;
mod repository;

pub use entity::{
    Changeset, ChangesetCommandResult, ChangesetCommandSpec, ChangesetOptions, ChangesetStatus,
};
pub use repository::{ChangesetFilter, ChangesetPage, ChangesetRepository};

#[cfg(any(test, feature = "test-util"))]
pub use repository::MockChangesetRepository;
