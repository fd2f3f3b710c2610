mod entity;
mod repository;

pub use entity::{
    Command, CommandOutcomeError, CommandStatus, CommandTarget, Expect, TransitionOutcome,
};
pub use repository::{CommandFilter, CommandPage, CommandRepository};

#[cfg(any(test, feature = "test-util"))]
pub use repository::MockCommandRepository;
