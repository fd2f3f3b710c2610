use super::{Command, CommandStatus};
use crate::error::CoreError;
use crate::ids::DeviceId;
use async_trait::async_trait;

pub struct CommandPage {
    pub items: Vec<Command>,
    pub total: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CommandFilter {
    pub device_id: Option<DeviceId>,
    pub status: Option<CommandStatus>,
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait CommandRepository: Send + Sync {
    async fn save(&self, command: &Command) -> Result<(), CoreError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Command>, CoreError>;
    async fn list(
        &self,
        filter: CommandFilter,
        limit: usize,
        offset: usize,
    ) -> Result<CommandPage, CoreError>;
    /// All commands still in `pending` or `sent`, for the engine's
    /// reconnect retransmit policy.
    async fn find_retransmittable(&self) -> Result<Vec<Command>, CoreError>;
    /// All commands in a non-terminal status, for the timeout sweep.
    async fn find_non_terminal(&self) -> Result<Vec<Command>, CoreError>;
}
