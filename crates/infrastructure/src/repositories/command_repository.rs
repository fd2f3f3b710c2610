use async_trait::async_trait;
use domain::command::{Command, CommandFilter, CommandPage, CommandRepository, CommandStatus};
use domain::error::CoreError;
use domain::ids::DeviceId;
use domain::kv::KvStore;
use std::sync::Arc;

fn key(id: &str) -> Vec<u8> {
    format!("command:{id}").into_bytes()
}

pub struct KvCommandRepository<S: KvStore> {
    store: Arc<S>,
}

impl<S: KvStore> KvCommandRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn load_all(&self) -> Result<Vec<Command>, CoreError> {
        let entries = self.store.iterate_prefix(b"command:").await?;
        entries
            .into_iter()
            .map(|(_, bytes)| {
                serde_json::from_slice(&bytes)
                    .map_err(|e| CoreError::storage(format!("failed to decode command: {e}")))
            })
            .collect()
    }

    fn target_device_id(command: &Command) -> Option<&DeviceId> {
        match &command.target {
            domain::command::CommandTarget::Device(id) => Some(id),
            domain::command::CommandTarget::Group(_) => None,
        }
    }
}

#[async_trait]
impl<S: KvStore + 'static> CommandRepository for KvCommandRepository<S> {
    async fn save(&self, command: &Command) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(command)
            .map_err(|e| CoreError::storage(format!("failed to encode command: {e}")))?;
        self.store.set(&key(&command.id), bytes).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Command>, CoreError> {
        match self.store.get(&key(id)).await? {
            Some(bytes) => {
                let command = serde_json::from_slice(&bytes)
                    .map_err(|e| CoreError::storage(format!("failed to decode command: {e}")))?;
                Ok(Some(command))
            }
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        filter: CommandFilter,
        limit: usize,
        offset: usize,
    ) -> Result<CommandPage, CoreError> {
        let all = self.load_all().await?;
        let matching: Vec<Command> = all
            .into_iter()
            .filter(|c| {
                if let Some(device_id) = &filter.device_id {
                    if Self::target_device_id(c) != Some(device_id) {
                        return false;
                    }
                }
                if let Some(status) = filter.status {
                    if c.status != status {
                        return false;
                    }
                }
                true
            })
            .collect();
        let total = matching.len();
        let items = matching.into_iter().skip(offset).take(limit).collect();
        Ok(CommandPage { items, total })
    }

    async fn find_retransmittable(&self) -> Result<Vec<Command>, CoreError> {
        let all = self.load_all().await?;
        Ok(all
            .into_iter()
            .filter(|c| matches!(c.status, CommandStatus::Pending | CommandStatus::Sent))
            .collect())
    }

    async fn find_non_terminal(&self) -> Result<Vec<Command>, CoreError> {
        let all = self.load_all().await?;
        Ok(all.into_iter().filter(|c| !c.status.is_terminal()).collect())
    }
}
