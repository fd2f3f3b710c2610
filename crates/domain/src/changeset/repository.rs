use super::{Changeset, ChangesetStatus};
use crate::error::CoreError;
use async_trait::async_trait;

pub struct ChangesetPage {
    pub items: Vec<Changeset>,
    pub total: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ChangesetFilter {
    pub status: Option<ChangesetStatus>,
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait ChangesetRepository: Send + Sync {
    async fn save(&self, changeset: &Changeset) -> Result<(), CoreError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Changeset>, CoreError>;
    async fn list(
        &self,
        filter: ChangesetFilter,
        limit: usize,
        offset: usize,
    ) -> Result<ChangesetPage, CoreError>;
    async fn delete(&self, id: &str) -> Result<(), CoreError>;
    /// Non-terminal changesets, rehydrated into the in-memory active set
    /// on startup.
    async fn find_active(&self) -> Result<Vec<Changeset>, CoreError>;
    /// Terminal changesets older than the retention window, for the
    /// cleanup worker.
    async fn find_expired(&self, older_than: i64) -> Result<Vec<Changeset>, CoreError>;
}
