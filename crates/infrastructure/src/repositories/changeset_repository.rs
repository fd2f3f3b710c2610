use async_trait::async_trait;
use domain::changeset::{Changeset, ChangesetFilter, ChangesetPage, ChangesetRepository};
use domain::error::CoreError;
use domain::kv::KvStore;
use std::sync::Arc;

fn key(id: &str) -> Vec<u8> {
    format!("changeset:{id}").into_bytes()
}

pub struct KvChangesetRepository<S: KvStore> {
    store: Arc<S>,
}

impl<S: KvStore> KvChangesetRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn load_all(&self) -> Result<Vec<Changeset>, CoreError> {
        let entries = self.store.iterate_prefix(b"changeset:").await?;
        entries
            .into_iter()
            .map(|(_, bytes)| {
                serde_json::from_slice(&bytes)
                    .map_err(|e| CoreError::storage(format!("failed to decode changeset: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl<S: KvStore + 'static> ChangesetRepository for KvChangesetRepository<S> {
    async fn save(&self, changeset: &Changeset) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(changeset)
            .map_err(|e| CoreError::storage(format!("failed to encode changeset: {e}")))?;
        self.store.set(&key(&changeset.id), bytes).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Changeset>, CoreError> {
        match self.store.get(&key(id)).await? {
            Some(bytes) => {
                let changeset = serde_json::from_slice(&bytes)
                    .map_err(|e| CoreError::storage(format!("failed to decode changeset: {e}")))?;
                Ok(Some(changeset))
            }
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        filter: ChangesetFilter,
        limit: usize,
        offset: usize,
    ) -> Result<ChangesetPage, CoreError> {
        let all = self.load_all().await?;
        let matching: Vec<Changeset> = all
            .into_iter()
            .filter(|cs| filter.status.map(|s| s == cs.status).unwrap_or(true))
            .collect();
        let total = matching.len();
        let items = matching.into_iter().skip(offset).take(limit).collect();
        Ok(ChangesetPage { items, total })
    }

    async fn delete(&self, id: &str) -> Result<(), CoreError> {
        self.store.delete(&key(id)).await
    }

    async fn find_active(&self) -> Result<Vec<Changeset>, CoreError> {
        let all = self.load_all().await?;
        Ok(all.into_iter().filter(|cs| !cs.is_terminal()).collect())
    }

    async fn find_expired(&self, older_than: i64) -> Result<Vec<Changeset>, CoreError> {
        let all = self.load_all().await?;
        Ok(all
            .into_iter()
            .filter(|cs| cs.is_terminal() && cs.completed_at.map(|t| t < older_than).unwrap_or(false))
            .collect())
    }
}
