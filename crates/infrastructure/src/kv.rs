//! The C1 implementation: an embedded ordered key-value store backed
//! by `sled`, with transactions, prefix iteration, and lazily-expired
//! TTL entries.

use async_trait::async_trait;
use domain::error::CoreError;
use domain::kv::{KvStore, Transaction};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Serialize, Deserialize)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<i64>,
}

fn encode(value: Vec<u8>, ttl: Option<Duration>) -> Result<Vec<u8>, CoreError> {
    let expires_at = ttl.map(|d| now_ms() + d.as_millis() as i64);
    bincode_encode(&StoredValue { value, expires_at })
}

fn decode(bytes: &[u8]) -> Result<Option<Vec<u8>>, CoreError> {
    let stored: StoredValue = bincode_decode(bytes)?;
    if let Some(expires_at) = stored.expires_at {
        if now_ms() >= expires_at {
            return Ok(None);
        }
    }
    Ok(Some(stored.value))
}

// sled stores raw bytes; a tiny length-prefixed encoding avoids pulling
// in a binary serialization crate just for this wrapper.
fn bincode_encode(stored: &StoredValue) -> Result<Vec<u8>, CoreError> {
    serde_json::to_vec(stored).map_err(|e| CoreError::storage(format!("encode failed: {e}")))
}

fn bincode_decode(bytes: &[u8]) -> Result<StoredValue, CoreError> {
    serde_json::from_slice(bytes).map_err(|e| CoreError::storage(format!("decode failed: {e}")))
}

pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, CoreError> {
        let db = sled::open(path).map_err(|e| CoreError::storage(format!("failed to open sled db: {e}")))?;
        Ok(Self { db })
    }

    pub fn open_temporary() -> Result<Self, CoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| CoreError::storage(format!("failed to open temporary sled db: {e}")))?;
        Ok(Self { db })
    }
}

pub struct SledTransaction<'a> {
    tree: &'a sled::transaction::TransactionalTree,
}

impl<'a> Transaction for SledTransaction<'a> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CoreError> {
        let raw = self
            .tree
            .get(key)
            .map_err(|e| CoreError::storage(format!("transactional get failed: {e}")))?;
        match raw {
            Some(bytes) => decode(&bytes),
            None => Ok(None),
        }
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), CoreError> {
        let encoded = encode(value, None)?;
        self.tree
            .insert(key, encoded)
            .map_err(|e| CoreError::storage(format!("transactional set failed: {e}")))?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), CoreError> {
        self.tree
            .remove(key)
            .map_err(|e| CoreError::storage(format!("transactional delete failed: {e}")))?;
        Ok(())
    }

    fn iterate_prefix(&self, _prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CoreError> {
        // sled's transactional tree has no prefix scan; callers needing
        // a prefix scan inside a transaction should read via the outer
        // store before opening the transaction.
        Err(CoreError::storage(
            "iterate_prefix is not supported inside a transaction".to_string(),
        ))
    }
}

fn run_update(
    tree: &sled::transaction::TransactionalTree,
    f: &(dyn for<'a> Fn(&'a mut (dyn Transaction + 'a)) -> Result<(), CoreError> + Send + Sync),
) -> sled::transaction::ConflictableTransactionResult<(), CoreError> {
    let mut tx = SledTransaction { tree };
    f(&mut tx).map_err(sled::transaction::ConflictableTransactionError::Abort)
}

fn run_view(
    tree: &sled::transaction::TransactionalTree,
    f: &(dyn for<'a> Fn(&'a (dyn Transaction + 'a)) -> Result<(), CoreError> + Send + Sync),
) -> sled::transaction::ConflictableTransactionResult<(), CoreError> {
    let tx = SledTransaction { tree };
    f(&tx).map_err(sled::transaction::ConflictableTransactionError::Abort)
}

#[async_trait]
impl KvStore for SledStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CoreError> {
        let raw = self
            .db
            .get(key)
            .map_err(|e| CoreError::storage(format!("get failed: {e}")))?;
        match raw {
            Some(bytes) => {
                let decoded = decode(&bytes)?;
                if decoded.is_none() {
                    let _ = self.db.remove(key);
                }
                Ok(decoded)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &[u8],
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CoreError> {
        let encoded = encode(value, ttl)?;
        self.db
            .insert(key, encoded)
            .map_err(|e| CoreError::storage(format!("set failed: {e}")))?;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), CoreError> {
        self.db
            .remove(key)
            .map_err(|e| CoreError::storage(format!("delete failed: {e}")))?;
        Ok(())
    }

    async fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CoreError> {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(prefix) {
            let (k, v) = entry.map_err(|e| CoreError::storage(format!("scan failed: {e}")))?;
            if let Some(value) = decode(&v)? {
                out.push((k.to_vec(), value));
            }
        }
        Ok(out)
    }

    async fn update(
        &self,
        f: Box<dyn for<'a> Fn(&'a mut (dyn Transaction + 'a)) -> Result<(), CoreError> + Send + Sync>,
    ) -> Result<(), CoreError> {
        let result = self.db.transaction(move |tree| run_update(tree, f.as_ref()));
        result.map_err(|e| match e {
            sled::transaction::TransactionError::Abort(err) => err,
            sled::transaction::TransactionError::Storage(err) => {
                CoreError::storage(format!("transaction failed: {err}"))
            }
        })
    }

    async fn view(
        &self,
        f: Box<dyn for<'a> Fn(&'a (dyn Transaction + 'a)) -> Result<(), CoreError> + Send + Sync>,
    ) -> Result<(), CoreError> {
        let result = self.db.transaction(move |tree| run_view(tree, f.as_ref()));
        result.map_err(|e| match e {
            sled::transaction::TransactionError::Abort(err) => err,
            sled::transaction::TransactionError::Storage(err) => {
                CoreError::storage(format!("transaction failed: {err}"))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = SledStore::open_temporary().unwrap();
        store.set(b"device:t1:s1:d1", b"payload".to_vec()).await.unwrap();
        let got = store.get(b"device:t1:s1:d1").await.unwrap();
        assert_eq!(got, Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let store = SledStore::open_temporary().unwrap();
        store.set(b"k", b"v".to_vec()).await.unwrap();
        store.delete(b"k").await.unwrap();
        assert_eq!(store.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn iterate_prefix_only_returns_matching_keys() {
        let store = SledStore::open_temporary().unwrap();
        store.set(b"device:t1:s1:d1", b"a".to_vec()).await.unwrap();
        store.set(b"device:t1:s1:d2", b"b".to_vec()).await.unwrap();
        store.set(b"topology:t1:s1", b"c".to_vec()).await.unwrap();

        let results = store.iterate_prefix(b"device:").await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let store = SledStore::open_temporary().unwrap();
        store
            .set_with_ttl(b"k", b"v".to_vec(), Some(Duration::from_millis(0)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_transaction_applies_atomically() {
        let store = SledStore::open_temporary().unwrap();
        store
            .update(Box::new(|tx| {
                tx.set(b"a", b"1".to_vec())?;
                tx.set(b"b", b"2".to_vec())?;
                Ok(())
            }))
            .await
            .unwrap();
        assert_eq!(store.get(b"a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn update_transaction_rolls_back_on_error() {
        let store = SledStore::open_temporary().unwrap();
        store.set(b"a", b"orig".to_vec()).await.unwrap();

        let result = store
            .update(Box::new(|tx| {
                tx.set(b"a", b"changed".to_vec())?;
                Err(CoreError::state("abort".to_string()))
            }))
            .await;

        assert!(result.is_err());
        assert_eq!(store.get(b"a").await.unwrap(), Some(b"orig".to_vec()));
    }

    #[tokio::test]
    async fn view_transaction_can_surface_a_read_value() {
        let store = SledStore::open_temporary().unwrap();
        store.set(b"a", b"1".to_vec()).await.unwrap();

        let captured = std::sync::Arc::new(std::sync::Mutex::new(None));
        let captured_clone = captured.clone();
        store
            .view(Box::new(move |tx| {
                let value = tx.get(b"a")?;
                *captured_clone.lock().unwrap() = value;
                Ok(())
            }))
            .await
            .unwrap();

        assert_eq!(captured.lock().unwrap().clone(), Some(b"1".to_vec()));
    }
}
