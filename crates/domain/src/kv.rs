//! The C1 contract: an embedded ordered key-value store with
//! transactions, prefix iteration, and TTL. `domain` only defines the
//! contract; `infrastructure::kv::SledStore` is the concrete
//! implementation the rest of the workspace is built against.

use crate::error::CoreError;
use async_trait::async_trait;
use std::time::Duration;

/// A view into an in-flight transaction. `update` gives callers a
/// `&mut dyn Transaction`; `view` gives a read-only `&dyn Transaction`
/// over a consistent snapshot.
pub trait Transaction {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CoreError>;
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), CoreError>;
    fn delete(&mut self, key: &[u8]) -> Result<(), CoreError>;
    fn exists(&self, key: &[u8]) -> Result<bool, CoreError> {
        Ok(self.get(key)?.is_some())
    }
    fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CoreError>;
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CoreError>;
    async fn set(&self, key: &[u8], value: Vec<u8>) -> Result<(), CoreError> {
        self.set_with_ttl(key, value, None).await
    }
    async fn set_with_ttl(
        &self,
        key: &[u8],
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CoreError>;
    async fn delete(&self, key: &[u8]) -> Result<(), CoreError>;
    async fn exists(&self, key: &[u8]) -> Result<bool, CoreError> {
        Ok(self.get(key).await?.is_some())
    }
    async fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CoreError>;

    /// Apply a read-write transaction. The closure sees a consistent
    /// snapshot of the store; returning `Err` from the closure aborts
    /// the transaction and rolls it back before the error surfaces.
    /// `Fn` rather than `FnOnce`: a backend may re-invoke the closure
    /// against a fresh snapshot on write conflict.
    async fn update(
        &self,
        f: Box<dyn for<'a> Fn(&'a mut (dyn Transaction + 'a)) -> Result<(), CoreError> + Send + Sync>,
    ) -> Result<(), CoreError>;

    /// Apply a read-only transaction over a consistent snapshot.
    async fn view(
        &self,
        f: Box<dyn for<'a> Fn(&'a (dyn Transaction + 'a)) -> Result<(), CoreError> + Send + Sync>,
    ) -> Result<(), CoreError>;
}

/// Key namespace prefixes shared by every repository built on `KvStore`.
pub mod prefixes {
    pub const DEVICE: &str = "device:";
    pub const TOPOLOGY: &str = "topology:";
    pub const COMMAND: &str = "command:";
    pub const CHANGESET: &str = "changeset:";
    /// Global `device_id -> "<tenant>:<site>"` index, independent of any
    /// one topology, so a device already owned by one (tenant, site)
    /// can be detected even when the write targets a different one.
    pub const DEVICE_OWNER: &str = "device-owner:";
}
