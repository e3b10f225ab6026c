//! Cache storage abstraction: named buckets of request → response entries.

mod disk;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

use crate::error::Result;
use crate::request::{RequestKey, StoredResponse};

/// A set of named cache buckets.
///
/// Implementations must be safe to share between concurrent fetch handlers;
/// the agent performs no locking of its own.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens the named bucket, creating it if absent. Idempotent.
    async fn open(&self, name: &str) -> Result<()>;

    /// Whether a bucket with this name exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Stores every entry in the bucket, or none of them.
    ///
    /// Entries with a key already present replace the old response.
    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, StoredResponse)>) -> Result<()>;

    /// Looks the key up across all buckets in creation order and returns the
    /// first match. Non-`GET` keys never match.
    async fn match_request(&self, key: &RequestKey) -> Result<Option<StoredResponse>>;

    /// Bucket names in creation order.
    async fn bucket_names(&self) -> Result<Vec<String>>;

    /// Keys stored in the named bucket, in insertion order.
    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>>;

    /// Deletes the named bucket. Returns `false` if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;
}

#[async_trait]
impl<T: CacheStorage + ?Sized> CacheStorage for Arc<T> {
    async fn open(&self, name: &str) -> Result<()> {
        (**self).open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool> {
        (**self).has(name).await
    }

    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, StoredResponse)>) -> Result<()> {
        (**self).put_all(name, entries).await
    }

    async fn match_request(&self, key: &RequestKey) -> Result<Option<StoredResponse>> {
        (**self).match_request(key).await
    }

    async fn bucket_names(&self) -> Result<Vec<String>> {
        (**self).bucket_names().await
    }

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>> {
        (**self).keys(name).await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        (**self).delete(name).await
    }
}
