//! In-process cache storage.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::CacheStorage;
use crate::error::{Error, Result};
use crate::request::{RequestKey, StoredResponse};

type Bucket = Vec<(RequestKey, StoredResponse)>;

/// Cache storage held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: Mutex<Vec<(String, Bucket)>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, Bucket)>> {
        // Buckets are never left half-written, so poisoning is harmless.
        self.buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let mut buckets = self.lock();
        if !buckets.iter().any(|(n, _)| n == name) {
            buckets.push((name.to_string(), Vec::new()));
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.lock().iter().any(|(n, _)| n == name))
    }

    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, StoredResponse)>) -> Result<()> {
        let mut buckets = self.lock();
        let (_, bucket) = buckets
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| Error::BucketNotFound(name.to_string()))?;

        for (key, response) in entries {
            if let Some(slot) = bucket.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = response;
            } else {
                bucket.push((key, response));
            }
        }
        Ok(())
    }

    async fn match_request(&self, key: &RequestKey) -> Result<Option<StoredResponse>> {
        if !key.is_get() {
            return Ok(None);
        }
        Ok(self
            .lock()
            .iter()
            .find_map(|(_, bucket)| bucket.iter().find(|(k, _)| k == key))
            .map(|(_, response)| response.clone()))
    }

    async fn bucket_names(&self) -> Result<Vec<String>> {
        Ok(self.lock().iter().map(|(n, _)| n.clone()).collect())
    }

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>> {
        self.lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bucket)| bucket.iter().map(|(k, _)| k.clone()).collect())
            .ok_or_else(|| Error::BucketNotFound(name.to_string()))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|(n, _)| n != name);
        Ok(buckets.len() != before)
    }
}
