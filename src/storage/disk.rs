//! Cache storage persisted to a directory tree.
//!
//! Layout under the root:
//!
//! ```text
//! <root>/<sha256(bucket name)>/bucket.toml     name, creation order and time
//! <root>/<sha256(bucket name)>/<sha256(key)>.toml   one entry each
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::CacheStorage;
use crate::error::{Error, Result};
use crate::request::{RequestKey, StoredResponse};

const BUCKET_META: &str = "bucket.toml";

/// Distinguishes tmp files staged by concurrent writers in this process.
static STAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BucketMeta {
    name: String,
    /// Position in creation order; the timestamp is informational.
    #[serde(default)]
    order: u64,
    created: DateTime<Utc>,
}

/// On-disk form of a single entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryRecord {
    sequence: u64,
    stored_at: DateTime<Utc>,
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    /// Base64-encoded body.
    body: String,
    key: RequestKey,
}

impl EntryRecord {
    fn new(key: RequestKey, sequence: u64, response: &StoredResponse) -> Self {
        Self {
            sequence,
            stored_at: Utc::now(),
            url: response.url.clone(),
            status: response.status,
            headers: response.headers.clone(),
            body: BASE64.encode(&response.body),
            key,
        }
    }

    fn into_response(self) -> Result<StoredResponse> {
        let body = BASE64
            .decode(&self.body)
            .map_err(|e| Error::Corrupt(format!("{}: {e}", self.key)))?;
        Ok(StoredResponse {
            url: self.url,
            status: self.status,
            headers: self.headers,
            body: Bytes::from(body),
        })
    }
}

/// Cache storage backed by files under a root directory.
///
/// Clones share one writer lock, so bucket creation and bulk puts through
/// any clone are serialized. Readers never take the lock.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
    writer: Arc<Mutex<()>>,
}

impl DiskStorage {
    /// Creates a storage rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, name: &str) -> PathBuf {
        let digest = Sha256::digest(name.as_bytes());
        self.root.join(format!("{digest:x}"))
    }

    fn entry_path(dir: &Path, key: &RequestKey) -> PathBuf {
        dir.join(format!("{}.toml", key.digest()))
    }

    /// Buckets with their directories, oldest first.
    async fn buckets(&self) -> Result<Vec<(BucketMeta, PathBuf)>> {
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut buckets = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let dir = entry.path();
            let meta_path = dir.join(BUCKET_META);
            match read_toml::<BucketMeta>(&meta_path).await {
                Ok(meta) => buckets.push((meta, dir)),
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Skipping unreadable bucket {}: {e}", dir.display()),
            }
        }

        buckets.sort_by(|a, b| {
            a.0.order
                .cmp(&b.0.order)
                .then_with(|| a.0.created.cmp(&b.0.created))
                .then_with(|| a.0.name.cmp(&b.0.name))
        });
        Ok(buckets)
    }

    async fn records(dir: &Path) -> Result<Vec<EntryRecord>> {
        let mut read_dir = tokio::fs::read_dir(dir).await?;
        let mut records = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let is_entry = path.extension().is_some_and(|ext| ext == "toml")
                && path.file_name().is_some_and(|n| n != BUCKET_META);
            if is_entry {
                records.push(read_toml::<EntryRecord>(&path).await?);
            }
        }
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }
}

async fn exists(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(toml::from_str(&contents)?)
}

/// Writes `value` to a uniquely named `.tmp` file next to `path` and
/// returns the tmp path.
async fn stage_toml<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf> {
    let n = STAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_path = path.with_extension(format!("{}.{n}.tmp", std::process::id()));
    tokio::fs::write(&tmp_path, toml::to_string(value)?).await?;
    Ok(tmp_path)
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let dir = self.bucket_dir(name);
        let meta_path = dir.join(BUCKET_META);
        if exists(&meta_path).await? {
            return Ok(());
        }

        let _writer = self.writer.lock().await;
        if exists(&meta_path).await? {
            return Ok(());
        }
        let order = self
            .buckets()
            .await?
            .iter()
            .map(|(meta, _)| meta.order + 1)
            .max()
            .unwrap_or(0);

        tokio::fs::create_dir_all(&dir).await?;
        let meta = BucketMeta {
            name: name.to_string(),
            order,
            created: Utc::now(),
        };
        let tmp_path = stage_toml(&meta_path, &meta).await?;
        tokio::fs::rename(&tmp_path, &meta_path).await?;
        log::debug!("Created cache bucket {name} at {}", dir.display());
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        exists(&self.bucket_dir(name).join(BUCKET_META)).await
    }

    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, StoredResponse)>) -> Result<()> {
        if !self.has(name).await? {
            return Err(Error::BucketNotFound(name.to_string()));
        }
        let _writer = self.writer.lock().await;
        let dir = self.bucket_dir(name);
        let next_sequence = Self::records(&dir)
            .await?
            .iter()
            .map(|r| r.sequence + 1)
            .max()
            .unwrap_or(0);

        // Later duplicates win.
        let mut unique: Vec<(RequestKey, StoredResponse)> = Vec::with_capacity(entries.len());
        for (key, response) in entries {
            if let Some(slot) = unique.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = response;
            } else {
                unique.push((key, response));
            }
        }

        // Stage every entry before any becomes visible.
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(unique.len());
        for (sequence, (key, response)) in (next_sequence..).zip(unique) {
            let path = Self::entry_path(&dir, &key);
            let record = EntryRecord::new(key, sequence, &response);
            match stage_toml(&path, &record).await {
                Ok(tmp_path) => staged.push((tmp_path, path)),
                Err(e) => {
                    for (tmp_path, _) in &staged {
                        let _ = tokio::fs::remove_file(tmp_path).await;
                    }
                    return Err(e);
                }
            }
        }

        for (tmp_path, path) in staged {
            tokio::fs::rename(&tmp_path, &path).await?;
        }
        Ok(())
    }

    async fn match_request(&self, key: &RequestKey) -> Result<Option<StoredResponse>> {
        if !key.is_get() {
            return Ok(None);
        }
        for (_, dir) in self.buckets().await? {
            let path = Self::entry_path(&dir, key);
            match read_toml::<EntryRecord>(&path).await {
                Ok(record) if record.key == *key => return record.into_response().map(Some),
                Ok(_) => {}
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn bucket_names(&self) -> Result<Vec<String>> {
        Ok(self
            .buckets()
            .await?
            .into_iter()
            .map(|(meta, _)| meta.name)
            .collect())
    }

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>> {
        if !self.has(name).await? {
            return Err(Error::BucketNotFound(name.to_string()));
        }
        Ok(Self::records(&self.bucket_dir(name))
            .await?
            .into_iter()
            .map(|r| r.key)
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        if !self.has(name).await? {
            return Ok(false);
        }
        let _writer = self.writer.lock().await;
        tokio::fs::remove_dir_all(self.bucket_dir(name)).await?;
        log::info!("Deleted cache bucket {name}");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(url: &str) -> RequestKey {
        RequestKey {
            method: "GET".into(),
            url: url.into(),
        }
    }

    fn response(url: &str, body: &[u8]) -> StoredResponse {
        StoredResponse {
            url: url.into(),
            status: 200,
            headers: vec![("content-type".into(), "application/octet-stream".into())],
            body: Bytes::copy_from_slice(body),
        }
    }

    #[tokio::test]
    async fn empty_root_has_no_buckets() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(dir.path().join("missing"));
        assert!(storage.bucket_names().await.unwrap().is_empty());
        assert!(storage.match_request(&key("http://h/")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stored_entry_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let body = [0u8, 159, 146, 150, 255];
        {
            let storage = DiskStorage::new(dir.path());
            storage.open("v1").await.unwrap();
            storage
                .put_all("v1", vec![(key("http://h/bin"), response("http://h/bin", &body))])
                .await
                .unwrap();
        }

        let storage = DiskStorage::new(dir.path());
        let hit = storage
            .match_request(&key("http://h/bin"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit, response("http://h/bin", &body));
    }

    #[tokio::test]
    async fn keys_keep_insertion_order() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(dir.path());
        storage.open("v1").await.unwrap();
        let urls = ["http://h/z", "http://h/a", "http://h/m"];
        storage
            .put_all(
                "v1",
                urls.iter().map(|u| (key(u), response(u, b"x"))).collect(),
            )
            .await
            .unwrap();
        storage
            .put_all("v1", vec![(key("http://h/b"), response("http://h/b", b"y"))])
            .await
            .unwrap();

        let keys: Vec<_> = storage
            .keys("v1")
            .await
            .unwrap()
            .into_iter()
            .map(|k| k.url)
            .collect();
        assert_eq!(keys, vec!["http://h/z", "http://h/a", "http://h/m", "http://h/b"]);
    }

    #[tokio::test]
    async fn bucket_names_in_creation_order() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(dir.path());
        storage.open("zeta").await.unwrap();
        storage.open("alpha").await.unwrap();
        storage.open("zeta").await.unwrap();
        assert_eq!(storage.bucket_names().await.unwrap(), vec!["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn put_all_on_unknown_bucket_fails() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(dir.path());
        let err = storage
            .put_all("nope", vec![(key("http://h/"), response("http://h/", b""))])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn no_tmp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(dir.path());
        storage.open("v1").await.unwrap();
        storage
            .put_all("v1", vec![(key("http://h/"), response("http://h/", b"ok"))])
            .await
            .unwrap();

        let bucket_dir = storage.bucket_dir("v1");
        let leftovers: Vec<_> = std::fs::read_dir(bucket_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_directory() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(dir.path());
        storage.open("v1").await.unwrap();
        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.has("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_body_is_reported() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(dir.path());
        storage.open("v1").await.unwrap();
        let k = key("http://h/");
        storage
            .put_all("v1", vec![(k.clone(), response("http://h/", b"ok"))])
            .await
            .unwrap();

        let path = DiskStorage::entry_path(&storage.bucket_dir("v1"), &k);
        let mut record: EntryRecord =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        record.body = "***not base64***".into();
        std::fs::write(&path, toml::to_string(&record).unwrap()).unwrap();

        assert!(matches!(
            storage.match_request(&k).await,
            Err(Error::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn entry_record_carries_store_time_and_sequence() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(dir.path());
        storage.open("v1").await.unwrap();
        let before = Utc::now();
        storage
            .put_all(
                "v1",
                vec![
                    (key("http://h/a"), response("http://h/a", b"a")),
                    (key("http://h/b"), response("http://h/b", b"b")),
                ],
            )
            .await
            .unwrap();

        let bucket = storage.bucket_dir("v1");
        let read = |url: &str| -> EntryRecord {
            let path = DiskStorage::entry_path(&bucket, &key(url));
            toml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
        };
        let (a, b) = (read("http://h/a"), read("http://h/b"));
        assert!(a.sequence < b.sequence);
        assert!(a.stored_at >= before && a.stored_at <= Utc::now());
        assert_eq!(a.into_response().unwrap(), response("http://h/a", b"a"));
    }

    fn entries(n: usize) -> Vec<(RequestKey, StoredResponse)> {
        (0..n)
            .map(|i| {
                let url = format!("http://h/asset/{i}");
                (key(&url), response(&url, url.as_bytes()))
            })
            .collect()
    }

    fn tmp_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_put_all_on_shared_storage() {
        for _ in 0..25 {
            let dir = TempDir::new().unwrap();
            let storage = Arc::new(DiskStorage::new(dir.path()));
            storage.open("v1").await.unwrap();

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let storage = Arc::clone(&storage);
                    tokio::spawn(async move { storage.put_all("v1", entries(8)).await })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            assert_eq!(storage.keys("v1").await.unwrap().len(), 8);
            assert_eq!(tmp_files(&storage.bucket_dir("v1")), 0);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_put_all_from_separate_instances() {
        for _ in 0..25 {
            let dir = TempDir::new().unwrap();
            DiskStorage::new(dir.path()).open("v1").await.unwrap();

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let storage = DiskStorage::new(dir.path());
                    tokio::spawn(async move { storage.put_all("v1", entries(8)).await })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let storage = DiskStorage::new(dir.path());
            assert_eq!(storage.keys("v1").await.unwrap().len(), 8);
            assert_eq!(tmp_files(&storage.bucket_dir("v1")), 0);
        }
    }

    #[tokio::test]
    async fn creation_order_does_not_depend_on_timestamps() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(dir.path());
        let created = Utc::now();

        for (order, name) in [(0, "zeta"), (1, "alpha")] {
            let bucket_dir = storage.bucket_dir(name);
            std::fs::create_dir_all(&bucket_dir).unwrap();
            let meta = BucketMeta {
                name: name.to_string(),
                order,
                created,
            };
            std::fs::write(bucket_dir.join(BUCKET_META), toml::to_string(&meta).unwrap())
                .unwrap();
        }

        assert_eq!(storage.bucket_names().await.unwrap(), vec!["zeta", "alpha"]);

        storage.open("omega").await.unwrap();
        assert_eq!(
            storage.bucket_names().await.unwrap(),
            vec!["zeta", "alpha", "omega"]
        );
    }

    #[tokio::test]
    async fn match_searches_buckets_in_creation_order() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(dir.path());
        storage.open("first").await.unwrap();
        storage.open("second").await.unwrap();
        storage
            .put_all("second", vec![(key("http://h/a"), response("http://h/a", b"second"))])
            .await
            .unwrap();
        storage
            .put_all("first", vec![(key("http://h/a"), response("http://h/a", b"first"))])
            .await
            .unwrap();
        storage
            .put_all("second", vec![(key("http://h/b"), response("http://h/b", b"only"))])
            .await
            .unwrap();

        let hit = storage.match_request(&key("http://h/a")).await.unwrap().unwrap();
        assert_eq!(hit.body, Bytes::from_static(b"first"));
        let other = storage.match_request(&key("http://h/b")).await.unwrap().unwrap();
        assert_eq!(other.body, Bytes::from_static(b"only"));
    }

    #[tokio::test]
    async fn io_errors_are_not_reported_as_missing_bucket() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("not-a-dir");
        std::fs::write(&root, b"plain file").unwrap();
        let storage = DiskStorage::new(&root);

        assert!(matches!(storage.has("v1").await, Err(Error::Io(_))));
        assert!(matches!(storage.open("v1").await, Err(Error::Io(_))));
        assert!(matches!(
            storage.put_all("v1", entries(1)).await,
            Err(Error::Io(_))
        ));
    }
}
