//! In-memory storage backend

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

use crate::backend::{CacheStore, validate_bucket_name};
use crate::entry::{CacheEntry, CacheKey, EntrySummary};
use crate::error::StorageError;

type Bucket = HashMap<CacheKey, CacheEntry>;

/// Process-local store with the same semantics as [`crate::LocalStore`]
///
/// Nothing survives a restart. Used in tests and for throwaway deployments.
#[derive(Default)]
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn open(&self, bucket: &str) -> Result<(), StorageError> {
        validate_bucket_name(bucket)?;
        self.buckets.write().entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &CacheKey) -> Result<Option<CacheEntry>, StorageError> {
        validate_bucket_name(bucket)?;
        Ok(self
            .buckets
            .read()
            .get(bucket)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &CacheKey,
        entry: CacheEntry,
    ) -> Result<(), StorageError> {
        validate_bucket_name(bucket)?;
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &CacheKey) -> Result<bool, StorageError> {
        validate_bucket_name(bucket)?;
        Ok(self
            .buckets
            .write()
            .get_mut(bucket)
            .map(|entries| entries.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn list(&self, bucket: &str) -> Result<Vec<EntrySummary>, StorageError> {
        validate_bucket_name(bucket)?;
        let buckets = self.buckets.read();
        let Some(entries) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };

        Ok(entries
            .iter()
            .map(|(key, entry)| EntrySummary {
                key: key.clone(),
                cached_at: entry.cached_at,
                size: entry.size(),
            })
            .collect())
    }

    async fn list_buckets(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self.buckets.read().keys().cloned().collect())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool, StorageError> {
        validate_bucket_name(bucket)?;
        Ok(self.buckets.write().remove(bucket).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;

    fn entry(body: &'static str) -> CacheEntry {
        CacheEntry {
            status: 200,
            headers: Vec::new(),
            body: Bytes::from_static(body.as_bytes()),
            cached_at: Utc::now(),
            ttl_ms: None,
        }
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        let key = CacheKey::get("http://localhost/index.html");

        assert!(store.get("dynamic@v1", &key).await.unwrap().is_none());
        store.put("dynamic@v1", &key, entry("<html>")).await.unwrap();
        assert_eq!(
            store.get("dynamic@v1", &key).await.unwrap().unwrap().body,
            Bytes::from_static(b"<html>")
        );

        assert!(store.delete("dynamic@v1", &key).await.unwrap());
        assert!(!store.delete("dynamic@v1", &key).await.unwrap());
        assert!(!store.delete("missing@v1", &key).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_is_idempotent_and_listed() {
        let store = MemoryStore::new();
        store.open("static@v1").await.unwrap();
        store
            .put("static@v1", &CacheKey::get("http://localhost/a.js"), entry("a"))
            .await
            .unwrap();
        store.open("static@v1").await.unwrap();

        assert_eq!(store.list("static@v1").await.unwrap().len(), 1);
        assert!(store.list_buckets().await.unwrap().contains("static@v1"));

        assert!(store.delete_bucket("static@v1").await.unwrap());
        assert!(store.list_buckets().await.unwrap().is_empty());
    }
}
