//! Local disk storage backend

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{CacheStore, validate_bucket_name};
use crate::entry::{CacheEntry, CacheKey, EntrySummary};
use crate::error::StorageError;

/// On-disk form of a header value: plain text when it is UTF-8
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum RecordValue {
    Text(String),
    /// Base64 encoded raw bytes
    Raw { raw: String },
}

impl RecordValue {
    fn new(value: &[u8]) -> Self {
        match std::str::from_utf8(value) {
            Ok(text) => RecordValue::Text(text.to_string()),
            Err(_) => RecordValue::Raw {
                raw: STANDARD.encode(value),
            },
        }
    }

    fn into_bytes(self) -> Result<Vec<u8>, base64::DecodeError> {
        match self {
            RecordValue::Text(text) => Ok(text.into_bytes()),
            RecordValue::Raw { raw } => STANDARD.decode(raw.as_bytes()),
        }
    }
}

/// On-disk form of a cache entry
#[derive(Debug, Serialize, Deserialize)]
struct EntryRecord {
    key: CacheKey,
    status: u16,
    headers: Vec<(String, RecordValue)>,
    /// Base64 encoded body
    body: String,
    /// Decoded body length
    #[serde(default)]
    size: Option<u64>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    cached_at: DateTime<Utc>,
    #[serde(default)]
    ttl_ms: Option<u64>,
}

impl EntryRecord {
    fn new(key: &CacheKey, entry: &CacheEntry) -> Self {
        Self {
            key: key.clone(),
            status: entry.status,
            headers: entry
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), RecordValue::new(value)))
                .collect(),
            body: STANDARD.encode(&entry.body),
            size: Some(entry.size()),
            cached_at: entry.cached_at,
            ttl_ms: entry.ttl_ms,
        }
    }

    /// Body length without decoding it; records written before the length
    /// was stored fall back to an estimate from the encoded form
    fn body_size(&self) -> u64 {
        self.size.unwrap_or_else(|| {
            let padding = self.body.bytes().rev().take_while(|b| *b == b'=').count();
            (self.body.len() / 4 * 3).saturating_sub(padding) as u64
        })
    }

    fn into_entry(self) -> Result<CacheEntry, StorageError> {
        let corrupt = |e: base64::DecodeError| StorageError::Corrupt(format!("{}: {}", self.key, e));
        let body = STANDARD.decode(self.body.as_bytes()).map_err(corrupt)?;
        let mut headers = Vec::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            headers.push((name, value.into_bytes().map_err(corrupt)?));
        }

        Ok(CacheEntry {
            status: self.status,
            headers,
            body: Bytes::from(body),
            cached_at: self.cached_at,
            ttl_ms: self.ttl_ms,
        })
    }
}

/// Local disk storage backend
///
/// Layout: `<base_path>/<bucket>/<sha256 of key>.json`, one JSON record per
/// entry. Writes land in a temp file next to the target and are renamed into
/// place, so readers never observe a half-written record.
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    /// Create a new local store rooted at `base_path`
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;

        info!("Initialized local cache store at {:?}", base_path);

        Ok(Self { base_path })
    }

    fn bucket_path(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        validate_bucket_name(bucket)?;
        Ok(self.base_path.join(bucket))
    }

    fn entry_path(&self, bucket: &str, key: &CacheKey) -> Result<PathBuf, StorageError> {
        Ok(self
            .bucket_path(bucket)?
            .join(format!("{}.json", key.digest())))
    }

    /// Read a record, treating a missing file as absent
    ///
    /// A record that fails to parse is removed and reported as absent.
    async fn read_record(path: &Path) -> Result<Option<EntryRecord>, StorageError> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };

        match serde_json::from_slice::<EntryRecord>(&data) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Removing unreadable cache record {:?}: {}", path, e);
                if let Err(e) = fs::remove_file(path).await {
                    warn!("Failed to remove unreadable cache record {:?}: {}", path, e);
                }
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CacheStore for LocalStore {
    async fn open(&self, bucket: &str) -> Result<(), StorageError> {
        let path = self.bucket_path(bucket)?;
        fs::create_dir_all(&path).await?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &CacheKey) -> Result<Option<CacheEntry>, StorageError> {
        let path = self.entry_path(bucket, key)?;
        debug!("Reading {} from {:?}", key, path);

        match Self::read_record(&path).await? {
            // Digest collisions are not expected, but never serve another key's body
            Some(record) if &record.key == key => Ok(Some(record.into_entry()?)),
            Some(record) => {
                warn!("Key mismatch in {:?}: expected {}, found {}", path, key, record.key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &CacheKey,
        entry: CacheEntry,
    ) -> Result<(), StorageError> {
        let path = self.entry_path(bucket, key)?;
        debug!("Writing {} to {:?}", key, path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let data = serde_json::to_vec(&EntryRecord::new(key, &entry))?;

        // Unique temp name so concurrent writers of one key never share a file
        let temp_path = path.with_file_name(format!(".{}.{}.tmp", key.digest(), Uuid::new_v4()));
        fs::write(&temp_path, &data).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                warn!("Failed to remove temp file {:?}: {}", temp_path, cleanup);
            }
            return Err(StorageError::Io(e));
        }

        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &CacheKey) -> Result<bool, StorageError> {
        let path = self.entry_path(bucket, key)?;
        debug!("Deleting {} at {:?}", key, path);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list(&self, bucket: &str) -> Result<Vec<EntrySummary>, StorageError> {
        let path = self.bucket_path(bucket)?;

        let mut dir = match fs::read_dir(&path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut summaries = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let file_name = item.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with('.') || !file_name.ends_with(".json") {
                continue;
            }

            // Entries deleted between read_dir and read are simply skipped
            if let Some(record) = Self::read_record(&item.path()).await? {
                let size = record.body_size();
                summaries.push(EntrySummary {
                    key: record.key,
                    cached_at: record.cached_at,
                    size,
                });
            }
        }

        Ok(summaries)
    }

    async fn list_buckets(&self) -> Result<BTreeSet<String>, StorageError> {
        let mut dir = fs::read_dir(&self.base_path).await?;
        let mut names = BTreeSet::new();

        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            let name = item.file_name().to_string_lossy().to_string();
            if validate_bucket_name(&name).is_ok() {
                names.insert(name);
            }
        }

        Ok(names)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool, StorageError> {
        let path = self.bucket_path(bucket)?;
        debug!("Deleting bucket at {:?}", path);

        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
