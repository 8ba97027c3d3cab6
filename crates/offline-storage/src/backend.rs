//! Cache store trait

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::entry::{CacheEntry, CacheKey, EntrySummary};
use crate::error::StorageError;

/// Bucketed response store
///
/// A bucket is a named key/value map of cached responses. Single-key writes
/// are atomic and overwrite; concurrent writers to one key are last-write-wins.
/// Nothing is transactional across keys.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create the bucket if it does not exist yet
    async fn open(&self, bucket: &str) -> Result<(), StorageError>;

    /// Read an entry; a missing bucket reads as empty
    async fn get(&self, bucket: &str, key: &CacheKey) -> Result<Option<CacheEntry>, StorageError>;

    /// Write an entry, creating the bucket on first write
    async fn put(&self, bucket: &str, key: &CacheKey, entry: CacheEntry)
    -> Result<(), StorageError>;

    /// Delete an entry, returns whether it existed
    async fn delete(&self, bucket: &str, key: &CacheKey) -> Result<bool, StorageError>;

    /// Summaries of every entry in a bucket
    async fn list(&self, bucket: &str) -> Result<Vec<EntrySummary>, StorageError>;

    /// Names of all existing buckets
    async fn list_buckets(&self) -> Result<BTreeSet<String>, StorageError>;

    /// Delete a bucket and everything in it, returns whether it existed
    async fn delete_bucket(&self, bucket: &str) -> Result<bool, StorageError>;
}

/// Render the persisted name of a versioned bucket (`<name>@<version>`)
pub fn bucket_name(logical: &str, version: &str) -> String {
    format!("{}@{}", logical, version)
}

/// Split a persisted bucket name into `(logical name, version)`
pub fn parse_bucket_name(name: &str) -> Option<(&str, &str)> {
    let (logical, version) = name.split_once('@')?;
    if logical.is_empty() || version.is_empty() {
        return None;
    }
    Some((logical, version))
}

/// Reject bucket names that could escape the storage root
pub fn validate_bucket_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name == "." || name == ".." || name.starts_with('.') {
        return Err(StorageError::InvalidBucketName(name.to_string()));
    }

    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if !valid {
        return Err(StorageError::InvalidBucketName(name.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_name_round_trip() {
        let name = bucket_name("static", "v1");
        assert_eq!(name, "static@v1");
        assert_eq!(parse_bucket_name(&name), Some(("static", "v1")));
    }

    #[test]
    fn test_parse_bucket_name_rejects_unversioned() {
        assert_eq!(parse_bucket_name("static"), None);
        assert_eq!(parse_bucket_name("@v1"), None);
        assert_eq!(parse_bucket_name("static@"), None);
    }

    #[test]
    fn test_validate_bucket_name() {
        assert!(validate_bucket_name("dynamic@v2.1").is_ok());
        assert!(validate_bucket_name("gym-static_v1").is_ok());
        assert!(validate_bucket_name("").is_err());
        assert!(validate_bucket_name("..").is_err());
        assert!(validate_bucket_name(".hidden").is_err());
        assert!(validate_bucket_name("a/b").is_err());
        assert!(validate_bucket_name("a\\b").is_err());
    }
}
