//! Test doubles shared by the unit tests of this crate

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use http::Response;
use offline_proxy::{FetchRequest, Fetcher, ProxyError};
use offline_storage::{CacheEntry, CacheKey, CacheStore, EntrySummary, StorageError};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use url::Url;

pub const ORIGIN: &str = "http://app.test";

pub fn origin() -> Url {
    Url::parse(ORIGIN).unwrap()
}

pub fn url(path: &str) -> Url {
    origin().join(path).unwrap()
}

pub fn key(path: &str) -> CacheKey {
    CacheKey::get(url(path).as_str())
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn entry(body: &str, cached_at: DateTime<Utc>, ttl_ms: Option<u64>) -> CacheEntry {
    CacheEntry {
        status: 200,
        headers: vec![("content-type".to_string(), b"text/plain".to_vec())],
        body: Bytes::from(body.to_string()),
        cached_at,
        ttl_ms,
    }
}

#[derive(Clone)]
enum Script {
    Respond(u16, Bytes),
    Fail,
    Hang,
}

/// Scripted network keyed by URL path; unscripted paths fail
#[derive(Default)]
pub struct FakeNetwork {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, path: &str, status: u16, body: &str) {
        self.scripts.lock().insert(
            path.to_string(),
            Script::Respond(status, Bytes::from(body.to_string())),
        );
    }

    pub fn fail(&self, path: &str) {
        self.scripts.lock().insert(path.to_string(), Script::Fail);
    }

    /// Requests to `path` never complete
    pub fn hang(&self, path: &str) {
        self.scripts.lock().insert(path.to_string(), Script::Hang);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.calls.lock().iter().filter(|p| *p == path).count()
    }
}

#[async_trait]
impl Fetcher for FakeNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response<Bytes>, ProxyError> {
        let path = request.url.path().to_string();
        self.calls.lock().push(path.clone());
        let script = self.scripts.lock().get(&path).cloned();

        match script {
            Some(Script::Respond(status, body)) => Ok(Response::builder()
                .status(status)
                .header("content-type", "text/plain")
                .body(body)
                .unwrap()),
            Some(Script::Hang) => std::future::pending().await,
            Some(Script::Fail) | None => Err(ProxyError::Unreachable(path)),
        }
    }
}

/// Store whose every operation fails
pub struct BrokenStore;

fn broken() -> StorageError {
    StorageError::Backend("quota exceeded".to_string())
}

#[async_trait]
impl CacheStore for BrokenStore {
    async fn open(&self, _bucket: &str) -> Result<(), StorageError> {
        Err(broken())
    }

    async fn get(&self, _bucket: &str, _key: &CacheKey) -> Result<Option<CacheEntry>, StorageError> {
        Err(broken())
    }

    async fn put(
        &self,
        _bucket: &str,
        _key: &CacheKey,
        _entry: CacheEntry,
    ) -> Result<(), StorageError> {
        Err(broken())
    }

    async fn delete(&self, _bucket: &str, _key: &CacheKey) -> Result<bool, StorageError> {
        Err(broken())
    }

    async fn list(&self, _bucket: &str) -> Result<Vec<EntrySummary>, StorageError> {
        Err(broken())
    }

    async fn list_buckets(&self) -> Result<BTreeSet<String>, StorageError> {
        Err(broken())
    }

    async fn delete_bucket(&self, _bucket: &str) -> Result<bool, StorageError> {
        Err(broken())
    }
}
