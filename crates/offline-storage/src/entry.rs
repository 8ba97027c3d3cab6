//! Cache keys and cached response records

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{SET_COOKIE, HeaderName, HeaderValue};
use http::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of a cached response: request method plus absolute URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
        }
    }

    /// Key for a GET request to `url`
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Hex SHA-256 of the key, used as a stable file name
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b" ");
        hasher.update(self.url.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A stored response snapshot with its freshness metadata
///
/// `cached_at` and `ttl_ms` travel with the response so that staleness can be
/// recomputed from the record alone. The TTL is fixed when the record is
/// written; a missing TTL means the entry never goes stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub status: u16,
    /// Response headers in their original order; names may repeat. Values
    /// are the raw bytes received, which need not be UTF-8.
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
    pub cached_at: DateTime<Utc>,
    pub ttl_ms: Option<u64>,
}

impl CacheEntry {
    /// Snapshot a response, truncating the timestamp to millisecond precision
    ///
    /// `Set-Cookie` belongs to the client that triggered the fetch and is
    /// never stored.
    pub fn from_response(
        response: &Response<Bytes>,
        cached_at: DateTime<Utc>,
        ttl_ms: Option<u64>,
    ) -> Self {
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| **name != SET_COOKIE)
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        Self {
            status: response.status().as_u16(),
            headers,
            body: response.body().clone(),
            cached_at: truncate_millis(cached_at),
            ttl_ms,
        }
    }

    /// Rebuild an owned response from the snapshot
    ///
    /// Headers that no longer parse are dropped rather than failing the read.
    pub fn to_response(&self) -> Response<Bytes> {
        let mut response = Response::new(self.body.clone());
        *response.status_mut() = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);

        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value),
            ) {
                headers.append(name, value);
            }
        }

        response
    }

    /// Age of the entry in milliseconds at `now` (negative if written in the future)
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.cached_at).num_milliseconds()
    }

    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Lightweight view of a stored entry, without its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub key: CacheKey,
    pub cached_at: DateTime<Utc>,
    pub size: u64,
}

fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_key_normalizes_method() {
        let key = CacheKey::new("get", "http://localhost/a.css");
        assert_eq!(key.method, "GET");
        assert_eq!(key, CacheKey::get("http://localhost/a.css"));
        assert_eq!(key.to_string(), "GET http://localhost/a.css");
    }

    #[test]
    fn test_key_digest_is_stable_and_distinct() {
        let a = CacheKey::get("http://localhost/a.css");
        let b = CacheKey::get("http://localhost/b.css");
        assert_eq!(a.digest(), a.clone().digest());
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_snapshot_keeps_repeated_headers_in_order() {
        let response = Response::builder()
            .status(201)
            .header("link", "</a.css>; rel=preload")
            .header("content-type", "text/css")
            .header("link", "</b.js>; rel=preload")
            .body(Bytes::from_static(b"body{}"))
            .unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let entry = CacheEntry::from_response(&response, at, Some(1000));
        assert_eq!(entry.status, 201);
        assert_eq!(entry.ttl_ms, Some(1000));

        let rebuilt = entry.to_response();
        assert_eq!(rebuilt.status(), StatusCode::CREATED);
        let links: Vec<_> = rebuilt.headers().get_all("link").iter().collect();
        assert_eq!(links, vec!["</a.css>; rel=preload", "</b.js>; rel=preload"]);
        assert_eq!(rebuilt.body(), &Bytes::from_static(b"body{}"));
    }

    #[test]
    fn test_snapshot_drops_set_cookie() {
        let response = Response::builder()
            .header("set-cookie", "session=alice")
            .header("content-type", "text/html")
            .header("Set-Cookie", "theme=dark")
            .body(Bytes::from_static(b"<html></html>"))
            .unwrap();

        let entry = CacheEntry::from_response(&response, Utc::now(), None);
        assert_eq!(
            entry.headers,
            vec![("content-type".to_string(), b"text/html".to_vec())]
        );
        assert!(entry.to_response().headers().get("set-cookie").is_none());
    }

    #[test]
    fn test_snapshot_keeps_non_utf8_header_bytes() {
        let raw = b"attachment; filename=\"caf\xe9.txt\"";
        let response = Response::builder()
            .header("content-disposition", HeaderValue::from_bytes(raw).unwrap())
            .body(Bytes::new())
            .unwrap();

        let entry = CacheEntry::from_response(&response, Utc::now(), None);
        assert_eq!(entry.headers[0].1, raw.to_vec());

        let rebuilt = entry.to_response();
        assert_eq!(rebuilt.headers()["content-disposition"].as_bytes(), raw);
    }

    #[test]
    fn test_cached_at_truncated_to_millis() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let response = Response::new(Bytes::new());
        let entry = CacheEntry::from_response(&response, at, None);
        assert_eq!(entry.cached_at.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(entry.age_ms(at), 0);
    }
}
