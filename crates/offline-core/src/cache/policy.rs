//! Freshness policy

use chrono::{DateTime, Utc};
use offline_storage::CacheEntry;
use std::time::Duration;

use crate::classify::ResourceClass;

/// TTL applied to API paths containing `pattern`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlRule {
    pub pattern: String,
    pub ttl: Duration,
}

impl TtlRule {
    pub fn new(pattern: impl Into<String>, ttl: Duration) -> Self {
        Self {
            pattern: pattern.into(),
            ttl,
        }
    }
}

/// Per-class TTLs and the staleness predicates built on them
///
/// Two thresholds exist for HTML: entries never go stale for serving, but
/// are refreshed in the background once `revalidate_after` has elapsed.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    /// Ordered substring rules for API paths; first match wins
    pub api_rules: Vec<TtlRule>,
    /// TTL for API paths matching no rule
    pub default_api_ttl: Duration,
    /// Age after which a cached HTML page is refreshed in the background
    pub revalidate_after: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            api_rules: vec![
                TtlRule::new("/leaderboard", Duration::from_secs(5 * 60)),
                TtlRule::new("/videos", Duration::from_secs(60)),
                TtlRule::new("/progress", Duration::from_secs(10 * 60)),
                TtlRule::new("/profile", Duration::from_secs(30 * 60)),
            ],
            default_api_ttl: Duration::from_secs(5 * 60),
            revalidate_after: Duration::from_secs(60),
        }
    }
}

impl FreshnessPolicy {
    /// TTL to stamp on an entry written now; `None` means never stale
    pub fn ttl_for(&self, class: ResourceClass, path: &str) -> Option<Duration> {
        match class {
            ResourceClass::ApiResource => Some(
                self.api_rules
                    .iter()
                    .find(|rule| path.contains(rule.pattern.as_str()))
                    .map(|rule| rule.ttl)
                    .unwrap_or(self.default_api_ttl),
            ),
            ResourceClass::StaticAsset | ResourceClass::HtmlPage | ResourceClass::Other => None,
        }
    }

    /// `now - cached_at >= ttl`, using the TTL recorded on the entry
    pub fn is_stale(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match entry.ttl_ms {
            Some(ttl_ms) => entry.age_ms(now) >= ttl_ms as i64,
            None => false,
        }
    }

    /// Whether a cached page is old enough to refresh in the background
    pub fn should_revalidate(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        entry.age_ms(now) >= self.revalidate_after.as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn entry_at(cached_at: DateTime<Utc>, ttl_ms: Option<u64>) -> CacheEntry {
        CacheEntry {
            status: 200,
            headers: Vec::new(),
            body: Bytes::new(),
            cached_at,
            ttl_ms,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_api_ttl_table() {
        let policy = FreshnessPolicy::default();
        let ttl = |path| policy.ttl_for(ResourceClass::ApiResource, path).unwrap();

        assert_eq!(ttl("/api/leaderboard"), Duration::from_secs(300));
        assert_eq!(ttl("/api/team_leaderboard"), Duration::from_secs(300));
        assert_eq!(ttl("/api/videos/12"), Duration::from_secs(60));
        assert_eq!(ttl("/api/user/7/progress"), Duration::from_secs(600));
        assert_eq!(ttl("/api/user/7/profile"), Duration::from_secs(1800));
        assert_eq!(ttl("/api/teams"), Duration::from_secs(300));
    }

    #[test]
    fn test_first_rule_wins() {
        let policy = FreshnessPolicy {
            api_rules: vec![
                TtlRule::new("/videos", Duration::from_secs(1)),
                TtlRule::new("/progress", Duration::from_secs(2)),
            ],
            ..Default::default()
        };
        assert_eq!(
            policy.ttl_for(ResourceClass::ApiResource, "/api/videos/progress"),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_non_api_classes_have_no_ttl() {
        let policy = FreshnessPolicy::default();
        assert_eq!(policy.ttl_for(ResourceClass::StaticAsset, "/a.css"), None);
        assert_eq!(policy.ttl_for(ResourceClass::HtmlPage, "/profile.html"), None);
        assert_eq!(policy.ttl_for(ResourceClass::Other, "/x"), None);
    }

    #[test]
    fn test_is_stale_boundary() {
        let policy = FreshnessPolicy::default();
        let entry = entry_at(t0(), Some(60_000));

        assert!(!policy.is_stale(&entry, t0()));
        assert!(!policy.is_stale(&entry, t0() + ChronoDuration::milliseconds(59_999)));
        assert!(policy.is_stale(&entry, t0() + ChronoDuration::milliseconds(60_000)));
    }

    #[test]
    fn test_entry_without_ttl_never_stale() {
        let policy = FreshnessPolicy::default();
        let entry = entry_at(t0(), None);
        assert!(!policy.is_stale(&entry, t0() + ChronoDuration::days(365)));
    }

    #[test]
    fn test_should_revalidate() {
        let policy = FreshnessPolicy::default();
        let entry = entry_at(t0(), None);

        assert!(!policy.should_revalidate(&entry, t0() + ChronoDuration::seconds(30)));
        assert!(policy.should_revalidate(&entry, t0() + ChronoDuration::seconds(60)));
        assert!(policy.should_revalidate(&entry, t0() + ChronoDuration::seconds(90)));
    }
}
