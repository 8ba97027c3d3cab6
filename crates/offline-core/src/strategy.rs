//! Request strategies
//!
//! The [`StrategyExecutor`] answers every intercepted request. The resource
//! class picks the strategy:
//!
//! - static assets: cache-first
//! - API resources: network-first with a TTL-bounded fallback
//! - HTML pages: stale-while-revalidate
//! - everything else on the origin: network with a cache fallback
//!
//! A network failure is either a transport error or a non-success status.
//! Non-success responses are never stored, and are handed back unchanged
//! when no cached fallback exists. Only `200 OK` is stored; other success
//! statuses such as `206 Partial Content` go to the client untouched.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use http::{Method, Response, StatusCode};
use offline_proxy::{FetchRequest, Fetcher, ProxyError};
use offline_storage::{CacheEntry, CacheKey, CacheStore};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{FreshnessPolicy, StrategyStats};
use crate::classify::{Classifier, ResourceClass};
use crate::clock::Clock;
use crate::error::CoreError;
use crate::lifecycle::{BucketSet, Controller};

/// A request handed to the cache
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InterceptedRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.method.as_str(), self.url.as_str())
    }

    fn to_fetch(&self) -> FetchRequest {
        FetchRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServedFrom {
    /// Cached entry, no network involved
    Cache,
    /// Origin response
    Network,
    /// Cached entry served because the network failed
    Fallback,
    /// Placeholder built by the cache
    Synthesized,
    /// Request not handled by the cache
    Bypass,
}

impl ServedFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServedFrom::Cache => "cache",
            ServedFrom::Network => "network",
            ServedFrom::Fallback => "fallback",
            ServedFrom::Synthesized => "synthesized",
            ServedFrom::Bypass => "bypass",
        }
    }
}

/// Result of handling one request
#[derive(Debug)]
pub struct Outcome {
    pub response: Response<Bytes>,
    /// `None` when the request was never classified
    pub class: Option<ResourceClass>,
    pub served_from: ServedFrom,
    /// Background refresh started for this request, if any
    pub revalidation: Option<JoinHandle<()>>,
}

impl Outcome {
    fn new(response: Response<Bytes>, class: Option<ResourceClass>, served_from: ServedFrom) -> Self {
        Self {
            response,
            class,
            served_from,
            revalidation: None,
        }
    }
}

enum Fetched {
    Ok(Response<Bytes>),
    /// Success status that must not be stored
    Uncacheable(Response<Bytes>),
    /// Origin answered with a non-success status
    Rejected(Response<Bytes>),
    Unreachable(ProxyError),
}

/// Runs the caching strategy for each intercepted request
#[derive(Clone)]
pub struct StrategyExecutor {
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Fetcher>,
    classifier: Arc<Classifier>,
    policy: Arc<FreshnessPolicy>,
    controller: Arc<Controller>,
    clock: Arc<dyn Clock>,
    stats: Arc<StrategyStats>,
}

impl StrategyExecutor {
    pub fn new(
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Fetcher>,
        classifier: Arc<Classifier>,
        policy: Arc<FreshnessPolicy>,
        controller: Arc<Controller>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            network,
            classifier,
            policy,
            controller,
            clock,
            stats: Arc::new(StrategyStats::default()),
        }
    }

    pub fn stats(&self) -> &StrategyStats {
        &self.stats
    }

    /// Answer one request
    ///
    /// Fails only when the network is needed, unreachable, and no cached or
    /// synthesized answer applies.
    pub async fn handle(&self, request: InterceptedRequest) -> Result<Outcome, CoreError> {
        if !self.classifier.intercepts(&request.method, &request.url) {
            return self.bypass(&request, None).await;
        }

        let class = self.classifier.classify(&request.url);
        let Some(buckets) = self.controller.current() else {
            debug!("No controlling deployment, bypassing {}", request.url);
            return self.bypass(&request, Some(class)).await;
        };

        let outcome = match class {
            ResourceClass::StaticAsset => self.cache_first(&request, &buckets).await,
            ResourceClass::ApiResource => self.network_first(&request, &buckets).await?,
            ResourceClass::HtmlPage => self.stale_while_revalidate(&request, &buckets).await,
            ResourceClass::Other => self.pass_through(&request, &buckets).await,
        };

        debug!(
            "{} {} -> {} ({})",
            class,
            request.url,
            outcome.response.status(),
            outcome.served_from.as_str()
        );
        record_request(class.as_str(), outcome.served_from);
        Ok(outcome)
    }

    async fn bypass(
        &self,
        request: &InterceptedRequest,
        class: Option<ResourceClass>,
    ) -> Result<Outcome, CoreError> {
        self.stats.record_bypass();
        record_request(class.map(|c| c.as_str()).unwrap_or("none"), ServedFrom::Bypass);
        let response = self.network.fetch(&request.to_fetch()).await?;
        Ok(Outcome::new(response, class, ServedFrom::Bypass))
    }

    async fn cache_first(&self, request: &InterceptedRequest, buckets: &BucketSet) -> Outcome {
        let class = Some(ResourceClass::StaticAsset);
        let key = request.key();

        if let Some(entry) = self.lookup(buckets, &buckets.static_bucket, &key).await {
            self.stats.record_hit();
            return Outcome::new(entry.to_response(), class, ServedFrom::Cache);
        }
        self.stats.record_miss();

        match self.fetch(request).await {
            Fetched::Ok(response) => {
                let entry = CacheEntry::from_response(&response, self.clock.now(), None);
                self.store_entry(&buckets.static_bucket, &key, entry).await;
                Outcome::new(response, class, ServedFrom::Network)
            }
            Fetched::Uncacheable(response) => Outcome::new(response, class, ServedFrom::Network),
            failed => {
                self.fallback_or(buckets, &buckets.static_bucket, &key, class, failed, || {
                    synthesized(StatusCode::NOT_FOUND, "Asset not available", None)
                })
                .await
            }
        }
    }

    async fn network_first(
        &self,
        request: &InterceptedRequest,
        buckets: &BucketSet,
    ) -> Result<Outcome, CoreError> {
        let class = Some(ResourceClass::ApiResource);
        let key = request.key();

        let failed = match self.fetch(request).await {
            Fetched::Ok(response) => {
                let ttl = self
                    .policy
                    .ttl_for(ResourceClass::ApiResource, request.url.path())
                    .map(|ttl| ttl.as_millis() as u64);
                let entry = CacheEntry::from_response(&response, self.clock.now(), ttl);
                self.store_entry(&buckets.dynamic_bucket, &key, entry).await;
                return Ok(Outcome::new(response, class, ServedFrom::Network));
            }
            Fetched::Uncacheable(response) => {
                return Ok(Outcome::new(response, class, ServedFrom::Network));
            }
            Fetched::Rejected(response) => Ok(response),
            Fetched::Unreachable(e) => Err(e),
        };

        if let Some(entry) = self.lookup(buckets, &buckets.dynamic_bucket, &key).await {
            if !self.policy.is_stale(&entry, self.clock.now()) {
                self.stats.record_fallback();
                return Ok(Outcome::new(entry.to_response(), class, ServedFrom::Fallback));
            }
            debug!("Cached {} is stale, not serving it", key);
        }

        match failed {
            Ok(response) => Ok(Outcome::new(response, class, ServedFrom::Network)),
            Err(e) => Err(CoreError::Network(e)),
        }
    }

    async fn stale_while_revalidate(
        &self,
        request: &InterceptedRequest,
        buckets: &BucketSet,
    ) -> Outcome {
        let class = Some(ResourceClass::HtmlPage);
        let key = request.key();

        if let Some(entry) = self.lookup(buckets, &buckets.dynamic_bucket, &key).await {
            self.stats.record_hit();
            let mut outcome = Outcome::new(entry.to_response(), class, ServedFrom::Cache);
            if self.policy.should_revalidate(&entry, self.clock.now()) {
                outcome.revalidation = Some(self.spawn_revalidation(request, buckets, key));
            }
            return outcome;
        }
        self.stats.record_miss();

        match self.fetch(request).await {
            Fetched::Ok(response) => {
                let entry = CacheEntry::from_response(&response, self.clock.now(), None);
                self.store_entry(&buckets.dynamic_bucket, &key, entry).await;
                Outcome::new(response, class, ServedFrom::Network)
            }
            Fetched::Uncacheable(response) | Fetched::Rejected(response) => {
                Outcome::new(response, class, ServedFrom::Network)
            }
            Fetched::Unreachable(_) => {
                self.stats.record_synthesized();
                Outcome::new(
                    synthesized(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Page not available offline",
                        Some("text/html"),
                    ),
                    class,
                    ServedFrom::Synthesized,
                )
            }
        }
    }

    async fn pass_through(&self, request: &InterceptedRequest, buckets: &BucketSet) -> Outcome {
        let class = Some(ResourceClass::Other);

        match self.fetch(request).await {
            Fetched::Ok(response) | Fetched::Uncacheable(response) => {
                Outcome::new(response, class, ServedFrom::Network)
            }
            failed => {
                let key = request.key();
                self.fallback_or(buckets, &buckets.dynamic_bucket, &key, class, failed, || {
                    synthesized(StatusCode::NOT_FOUND, "Resource not available", None)
                })
                .await
            }
        }
    }

    /// Answer a failed fetch from the cache, else with the origin's response,
    /// else with a synthesized placeholder
    async fn fallback_or(
        &self,
        buckets: &BucketSet,
        primary: &str,
        key: &CacheKey,
        class: Option<ResourceClass>,
        failed: Fetched,
        placeholder: impl FnOnce() -> Response<Bytes>,
    ) -> Outcome {
        if let Some(entry) = self.lookup(buckets, primary, key).await {
            self.stats.record_fallback();
            return Outcome::new(entry.to_response(), class, ServedFrom::Fallback);
        }

        match failed {
            Fetched::Ok(response) | Fetched::Uncacheable(response) | Fetched::Rejected(response) => {
                Outcome::new(response, class, ServedFrom::Network)
            }
            Fetched::Unreachable(_) => {
                self.stats.record_synthesized();
                Outcome::new(placeholder(), class, ServedFrom::Synthesized)
            }
        }
    }

    async fn fetch(&self, request: &InterceptedRequest) -> Fetched {
        match self.network.fetch(&request.to_fetch()).await {
            Ok(response) if response.status() == StatusCode::OK => Fetched::Ok(response),
            Ok(response) if response.status().is_success() => {
                debug!("Not caching {} for {}", response.status(), request.url);
                Fetched::Uncacheable(response)
            }
            Ok(response) => {
                debug!("Origin answered {} for {}", response.status(), request.url);
                Fetched::Rejected(response)
            }
            Err(e) => {
                warn!("Network fetch failed for {}: {}", request.url, e);
                Fetched::Unreachable(e)
            }
        }
    }

    /// Find `key` in `primary`, then in the deployment's other bucket
    ///
    /// Storage errors count as a miss.
    async fn lookup(&self, buckets: &BucketSet, primary: &str, key: &CacheKey) -> Option<CacheEntry> {
        let secondary = if primary == buckets.static_bucket {
            &buckets.dynamic_bucket
        } else {
            &buckets.static_bucket
        };

        for bucket in [primary, secondary.as_str()] {
            match self.store.get(bucket, key).await {
                Ok(Some(entry)) => return Some(entry),
                Ok(None) => {}
                Err(e) => warn!("Cache read failed for {} in {}: {}", key, bucket, e),
            }
        }
        None
    }

    /// Write an entry; failures are logged and never reach the caller
    async fn store_entry(&self, bucket: &str, key: &CacheKey, entry: CacheEntry) {
        if let Err(e) = self.store.put(bucket, key, entry).await {
            warn!("Cache write failed for {} in {}: {}", key, bucket, e);
        }
    }

    fn spawn_revalidation(
        &self,
        request: &InterceptedRequest,
        buckets: &BucketSet,
        key: CacheKey,
    ) -> JoinHandle<()> {
        self.stats.record_revalidation();
        let executor = self.clone();
        let request = request.clone();
        let bucket = buckets.dynamic_bucket.clone();

        tokio::spawn(async move {
            debug!("Revalidating {}", key);
            match executor.fetch(&request).await {
                Fetched::Ok(response) => {
                    let entry = CacheEntry::from_response(&response, executor.clock.now(), None);
                    executor.store_entry(&bucket, &key, entry).await;
                }
                Fetched::Uncacheable(response) => {
                    debug!("Background revalidation of {} got {}, keeping entry", key, response.status());
                }
                Fetched::Rejected(response) => {
                    warn!("Background revalidation of {} got {}", key, response.status());
                }
                Fetched::Unreachable(e) => {
                    warn!("Background revalidation of {} failed: {}", key, e);
                }
            }
        })
    }
}

fn record_request(class: &'static str, served_from: ServedFrom) {
    metrics::counter!(
        "offline_cache_requests_total",
        "class" => class,
        "source" => served_from.as_str()
    )
    .increment(1);
}

fn synthesized(status: StatusCode, body: &'static str, content_type: Option<&'static str>) -> Response<Bytes> {
    let mut response = Response::new(Bytes::from_static(body.as_bytes()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type.unwrap_or("text/plain")),
    );
    response
}
