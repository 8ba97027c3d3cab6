//! API routes

mod control;
mod health;
mod intercept;
pub mod metrics;

use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;

use crate::state::{AppState, MetricsHandle};

pub use intercept::CACHE_SOURCE_HEADER;

/// Create the main router
pub fn create_router(state: AppState, metrics_handle: Option<Arc<MetricsHandle>>) -> Router {
    let mut router = Router::new()
        .merge(health::routes())
        .merge(control::routes())
        // Everything else is proxied through the cache
        .fallback(intercept::intercept)
        .with_state(state)
        .layer(DefaultBodyLimit::max(16 * 1024 * 1024));

    if let Some(handle) = metrics_handle {
        router = router.merge(metrics::routes(handle));
    }

    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use bytes::Bytes;
    use offline_core::{
        BucketSet, Classifier, ClassifierConfig, Controller, FreshnessPolicy, Janitor,
        JanitorConfig, LifecycleConfig, LifecycleManager, StrategyExecutor, SystemClock,
        spawn_control_loop,
    };
    use offline_proxy::{FetchRequest, Fetcher, ProxyError};
    use offline_storage::{CacheKey, CacheStore, MemoryStore};
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::collections::HashMap;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use url::Url;

    const ORIGIN: &str = "http://app.test";

    #[derive(Default)]
    struct StubOrigin {
        routes: Mutex<HashMap<String, (u16, &'static str)>>,
    }

    impl StubOrigin {
        fn serve(&self, path: &str, status: u16, body: &'static str) {
            self.routes.lock().insert(path.to_string(), (status, body));
        }

        fn go_offline(&self) {
            self.routes.lock().clear();
        }
    }

    #[async_trait]
    impl Fetcher for StubOrigin {
        async fn fetch(
            &self,
            request: &FetchRequest,
        ) -> Result<http::Response<Bytes>, ProxyError> {
            let route = self.routes.lock().get(request.url.path()).copied();
            match route {
                Some((status, body)) => Ok(http::Response::builder()
                    .status(status)
                    .header("content-type", "text/plain")
                    .body(Bytes::from_static(body.as_bytes()))
                    .unwrap()),
                None => Err(ProxyError::Unreachable(request.url.to_string())),
            }
        }
    }

    struct Harness {
        router: Router,
        store: Arc<MemoryStore>,
        origin: Arc<StubOrigin>,
    }

    fn harness() -> Harness {
        let origin_url = Url::parse(ORIGIN).unwrap();
        let store = Arc::new(MemoryStore::new());
        let origin = Arc::new(StubOrigin::default());
        let controller = Arc::new(Controller::claimed(BucketSet::for_version("v1")));
        let clock = Arc::new(SystemClock);

        let executor = StrategyExecutor::new(
            store.clone(),
            origin.clone(),
            Arc::new(Classifier::new(&origin_url, ClassifierConfig::default())),
            Arc::new(FreshnessPolicy::default()),
            controller.clone(),
            clock.clone(),
        );
        let lifecycle = Arc::new(LifecycleManager::new(
            store.clone(),
            origin.clone(),
            origin_url.clone(),
            LifecycleConfig::default(),
            controller.clone(),
            clock.clone(),
        ));
        let janitor = Arc::new(Janitor::new(
            store.clone(),
            controller,
            clock,
            JanitorConfig::default(),
        ));

        let (tx, rx) = mpsc::channel(8);
        spawn_control_loop(lifecycle.clone(), rx);

        let state = AppState::new(executor, lifecycle, tx, janitor, store.clone(), origin_url);
        Harness {
            router: create_router(state, None),
            store,
            origin,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, http::HeaderMap, Bytes) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_static_asset_served_offline_after_first_fetch() {
        let h = harness();
        h.origin.serve("/style.css", 200, "body{}");

        let (status, headers, body) = send(&h.router, get("/style.css")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CACHE_SOURCE_HEADER], "network");
        assert_eq!(body, Bytes::from_static(b"body{}"));

        h.origin.go_offline();
        let (status, headers, body) = send(&h.router, get("/style.css")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CACHE_SOURCE_HEADER], "cache");
        assert_eq!(body, Bytes::from_static(b"body{}"));
    }

    #[tokio::test]
    async fn test_api_unreachable_is_bad_gateway() {
        let h = harness();

        let (status, _, body) = send(&h.router, get("/api/leaderboard")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "NETWORK_ERROR");
    }

    #[tokio::test]
    async fn test_api_fallback_through_router() {
        let h = harness();
        h.origin.serve("/api/leaderboard", 200, r#"{"rank":1}"#);
        send(&h.router, get("/api/leaderboard")).await;

        h.origin.go_offline();
        let (status, headers, body) = send(&h.router, get("/api/leaderboard")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CACHE_SOURCE_HEADER], "fallback");
        assert_eq!(body, Bytes::from_static(br#"{"rank":1}"#));
    }

    #[tokio::test]
    async fn test_clear_cache_message() {
        let h = harness();
        h.store
            .open("static@v1")
            .await
            .unwrap();
        h.store
            .open("static@v0")
            .await
            .unwrap();

        let (status, _, body) =
            send(&h.router, post("/__offline/control", r#"{"type":"ClearCache"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
        assert!(h.store.list_buckets().await.unwrap().is_empty());

        // The next static request misses and goes to the network
        h.origin.serve("/style.css", 200, "body{}");
        let (_, headers, _) = send(&h.router, get("/style.css")).await;
        assert_eq!(headers[CACHE_SOURCE_HEADER], "network");
    }

    #[tokio::test]
    async fn test_invalid_control_message() {
        let h = harness();

        let (status, _, _) = send(&h.router, post("/__offline/control", r#"{"type":"Reboot"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&h.router, post("/__offline/control", "not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_request_target_cannot_leave_origin() {
        let h = harness();
        h.origin.serve("//evil.test/api/secret", 200, "same origin");

        let (status, _, body) = send(&h.router, get("//evil.test/api/secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(b"same origin"));

        let (status, _, body) = send(&h.router, get("http://evil.test/api/secret")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_status_and_health() {
        let h = harness();

        let (status, _, body) = send(&h.router, get("/__offline/status")).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["version"], "v1");
        assert_eq!(json["controlling_version"], "v1");

        let (status, _, body) = send(&h.router, get("/__offline/health")).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn test_stats_and_janitor() {
        let h = harness();
        h.origin.serve("/api/videos", 200, "[]");
        send(&h.router, get("/api/videos")).await;

        let (status, _, body) = send(&h.router, get("/__offline/stats")).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["buckets"]["dynamic@v1"], 1);

        let key = CacheKey::get(format!("{}/api/videos", ORIGIN));
        assert!(h.store.get("dynamic@v1", &key).await.unwrap().is_some());

        let (status, _, body) = send(&h.router, post("/__offline/janitor", "")).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["expired"], 0);
        assert_eq!(json["trimmed"], 0);
    }
}
