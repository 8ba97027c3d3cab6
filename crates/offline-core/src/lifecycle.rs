//! Deployment lifecycle
//!
//! A deployment is identified by its version string and owns two buckets,
//! `static@<version>` and `dynamic@<version>`. The [`LifecycleManager`] moves
//! a deployment through install and activation, and the shared
//! [`Controller`] records which deployment currently serves requests.
//!
//! Install seeds the static bucket from a manifest and is all-or-nothing.
//! Activation deletes every bucket that does not belong to the deployment
//! before it takes over request handling.

use futures::future::join_all;
use offline_proxy::{FetchRequest, Fetcher};
use offline_storage::{CacheEntry, CacheKey, CacheStore, bucket_name, parse_bucket_name};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::clock::Clock;
use crate::error::CoreError;

pub const STATIC_BUCKET: &str = "static";
pub const DYNAMIC_BUCKET: &str = "dynamic";

/// Bucket names owned by one deployment version
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketSet {
    pub version: String,
    pub static_bucket: String,
    pub dynamic_bucket: String,
}

impl BucketSet {
    pub fn for_version(version: &str) -> Self {
        Self {
            version: version.to_string(),
            static_bucket: bucket_name(STATIC_BUCKET, version),
            dynamic_bucket: bucket_name(DYNAMIC_BUCKET, version),
        }
    }

    pub fn contains(&self, bucket: &str) -> bool {
        bucket == self.static_bucket || bucket == self.dynamic_bucket
    }
}

/// The deployment currently answering intercepted requests
///
/// While no deployment controls requests, the executor passes everything
/// straight to the network.
#[derive(Debug, Default)]
pub struct Controller {
    current: RwLock<Option<BucketSet>>,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// A controller already claimed by `buckets`
    pub fn claimed(buckets: BucketSet) -> Self {
        Self {
            current: RwLock::new(Some(buckets)),
        }
    }

    pub fn current(&self) -> Option<BucketSet> {
        self.current.read().clone()
    }

    pub fn claim(&self, buckets: BucketSet) {
        info!("Deployment {} now controls requests", buckets.version);
        *self.current.write() = Some(buckets);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Installing,
    InstallFailed,
    Waiting,
    Activating,
    Active,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Installing => "installing",
            LifecycleState::InstallFailed => "install_failed",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
        }
    }

    fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, Installing)
                | (InstallFailed, Installing)
                | (Installing, Waiting)
                | (Installing, InstallFailed)
                | (Waiting, Activating)
                | (Activating, Active)
                | (Activating, Waiting)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message from the host page on the control channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(alias = "SKIP_WAITING")]
    SkipWaiting,
    #[serde(alias = "CLEAR_CACHE")]
    ClearCache,
}

/// Reply sent back on a message's reply channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<LifecycleState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlReply {
    fn ok(state: LifecycleState) -> Self {
        Self {
            success: true,
            state: Some(state),
            error: None,
        }
    }

    fn failed(state: LifecycleState, error: &CoreError) -> Self {
        Self {
            success: false,
            state: Some(state),
            error: Some(error.to_string()),
        }
    }
}

/// A control message plus the channel its reply goes to
#[derive(Debug)]
pub struct ControlEnvelope {
    pub message: ControlMessage,
    pub reply: Option<oneshot::Sender<ControlReply>>,
}

impl ControlEnvelope {
    pub fn new(message: ControlMessage) -> (Self, oneshot::Receiver<ControlReply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                message,
                reply: Some(tx),
            },
            rx,
        )
    }
}

/// Lifecycle configuration
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Deployment version; part of every bucket name
    pub version: String,
    /// Origin-relative paths seeded into the static bucket at install
    pub manifest: Vec<String>,
    /// Activate as soon as install completes, even over a previous deployment
    pub skip_waiting: bool,
    /// Delay between failed install attempts
    pub install_retry: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        let manifest = [
            "/",
            "/index.html",
            "/login.html",
            "/register.html",
            "/profile.html",
            "/mobile.html",
            "/src/output.css",
            "/src/device-detection.js",
            "/src/prefetch.js",
        ];

        Self {
            version: "v1".to_string(),
            manifest: manifest.iter().map(|p| p.to_string()).collect(),
            skip_waiting: false,
            install_retry: Duration::from_secs(30),
        }
    }
}

/// Snapshot of the lifecycle for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleStatus {
    pub state: LifecycleState,
    pub version: String,
    pub controlling_version: Option<String>,
}

/// Drives a deployment through install and activation
pub struct LifecycleManager {
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Fetcher>,
    origin: Url,
    config: LifecycleConfig,
    buckets: BucketSet,
    controller: Arc<Controller>,
    clock: Arc<dyn Clock>,
    state: RwLock<LifecycleState>,
    skip_waiting: AtomicBool,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Fetcher>,
        origin: Url,
        config: LifecycleConfig,
        controller: Arc<Controller>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(
            "Initializing lifecycle for deployment {} ({} manifest entries)",
            config.version,
            config.manifest.len()
        );

        Self {
            store,
            network,
            origin,
            buckets: BucketSet::for_version(&config.version),
            skip_waiting: AtomicBool::new(config.skip_waiting),
            config,
            controller,
            clock,
            state: RwLock::new(LifecycleState::Idle),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn buckets(&self) -> &BucketSet {
        &self.buckets
    }

    pub fn status(&self) -> LifecycleStatus {
        LifecycleStatus {
            state: self.state(),
            version: self.buckets.version.clone(),
            controlling_version: self.controller.current().map(|b| b.version),
        }
    }

    fn transition(&self, next: LifecycleState) -> Result<LifecycleState, CoreError> {
        let mut state = self.state.write();
        let prev = *state;
        if !prev.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: prev,
                to: next,
            });
        }
        *state = next;
        debug!("Lifecycle {} -> {}", prev, next);
        Ok(prev)
    }

    /// Restore the controller left behind by a previous run
    ///
    /// A static bucket only exists once its install completed, so one is
    /// proof of a usable deployment. The current version wins; otherwise the
    /// highest other version keeps serving until this deployment activates.
    /// Versions compare by their numeric runs, so `v10` is newer than `v9`.
    pub async fn recover(&self) -> Result<Option<BucketSet>, CoreError> {
        if self.controller.current().is_some() {
            return Ok(self.controller.current());
        }

        let names = self.store.list_buckets().await?;
        let mut versions: Vec<&str> = names
            .iter()
            .filter_map(|name| parse_bucket_name(name))
            .filter(|(logical, _)| *logical == STATIC_BUCKET)
            .map(|(_, version)| version)
            .collect();
        versions.sort_unstable_by(|a, b| compare_versions(a, b));

        let recovered = if versions.contains(&self.buckets.version.as_str()) {
            Some(self.buckets.clone())
        } else {
            versions.last().map(|v| BucketSet::for_version(v))
        };

        if let Some(ref buckets) = recovered {
            info!("Recovered deployment {} from storage", buckets.version);
            self.controller.claim(buckets.clone());
        }

        Ok(recovered)
    }

    /// Seed the static bucket from the manifest, then activate if allowed
    ///
    /// Every manifest URL is fetched before anything is written. A single
    /// failure leaves storage untouched and the state at `InstallFailed`.
    pub async fn install(&self) -> Result<(), CoreError> {
        self.transition(LifecycleState::Installing)?;
        info!("Installing deployment {}", self.buckets.version);

        match self.seed_static_bucket().await {
            Ok(count) => {
                info!("Cached {} static assets into {}", count, self.buckets.static_bucket);
                self.transition(LifecycleState::Waiting)?;
            }
            Err(e) => {
                warn!("Install of deployment {} failed: {}", self.buckets.version, e);
                self.transition(LifecycleState::InstallFailed)?;
                return Err(e);
            }
        }

        if self.should_activate_now() {
            self.activate().await?;
        } else {
            info!(
                "Deployment {} installed, waiting for skip-waiting",
                self.buckets.version
            );
        }

        Ok(())
    }

    fn should_activate_now(&self) -> bool {
        match self.controller.current() {
            None => true,
            Some(current) if current == self.buckets => true,
            Some(_) => self.skip_waiting.load(Ordering::SeqCst),
        }
    }

    async fn seed_static_bucket(&self) -> Result<usize, CoreError> {
        let mut urls = Vec::with_capacity(self.config.manifest.len());
        for path in &self.config.manifest {
            let url = self
                .origin
                .join(path)
                .map_err(|e| CoreError::InvalidUrl(format!("{}: {}", path, e)))?;
            urls.push(url);
        }

        let responses = join_all(urls.iter().map(|url| async move {
            let result = self.network.fetch(&FetchRequest::get(url.clone())).await;
            (url, result)
        }))
        .await;

        let now = self.clock.now();
        let mut fetched = Vec::with_capacity(responses.len());
        let mut failed = Vec::new();
        for (url, result) in responses {
            match result {
                Ok(response) if response.status().is_success() => {
                    let entry = CacheEntry::from_response(&response, now, None);
                    fetched.push((CacheKey::get(url.as_str()), entry));
                }
                Ok(response) => {
                    warn!("Manifest entry {} returned {}", url, response.status());
                    failed.push(url.path().to_string());
                }
                Err(e) => {
                    warn!("Manifest entry {} failed: {}", url, e);
                    failed.push(url.path().to_string());
                }
            }
        }

        if !failed.is_empty() {
            return Err(CoreError::InstallFailed { failed });
        }

        let count = fetched.len();
        let bucket = &self.buckets.static_bucket;
        if let Err(e) = self.write_static_entries(bucket, fetched).await {
            // Do not leave a partial bucket behind unless it is already serving
            if self.controller.current().as_ref() != Some(&self.buckets) {
                if let Err(cleanup) = self.store.delete_bucket(bucket).await {
                    warn!("Failed to remove partial bucket {}: {}", bucket, cleanup);
                }
            }
            return Err(e);
        }

        Ok(count)
    }

    async fn write_static_entries(
        &self,
        bucket: &str,
        entries: Vec<(CacheKey, CacheEntry)>,
    ) -> Result<(), CoreError> {
        self.store.open(bucket).await?;
        for (key, entry) in entries {
            self.store.put(bucket, &key, entry).await?;
        }
        Ok(())
    }

    /// Delete every foreign bucket and take over request handling
    pub async fn activate(&self) -> Result<(), CoreError> {
        {
            let mut state = self.state.write();
            match *state {
                // Another caller is activating or already has
                LifecycleState::Activating | LifecycleState::Active => return Ok(()),
                LifecycleState::Waiting => *state = LifecycleState::Activating,
                other => {
                    return Err(CoreError::InvalidTransition {
                        from: other,
                        to: LifecycleState::Activating,
                    });
                }
            }
        }

        info!("Activating deployment {}", self.buckets.version);

        if let Err(e) = self.remove_foreign_buckets().await {
            error!("Activation of deployment {} failed: {}", self.buckets.version, e);
            self.transition(LifecycleState::Waiting)?;
            return Err(e);
        }

        self.controller.claim(self.buckets.clone());
        self.transition(LifecycleState::Active)?;
        info!("Deployment {} active", self.buckets.version);
        Ok(())
    }

    async fn remove_foreign_buckets(&self) -> Result<(), CoreError> {
        let names = self.store.list_buckets().await?;
        for name in names.iter().filter(|name| !self.buckets.contains(name)) {
            info!("Deleting old bucket: {}", name);
            self.store.delete_bucket(name).await?;
        }
        self.store.open(&self.buckets.static_bucket).await?;
        self.store.open(&self.buckets.dynamic_bucket).await?;
        Ok(())
    }

    /// Activate now if waiting; otherwise activate as soon as install completes
    pub async fn skip_waiting(&self) -> Result<LifecycleState, CoreError> {
        self.skip_waiting.store(true, Ordering::SeqCst);

        if self.state() == LifecycleState::Waiting {
            self.activate().await?;
        }

        Ok(self.state())
    }

    /// Delete every bucket, returns how many were removed
    pub async fn clear_all(&self) -> Result<usize, CoreError> {
        let names = self.store.list_buckets().await?;
        let mut deleted = 0;
        for name in &names {
            if self.store.delete_bucket(name).await? {
                deleted += 1;
            }
        }
        info!("All caches cleared ({} buckets)", deleted);
        Ok(deleted)
    }

    /// Handle one control message and build its reply
    pub async fn handle_message(&self, message: &ControlMessage) -> ControlReply {
        let result = match message {
            ControlMessage::SkipWaiting => self.skip_waiting().await.map(|_| ()),
            ControlMessage::ClearCache => self.clear_all().await.map(|_| ()),
        };

        match result {
            Ok(()) => ControlReply::ok(self.state()),
            Err(e) => {
                warn!("Control message {:?} failed: {}", message, e);
                ControlReply::failed(self.state(), &e)
            }
        }
    }
}

/// Serve control messages until every sender is dropped
pub fn spawn_control_loop(
    manager: Arc<LifecycleManager>,
    mut rx: mpsc::Receiver<ControlEnvelope>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            debug!("Control message: {:?}", envelope.message);
            let reply = manager.handle_message(&envelope.message).await;
            if let Some(tx) = envelope.reply {
                if tx.send(reply).is_err() {
                    debug!("Control reply dropped, caller went away");
                }
            }
        }
        debug!("Control channel closed");
    })
}

/// Order deployment versions, comparing digit runs numerically
fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let mut left = version_runs(a);
    let mut right = version_runs(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(m), Ok(n)) => m.cmp(&n),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Split into maximal runs of ASCII digits and non-digits
fn version_runs(version: &str) -> impl Iterator<Item = &str> {
    let mut rest = version;
    std::iter::from_fn(move || {
        let digit = rest.chars().next()?.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != digit)
            .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        rest = tail;
        Some(run)
    })
}

/// Install in the background, retrying failed attempts
///
/// A deployment left `Waiting` by a failed activation is activated again on
/// the next attempt instead of being reinstalled.
pub fn spawn_install_task(manager: Arc<LifecycleManager>) -> tokio::task::JoinHandle<()> {
    let retry = manager.config.install_retry.max(Duration::from_secs(1));

    tokio::spawn(async move {
        loop {
            let attempt = if manager.state() == LifecycleState::Waiting {
                if !manager.should_activate_now() {
                    info!("Deployment installed, waiting for skip-waiting");
                    break;
                }
                manager.activate().await
            } else {
                manager.install().await
            };

            match attempt {
                Ok(()) => break,
                Err(CoreError::InvalidTransition { from, .. }) => {
                    warn!("Install skipped, lifecycle is {}", from);
                    break;
                }
                Err(e) => {
                    warn!("Install attempt failed, retrying in {:?}: {}", retry, e);
                    tokio::time::sleep(retry).await;
                }
            }
        }
    })
}
