//! Configuration loading

use anyhow::{Context, Result, bail};
use offline_core::{ClassifierConfig, FreshnessPolicy, JanitorConfig, LifecycleConfig, TtlRule};
use offline_proxy::OriginClientConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub origin: OriginConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub classifier: ClassifierSection,
    #[serde(default)]
    pub freshness: FreshnessConfig,
    #[serde(default)]
    pub janitor: JanitorSection,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Origin server the cache fronts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    #[serde(default = "default_origin_url")]
    pub url: String,
    /// Request timeout in seconds; unset means no timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub skip_tls_verify: bool,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            url: default_origin_url(),
            timeout_secs: None,
            skip_tls_verify: false,
            user_agent: None,
        }
    }
}

/// Deployment identity and activation behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub skip_waiting: bool,
    #[serde(default = "default_install_retry_secs")]
    pub install_retry_secs: u64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            skip_waiting: false,
            install_retry_secs: default_install_retry_secs(),
        }
    }
}

/// Paths precached at install
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    #[serde(default = "default_manifest_paths")]
    pub paths: Vec<String>,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            paths: default_manifest_paths(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "local" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub local: LocalStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            local: LocalStorageConfig::default(),
        }
    }
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    #[serde(default = "default_local_path")]
    pub path: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            path: default_local_path(),
        }
    }
}

/// Classification rules; unset fields keep the built-in rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierSection {
    pub static_extensions: Option<Vec<String>>,
    pub static_prefixes: Option<Vec<String>>,
    pub api_prefix: Option<String>,
    pub page_extension: Option<String>,
}

/// API TTL rule as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlRuleConfig {
    pub pattern: String,
    pub ttl_secs: u64,
}

/// Freshness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessConfig {
    /// Ordered API rules; unset keeps the built-in table
    #[serde(default)]
    pub api_rules: Option<Vec<TtlRuleConfig>>,
    #[serde(default = "default_api_ttl_secs")]
    pub default_api_ttl_secs: u64,
    #[serde(default = "default_revalidate_after_secs")]
    pub revalidate_after_secs: u64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            api_rules: None,
            default_api_ttl_secs: default_api_ttl_secs(),
            revalidate_after_secs: default_revalidate_after_secs(),
        }
    }
}

/// Janitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanitorSection {
    #[serde(default = "default_janitor_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_janitor_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_janitor_max_entries")]
    pub max_entries: usize,
}

impl Default for JanitorSection {
    fn default() -> Self {
        Self {
            interval_secs: default_janitor_interval_secs(),
            max_age_secs: default_janitor_max_age_secs(),
            max_entries: default_janitor_max_entries(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

// Default value functions

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_origin_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_version() -> String {
    "v1".to_string()
}

fn default_install_retry_secs() -> u64 {
    30
}

fn default_manifest_paths() -> Vec<String> {
    LifecycleConfig::default().manifest
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_local_path() -> String {
    "./data/cache".to_string()
}

fn default_api_ttl_secs() -> u64 {
    300
}

fn default_revalidate_after_secs() -> u64 {
    60
}

fn default_janitor_interval_secs() -> u64 {
    60
}

fn default_janitor_max_age_secs() -> u64 {
    600
}

fn default_janitor_max_entries() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Config {
    /// Load configuration from a file, falling back to defaults if it is missing
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.origin_url()?;
        if self.deployment.version.trim().is_empty() {
            bail!("deployment.version must not be empty");
        }
        offline_storage::validate_bucket_name(&offline_storage::bucket_name(
            "static",
            &self.deployment.version,
        ))
        .with_context(|| format!("Unusable deployment.version: {}", self.deployment.version))?;
        if self.janitor.max_entries == 0 {
            bail!("janitor.max_entries must be greater than 0");
        }
        match self.storage.backend.as_str() {
            "local" | "memory" => {}
            other => bail!("Unknown storage backend: {}", other),
        }
        Ok(())
    }

    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin.url)
            .with_context(|| format!("Invalid origin URL: {}", self.origin.url))
    }

    pub fn origin_client_config(&self) -> OriginClientConfig {
        OriginClientConfig {
            timeout: self.origin.timeout_secs.map(Duration::from_secs),
            skip_tls_verify: self.origin.skip_tls_verify,
            user_agent: self.origin.user_agent.clone(),
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            version: self.deployment.version.clone(),
            manifest: self.manifest.paths.clone(),
            skip_waiting: self.deployment.skip_waiting,
            install_retry: Duration::from_secs(self.deployment.install_retry_secs),
        }
    }

    pub fn classifier_config(&self) -> ClassifierConfig {
        let defaults = ClassifierConfig::default();
        let section = &self.classifier;
        ClassifierConfig {
            static_extensions: section
                .static_extensions
                .clone()
                .unwrap_or(defaults.static_extensions),
            static_prefixes: section
                .static_prefixes
                .clone()
                .unwrap_or(defaults.static_prefixes),
            api_prefix: section.api_prefix.clone().unwrap_or(defaults.api_prefix),
            page_extension: section
                .page_extension
                .clone()
                .unwrap_or(defaults.page_extension),
        }
    }

    pub fn freshness_policy(&self) -> FreshnessPolicy {
        let api_rules = match &self.freshness.api_rules {
            Some(rules) => rules
                .iter()
                .map(|r| TtlRule::new(r.pattern.clone(), Duration::from_secs(r.ttl_secs)))
                .collect(),
            None => FreshnessPolicy::default().api_rules,
        };

        FreshnessPolicy {
            api_rules,
            default_api_ttl: Duration::from_secs(self.freshness.default_api_ttl_secs),
            revalidate_after: Duration::from_secs(self.freshness.revalidate_after_secs),
        }
    }

    pub fn janitor_config(&self) -> JanitorConfig {
        JanitorConfig {
            interval: Duration::from_secs(self.janitor.interval_secs),
            max_age: Duration::from_secs(self.janitor.max_age_secs),
            max_entries: self.janitor.max_entries,
        }
    }
}
