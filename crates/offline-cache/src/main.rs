//! Offline Cache - offline-capable caching proxy for a single web origin

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::Config;
use offline_api::{AppState, create_router};
use offline_core::{
    Classifier, Clock, Controller, Janitor, LifecycleManager, StrategyExecutor, SystemClock,
    spawn_control_loop, spawn_install_task, spawn_janitor,
};
use offline_proxy::{Fetcher, OriginClient};
use offline_storage::{CacheStore, LocalStore, MemoryStore};

/// Offline Cache - serves a web origin's assets, pages and API responses while it is unreachable
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "OFFLINE_CACHE_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "OFFLINE_CACHE_PORT")]
    port: Option<u16>,

    /// Origin URL
    #[arg(long, env = "OFFLINE_CACHE_ORIGIN")]
    origin: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(origin) = args.origin {
        config.origin.url = origin;
        config.validate()?;
    }

    init_logging(&config.logging.level, &config.logging.format);

    info!("Starting Offline Cache v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = if config.metrics.enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        Some(Arc::new(handle))
    } else {
        None
    };

    let store: Arc<dyn CacheStore> = match config.storage.backend.as_str() {
        "memory" => {
            warn!("Using in-memory storage, cached responses will not survive a restart");
            Arc::new(MemoryStore::new())
        }
        _ => Arc::new(
            LocalStore::new(&config.storage.local.path)
                .await
                .with_context(|| {
                    format!("Failed to open storage at {}", config.storage.local.path)
                })?,
        ),
    };

    let origin = config.origin_url()?;
    let network: Arc<dyn Fetcher> = Arc::new(OriginClient::new(config.origin_client_config())?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let controller = Arc::new(Controller::new());

    let lifecycle = Arc::new(LifecycleManager::new(
        store.clone(),
        network.clone(),
        origin.clone(),
        config.lifecycle_config(),
        controller.clone(),
        clock.clone(),
    ));
    if let Some(previous) = lifecycle.recover().await? {
        info!("Serving deployment {} until the new one activates", previous.version);
    }

    let executor = StrategyExecutor::new(
        store.clone(),
        network,
        Arc::new(Classifier::new(&origin, config.classifier_config())),
        Arc::new(config.freshness_policy()),
        controller.clone(),
        clock.clone(),
    );

    let janitor = Arc::new(Janitor::new(
        store.clone(),
        controller,
        clock,
        config.janitor_config(),
    ));

    // Background tasks
    let (control_tx, control_rx) = mpsc::channel(32);
    spawn_control_loop(lifecycle.clone(), control_rx);
    spawn_install_task(lifecycle.clone());
    spawn_janitor(janitor.clone());

    let state = AppState::new(executor, lifecycle, control_tx, janitor, store, origin.clone());
    let app = create_router(state, metrics_handle).layer(TraceLayer::new_for_http());

    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind_addr, port))?;

    info!("Listening on {}", addr);
    info!("Origin: {}", origin);
    info!("Deployment version: {}", config.deployment.version);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Initialize logging; RUST_LOG overrides the configured level
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
