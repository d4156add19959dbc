//! Salesfeed - cached sales report API for dashboards
//!
//! Fetches month-to-date sales reports from the accounting provider and
//! serves them from memory with:
//! - Time and calendar-day staleness
//! - At most one upstream fetch in flight per report
//! - Background refresh of populated reports
//! - Disk persistence for warm restarts
//! - Prometheus metrics

mod cache;
mod config;
mod error;
mod handlers;
mod metrics;
mod model;
mod services;
mod utils;

use crate::cache::{
    BackgroundRefresher, DiskStore, FreshnessCache, RefreshCoordinator, RefreshTrigger,
};
use crate::config::Config;
use crate::handlers::{router, AppState};
use crate::metrics::create_metrics;
use crate::services::splendid::api::{ReqwestTransport, UpstreamClient};
use crate::services::splendid::ReportRegistry;
use crate::utils::ascii::print_startup_banner;
use anyhow::Context;
use chrono::Local;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Salesfeed - cached sales report API
#[derive(Parser, Debug)]
#[command(name = "salesfeed")]
#[command(author, version, about = "Cached sales report API for dashboards", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,

    /// Enable debug logging for upstream API requests
    #[arg(long)]
    debug_requests: bool,

    /// Server port (overrides PORT env var)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let boot_start = Instant::now();

    // Load .env file first (before parsing args, so env vars are available)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs, args.debug_requests)?;

    print_startup_banner();

    info!("Starting Salesfeed v{}", env!("CARGO_PKG_VERSION"));

    // CLI port overrides env var
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.debug_requests = args.debug_requests;

    if config.debug_requests {
        info!("Request debugging enabled");
    }

    info!(
        cache_duration_secs = config.cache.cache_duration.as_secs(),
        refresh_interval_secs = config.cache.refresh_interval.as_secs(),
        cache_path = %config.cache.cache_path.display(),
        "Cache configuration"
    );

    let metrics = create_metrics();

    let registry = ReportRegistry::from_config(&config.upstream);
    let transport = ReqwestTransport::new(&config.upstream)
        .context("Failed to build upstream HTTP client")?;
    let client = UpstreamClient::new(Arc::new(transport), config.to_retry_policy(), metrics.clone());
    let disk = Arc::new(DiskStore::new(config.cache.cache_path.clone()));
    let cache = Arc::new(FreshnessCache::new(config.cache.cache_duration));
    let coordinator = Arc::new(RefreshCoordinator::new(
        registry,
        client,
        cache,
        disk.clone(),
        metrics.clone(),
    ));

    // Warm start from the snapshot when possible
    let restored = coordinator.restore(disk.load_all().await).await;
    let boot_type = if restored > 0 { "warm_start" } else { "cold_start" };
    info!(
        boot_type = boot_type,
        restored = restored,
        reports = coordinator.registry().len(),
        "Cache initialized"
    );
    metrics.record_boot(boot_type, boot_start.elapsed().as_secs_f64());

    if config.cache.prefetch_on_start {
        spawn_prefetch(&coordinator).await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresher = BackgroundRefresher::new(
        coordinator.clone(),
        config.to_refresher_config(),
        shutdown_rx,
    );
    let refresher_handle = tokio::spawn(refresher.run());

    let app = router(AppState {
        coordinator,
        metrics,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(
        "Listening on http://{} (Data: /api/data, Status: /api/cache-status, Metrics: /metrics, Health: /health)",
        addr
    );

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
        }
        info!("Shutdown signal received, initiating graceful shutdown...");
        let _ = shutdown_tx.send(true);
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    if let Err(e) = refresher_handle.await {
        error!(error = %e, "Background refresher task failed");
    }

    info!("Salesfeed shutdown complete");
    Ok(())
}

/// Start a coordinated fetch for every report the snapshot did not cover.
///
/// Runs in the background so the listener comes up immediately; a read that
/// arrives first joins the in-flight fetch.
async fn spawn_prefetch(coordinator: &Arc<RefreshCoordinator>) {
    let now = Local::now();
    let cache = coordinator.cache();

    for id in coordinator.registry().ids() {
        match cache.get(id).await {
            Some(entry) if !cache.is_stale(&entry, now) => continue,
            Some(_) => info!(report = id, "Restored entry is stale, refreshing"),
            None => info!(report = id, "No cached entry, prefetching"),
        }

        let coordinator = coordinator.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = coordinator
                .ensure_fresh_or_refresh(&id, RefreshTrigger::Startup)
                .await
            {
                error!(report = %id, error = %e, "Startup prefetch failed");
            }
        });
    }
}

/// Initialize the logging subsystem
fn init_logging(level: &str, json: bool, debug_requests: bool) -> anyhow::Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);

    let filter = if debug_requests {
        EnvFilter::new(format!(
            "salesfeed={},salesfeed::services::splendid::api=debug,tower_http=debug,hyper=warn",
            level
        ))
    } else {
        EnvFilter::new(format!("salesfeed={},tower_http=info,hyper=warn", level))
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }

    Ok(())
}
