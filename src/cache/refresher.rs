//! Background refresher keeping cached reports fresh.
//!
//! A single loop, independent of any request, wakes on a fixed tick, checks
//! every report that already has a cache entry and refreshes the stale ones
//! through the coordinator. Reports with no entry are left to the first
//! read. Failures are logged and the loop carries on until shutdown.

use crate::cache::coordinator::{RefreshCoordinator, RefreshTrigger};
use chrono::Local;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Configuration for the background refresher
#[derive(Debug, Clone)]
pub struct RefresherConfig {
    /// Pause between freshness sweeps
    pub tick_interval: Duration,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
        }
    }
}

/// What one sweep did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    /// Reports without an entry, left to the cold-start path
    pub skipped: usize,
    pub fresh: usize,
    pub refreshed: usize,
    pub failed: usize,
}

pub struct BackgroundRefresher {
    coordinator: Arc<RefreshCoordinator>,
    config: RefresherConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl BackgroundRefresher {
    pub fn new(
        coordinator: Arc<RefreshCoordinator>,
        config: RefresherConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            coordinator,
            config,
            shutdown_rx,
        }
    }

    /// Run until the shutdown signal flips to `true` or its sender is dropped.
    ///
    /// Shutdown also interrupts a sweep in progress. Fetches already handed
    /// to the coordinator finish on their own tasks.
    pub async fn run(self) {
        info!(
            interval_secs = self.config.tick_interval.as_secs(),
            "Starting background refresher"
        );

        let mut shutdown_rx = self.shutdown_rx.clone();
        let period = self.config.tick_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown_rx) => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                summary = self.tick() => {
                    debug!(
                        skipped = summary.skipped,
                        fresh = summary.fresh,
                        refreshed = summary.refreshed,
                        failed = summary.failed,
                        "Refresh sweep complete"
                    );
                }
                _ = shutdown_requested(&mut shutdown_rx) => {
                    info!("Shutdown requested during refresh sweep");
                    break;
                }
            }
        }

        info!("Background refresher stopped");
    }

    /// One sweep over every known report.
    ///
    /// Stale reports are refreshed concurrently, each in its own task so a
    /// panic in one refresh cannot take the loop down.
    pub async fn tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();
        let now = Local::now();
        let cache = self.coordinator.cache();

        let mut handles = Vec::new();
        let ids: Vec<String> = self.coordinator.registry().ids().map(str::to_string).collect();

        for id in ids {
            let entry = match cache.get(&id).await {
                Some(entry) => entry,
                None => {
                    summary.skipped += 1;
                    continue;
                }
            };

            if !cache.is_stale(&entry, now) {
                summary.fresh += 1;
                continue;
            }

            debug!(
                report = %id,
                age_secs = entry.age_secs(now),
                cache_date = %entry.cache_date,
                "Entry stale, refreshing"
            );

            let coordinator = self.coordinator.clone();
            handles.push(tokio::spawn(async move {
                let result = coordinator
                    .refresh_if_stale(&id, RefreshTrigger::Background)
                    .await;
                (id, result)
            }));
        }

        for joined in join_all(handles).await {
            match joined {
                Ok((_, Ok(_))) => summary.refreshed += 1,
                Ok((id, Err(e))) => {
                    warn!(report = %id, error = %e, "Background refresh failed, keeping stale entry");
                    summary.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Background refresh task panicked");
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}

/// Resolves once shutdown is signalled or the sender is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::freshness::FreshnessCache;
    use crate::cache::persistence::DiskStore;
    use crate::metrics::create_metrics;
    use crate::model::SaleRecord;
    use crate::services::splendid::api::{RetryPolicy, UpstreamClient};
    use crate::services::splendid::mock::{MockTransport, Scripted};
    use crate::services::splendid::{ReportDefinition, ReportRegistry, PRODUCT_DATE_WISE_SALE};
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    const REPORT: &str = PRODUCT_DATE_WISE_SALE;

    fn setup(
        transport: MockTransport,
    ) -> (Arc<RefreshCoordinator>, Arc<MockTransport>, Arc<DiskStore>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(transport);
        let metrics = create_metrics();
        let client = UpstreamClient::new(
            transport.clone(),
            RetryPolicy {
                max_attempts: 3,
                backoff: Duration::ZERO,
            },
            metrics.clone(),
        );
        let disk = Arc::new(DiskStore::new(dir.path().join("cache.json")));
        let coordinator = Arc::new(RefreshCoordinator::new(
            ReportRegistry::new([ReportDefinition::product_date_wise_sale("http://upstream.test")]),
            client,
            Arc::new(FreshnessCache::new(Duration::from_secs(300))),
            disk.clone(),
            metrics,
        ));
        (coordinator, transport, disk, dir)
    }

    async fn seed(coordinator: &RefreshCoordinator, n: usize, age_secs: i64) {
        let records = vec![SaleRecord::default(); n];
        coordinator
            .cache()
            .put(REPORT, records, Local::now() - ChronoDuration::seconds(age_secs))
            .await;
    }

    fn refresher(coordinator: Arc<RefreshCoordinator>) -> BackgroundRefresher {
        let (_tx, rx) = watch::channel(false);
        BackgroundRefresher::new(coordinator, RefresherConfig::default(), rx)
    }

    #[tokio::test]
    async fn test_tick_refreshes_stale_entry() {
        let (coordinator, transport, disk, _dir) = setup(MockTransport::new().with_records(12));
        seed(&coordinator, 10, 400).await;

        let summary = refresher(coordinator.clone()).tick().await;

        assert_eq!(summary.refreshed, 1);
        assert_eq!(transport.calls(), 1);
        assert_eq!(coordinator.cache().get(REPORT).await.unwrap().records.len(), 12);
        assert_eq!(disk.load_all().await[REPORT].records.len(), 12);
    }

    #[tokio::test]
    async fn test_tick_leaves_fresh_entry() {
        let (coordinator, transport, _disk, _dir) = setup(MockTransport::new().with_records(12));
        seed(&coordinator, 10, 30).await;

        let summary = refresher(coordinator.clone()).tick().await;

        assert_eq!(summary.fresh, 1);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_tick_skips_reports_without_entry() {
        let (coordinator, transport, _disk, _dir) = setup(MockTransport::new().with_records(12));

        let summary = refresher(coordinator.clone()).tick().await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(transport.calls(), 0);
        assert!(coordinator.cache().get(REPORT).await.is_none());
    }

    #[tokio::test]
    async fn test_tick_failure_keeps_entry() {
        let (coordinator, transport, _disk, _dir) =
            setup(MockTransport::new().always(Scripted::Timeout));
        seed(&coordinator, 10, 400).await;

        let summary = refresher(coordinator.clone()).tick().await;

        assert_eq!(summary.failed, 1);
        assert_eq!(transport.calls(), 3);
        assert_eq!(coordinator.cache().get(REPORT).await.unwrap().records.len(), 10);
    }

    #[tokio::test]
    async fn test_run_survives_failures_and_stops_on_shutdown() {
        let (coordinator, transport, _disk, _dir) =
            setup(MockTransport::new().always(Scripted::Status(500)));
        seed(&coordinator, 10, 400).await;

        let (tx, rx) = watch::channel(false);
        let refresher = BackgroundRefresher::new(
            coordinator.clone(),
            RefresherConfig {
                tick_interval: Duration::from_millis(20),
            },
            rx,
        );
        let handle = tokio::spawn(refresher.run());

        tokio::time::sleep(Duration::from_millis(150)).await;
        // Loop kept ticking through repeated failures
        assert!(transport.calls() >= 6);

        transport.set_fallback(Scripted::Records(12));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(coordinator.cache().get(REPORT).await.unwrap().records.len(), 12);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("refresher did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_slow_sweep() {
        let (coordinator, transport, _disk, _dir) = setup(
            MockTransport::new()
                .with_records(12)
                .with_delay(Duration::from_secs(30)),
        );
        seed(&coordinator, 10, 400).await;

        let (tx, rx) = watch::channel(false);
        let refresher = BackgroundRefresher::new(
            coordinator.clone(),
            RefresherConfig {
                tick_interval: Duration::from_millis(10),
            },
            rx,
        );
        let handle = tokio::spawn(refresher.run());

        // Sweep is now stuck on the slow upstream
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.calls(), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("refresher did not stop during sweep")
            .unwrap();
    }
}
