//! Prometheus metrics for monitoring salesfeed.
//!
//! Covers cache state per report, upstream traffic, refresh outcomes and
//! snapshot writes.

use crate::cache::freshness::CacheEntry;
use chrono::{DateTime, Local};
use prometheus::{CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;
use tracing::error;

/// All metrics for the salesfeed service
pub struct Metrics {
    pub registry: Registry,

    // Cache metrics
    pub cache_records: GaugeVec,
    pub cache_age_seconds: GaugeVec,

    // Upstream metrics
    pub upstream_requests_total: CounterVec,
    pub upstream_request_duration_seconds: HistogramVec,
    pub upstream_retries_total: CounterVec,

    // Refresh metrics
    pub refresh_total: CounterVec,
    pub refresh_duration_seconds: HistogramVec,
    pub refresh_joined_total: CounterVec,
    pub disk_writes_total: CounterVec,

    // System metrics
    pub boot_type: CounterVec,
    pub boot_duration_seconds: Gauge,
}

impl Metrics {
    /// Create a new metrics registry with all metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cache_records = GaugeVec::new(
            Opts::new("salesfeed_cache_records", "Records held for each report"),
            &["report"],
        )?;
        registry.register(Box::new(cache_records.clone()))?;

        let cache_age_seconds = GaugeVec::new(
            Opts::new(
                "salesfeed_cache_age_seconds",
                "Seconds since each report was last fetched",
            ),
            &["report"],
        )?;
        registry.register(Box::new(cache_age_seconds.clone()))?;

        let upstream_requests_total = CounterVec::new(
            Opts::new(
                "salesfeed_upstream_requests_total",
                "Upstream report requests by outcome",
            ),
            &["report", "status"],
        )?;
        registry.register(Box::new(upstream_requests_total.clone()))?;

        let upstream_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "salesfeed_upstream_request_duration_seconds",
                "Upstream request duration",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["report"],
        )?;
        registry.register(Box::new(upstream_request_duration_seconds.clone()))?;

        let upstream_retries_total = CounterVec::new(
            Opts::new("salesfeed_upstream_retries_total", "Upstream request retries"),
            &["report"],
        )?;
        registry.register(Box::new(upstream_retries_total.clone()))?;

        let refresh_total = CounterVec::new(
            Opts::new(
                "salesfeed_refresh_total",
                "Coordinated refreshes by trigger and outcome",
            ),
            &["report", "trigger", "status"],
        )?;
        registry.register(Box::new(refresh_total.clone()))?;

        let refresh_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "salesfeed_refresh_duration_seconds",
                "Refresh duration including retries and persistence",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["report"],
        )?;
        registry.register(Box::new(refresh_duration_seconds.clone()))?;

        let refresh_joined_total = CounterVec::new(
            Opts::new(
                "salesfeed_refresh_joined_total",
                "Callers that shared an in-flight fetch instead of starting one",
            ),
            &["report"],
        )?;
        registry.register(Box::new(refresh_joined_total.clone()))?;

        let disk_writes_total = CounterVec::new(
            Opts::new("salesfeed_disk_writes_total", "Cache snapshot writes"),
            &["status"],
        )?;
        registry.register(Box::new(disk_writes_total.clone()))?;

        let boot_type = CounterVec::new(
            Opts::new("salesfeed_boot_type", "Boot type counter"),
            &["type"],
        )?;
        registry.register(Box::new(boot_type.clone()))?;

        let boot_duration_seconds = Gauge::with_opts(Opts::new(
            "salesfeed_boot_duration_seconds",
            "Time taken to boot",
        ))?;
        registry.register(Box::new(boot_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            cache_records,
            cache_age_seconds,
            upstream_requests_total,
            upstream_request_duration_seconds,
            upstream_retries_total,
            refresh_total,
            refresh_duration_seconds,
            refresh_joined_total,
            disk_writes_total,
            boot_type,
            boot_duration_seconds,
        })
    }

    /// Record one upstream attempt
    pub fn record_upstream_request(&self, report: &str, status: &str, duration_secs: f64) {
        self.upstream_requests_total
            .with_label_values(&[report, status])
            .inc();
        self.upstream_request_duration_seconds
            .with_label_values(&[report])
            .observe(duration_secs);
    }

    pub fn record_upstream_retry(&self, report: &str) {
        self.upstream_retries_total
            .with_label_values(&[report])
            .inc();
    }

    /// Record a finished coordinated refresh
    pub fn record_refresh(&self, report: &str, trigger: &str, status: &str, duration_secs: f64) {
        self.refresh_total
            .with_label_values(&[report, trigger, status])
            .inc();
        self.refresh_duration_seconds
            .with_label_values(&[report])
            .observe(duration_secs);
    }

    pub fn record_joined(&self, report: &str) {
        self.refresh_joined_total
            .with_label_values(&[report])
            .inc();
    }

    pub fn record_disk_write(&self, status: &str) {
        self.disk_writes_total.with_label_values(&[status]).inc();
    }

    pub fn record_boot(&self, boot_type: &str, duration_secs: f64) {
        self.boot_type.with_label_values(&[boot_type]).inc();
        self.boot_duration_seconds.set(duration_secs);
    }

    /// Update per-report cache gauges
    pub fn update_cache_metrics(&self, entries: &[(String, Arc<CacheEntry>)], now: DateTime<Local>) {
        for (report, entry) in entries {
            self.cache_records
                .with_label_values(&[report.as_str()])
                .set(entry.records.len() as f64);
            self.cache_age_seconds
                .with_label_values(&[report.as_str()])
                .set(entry.age_secs(now) as f64);
        }
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                String::new()
            }
        }
    }
}

/// Shared metrics instance
pub type SharedMetrics = Arc<Metrics>;

/// Create a shared metrics instance
pub fn create_metrics() -> SharedMetrics {
    Arc::new(Metrics::new().expect("Failed to create metrics"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SaleRecord;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_boot("cold_start", 0.2);
        let output = metrics.render();
        assert!(output.contains("salesfeed_boot_type"));
        assert!(output.contains("salesfeed_boot_duration_seconds"));
    }

    #[test]
    fn test_upstream_recording() {
        let metrics = Metrics::new().unwrap();
        metrics.record_upstream_request("ProductDateWiseSale", "200", 0.4);
        metrics.record_upstream_retry("ProductDateWiseSale");

        let output = metrics.render();
        assert!(output.contains("salesfeed_upstream_requests_total"));
        assert!(output.contains("salesfeed_upstream_retries_total"));
        assert!(output.contains("status=\"200\""));
    }

    #[test]
    fn test_cache_gauges() {
        let metrics = Metrics::new().unwrap();
        let now = Local::now();
        let entry = Arc::new(CacheEntry::new(
            vec![SaleRecord::default(); 7],
            now - ChronoDuration::seconds(42),
        ));
        metrics.update_cache_metrics(&[("ProductDateWiseSale".to_string(), entry)], now);

        let output = metrics.render();
        assert!(output.contains("salesfeed_cache_records{report=\"ProductDateWiseSale\"} 7"));
        assert!(output.contains("salesfeed_cache_age_seconds{report=\"ProductDateWiseSale\"} 42"));
    }
}
