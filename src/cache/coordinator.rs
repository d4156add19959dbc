//! Coordinated upstream fetches.
//!
//! Every fetch for a report runs under that report's flight lock, so there
//! is at most one upstream call in flight per report. Callers that arrive
//! while a fetch is running wait for it and receive its outcome instead of
//! starting another one. Different reports never contend.

use crate::cache::freshness::{CacheEntry, FreshnessCache};
use crate::cache::persistence::{DiskStore, Snapshot};
use crate::error::SalesfeedError;
use crate::metrics::SharedMetrics;
use crate::model::SaleRecord;
use crate::services::splendid::api::UpstreamClient;
use crate::services::splendid::{ReportDefinition, ReportRegistry};
use chrono::Local;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

type Outcome = Result<Arc<CacheEntry>, SalesfeedError>;

/// What asked for a refresh; used for logs and metrics only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Startup,
    ColdRead,
    Background,
    Manual,
}

impl RefreshTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTrigger::Startup => "startup",
            RefreshTrigger::ColdRead => "cold_read",
            RefreshTrigger::Background => "background",
            RefreshTrigger::Manual => "manual",
        }
    }
}

/// Per-report flight state
#[derive(Default)]
struct FlightSlot {
    /// Number of fetches completed under `last`
    completed: Arc<AtomicU64>,
    /// Held for the duration of a fetch; stores its outcome. The guard is
    /// owned by the fetch task, not by the caller that started it.
    last: Arc<Mutex<Option<Outcome>>>,
}

/// Everything a detached fetch needs to finish on its own
struct Flight {
    report: String,
    definition: ReportDefinition,
    trigger: RefreshTrigger,
    client: UpstreamClient,
    cache: Arc<FreshnessCache>,
    disk: Arc<DiskStore>,
    metrics: SharedMetrics,
}

impl Flight {
    async fn run(self) -> Outcome {
        let report = self.report.as_str();
        let trigger = self.trigger;

        let start = Instant::now();
        let outcome = match self.client.fetch(&self.definition).await {
            Ok(records) => Ok(self.store(records).await),
            Err(e) => Err(e),
        };

        let status = if outcome.is_ok() { "success" } else { "failure" };
        self.metrics
            .record_refresh(report, trigger.as_str(), status, start.elapsed().as_secs_f64());

        match &outcome {
            Ok(entry) => info!(
                report = report,
                trigger = trigger.as_str(),
                records = entry.records.len(),
                cache_date = %entry.cache_date,
                "Cache refreshed"
            ),
            Err(e) => error!(
                report = report,
                trigger = trigger.as_str(),
                error = %e,
                "Refresh failed, existing entry kept"
            ),
        }

        outcome
    }

    /// Memory first, then best-effort disk
    async fn store(&self, records: Vec<SaleRecord>) -> Arc<CacheEntry> {
        let report = self.report.as_str();
        let entry = self.cache.put(report, records, Local::now()).await;

        match self.disk.save(report, &entry).await {
            Ok(()) => self.metrics.record_disk_write("success"),
            Err(e) => {
                self.metrics.record_disk_write("failure");
                error!(report = report, error = %e, "Failed to persist cache snapshot");
            }
        }

        entry
    }
}

pub struct RefreshCoordinator {
    registry: ReportRegistry,
    client: UpstreamClient,
    cache: Arc<FreshnessCache>,
    disk: Arc<DiskStore>,
    metrics: SharedMetrics,
    slots: HashMap<String, FlightSlot>,
}

impl RefreshCoordinator {
    pub fn new(
        registry: ReportRegistry,
        client: UpstreamClient,
        cache: Arc<FreshnessCache>,
        disk: Arc<DiskStore>,
        metrics: SharedMetrics,
    ) -> Self {
        let slots = registry
            .ids()
            .map(|id| (id.to_string(), FlightSlot::default()))
            .collect();

        Self {
            registry,
            client,
            cache,
            disk,
            metrics,
            slots,
        }
    }

    pub fn registry(&self) -> &ReportRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<FreshnessCache> {
        &self.cache
    }

    /// Install persisted entries for known reports; returns how many were
    /// restored. Entries for unknown reports stay on disk untouched.
    pub async fn restore(&self, snapshot: Snapshot) -> usize {
        let mut restored = 0;
        for (id, entry) in snapshot {
            if !self.registry.contains(&id) {
                debug!(report = %id, "Ignoring persisted entry for unknown report");
                continue;
            }
            info!(
                report = %id,
                records = entry.records.len(),
                fetched_at = %entry.fetched_at,
                "Restored cache entry from disk"
            );
            self.cache.restore(&id, entry).await;
            restored += 1;
        }
        restored
    }

    /// Serve whatever is cached; fetch only on a true cold start.
    ///
    /// Stale entries are returned as-is. Keeping them fresh is the
    /// background refresher's job, so readers never wait on the network in
    /// steady state.
    pub async fn read(&self, report: &str) -> Outcome {
        self.registry.get(report)?;

        if let Some(entry) = self.cache.get(report).await {
            if self.cache.is_stale(&entry, Local::now()) {
                debug!(report = report, "Serving stale entry until background refresh");
            } else {
                debug!(report = report, records = entry.records.len(), "Cache hit");
            }
            return Ok(entry);
        }

        info!(report = report, "No cache entry, fetching");
        self.ensure_fresh_or_refresh(report, RefreshTrigger::ColdRead)
            .await
    }

    /// Return a fresh entry, fetching if the current one is stale or absent.
    ///
    /// A failed fetch falls back to the existing (stale) entry; the error
    /// only surfaces when nothing is cached at all.
    pub async fn ensure_fresh_or_refresh(&self, report: &str, trigger: RefreshTrigger) -> Outcome {
        if let Some(entry) = self.cache.get(report).await {
            if !self.cache.is_stale(&entry, Local::now()) {
                return Ok(entry);
            }
        }

        match self.refresh_if_stale(report, trigger).await {
            Ok(entry) => Ok(entry),
            Err(e) => match self.cache.get(report).await {
                Some(stale) => {
                    warn!(
                        report = report,
                        error = %e,
                        records = stale.records.len(),
                        "Refresh failed, serving stale entry"
                    );
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// Coordinated refresh that skips the upstream call when the entry is
    /// still fresh once the flight lock is held. Failures are returned, not
    /// masked.
    pub async fn refresh_if_stale(&self, report: &str, trigger: RefreshTrigger) -> Outcome {
        self.coordinated(report, trigger, false).await
    }

    /// Unconditional coordinated fetch
    pub async fn force_refresh(&self, report: &str) -> Outcome {
        self.coordinated(report, RefreshTrigger::Manual, true).await
    }

    async fn coordinated(&self, report: &str, trigger: RefreshTrigger, force: bool) -> Outcome {
        let definition = self.registry.get(report)?;
        let slot = self
            .slots
            .get(report)
            .ok_or_else(|| SalesfeedError::UnknownReport(report.to_string()))?;

        let observed = slot.completed.load(Ordering::Acquire);
        let mut last = slot.last.clone().lock_owned().await;

        // A fetch finished while we were queued: share its outcome
        if slot.completed.load(Ordering::Acquire) != observed {
            if let Some(outcome) = last.as_ref() {
                debug!(report = report, trigger = trigger.as_str(), "Joined in-flight fetch");
                self.metrics.record_joined(report);
                return outcome.clone();
            }
        }

        if !force {
            if let Some(entry) = self.cache.get(report).await {
                if !self.cache.is_stale(&entry, Local::now()) {
                    return Ok(entry);
                }
            }
        }

        let flight = Flight {
            report: report.to_string(),
            definition: definition.clone(),
            trigger,
            client: self.client.clone(),
            cache: self.cache.clone(),
            disk: self.disk.clone(),
            metrics: self.metrics.clone(),
        };
        let completed = slot.completed.clone();

        // The fetch outlives its caller: a dropped request must not abandon
        // an upstream call that queued callers are waiting on.
        let handle = tokio::spawn(async move {
            let outcome = flight.run().await;
            *last = Some(outcome.clone());
            completed.fetch_add(1, Ordering::Release);
            outcome
        });

        handle
            .await
            .map_err(|e| SalesfeedError::Internal(format!("Refresh task failed: {}", e)))?
    }
}
