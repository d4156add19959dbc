//! In-memory report cache with time and calendar-day staleness.
//!
//! Entries are replaced wholesale on every successful fetch and handed out as
//! `Arc`s, so readers never observe a partially updated record set. Writes
//! are funnelled through the refresh coordinator, which admits at most one
//! writer per report at a time.

use crate::model::SaleRecord;
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Default time budget before an entry is considered stale
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(300);

/// Records of one report plus the metadata of the fetch that produced them.
///
/// `cache_date` is always the local calendar date of `fetched_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "data")]
    pub records: Vec<SaleRecord>,
    pub fetched_at: DateTime<Local>,
    pub cache_date: NaiveDate,
}

impl CacheEntry {
    pub fn new(records: Vec<SaleRecord>, fetched_at: DateTime<Local>) -> Self {
        Self {
            records,
            cache_date: fetched_at.date_naive(),
            fetched_at,
        }
    }

    /// Whole seconds since the fetch, clamped at zero
    pub fn age_secs(&self, now: DateTime<Local>) -> i64 {
        now.signed_duration_since(self.fetched_at)
            .num_seconds()
            .max(0)
    }
}

/// Report identifier -> latest entry
pub struct FreshnessCache {
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    cache_duration: Duration,
}

impl FreshnessCache {
    pub fn new(cache_duration: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            cache_duration,
        }
    }

    pub fn cache_duration(&self) -> Duration {
        self.cache_duration
    }

    pub async fn get(&self, report: &str) -> Option<Arc<CacheEntry>> {
        self.entries.read().await.get(report).cloned()
    }

    /// Stale once the time budget has elapsed or the local day has changed
    pub fn is_stale(&self, entry: &CacheEntry, now: DateTime<Local>) -> bool {
        if entry.cache_date != now.date_naive() {
            return true;
        }

        match now.signed_duration_since(entry.fetched_at).to_std() {
            Ok(age) => age >= self.cache_duration,
            // fetched_at lies in the future; only the day rule applies
            Err(_) => false,
        }
    }

    /// Replace the entry for `report` with a fresh one stamped at `now`
    pub async fn put(
        &self,
        report: &str,
        records: Vec<SaleRecord>,
        now: DateTime<Local>,
    ) -> Arc<CacheEntry> {
        let entry = Arc::new(CacheEntry::new(records, now));
        self.insert(report, entry.clone()).await;
        entry
    }

    /// Install a previously persisted entry as-is
    pub async fn restore(&self, report: &str, entry: CacheEntry) {
        self.insert(report, Arc::new(entry)).await;
    }

    async fn insert(&self, report: &str, entry: Arc<CacheEntry>) {
        let mut guard = self.entries.write().await;
        debug!(
            report = report,
            old_records = guard.get(report).map(|e| e.records.len()),
            new_records = entry.records.len(),
            "Replacing cache entry"
        );
        guard.insert(report.to_string(), entry);
    }

    /// All entries, ordered by report identifier
    pub async fn entries(&self) -> Vec<(String, Arc<CacheEntry>)> {
        let guard = self.entries.read().await;
        let mut entries: Vec<_> = guard
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for FreshnessCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_DURATION)
    }
}
