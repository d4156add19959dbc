//! Disk persistence for the report cache.
//!
//! The snapshot is a single JSON file mapping report identifier to
//! `{data, fetched_at, cache_date}`. It is read once at startup and rewritten
//! after every successful fetch so a restart does not need an immediate
//! upstream call.

use crate::cache::freshness::CacheEntry;
use crate::error::SalesfeedError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// On-disk layout: report identifier -> entry
pub type Snapshot = BTreeMap<String, CacheEntry>;

pub struct DiskStore {
    path: PathBuf,
    /// Serializes the read-modify-write cycle across reports
    write_lock: Mutex<()>,
}

impl DiskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Load every persisted entry.
    ///
    /// A missing or unreadable snapshot is a cold start, never an error.
    pub async fn load_all(&self) -> Snapshot {
        match read_snapshot(&self.path).await {
            Ok(Some(snapshot)) => {
                info!(
                    path = %self.path.display(),
                    reports = snapshot.len(),
                    "Loaded cache snapshot from disk"
                );
                snapshot
                    .into_iter()
                    .map(|(id, entry)| (id, normalize(entry)))
                    .collect()
            }
            Ok(None) => {
                info!(path = %self.path.display(), "No cache snapshot on disk, cold start");
                Snapshot::new()
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Cache snapshot unreadable, cold start"
                );
                Snapshot::new()
            }
        }
    }

    /// Persist `entry` for `report`, leaving other reports' entries intact.
    ///
    /// An unreadable existing snapshot is replaced rather than blocking the
    /// write.
    pub async fn save(&self, report: &str, entry: &CacheEntry) -> Result<(), SalesfeedError> {
        let _guard = self.write_lock.lock().await;

        let mut snapshot = match read_snapshot(&self.path).await {
            Ok(existing) => existing.unwrap_or_default(),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Existing snapshot unreadable, rewriting from scratch"
                );
                Snapshot::new()
            }
        };
        snapshot.insert(report.to_string(), entry.clone());

        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| SalesfeedError::Cache(format!("Failed to serialize snapshot: {}", e)))?;

        write_atomic(&self.path, &bytes).await?;

        info!(
            path = %self.path.display(),
            report = report,
            records = entry.records.len(),
            bytes = bytes.len(),
            "Cache snapshot persisted"
        );

        Ok(())
    }
}

async fn read_snapshot(path: &Path) -> Result<Option<Snapshot>, SalesfeedError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(SalesfeedError::Cache(format!(
                "Failed to read snapshot: {}",
                e
            )))
        }
    };

    debug!(bytes = bytes.len(), "Read snapshot file");

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| SalesfeedError::Cache(format!("Failed to deserialize snapshot: {}", e)))
}

/// Write to a sibling temp file, then rename over the target
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SalesfeedError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SalesfeedError::Cache(format!("Failed to create cache directory: {}", e)))?;
    }

    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, bytes)
        .await
        .map_err(|e| SalesfeedError::Cache(format!("Failed to write temp snapshot: {}", e)))?;

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| SalesfeedError::Cache(format!("Failed to rename snapshot: {}", e)))
}

/// Re-derive `cache_date` from `fetched_at` in the local timezone
fn normalize(mut entry: CacheEntry) -> CacheEntry {
    let local_date = entry.fetched_at.date_naive();
    if entry.cache_date != local_date {
        debug!(
            stored = %entry.cache_date,
            derived = %local_date,
            "Snapshot cache_date disagrees with fetched_at, using local date"
        );
        entry.cache_date = local_date;
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SaleRecord;
    use chrono::Local;
    use tempfile::tempdir;

    fn entry(n: usize) -> CacheEntry {
        let records = (0..n)
            .map(|i| SaleRecord {
                product_name: format!("Khaddar {}", i),
                sold_qty: i as f64,
                ..Default::default()
            })
            .collect();
        CacheEntry::new(records, Local::now())
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sales_cache.json");

        let saved = entry(3);
        DiskStore::new(&path).save("A", &saved).await.unwrap();

        // Fresh store simulates a restart
        let loaded = DiskStore::new(&path).load_all().await;
        let restored = loaded.get("A").unwrap();
        assert_eq!(restored.records, saved.records);
        assert_eq!(restored.cache_date, saved.cache_date);
        assert_eq!(restored.fetched_at, saved.fetched_at);
    }

    #[tokio::test]
    async fn test_save_preserves_other_reports() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("cache.json"));

        store.save("A", &entry(2)).await.unwrap();
        store.save("B", &entry(5)).await.unwrap();
        store.save("A", &entry(1)).await.unwrap();

        let loaded = store.load_all().await;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["A"].records.len(), 1);
        assert_eq!(loaded["B"].records.len(), 5);
        assert!(!dir.path().join("cache.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        DiskStore::new(&path).save("A", &entry(1)).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        let a = &raw["A"];
        assert!(a["data"].is_array());
        assert_eq!(a["data"][0]["Product Name"], "Khaddar 0");
        assert!(a["fetched_at"].is_string());
        assert_eq!(
            a["cache_date"],
            Local::now().date_naive().format("%Y-%m-%d").to_string()
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_cold_start() {
        let dir = tempdir().unwrap();
        let loaded = DiskStore::new(dir.path().join("nope.json")).load_all().await;
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_cold_start_and_recoverable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        tokio::fs::write(&path, b"{ this is not json").await.unwrap();

        let store = DiskStore::new(&path);
        assert!(store.load_all().await.is_empty());

        store.save("A", &entry(4)).await.unwrap();
        assert_eq!(store.load_all().await["A"].records.len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_saves_for_different_reports() {
        let dir = tempdir().unwrap();
        let store = std::sync::Arc::new(DiskStore::new(dir.path().join("cache.json")));

        let handles: Vec<_> = ["A", "B", "C", "D"]
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                let store = store.clone();
                tokio::spawn(async move { store.save(id, &entry(i + 1)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let loaded = store.load_all().await;
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded["D"].records.len(), 4);
    }
}
