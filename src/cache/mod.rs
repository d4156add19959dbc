//! Report cache for salesfeed.
//!
//! - In-memory entries with time and calendar-day staleness
//! - Per-report coordination of upstream fetches
//! - Disk persistence so restarts are warm
//! - Background refresher keeping populated reports fresh

pub mod coordinator;
pub mod freshness;
pub mod persistence;
pub mod refresher;

pub use coordinator::{RefreshCoordinator, RefreshTrigger};
pub use freshness::FreshnessCache;
pub use persistence::DiskStore;
pub use refresher::BackgroundRefresher;
