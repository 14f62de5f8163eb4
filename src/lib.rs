//! Job Agent Library
//!
//! Application tracking store plus the monitoring stack around it: health
//! checks, performance sampling, backups and the recurring monitoring loop.

pub mod cli_style;
pub mod config;
pub mod logging;
pub mod monitoring;
pub mod sqlite_persistence;
pub mod tracker;
pub mod tracker_store;

// Re-export commonly used types for convenience
pub use config::{AppConfig, CommonArgs, ConfigError};
pub use monitoring::{BackupManager, HealthChecker, MonitoringService, PerformanceMonitor};
pub use tracker::ApplicationTracker;
pub use tracker_store::{SqliteTrackerStore, StoreError, TrackerStore};
