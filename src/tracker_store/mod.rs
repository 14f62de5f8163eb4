mod error;
mod models;
mod schema;
mod sqlite_tracker_store;
pub mod validation;

pub use error::{StoreError, StoreResult};
pub use models::*;
pub use schema::TRACKER_VERSIONED_SCHEMAS;
pub use sqlite_tracker_store::{sha256_file, SqliteTrackerStore};
pub use validation::ValidationError;

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Persistence for applications, monitoring samples and backup records.
///
/// Writes are atomic and serialized through a single writer; reads may run
/// concurrently with them.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait TrackerStore: Send + Sync {
    // Applications
    fn create_application(&self, app: &NewApplication) -> StoreResult<i64>;
    fn get_application(&self, id: i64) -> StoreResult<JobApplication>;
    /// Changes the status and appends `note` to the notes, recording the
    /// transition in the status history.
    fn update_status(&self, id: i64, new_status: &str, note: Option<String>) -> StoreResult<()>;
    /// Ordered by application date, newest first.
    fn list_applications(&self, filter: &ApplicationFilter) -> StoreResult<Vec<JobApplication>>;
    fn status_history(&self, id: i64) -> StoreResult<Vec<StatusChange>>;
    fn summarize_pipeline(&self) -> StoreResult<PipelineSummary>;

    // Monitoring samples (append-only)
    fn record_health_sample(&self, sample: &HealthSample) -> StoreResult<()>;
    fn recent_health_samples(&self, limit: usize) -> StoreResult<Vec<HealthSample>>;
    fn record_performance_sample(&self, sample: &PerformanceSample) -> StoreResult<()>;
    /// Oldest first.
    fn performance_samples(
        &self,
        operation: &str,
        window: SampleWindow,
    ) -> StoreResult<Vec<PerformanceSample>>;
    fn operation_names(&self) -> StoreResult<Vec<String>>;
    fn record_system_sample(&self, sample: &SystemSample) -> StoreResult<()>;
    /// Oldest first.
    fn system_samples(&self, metric: &str, window: SampleWindow)
        -> StoreResult<Vec<SystemSample>>;
    fn record_error_event(
        &self,
        component: &str,
        message: &str,
        context: Option<String>,
    ) -> StoreResult<i64>;
    fn error_events_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<ErrorEvent>>;

    // Backups
    fn record_backup(&self, artifact: &BackupArtifact) -> StoreResult<BackupRecord>;
    /// Newest first.
    fn list_backups(&self) -> StoreResult<Vec<BackupRecord>>;
    fn delete_backup_record(&self, id: i64) -> StoreResult<()>;

    /// Removes rows older than the policy's age, then rows beyond its count,
    /// oldest first. Returns the number of rows removed.
    fn prune(&self, kind: EntityKind, policy: &RetentionPolicy) -> StoreResult<usize>;

    // Health / maintenance
    fn ping(&self) -> StoreResult<StoreStats>;
    /// Writes a consistent copy of the database to `dest` through SQLite's
    /// online backup. Writers wait for it; readers do not.
    fn snapshot_to(&self, dest: &Path) -> StoreResult<SnapshotInfo>;
    fn db_path(&self) -> PathBuf;
}
