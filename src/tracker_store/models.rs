use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Applications
// =============================================================================

/// Lifecycle state of a tracked application.
///
/// The set is closed; transitions are only ever driven by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    NotApplied,
    Applied,
    Screening,
    Interview,
    Offer,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 7] = [
        ApplicationStatus::NotApplied,
        ApplicationStatus::Applied,
        ApplicationStatus::Screening,
        ApplicationStatus::Interview,
        ApplicationStatus::Offer,
        ApplicationStatus::Rejected,
        ApplicationStatus::Withdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::NotApplied => "not_applied",
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::Screening => "screening",
            ApplicationStatus::Interview => "interview",
            ApplicationStatus::Offer => "offer",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_applied" => Some(ApplicationStatus::NotApplied),
            "applied" => Some(ApplicationStatus::Applied),
            "screening" => Some(ApplicationStatus::Screening),
            "interview" => Some(ApplicationStatus::Interview),
            "offer" => Some(ApplicationStatus::Offer),
            "rejected" => Some(ApplicationStatus::Rejected),
            "withdrawn" => Some(ApplicationStatus::Withdrawn),
            _ => None,
        }
    }

    /// Whether the employer has reacted to the application in any way.
    pub fn is_response(&self) -> bool {
        !matches!(
            self,
            ApplicationStatus::NotApplied | ApplicationStatus::Applied
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked job application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobApplication {
    pub id: i64,
    pub job_url: String,
    pub company: String,
    pub position: String,
    pub application_date: NaiveDate,
    pub status: ApplicationStatus,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw input for a new application, validated by the store.
#[derive(Debug, Clone, Default)]
pub struct NewApplication {
    pub job_url: String,
    pub company: String,
    pub position: String,
    /// `YYYY-MM-DD`
    pub application_date: String,
    pub status: String,
    pub notes: Option<String>,
}

/// Inclusive range of application dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Default)]
pub struct ApplicationFilter {
    pub status: Option<ApplicationStatus>,
    pub date_range: Option<DateRange>,
}

/// One entry in the status audit trail of an application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub id: i64,
    pub application_id: i64,
    /// `None` for the entry written when the application was created.
    pub from_status: Option<ApplicationStatus>,
    pub to_status: ApplicationStatus,
    pub note: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Number of applications per status. Statuses with no applications are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PipelineSummary {
    pub counts: BTreeMap<ApplicationStatus, usize>,
}

impl PipelineSummary {
    pub fn get(&self, status: ApplicationStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

// =============================================================================
// Monitoring samples
// =============================================================================

pub(crate) fn serialize_duration_ms<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}

/// Outcome of checking one monitored component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSample {
    pub component: String,
    pub timestamp: DateTime<Utc>,
    pub passed: bool,
    #[serde(rename = "latency_ms", serialize_with = "serialize_duration_ms")]
    pub latency: Duration,
    pub detail: Option<String>,
    pub error: Option<String>,
}

impl HealthSample {
    pub fn pass(component: &str, latency: Duration, detail: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            timestamp: Utc::now(),
            passed: true,
            latency,
            detail: Some(detail.into()),
            error: None,
        }
    }

    pub fn fail(component: &str, latency: Duration, error: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            timestamp: Utc::now(),
            passed: false,
            latency,
            detail: None,
            error: Some(error.into()),
        }
    }
}

/// One timed operation outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSample {
    pub operation: String,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
}

/// One host resource reading, such as `system.cpu_percent`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSample {
    pub metric: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl SystemSample {
    pub fn new(metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            timestamp: Utc::now(),
            value,
        }
    }
}

/// Selects which samples an aggregation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleWindow {
    /// The most recent N samples.
    LastN(usize),
    /// Samples newer than now minus the duration.
    Since(Duration),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub id: i64,
    pub component: String,
    pub message: String,
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Backups
// =============================================================================

/// A backup file that has been written and verified, not yet recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupArtifact {
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// SHA-256 of the backup file when it was taken, hex encoded.
    pub checksum: String,
}

/// A point-in-time copy written by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotInfo {
    pub size_bytes: u64,
    /// SHA-256 of the copy as written, hex encoded.
    pub checksum: String,
}

// =============================================================================
// Retention
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    HealthSamples,
    PerformanceSamples,
    SystemSamples,
    ErrorEvents,
    /// Backup records only; files are handled by the backup manager.
    Backups,
}

impl EntityKind {
    pub(crate) fn table(&self) -> &'static str {
        match self {
            EntityKind::HealthSamples => "health_samples",
            EntityKind::PerformanceSamples => "performance_samples",
            EntityKind::SystemSamples => "system_samples",
            EntityKind::ErrorEvents => "error_events",
            EntityKind::Backups => "backups",
        }
    }
}

/// Rows older than `max_age` or beyond the newest `max_count` are removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Option<Duration>,
    pub max_count: Option<usize>,
}

impl RetentionPolicy {
    pub fn max_age(max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
            max_count: None,
        }
    }

    pub fn max_count(max_count: usize) -> Self {
        Self {
            max_age: None,
            max_count: Some(max_count),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_age.is_none() && self.max_count.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub table_count: usize,
    pub application_count: usize,
    #[serde(rename = "latency_ms", serialize_with = "serialize_duration_ms")]
    pub latency: Duration,
}
