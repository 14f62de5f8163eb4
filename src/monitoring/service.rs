//! Recurring monitoring loop.
//!
//! One cooperative task drives health checks, performance aggregation,
//! backups and maintenance in sequence. Cancellation is only observed
//! between cycles, so a cycle never stops halfway through a write.

use super::alerts::{Alert, AlertNotifier, AlertSeverity};
use super::backup_manager::{rotate_logs, BackupManager, BackupVerification};
use super::health_checker::{
    HealthChecker, BACKUP_STORAGE_COMPONENT, DATABASE_COMPONENT, JOB_API_COMPONENT,
};
use super::performance_monitor::{Aggregate, PerformanceMonitor};
use super::system_metrics::{SystemMetrics, SystemMetricsCollector};
use crate::config::{AppConfig, MonitoringSettings};
use crate::tracker_store::{
    BackupRecord, EntityKind, HealthSample, PipelineSummary, RetentionPolicy, SampleWindow,
    TrackerStore,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

const BACKUP_COMPONENT: &str = "backup";
const MAINTENANCE_COMPONENT: &str = "maintenance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Idle,
    Running,
    Stopped,
}

/// Read-only view of the service state, usable while `run` holds the service.
#[derive(Clone)]
pub struct ServiceStateHandle(Arc<Mutex<ServiceState>>);

impl ServiceStateHandle {
    pub fn get(&self) -> ServiceState {
        *self.0.lock().unwrap()
    }

    fn set(&self, state: ServiceState) {
        *self.0.lock().unwrap() = state;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl OverallStatus {
    pub fn from_issue_count(issues: usize) -> Self {
        match issues {
            0 => OverallStatus::Healthy,
            1 => OverallStatus::Degraded,
            _ => OverallStatus::Unhealthy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Healthy => "healthy",
            OverallStatus::Degraded => "degraded",
            OverallStatus::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaintenanceReport {
    pub backup: Option<BackupRecord>,
    pub backups_pruned: usize,
    pub health_samples_pruned: usize,
    pub performance_samples_pruned: usize,
    pub system_samples_pruned: usize,
    pub error_events_pruned: usize,
    pub logs_rotated: usize,
    /// One entry per step that failed. Later steps still run.
    pub failures: Vec<String>,
}

impl MaintenanceReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub health: Vec<HealthSample>,
    pub performance: Vec<Aggregate>,
    pub system: Option<SystemMetrics>,
    pub backup: Option<Result<BackupRecord, String>>,
    pub maintenance: Option<MaintenanceReport>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub database_bytes: u64,
    pub backup_bytes: u64,
    pub backup_files: usize,
    pub log_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastBackup {
    #[serde(flatten)]
    pub record: BackupRecord,
    pub verification: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub overall: OverallStatus,
    pub issues: Vec<String>,
    pub components: Vec<HealthSample>,
    pub performance: Vec<Aggregate>,
    pub system: Option<SystemMetrics>,
    pub pipeline: Option<PipelineSummary>,
    pub storage: StorageUsage,
    pub last_backup: Option<LastBackup>,
    pub timestamp: DateTime<Utc>,
}

fn issue_for(component: &str) -> String {
    match component {
        DATABASE_COMPONENT => "Database connectivity issues".to_string(),
        JOB_API_COMPONENT => "External API failures".to_string(),
        BACKUP_STORAGE_COMPONENT => "Backup storage unavailable".to_string(),
        other => format!("{} check failing", other),
    }
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn dir_usage(dir: &Path) -> (u64, usize) {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .fold((0, 0), |(bytes, files), entry| {
            let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
            (bytes + len, files + 1)
        })
}

/// Prune and rotation steps, cloneable so they can run on the blocking pool.
#[derive(Clone)]
struct MaintenanceTasks {
    store: Arc<dyn TrackerStore>,
    backups: BackupManager,
    settings: MonitoringSettings,
    log_dir: PathBuf,
}

impl MaintenanceTasks {
    fn run(&self, with_backup: bool) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        if with_backup {
            match self.backups.backup() {
                Ok(record) => report.backup = Some(record),
                Err(e) => report.failures.push(format!("backup: {}", e)),
            }
        }

        match self.backups.prune_old_backups(&self.settings.backup_retention) {
            Ok(removed) => report.backups_pruned = removed.len(),
            Err(e) => report.failures.push(format!("backup pruning: {}", e)),
        }

        let samples = &self.settings.sample_retention;
        match self.store.prune(EntityKind::HealthSamples, samples) {
            Ok(n) => report.health_samples_pruned = n,
            Err(e) => report.failures.push(format!("health sample pruning: {}", e)),
        }
        match self.store.prune(EntityKind::PerformanceSamples, samples) {
            Ok(n) => report.performance_samples_pruned = n,
            Err(e) => report.failures.push(format!("performance sample pruning: {}", e)),
        }
        match self.store.prune(EntityKind::SystemSamples, samples) {
            Ok(n) => report.system_samples_pruned = n,
            Err(e) => report.failures.push(format!("system sample pruning: {}", e)),
        }

        // Error events are kept twice as long as samples
        let error_policy = RetentionPolicy {
            max_age: samples.max_age.map(|age| age.saturating_mul(2)),
            max_count: None,
        };
        match self.store.prune(EntityKind::ErrorEvents, &error_policy) {
            Ok(n) => report.error_events_pruned = n,
            Err(e) => report.failures.push(format!("error event pruning: {}", e)),
        }

        match rotate_logs(&self.log_dir, self.settings.log_retention) {
            Ok(n) => report.logs_rotated = n,
            Err(e) => report.failures.push(format!("log rotation: {}", e)),
        }

        for failure in &report.failures {
            error!("Maintenance step failed: {}", failure);
        }
        report
    }

    /// Pipeline counts, newest backup and disk usage for the status report.
    fn inventory(&self) -> (Option<PipelineSummary>, Option<LastBackup>, StorageUsage) {
        let pipeline = match self.store.summarize_pipeline() {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("Pipeline summary unavailable: {}", e);
                None
            }
        };

        let last_backup = match self.store.list_backups() {
            Ok(backups) => backups.into_iter().next().map(|record| {
                let verification = match self.backups.verify_backup(&record) {
                    Ok(BackupVerification::Valid) => "valid",
                    Ok(BackupVerification::Missing) => "missing",
                    Ok(BackupVerification::Corrupted { .. }) => "corrupted",
                    Err(_) => "unreadable",
                };
                LastBackup {
                    record,
                    verification,
                }
            }),
            Err(e) => {
                warn!("Backup list unavailable: {}", e);
                None
            }
        };

        (pipeline, last_backup, self.storage_usage())
    }

    fn storage_usage(&self) -> StorageUsage {
        let db_path = self.store.db_path();
        let mut database_bytes = file_len(&db_path);
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = db_path.as_os_str().to_owned();
            sidecar.push(suffix);
            database_bytes += file_len(Path::new(&sidecar));
        }
        let (backup_bytes, backup_files) = dir_usage(self.backups.backup_dir());
        let (log_bytes, _) = dir_usage(&self.log_dir);

        StorageUsage {
            database_bytes,
            backup_bytes,
            backup_files,
            log_bytes,
        }
    }
}

pub struct MonitoringService {
    settings: MonitoringSettings,
    store: Arc<dyn TrackerStore>,
    health: HealthChecker,
    performance: PerformanceMonitor,
    maintenance: MaintenanceTasks,
    system: Arc<SystemMetricsCollector>,
    notifier: Arc<dyn AlertNotifier>,
    state: ServiceStateHandle,

    health_failures: HashMap<String, u32>,
    health_alerted: HashSet<String>,
    performance_alerted: HashSet<String>,
    backup_failures: u32,
    last_maintenance: Option<Instant>,
}

impl MonitoringService {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn TrackerStore>,
        notifier: Arc<dyn AlertNotifier>,
    ) -> anyhow::Result<Self> {
        let performance = PerformanceMonitor::new(store.clone());
        let health = HealthChecker::new(
            store.clone(),
            performance.clone(),
            config.job_api.clone(),
            config.backup_dir.clone(),
        )
        .context("Failed to build HTTP client for health checks")?;
        let maintenance = MaintenanceTasks {
            store: store.clone(),
            backups: BackupManager::new(store.clone(), config.backup_dir.clone()),
            settings: config.monitoring.clone(),
            log_dir: config.log_dir.clone(),
        };
        let data_dir = config
            .db_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        Ok(Self {
            settings: config.monitoring.clone(),
            store,
            health,
            performance,
            maintenance,
            system: Arc::new(SystemMetricsCollector::new(data_dir)),
            notifier,
            state: ServiceStateHandle(Arc::new(Mutex::new(ServiceState::Idle))),
            health_failures: HashMap::new(),
            health_alerted: HashSet::new(),
            performance_alerted: HashSet::new(),
            backup_failures: 0,
            last_maintenance: None,
        })
    }

    pub fn state(&self) -> ServiceState {
        self.state.get()
    }

    pub fn state_handle(&self) -> ServiceStateHandle {
        self.state.clone()
    }

    /// Runs cycles until `shutdown` is cancelled. A failing cycle is logged
    /// and the loop carries on.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            "Monitoring service started: health every {:?}, backups every {:?}, maintenance every {:?}",
            self.settings.health_check_interval,
            self.settings.backup_interval,
            self.settings.maintenance_interval
        );

        while !shutdown.is_cancelled() {
            self.state.set(ServiceState::Running);
            let report = self.run_cycle().await;
            let failed = report.health.iter().filter(|s| !s.passed).count();
            info!(
                "Monitoring cycle done: {}/{} components healthy, {} alerts",
                report.health.len() - failed,
                report.health.len(),
                report.alerts.len()
            );
            self.state.set(ServiceState::Idle);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.health_check_interval) => {}
            }
        }

        self.state.set(ServiceState::Stopped);
        info!("Monitoring service stopped");
    }

    /// One pass: health checks, performance aggregation, then backup and
    /// maintenance when due. Alerts raised along the way are dispatched
    /// before returning.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut alerts = Vec::new();

        let health = self.health.check_all().await;
        alerts.extend(self.evaluate_health(&health));

        let performance = self.aggregate_performance().await;
        alerts.extend(self.evaluate_performance(&performance));
        let system = self.collect_system_metrics().await;

        let backup = if self.backup_due() {
            let backups = self.maintenance.backups.clone();
            let result = match tokio::task::spawn_blocking(move || backups.backup()).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) => Err(format!("backup task failed: {}", e)),
            };
            alerts.extend(self.evaluate_backup(&result));
            Some(result)
        } else {
            None
        };

        let maintenance = if self.maintenance_due() {
            self.last_maintenance = Some(Instant::now());
            let tasks = self.maintenance.clone();
            match tokio::task::spawn_blocking(move || tasks.run(false)).await {
                Ok(report) => {
                    if !report.is_success() {
                        alerts.push(Self::maintenance_alert(&report));
                    }
                    Some(report)
                }
                Err(e) => {
                    error!("Maintenance task failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        self.dispatch(&alerts).await;

        CycleReport {
            health,
            performance,
            system,
            backup,
            maintenance,
            alerts,
        }
    }

    /// Backup, backup pruning, sample pruning and log rotation in one go.
    /// Steps are independent; failures are collected in the report.
    pub async fn run_maintenance(&mut self) -> MaintenanceReport {
        info!("Running maintenance tasks");
        let tasks = self.maintenance.clone();
        let report = match tokio::task::spawn_blocking(move || tasks.run(true)).await {
            Ok(report) => report,
            Err(e) => MaintenanceReport {
                failures: vec![format!("maintenance task failed: {}", e)],
                ..Default::default()
            },
        };
        self.last_maintenance = Some(Instant::now());

        let mut alerts = Vec::new();
        if report.backup.is_some() {
            self.backup_failures = 0;
        }
        if !report.is_success() {
            alerts.push(Self::maintenance_alert(&report));
        }
        self.dispatch(&alerts).await;
        report
    }

    /// Fresh health check plus everything the `status` command shows.
    pub async fn status_snapshot(&self) -> StatusReport {
        let components = self.health.check_all().await;
        let issues: Vec<String> = components
            .iter()
            .filter(|s| !s.passed)
            .map(|s| issue_for(&s.component))
            .collect();

        let performance = self.aggregate_performance().await;
        let system = self.collect_system_metrics().await;

        let tasks = self.maintenance.clone();
        let (pipeline, last_backup, storage) =
            match tokio::task::spawn_blocking(move || tasks.inventory()).await {
                Ok(inventory) => inventory,
                Err(e) => {
                    error!("Status inventory task failed: {}", e);
                    (None, None, StorageUsage::default())
                }
            };

        StatusReport {
            overall: OverallStatus::from_issue_count(issues.len()),
            issues,
            components,
            performance,
            system,
            pipeline,
            storage,
            last_backup,
            timestamp: Utc::now(),
        }
    }

    async fn aggregate_performance(&self) -> Vec<Aggregate> {
        let monitor = self.performance.clone();
        let window = SampleWindow::Since(self.settings.aggregation_window);
        match tokio::task::spawn_blocking(move || monitor.aggregate_all(window)).await {
            Ok(Ok(aggregates)) => aggregates,
            Ok(Err(e)) => {
                warn!("Performance aggregation failed: {}", e);
                Vec::new()
            }
            Err(e) => {
                error!("Performance aggregation task failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Reads host CPU, memory and disk usage and stores them as samples.
    async fn collect_system_metrics(&self) -> Option<SystemMetrics> {
        let collector = self.system.clone();
        let store = self.store.clone();
        let task = tokio::task::spawn_blocking(move || {
            let metrics = collector.collect();
            for sample in metrics.samples() {
                debug!("{} = {:.1}", sample.metric, sample.value);
                if let Err(e) = store.record_system_sample(&sample) {
                    warn!("Failed to record {}: {}", sample.metric, e);
                }
            }
            metrics
        });
        match task.await {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                error!("System metrics task failed: {}", e);
                None
            }
        }
    }

    fn backup_due(&self) -> bool {
        match self.store.list_backups() {
            Ok(backups) => match backups.first() {
                Some(last) => {
                    let age_ms = (Utc::now() - last.timestamp).num_milliseconds().max(0);
                    age_ms as u128 >= self.settings.backup_interval.as_millis()
                }
                None => true,
            },
            Err(e) => {
                warn!("Cannot read backup history, attempting backup: {}", e);
                true
            }
        }
    }

    fn maintenance_due(&self) -> bool {
        self.last_maintenance
            .map_or(true, |at| at.elapsed() >= self.settings.maintenance_interval)
    }

    fn evaluate_health(&mut self, samples: &[HealthSample]) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for sample in samples {
            let component = &sample.component;
            if sample.passed {
                self.health_failures.remove(component);
                if self.health_alerted.remove(component) {
                    alerts.push(Alert::new(
                        AlertSeverity::Info,
                        component.clone(),
                        format!("{} recovered", component),
                        sample.detail.clone().unwrap_or_default(),
                    ));
                }
                continue;
            }

            let failures = self.health_failures.entry(component.clone()).or_insert(0);
            *failures += 1;
            let failures = *failures;
            debug!("{} failed {} consecutive checks", component, failures);

            if failures >= self.settings.health_failure_threshold
                && self.health_alerted.insert(component.clone())
            {
                let severity = if component == DATABASE_COMPONENT {
                    AlertSeverity::Critical
                } else {
                    AlertSeverity::Warning
                };
                alerts.push(
                    Alert::new(
                        severity,
                        component.clone(),
                        format!("{} unhealthy", component),
                        sample.error.clone().unwrap_or_default(),
                    )
                    .with_details(serde_json::json!({
                        "consecutive_failures": failures,
                        "latency_ms": sample.latency.as_secs_f64() * 1000.0,
                    })),
                );
            }
        }
        alerts
    }

    fn evaluate_performance(&mut self, aggregates: &[Aggregate]) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for aggregate in aggregates {
            if aggregate.count < self.settings.min_samples_for_alert {
                continue;
            }
            let low_success = aggregate
                .success_rate
                .is_some_and(|rate| rate < self.settings.min_success_rate);
            let slow = aggregate.p95 > self.settings.max_response_time;

            if !(low_success || slow) {
                if self.performance_alerted.remove(&aggregate.operation) {
                    alerts.push(Alert::new(
                        AlertSeverity::Info,
                        aggregate.operation.clone(),
                        format!("{} performance recovered", aggregate.operation),
                        "Success rate and latency are back within thresholds",
                    ));
                }
                continue;
            }
            if !self.performance_alerted.insert(aggregate.operation.clone()) {
                continue;
            }

            let mut reasons = Vec::new();
            if let (true, Some(rate)) = (low_success, aggregate.success_rate) {
                reasons.push(format!(
                    "success rate {:.1}% below {:.1}%",
                    rate * 100.0,
                    self.settings.min_success_rate * 100.0
                ));
            }
            if slow {
                reasons.push(format!(
                    "p95 latency {:?} above {:?}",
                    aggregate.p95, self.settings.max_response_time
                ));
            }
            alerts.push(
                Alert::new(
                    AlertSeverity::Warning,
                    aggregate.operation.clone(),
                    format!("{} degraded", aggregate.operation),
                    reasons.join("; "),
                )
                .with_details(serde_json::to_value(aggregate).unwrap_or_default()),
            );
        }
        alerts
    }

    fn evaluate_backup(&mut self, result: &Result<BackupRecord, String>) -> Vec<Alert> {
        match result {
            Ok(_) => {
                self.backup_failures = 0;
                Vec::new()
            }
            Err(e) => {
                self.backup_failures += 1;
                let severity = if self.backup_failures >= self.settings.backup_failure_escalation {
                    AlertSeverity::Critical
                } else {
                    AlertSeverity::Warning
                };
                vec![Alert::new(severity, BACKUP_COMPONENT, "Backup failed", e.clone())
                    .with_details(serde_json::json!({
                        "consecutive_failures": self.backup_failures,
                    }))]
            }
        }
    }

    fn maintenance_alert(report: &MaintenanceReport) -> Alert {
        Alert::new(
            AlertSeverity::Warning,
            MAINTENANCE_COMPONENT,
            "Maintenance incomplete",
            report.failures.join("; "),
        )
    }

    async fn dispatch(&self, alerts: &[Alert]) {
        for alert in alerts {
            if let Err(e) = self.notifier.notify(alert).await {
                warn!("Alert '{}' was not delivered: {}", alert.title, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliConfig;
    use crate::monitoring::alerts::NotificationError;
    use crate::monitoring::system_metrics::{CPU_PERCENT, MEMORY_PERCENT};
    use crate::tracker_store::{
        NewApplication, PerformanceSample, SqliteTrackerStore, SystemSample,
    };
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingNotifier {
        alerts: Mutex<Vec<Alert>>,
    }

    impl RecordingNotifier {
        fn take(&self) -> Vec<Alert> {
            std::mem::take(&mut *self.alerts.lock().unwrap())
        }
    }

    #[async_trait]
    impl AlertNotifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        async fn notify(&self, alert: &Alert) -> Result<(), NotificationError> {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        config: AppConfig,
        store: Arc<SqliteTrackerStore>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let cli = CliConfig {
                db_path: Some(dir.path().join("data/jobs.db")),
                backup_dir: Some(dir.path().join("backups")),
                log_dir: Some(dir.path().join("logs")),
                ..Default::default()
            };
            let config = AppConfig::resolve(&cli, None).unwrap();
            let store = Arc::new(SqliteTrackerStore::open(&config.db_path).unwrap());
            Self {
                _dir: dir,
                config,
                store,
                notifier: Arc::new(RecordingNotifier::default()),
            }
        }

        fn service(&self) -> MonitoringService {
            MonitoringService::new(&self.config, self.store.clone(), self.notifier.clone())
                .unwrap()
        }
    }

    #[tokio::test]
    async fn first_cycle_backs_up_and_runs_maintenance() {
        let fixture = Fixture::new();
        let mut service = fixture.service();

        let report = service.run_cycle().await;
        assert_eq!(report.health.len(), 3);
        assert!(report.health.iter().all(|s| s.passed));
        assert!(matches!(report.backup, Some(Ok(_))));
        assert!(report.maintenance.unwrap().is_success());
        assert!(report.alerts.is_empty());
        assert!(fixture.notifier.take().is_empty());

        // Second cycle right away: backup and maintenance are not due yet
        let report = service.run_cycle().await;
        assert!(report.backup.is_none());
        assert!(report.maintenance.is_none());
        assert_eq!(fixture.store.list_backups().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cycles_record_system_samples() {
        let fixture = Fixture::new();
        let mut service = fixture.service();

        let report = service.run_cycle().await;
        let system = report.system.unwrap();
        assert!((0.0..=100.0).contains(&system.memory_percent));
        service.run_cycle().await;

        for metric in [CPU_PERCENT, MEMORY_PERCENT] {
            let samples = fixture
                .store
                .system_samples(metric, SampleWindow::LastN(10))
                .unwrap();
            assert_eq!(samples.len(), 2, "{}", metric);
        }

        let report = service.status_snapshot().await;
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["system"]["memory_percent"].is_number());
    }

    #[tokio::test]
    async fn maintenance_prunes_stale_system_samples() {
        let fixture = Fixture::new();
        let mut stale = SystemSample::new(CPU_PERCENT, 50.0);
        stale.timestamp = Utc::now() - chrono::Duration::days(365);
        fixture.store.record_system_sample(&stale).unwrap();
        let mut service = fixture.service();

        let report = service.run_maintenance().await;
        assert!(report.is_success(), "{:?}", report.failures);
        assert_eq!(report.system_samples_pruned, 1);
    }

    #[tokio::test]
    async fn very_long_sample_retention_keeps_error_events() {
        let mut fixture = Fixture::new();
        fixture.config.monitoring.sample_retention =
            RetentionPolicy::max_age(Duration::from_secs(u64::MAX));
        fixture
            .store
            .record_error_event(DATABASE_COMPONENT, "disk I/O error", None)
            .unwrap();
        let mut service = fixture.service();

        let report = service.run_maintenance().await;
        assert!(report.is_success(), "{:?}", report.failures);
        assert_eq!(report.error_events_pruned, 0);
    }

    #[tokio::test]
    async fn database_failure_raises_one_critical_alert() {
        let fixture = Fixture::new();
        let mut service = fixture.service();
        service.run_cycle().await;
        std::fs::remove_file(fixture.store.db_path()).unwrap();

        service.run_cycle().await;
        service.run_cycle().await;
        let alerts = fixture.notifier.take();
        let database: Vec<_> = alerts
            .iter()
            .filter(|a| a.component == DATABASE_COMPONENT)
            .collect();
        assert_eq!(database.len(), 1);
        assert_eq!(database[0].severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn repeated_backup_failures_escalate() {
        let mut fixture = Fixture::new();
        let blocker = fixture.config.log_dir.with_file_name("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        fixture.config.backup_dir = blocker.join("backups");
        fixture.config.monitoring.backup_failure_escalation = 2;
        let mut service = fixture.service();

        let first = service.run_cycle().await;
        assert!(matches!(first.backup, Some(Err(_))));
        service.run_cycle().await;

        let backup_alerts: Vec<_> = fixture
            .notifier
            .take()
            .into_iter()
            .filter(|a| a.component == BACKUP_COMPONENT)
            .map(|a| a.severity)
            .collect();
        assert_eq!(
            backup_alerts,
            vec![AlertSeverity::Warning, AlertSeverity::Critical]
        );
    }

    #[tokio::test]
    async fn slow_operations_alert_once() {
        let mut fixture = Fixture::new();
        fixture.config.monitoring.min_samples_for_alert = 3;
        fixture.config.monitoring.max_response_time = Duration::from_millis(100);
        for _ in 0..3 {
            fixture
                .store
                .record_performance_sample(&PerformanceSample {
                    operation: "api.job_search".to_string(),
                    timestamp: Utc::now(),
                    duration: Duration::from_secs(2),
                    success: true,
                })
                .unwrap();
        }
        let mut service = fixture.service();

        service.run_cycle().await;
        service.run_cycle().await;
        let perf: Vec<_> = fixture
            .notifier
            .take()
            .into_iter()
            .filter(|a| a.component == "api.job_search")
            .collect();
        assert_eq!(perf.len(), 1);
        assert_eq!(perf[0].severity, AlertSeverity::Warning);
        assert!(perf[0].message.contains("p95"));
    }

    #[tokio::test]
    async fn status_snapshot_reports_pipeline_and_storage() {
        let fixture = Fixture::new();
        fixture
            .store
            .create_application(&NewApplication {
                job_url: "https://x.test/job/1".to_string(),
                company: "Acme".to_string(),
                position: "Engineer".to_string(),
                application_date: "2024-01-15".to_string(),
                status: "applied".to_string(),
                notes: None,
            })
            .unwrap();
        let mut service = fixture.service();
        service.run_maintenance().await;

        let report = service.status_snapshot().await;
        assert_eq!(report.overall, OverallStatus::Healthy);
        assert!(report.issues.is_empty());
        assert_eq!(report.pipeline.unwrap().total(), 1);
        assert!(report.storage.database_bytes > 0);
        assert_eq!(report.storage.backup_files, 1);
        assert_eq!(report.last_backup.unwrap().verification, "valid");
    }

    #[tokio::test]
    async fn missing_database_degrades_status() {
        let fixture = Fixture::new();
        let service = fixture.service();
        std::fs::remove_file(fixture.store.db_path()).unwrap();

        let report = service.status_snapshot().await;
        assert_eq!(report.overall, OverallStatus::Degraded);
        assert_eq!(report.issues, vec!["Database connectivity issues".to_string()]);
    }

    #[test]
    fn overall_status_thresholds() {
        assert_eq!(OverallStatus::from_issue_count(0), OverallStatus::Healthy);
        assert_eq!(OverallStatus::from_issue_count(1), OverallStatus::Degraded);
        assert_eq!(OverallStatus::from_issue_count(2), OverallStatus::Unhealthy);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let fixture = Fixture::new();
        let mut service = fixture.service();
        let state = service.state_handle();
        assert_eq!(state.get(), ServiceState::Idle);

        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let token = token.clone();
            async move {
                service.run(token).await;
                service
            }
        });

        // Wait for the first cycle to finish and the loop to go to sleep
        while fixture.store.list_backups().unwrap().is_empty() || state.get() != ServiceState::Idle
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        let service = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
    }
}
