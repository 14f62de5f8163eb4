//! Monitoring stack driven end to end against a real on-disk database.

mod common;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::*;
use job_agent::config::JobApiSettings;
use job_agent::monitoring::{
    Alert, AlertNotifier, AlertSeverity, HealthChecker, MonitoringService, NotificationError,
    OverallStatus, PerformanceMonitor,
};
use job_agent::tracker::ApplicationTracker;
use job_agent::tracker_store::{ApplicationStatus, TrackerStore};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CollectingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

#[async_trait]
impl AlertNotifier for CollectingNotifier {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), NotificationError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

#[tokio::test]
async fn unreachable_store_yields_failed_database_sample() {
    let env = TestEnv::new();
    let store: Arc<dyn TrackerStore> = env.store.clone();
    let checker = HealthChecker::new(
        store.clone(),
        PerformanceMonitor::new(store),
        JobApiSettings::default(),
        env.config.backup_dir.clone(),
    )
    .unwrap();
    std::fs::remove_file(&env.config.db_path).unwrap();

    let samples = checker.check_all().await;
    assert_eq!(samples.len(), 3);
    let database = samples.iter().find(|s| s.component == "database").unwrap();
    assert!(!database.passed);
    assert!(!database.error.as_deref().unwrap_or("").is_empty());
    assert!(samples
        .iter()
        .filter(|s| s.component != "database")
        .all(|s| s.passed));
}

#[tokio::test]
async fn tracked_applications_show_up_in_status() {
    let env = TestEnv::new();
    let tracker = ApplicationTracker::new(env.store.clone());
    for company in COMPANIES {
        tracker
            .track_application(&application(company, APPLIED_ON, "applied"))
            .unwrap();
    }
    let first = tracker
        .list(&Default::default())
        .unwrap()
        .into_iter()
        .find(|a| a.company == ACME)
        .unwrap();
    tracker
        .update_status(first.id, "interview", Some("Onsite next week".to_string()))
        .unwrap();

    let notifier = Arc::new(CollectingNotifier::default());
    let mut service =
        MonitoringService::new(&env.config, env.store.clone(), notifier.clone()).unwrap();
    let cycle = service.run_cycle().await;
    assert!(cycle.health.iter().all(|s| s.passed));
    assert!(matches!(cycle.backup, Some(Ok(_))));
    assert!(notifier.alerts.lock().unwrap().is_empty());

    let report = service.status_snapshot().await;
    assert_eq!(report.overall, OverallStatus::Healthy);
    let pipeline = report.pipeline.as_ref().unwrap();
    assert_eq!(pipeline.get(ApplicationStatus::Applied), COMPANIES.len() - 1);
    assert_eq!(pipeline.get(ApplicationStatus::Interview), 1);
    assert!(report
        .performance
        .iter()
        .any(|a| a.operation == "store.create_application" && a.count == COMPANIES.len()));
    assert_eq!(report.last_backup.as_ref().unwrap().verification, "valid");
    assert_eq!(report.storage.backup_files, 1);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["overall"], "healthy");
    assert_eq!(json["pipeline"]["interview"], 1);

    let summary = tracker
        .application_summary(NaiveDate::from_ymd_opt(2024, 1, 20).unwrap())
        .unwrap();
    assert_eq!(summary.total, COMPANIES.len());
    assert_eq!(summary.success_metrics.interviews, 1);
}

#[tokio::test]
async fn losing_the_database_raises_a_single_critical_alert() {
    let env = TestEnv::new();
    let notifier = Arc::new(CollectingNotifier::default());
    let mut service =
        MonitoringService::new(&env.config, env.store.clone(), notifier.clone()).unwrap();
    service.run_cycle().await;
    assert!(notifier.alerts.lock().unwrap().is_empty());

    std::fs::remove_file(&env.config.db_path).unwrap();
    service.run_cycle().await;
    service.run_cycle().await;

    let critical: Vec<Alert> = notifier
        .alerts
        .lock()
        .unwrap()
        .iter()
        .filter(|a| a.severity == AlertSeverity::Critical)
        .cloned()
        .collect();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].component, "database");

    let report = service.status_snapshot().await;
    assert_ne!(report.overall, OverallStatus::Healthy);
    assert!(!report.issues.is_empty());
}

#[tokio::test]
async fn maintenance_pass_backs_up_and_reports_counts() {
    let env = TestEnv::new();
    let notifier = Arc::new(CollectingNotifier::default());
    let mut service =
        MonitoringService::new(&env.config, env.store.clone(), notifier.clone()).unwrap();

    let report = service.run_maintenance().await;
    assert!(report.is_success(), "{:?}", report.failures);
    let backup = report.backup.unwrap();
    assert!(backup.path.starts_with(&env.config.backup_dir));
    assert_eq!(env.store.list_backups().unwrap().len(), 1);
    assert_eq!(report.backups_pruned, 0);
}
