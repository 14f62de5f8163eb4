use super::performance_monitor::PerformanceMonitor;
use crate::config::JobApiSettings;
use crate::tracker_store::{HealthSample, TrackerStore};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub const DATABASE_COMPONENT: &str = "database";
pub const JOB_API_COMPONENT: &str = "job_search_api";
pub const BACKUP_STORAGE_COMPONENT: &str = "backup_storage";

/// Checks every monitored component. Failures become failed samples, so
/// `check_all` always returns one sample per component.
pub struct HealthChecker {
    store: Arc<dyn TrackerStore>,
    performance: PerformanceMonitor,
    api: JobApiSettings,
    backup_dir: PathBuf,
    client: reqwest::Client,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn TrackerStore>,
        performance: PerformanceMonitor,
        api: JobApiSettings,
        backup_dir: PathBuf,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(api.timeout).build()?;
        Ok(Self {
            store,
            performance,
            api,
            backup_dir,
            client,
        })
    }

    /// Runs every check, then records the samples on the blocking pool.
    pub async fn check_all(&self) -> Vec<HealthSample> {
        let samples = vec![
            self.check_database().await,
            self.check_job_api().await,
            self.check_backup_storage().await,
        ];

        let store = self.store.clone();
        let performance = self.performance.clone();
        let recorded = samples.clone();
        let task = tokio::task::spawn_blocking(move || {
            for sample in &recorded {
                persist(store.as_ref(), &performance, sample);
            }
        });
        if let Err(e) = task.await {
            error!("Recording health samples failed: {}", e);
        }
        samples
    }

    pub async fn check_database(&self) -> HealthSample {
        let start = Instant::now();
        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || store.ping()).await;
        let elapsed = start.elapsed();

        match result {
            Ok(Ok(stats)) => {
                debug!("Database responsive in {:?}", elapsed);
                HealthSample::pass(
                    DATABASE_COMPONENT,
                    elapsed,
                    format!(
                        "{} tables, {} applications",
                        stats.table_count, stats.application_count
                    ),
                )
            }
            Ok(Err(e)) => HealthSample::fail(DATABASE_COMPONENT, elapsed, e.to_string()),
            Err(e) => HealthSample::fail(
                DATABASE_COMPONENT,
                elapsed,
                format!("database check panicked: {}", e),
            ),
        }
    }

    pub async fn check_job_api(&self) -> HealthSample {
        let Some((app_id, app_key)) = self.api.credentials() else {
            return HealthSample::pass(JOB_API_COMPONENT, Duration::ZERO, "unconfigured");
        };

        let url = match reqwest::Url::parse_with_params(
            &self.api.url,
            &[
                ("app_id", app_id),
                ("app_key", app_key),
                ("results_per_page", "1"),
                ("what", "test"),
            ],
        ) {
            Ok(url) => url,
            Err(e) => {
                return HealthSample::fail(
                    JOB_API_COMPONENT,
                    Duration::ZERO,
                    format!("invalid API url {}: {}", self.api.url, e),
                )
            }
        };

        let start = Instant::now();
        let result = tokio::time::timeout(self.api.timeout, self.client.get(url).send()).await;
        let elapsed = start.elapsed();

        match result {
            Ok(Ok(response)) if response.status().is_success() => HealthSample::pass(
                JOB_API_COMPONENT,
                elapsed,
                format!("HTTP {}", response.status().as_u16()),
            ),
            Ok(Ok(response)) => HealthSample::fail(
                JOB_API_COMPONENT,
                elapsed,
                format!("API returned status {}", response.status().as_u16()),
            ),
            Ok(Err(e)) => {
                HealthSample::fail(JOB_API_COMPONENT, elapsed, format!("API check failed: {}", e))
            }
            Err(_) => HealthSample::fail(
                JOB_API_COMPONENT,
                elapsed,
                format!("API check timed out after {:?}", self.api.timeout),
            ),
        }
    }

    pub async fn check_backup_storage(&self) -> HealthSample {
        let start = Instant::now();
        let dir = self.backup_dir.clone();
        let result = tokio::task::spawn_blocking(move || ensure_writable(&dir)).await;
        let elapsed = start.elapsed();

        match result {
            Ok(Ok(())) => HealthSample::pass(
                BACKUP_STORAGE_COMPONENT,
                elapsed,
                format!("{} is writable", self.backup_dir.display()),
            ),
            Ok(Err(e)) => HealthSample::fail(
                BACKUP_STORAGE_COMPONENT,
                elapsed,
                format!("{} is not writable: {}", self.backup_dir.display(), e),
            ),
            Err(e) => HealthSample::fail(
                BACKUP_STORAGE_COMPONENT,
                elapsed,
                format!("storage check panicked: {}", e),
            ),
        }
    }
}

fn persist(store: &dyn TrackerStore, performance: &PerformanceMonitor, sample: &HealthSample) {
    if let Err(e) = store.record_health_sample(sample) {
        warn!("Failed to record health sample for {}: {}", sample.component, e);
    }
    let operation = match sample.component.as_str() {
        JOB_API_COMPONENT => "api.job_search".to_string(),
        other => format!("health.{}", other),
    };
    if let Err(e) = performance.record(&operation, sample.latency, sample.passed) {
        warn!("Failed to record timing for {}: {}", operation, e);
    }
    if let Some(error) = &sample.error {
        if let Err(e) =
            store.record_error_event(&sample.component, error, Some("health_check".to_string()))
        {
            warn!("Failed to record error event for {}: {}", sample.component, e);
        }
    }
}

/// Creates `dir` if needed and writes a throwaway file into it.
fn ensure_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut scratch = tempfile::NamedTempFile::new_in(dir)?;
    scratch.write_all(b"ok")?;
    scratch.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker_store::{SampleWindow, SqliteTrackerStore};
    use mockito::{Matcher, Server};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Nothing listens on the discard port locally.
    const UNREACHABLE_URL: &str = "http://127.0.0.1:9/unreachable";

    fn checker(dir: &TempDir, api: JobApiSettings) -> (Arc<SqliteTrackerStore>, HealthChecker) {
        let store = Arc::new(SqliteTrackerStore::open(dir.path().join("jobs.db")).unwrap());
        let performance = PerformanceMonitor::new(store.clone());
        let checker =
            HealthChecker::new(store.clone(), performance, api, dir.path().join("backups"))
                .unwrap();
        (store, checker)
    }

    fn api(url: String) -> JobApiSettings {
        JobApiSettings {
            url,
            app_id: Some("id".to_string()),
            app_key: Some("key".to_string()),
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn healthy_components_pass_and_are_recorded() {
        let dir = TempDir::new().unwrap();
        let (store, checker) = checker(&dir, JobApiSettings::default());

        let samples = checker.check_all().await;
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|s| s.passed), "{:?}", samples);

        let api = samples.iter().find(|s| s.component == JOB_API_COMPONENT).unwrap();
        assert_eq!(api.detail.as_deref(), Some("unconfigured"));

        assert_eq!(store.recent_health_samples(10).unwrap().len(), 3);
        let perf = store
            .performance_samples("health.database", SampleWindow::LastN(5))
            .unwrap();
        assert_eq!(perf.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_database_yields_failed_sample() {
        let dir = TempDir::new().unwrap();
        let (store, checker) = checker(&dir, JobApiSettings::default());
        std::fs::remove_file(store.db_path()).unwrap();

        let sample = checker.check_database().await;
        assert!(!sample.passed);
        assert!(sample.error.as_deref().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn api_check_sends_credentials_and_reads_status() {
        let dir = TempDir::new().unwrap();
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/jobs/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("app_id".into(), "id".into()),
                Matcher::UrlEncoded("app_key".into(), "key".into()),
                Matcher::UrlEncoded("results_per_page".into(), "1".into()),
                Matcher::UrlEncoded("what".into(), "test".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results":[]}"#)
            .create_async()
            .await;
        let (_store, checker) = checker(&dir, api(format!("{}/jobs/search", server.url())));

        let sample = checker.check_job_api().await;
        mock.assert_async().await;
        assert!(sample.passed, "{:?}", sample);
        assert_eq!(sample.detail.as_deref(), Some("HTTP 200"));
    }

    #[tokio::test]
    async fn api_error_status_fails_check() {
        let dir = TempDir::new().unwrap();
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/jobs/search")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("denied")
            .create_async()
            .await;
        let (store, checker) = checker(&dir, api(format!("{}/jobs/search", server.url())));

        let samples = checker.check_all().await;
        mock.assert_async().await;
        let sample = samples.iter().find(|s| s.component == JOB_API_COMPONENT).unwrap();
        assert!(!sample.passed);
        assert!(sample.error.as_deref().unwrap().contains("401"));

        let since = chrono::Utc::now() - chrono::Duration::minutes(1);
        let events = store.error_events_since(since).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].component, JOB_API_COMPONENT);
    }

    #[tokio::test]
    async fn recording_waits_for_the_writer_off_the_runtime_thread() {
        let dir = TempDir::new().unwrap();
        let (store, checker) = checker(&dir, JobApiSettings::default());

        // Another connection holds the write lock for a while
        let locker = rusqlite::Connection::open(store.db_path()).unwrap();
        locker.execute_batch("BEGIN IMMEDIATE").unwrap();
        let release = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            locker.execute_batch("COMMIT").unwrap();
        });

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let samples = checker.check_all().await;
        release.join().unwrap();
        ticker.abort();

        assert!(samples.iter().all(|s| s.passed), "{:?}", samples);
        assert!(ticks.load(Ordering::SeqCst) >= 10);
        assert_eq!(store.recent_health_samples(10).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unreachable_api_fails_without_panicking() {
        let dir = TempDir::new().unwrap();
        let (_store, checker) = checker(&dir, api(UNREACHABLE_URL.to_string()));
        let sample = checker.check_job_api().await;
        assert!(!sample.passed);
        assert!(sample.error.is_some());
    }

    #[tokio::test]
    async fn unwritable_backup_dir_fails_check() {
        let dir = TempDir::new().unwrap();
        let (store, _) = checker(&dir, JobApiSettings::default());
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();
        let checker = HealthChecker::new(
            store.clone(),
            PerformanceMonitor::new(store),
            JobApiSettings::default(),
            blocker,
        )
        .unwrap();

        let sample = checker.check_backup_storage().await;
        assert!(!sample.passed);
    }
}
