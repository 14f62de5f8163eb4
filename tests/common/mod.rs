//! Shared fixtures for the integration tests.
//!
//! Every fixture owns a `TempDir`; keep the returned value alive for the
//! duration of the test or the database disappears underneath it.

#![allow(dead_code)]

mod constants;

pub use constants::*;

use job_agent::config::{AppConfig, CliConfig};
use job_agent::tracker_store::{NewApplication, SqliteTrackerStore};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestEnv {
    pub dir: TempDir,
    pub config: AppConfig,
    pub store: Arc<SqliteTrackerStore>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_path: Some(dir.path().join("data").join("jobs.db")),
            backup_dir: Some(dir.path().join("backups")),
            log_dir: Some(dir.path().join("logs")),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        let store = Arc::new(SqliteTrackerStore::open(&config.db_path).unwrap());
        Self { dir, config, store }
    }
}

pub fn application(company: &str, date: &str, status: &str) -> NewApplication {
    NewApplication {
        job_url: format!("https://{}.test/job/1", company.to_lowercase()),
        company: company.to_string(),
        position: POSITION.to_string(),
        application_date: date.to_string(),
        status: status.to_string(),
        notes: Some(format!("Referred by a friend at {}", company)),
    }
}
