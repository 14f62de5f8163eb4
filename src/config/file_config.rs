use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Contents of the optional TOML config file. Every field overrides the
/// matching CLI flag / environment variable when present.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub db_path: Option<String>,
    pub backup_dir: Option<String>,
    pub log_dir: Option<String>,

    pub monitoring: Option<MonitoringConfig>,
    pub retention: Option<RetentionConfig>,
    pub job_api: Option<JobApiConfig>,
    pub alerts: Option<AlertsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MonitoringConfig {
    pub health_check_interval_secs: Option<u64>,
    pub backup_interval_secs: Option<u64>,
    pub maintenance_interval_secs: Option<u64>,
    pub aggregation_window_secs: Option<u64>,
    pub min_samples_for_alert: Option<usize>,
    pub max_response_time_ms: Option<u64>,
    pub min_success_rate: Option<f64>,
    pub health_failure_threshold: Option<u32>,
    pub backup_failure_escalation: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RetentionConfig {
    pub metrics_retention_days: Option<u64>,
    pub max_samples: Option<usize>,
    pub backup_retention_days: Option<u64>,
    pub max_backups: Option<usize>,
    pub log_retention_days: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobApiConfig {
    pub url: Option<String>,
    pub app_id: Option<String>,
    pub app_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AlertsConfig {
    pub webhook_url: Option<String>,
    pub email_enabled: Option<bool>,
    pub smtp_server: Option<String>,
    pub smtp_port: Option<u16>,
    pub email_user: Option<String>,
    pub email_pass: Option<String>,
    pub alert_email: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parses_partial_sections() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
db_path = "/srv/jobs/jobs.db"

[monitoring]
health_check_interval_secs = 60
min_success_rate = 0.9

[retention]
max_backups = 3

[alerts]
email_enabled = true
alert_email = "me@example.com"
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.db_path.as_deref(), Some("/srv/jobs/jobs.db"));
        let monitoring = config.monitoring.unwrap();
        assert_eq!(monitoring.health_check_interval_secs, Some(60));
        assert_eq!(monitoring.backup_interval_secs, None);
        assert_eq!(config.retention.unwrap().max_backups, Some(3));
        assert_eq!(config.alerts.unwrap().email_enabled, Some(true));
        assert!(config.job_api.is_none());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = FileConfig::load(file.path()).unwrap();
        assert!(config.db_path.is_none());
        assert!(config.monitoring.is_none());
    }

    #[test]
    fn reports_parse_errors_with_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "db_path = [").unwrap();
        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }
}
