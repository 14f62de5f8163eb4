mod file_config;

pub use file_config::{AlertsConfig, FileConfig, JobApiConfig, MonitoringConfig, RetentionConfig};

use crate::tracker_store::RetentionPolicy;
use clap::Args;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DB_PATH: &str = "data/jobs.db";
pub const DEFAULT_BACKUP_DIR: &str = "backups";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_JOB_API_URL: &str = "https://api.adzuna.com/v1/api/jobs/gb/search/1";
pub const DEFAULT_SMTP_SERVER: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("{0:#}")]
    File(anyhow::Error),
}

/// Connection and storage flags shared by the binaries. Each one falls back
/// to an environment variable.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Path to a TOML config file. Values in it override flags and environment.
    #[clap(long, env = "JOB_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the SQLite tracker database.
    #[clap(long, env = "DATABASE_PATH")]
    pub db_path: Option<PathBuf>,

    /// Directory backups are written to.
    #[clap(long, env = "BACKUP_DIR")]
    pub backup_dir: Option<PathBuf>,

    /// Directory for log files.
    #[clap(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "ADZUNA_APP_ID", hide_env_values = true)]
    pub adzuna_app_id: Option<String>,

    #[clap(long, env = "ADZUNA_APP_KEY", hide_env_values = true)]
    pub adzuna_app_key: Option<String>,

    /// Send alerts by email (requires the SMTP settings).
    #[clap(long, env = "ENABLE_EMAIL_ALERTS")]
    pub enable_email_alerts: bool,

    #[clap(long, env = "SMTP_SERVER")]
    pub smtp_server: Option<String>,

    #[clap(long, env = "SMTP_PORT")]
    pub smtp_port: Option<u16>,

    #[clap(long, env = "EMAIL_USER")]
    pub email_user: Option<String>,

    #[clap(long, env = "EMAIL_PASS", hide_env_values = true)]
    pub email_pass: Option<String>,

    /// Recipient of alert emails.
    #[clap(long, env = "ALERT_EMAIL")]
    pub alert_email: Option<String>,

    /// Webhook receiving alerts as JSON.
    #[clap(long, env = "ALERT_WEBHOOK_URL")]
    pub alert_webhook_url: Option<String>,
}

impl CommonArgs {
    pub fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_path: self.db_path.clone(),
            backup_dir: self.backup_dir.clone(),
            log_dir: self.log_dir.clone(),
            adzuna_app_id: self.adzuna_app_id.clone(),
            adzuna_app_key: self.adzuna_app_key.clone(),
            enable_email_alerts: self.enable_email_alerts,
            smtp_server: self.smtp_server.clone(),
            smtp_port: self.smtp_port,
            email_user: self.email_user.clone(),
            email_pass: self.email_pass.clone(),
            alert_email: self.alert_email.clone(),
            alert_webhook_url: self.alert_webhook_url.clone(),
        }
    }

    /// Reads the config file, if any, and resolves the final configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let file_config = match &self.config {
            Some(path) => Some(FileConfig::load(path).map_err(ConfigError::File)?),
            None => None,
        };
        AppConfig::resolve(&self.to_cli_config(), file_config)
    }
}

/// CLI (and environment) values that take part in config resolution.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub adzuna_app_id: Option<String>,
    pub adzuna_app_key: Option<String>,
    pub enable_email_alerts: bool,
    pub smtp_server: Option<String>,
    pub smtp_port: Option<u16>,
    pub email_user: Option<String>,
    pub email_pass: Option<String>,
    pub alert_email: Option<String>,
    pub alert_webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub backup_dir: PathBuf,
    pub log_dir: PathBuf,
    pub monitoring: MonitoringSettings,
    pub job_api: JobApiSettings,
    pub alerts: AlertSettings,
}

#[derive(Debug, Clone)]
pub struct MonitoringSettings {
    pub health_check_interval: Duration,
    pub backup_interval: Duration,
    pub maintenance_interval: Duration,
    /// Time window performance aggregates are computed over.
    pub aggregation_window: Duration,
    /// Performance alerts need at least this many samples in the window.
    pub min_samples_for_alert: usize,
    pub max_response_time: Duration,
    pub min_success_rate: f64,
    /// Consecutive failed checks before a component alert fires.
    pub health_failure_threshold: u32,
    /// Consecutive backup failures that escalate to a critical alert.
    pub backup_failure_escalation: u32,
    pub sample_retention: RetentionPolicy,
    pub backup_retention: RetentionPolicy,
    pub log_retention: Duration,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(300),
            backup_interval: Duration::from_secs(SECS_PER_DAY),
            maintenance_interval: Duration::from_secs(SECS_PER_DAY),
            aggregation_window: Duration::from_secs(3600),
            min_samples_for_alert: 5,
            max_response_time: Duration::from_secs(10),
            min_success_rate: 0.95,
            health_failure_threshold: 1,
            backup_failure_escalation: 3,
            sample_retention: RetentionPolicy::max_age(Duration::from_secs(90 * SECS_PER_DAY)),
            backup_retention: RetentionPolicy {
                max_age: Some(Duration::from_secs(7 * SECS_PER_DAY)),
                max_count: Some(10),
            },
            log_retention: Duration::from_secs(30 * SECS_PER_DAY),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobApiSettings {
    pub url: String,
    pub app_id: Option<String>,
    pub app_key: Option<String>,
    pub timeout: Duration,
}

impl JobApiSettings {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.app_id.as_deref(), self.app_key.as_deref()) {
            (Some(id), Some(key)) if !id.is_empty() && !key.is_empty() => Some((id, key)),
            _ => None,
        }
    }
}

impl Default for JobApiSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_JOB_API_URL.to_string(),
            app_id: None,
            app_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlertSettings {
    pub webhook_url: Option<String>,
    pub email: Option<EmailSettings>,
}

#[derive(Clone)]
pub struct EmailSettings {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub recipient: String,
}

impl std::fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSettings")
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("recipient", &self.recipient)
            .finish()
    }
}

fn secs(field: &'static str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(value))
}

fn days(field: &'static str, value: u64) -> Result<Duration, ConfigError> {
    let seconds = value
        .checked_mul(SECS_PER_DAY)
        .ok_or_else(|| ConfigError::Invalid {
            field,
            reason: format!("{} days is too long", value),
        })?;
    secs(field, seconds)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self, ConfigError> {
        let file = file_config.unwrap_or_default();
        let defaults = MonitoringSettings::default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
        let backup_dir = file
            .backup_dir
            .map(PathBuf::from)
            .or_else(|| cli.backup_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR));
        let log_dir = file
            .log_dir
            .map(PathBuf::from)
            .or_else(|| cli.log_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));

        if db_path.is_dir() {
            return Err(ConfigError::Invalid {
                field: "db_path",
                reason: format!("{:?} is a directory", db_path),
            });
        }

        // Monitoring schedule and thresholds
        let m = file.monitoring.unwrap_or_default();
        let min_success_rate = m.min_success_rate.unwrap_or(defaults.min_success_rate);
        if !(0.0..=1.0).contains(&min_success_rate) {
            return Err(ConfigError::Invalid {
                field: "min_success_rate",
                reason: format!("{} is outside [0, 1]", min_success_rate),
            });
        }
        let max_response_time = match m.max_response_time_ms {
            Some(ms) if ms == 0 => {
                return Err(ConfigError::Invalid {
                    field: "max_response_time_ms",
                    reason: "must be greater than zero".to_string(),
                })
            }
            Some(ms) => Duration::from_millis(ms),
            None => defaults.max_response_time,
        };

        // Retention
        let r = file.retention.unwrap_or_default();
        let max_backups = r
            .max_backups
            .or(defaults.backup_retention.max_count);
        if max_backups == Some(0) {
            return Err(ConfigError::Invalid {
                field: "max_backups",
                reason: "at least one backup must be kept".to_string(),
            });
        }
        let sample_retention = RetentionPolicy {
            max_age: match r.metrics_retention_days {
                Some(n) => Some(days("metrics_retention_days", n)?),
                None => defaults.sample_retention.max_age,
            },
            max_count: r.max_samples,
        };
        let backup_retention = RetentionPolicy {
            max_age: match r.backup_retention_days {
                Some(n) => Some(days("backup_retention_days", n)?),
                None => defaults.backup_retention.max_age,
            },
            max_count: max_backups,
        };
        let log_retention = match r.log_retention_days {
            Some(n) => days("log_retention_days", n)?,
            None => defaults.log_retention,
        };

        let monitoring = MonitoringSettings {
            health_check_interval: match m.health_check_interval_secs {
                Some(v) => secs("health_check_interval_secs", v)?,
                None => defaults.health_check_interval,
            },
            backup_interval: match m.backup_interval_secs {
                Some(v) => secs("backup_interval_secs", v)?,
                None => defaults.backup_interval,
            },
            maintenance_interval: match m.maintenance_interval_secs {
                Some(v) => secs("maintenance_interval_secs", v)?,
                None => defaults.maintenance_interval,
            },
            aggregation_window: match m.aggregation_window_secs {
                Some(v) => secs("aggregation_window_secs", v)?,
                None => defaults.aggregation_window,
            },
            min_samples_for_alert: m
                .min_samples_for_alert
                .unwrap_or(defaults.min_samples_for_alert),
            max_response_time,
            min_success_rate,
            health_failure_threshold: m
                .health_failure_threshold
                .unwrap_or(defaults.health_failure_threshold)
                .max(1),
            backup_failure_escalation: m
                .backup_failure_escalation
                .unwrap_or(defaults.backup_failure_escalation)
                .max(1),
            sample_retention,
            backup_retention,
            log_retention,
        };

        // Job search API check
        let api = file.job_api.unwrap_or_default();
        let job_api = JobApiSettings {
            url: api.url.unwrap_or_else(|| DEFAULT_JOB_API_URL.to_string()),
            app_id: non_empty(api.app_id.or_else(|| cli.adzuna_app_id.clone())),
            app_key: non_empty(api.app_key.or_else(|| cli.adzuna_app_key.clone())),
            timeout: match api.timeout_secs {
                Some(v) => secs("job_api.timeout_secs", v)?,
                None => JobApiSettings::default().timeout,
            },
        };

        // Alert delivery
        let a = file.alerts.unwrap_or_default();
        let email_enabled = a.email_enabled.unwrap_or(cli.enable_email_alerts);
        let email = if email_enabled {
            Some(EmailSettings {
                smtp_server: a
                    .smtp_server
                    .or_else(|| cli.smtp_server.clone())
                    .unwrap_or_else(|| DEFAULT_SMTP_SERVER.to_string()),
                smtp_port: a.smtp_port.or(cli.smtp_port).unwrap_or(DEFAULT_SMTP_PORT),
                username: non_empty(a.email_user.or_else(|| cli.email_user.clone()))
                    .ok_or(ConfigError::Missing("EMAIL_USER"))?,
                password: non_empty(a.email_pass.or_else(|| cli.email_pass.clone()))
                    .ok_or(ConfigError::Missing("EMAIL_PASS"))?,
                recipient: non_empty(a.alert_email.or_else(|| cli.alert_email.clone()))
                    .ok_or(ConfigError::Missing("ALERT_EMAIL"))?,
            })
        } else {
            None
        };
        let alerts = AlertSettings {
            webhook_url: non_empty(a.webhook_url.or_else(|| cli.alert_webhook_url.clone())),
            email,
        };

        Ok(AppConfig {
            db_path,
            backup_dir,
            log_dir,
            monitoring,
            job_api,
            alerts,
        })
    }

    /// Directory holding the database file.
    pub fn data_dir(&self) -> &Path {
        self.db_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}
