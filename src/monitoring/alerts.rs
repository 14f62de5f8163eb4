//! Alert model and delivery channels.
//!
//! Delivery is best-effort: a failing channel is reported to the caller but
//! never blocks the other channels or the monitoring cycle.

use crate::config::{AlertSettings, EmailSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);
const SMTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("failed to send notification: {0}")]
    SendFailed(String),
    #[error("notification channel unavailable: {0}")]
    ChannelUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub component: String,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

impl Alert {
    pub fn new(
        severity: AlertSeverity,
        component: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            component: component.into(),
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    fn subject(&self) -> String {
        format!(
            "[job-agent] {}: {}",
            self.severity.as_str().to_uppercase(),
            self.title
        )
    }

    fn body(&self) -> String {
        let mut body = format!(
            "{}\n\nComponent: {}\nSeverity: {}\nTime: {}\n",
            self.message,
            self.component,
            self.severity,
            self.timestamp.to_rfc3339()
        );
        if !self.details.is_null() {
            if let Ok(details) = serde_json::to_string_pretty(&self.details) {
                body.push_str("\nDetails:\n");
                body.push_str(&details);
                body.push('\n');
            }
        }
        body
    }
}

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, alert: &Alert) -> Result<(), NotificationError>;
}

/// Writes alerts to the tracing log. Always available.
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), NotificationError> {
        match alert.severity {
            AlertSeverity::Info => info!("[{}] {}: {}", alert.component, alert.title, alert.message),
            AlertSeverity::Warning => {
                warn!("[{}] {}: {}", alert.component, alert.title, alert.message)
            }
            AlertSeverity::Critical => {
                error!("[{}] {}: {}", alert.component, alert.title, alert.message)
            }
        }
        Ok(())
    }
}

/// Posts alerts as JSON to an HTTP endpoint.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| {
                NotificationError::ChannelUnavailable(format!("cannot build HTTP client: {}", e))
            })?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| NotificationError::SendFailed(format!("webhook request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(NotificationError::SendFailed(format!(
                "webhook returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Sends alerts over SMTP with STARTTLS.
pub struct EmailNotifier {
    settings: EmailSettings,
}

impl EmailNotifier {
    pub fn new(settings: EmailSettings) -> Self {
        Self { settings }
    }

    fn build_message(&self, alert: &Alert) -> Result<Message, NotificationError> {
        let invalid = |e: lettre::address::AddressError| {
            NotificationError::ChannelUnavailable(format!("invalid email address: {}", e))
        };
        let from: Mailbox = self.settings.username.parse().map_err(invalid)?;
        let to: Mailbox = self.settings.recipient.parse().map_err(invalid)?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(alert.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(alert.body())
            .map_err(|e| NotificationError::SendFailed(format!("cannot build email: {}", e)))
    }
}

#[async_trait]
impl AlertNotifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), NotificationError> {
        let message = self.build_message(alert)?;
        let settings = self.settings.clone();

        tokio::task::spawn_blocking(move || {
            let mailer = SmtpTransport::starttls_relay(&settings.smtp_server)
                .map_err(|e| NotificationError::ChannelUnavailable(e.to_string()))?
                .port(settings.smtp_port)
                .credentials(Credentials::new(settings.username, settings.password))
                .timeout(Some(SMTP_TIMEOUT))
                .build();
            mailer
                .send(&message)
                .map(|_| ())
                .map_err(|e| NotificationError::SendFailed(format!("SMTP error: {}", e)))
        })
        .await
        .map_err(|e| NotificationError::SendFailed(format!("email task failed: {}", e)))?
    }
}

/// Fans an alert out to every channel. Fails only if every channel failed.
pub struct CompositeNotifier {
    notifiers: Vec<Arc<dyn AlertNotifier>>,
}

impl CompositeNotifier {
    pub fn new(notifiers: Vec<Arc<dyn AlertNotifier>>) -> Self {
        Self { notifiers }
    }

    /// Log channel plus whatever `settings` enables.
    pub fn from_settings(settings: &AlertSettings) -> Self {
        let mut notifiers: Vec<Arc<dyn AlertNotifier>> = vec![Arc::new(LogNotifier)];
        if let Some(url) = &settings.webhook_url {
            match WebhookNotifier::new(url.clone()) {
                Ok(webhook) => notifiers.push(Arc::new(webhook)),
                Err(e) => warn!("Webhook alerts disabled: {}", e),
            }
        }
        if let Some(email) = &settings.email {
            notifiers.push(Arc::new(EmailNotifier::new(email.clone())));
        }
        Self::new(notifiers)
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }
}

#[async_trait]
impl AlertNotifier for CompositeNotifier {
    fn name(&self) -> &str {
        "composite"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), NotificationError> {
        let mut failures = Vec::new();
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(alert).await {
                warn!("Alert delivery via {} failed: {}", notifier.name(), e);
                failures.push(format!("{}: {}", notifier.name(), e));
            }
        }
        if !self.notifiers.is_empty() && failures.len() == self.notifiers.len() {
            return Err(NotificationError::SendFailed(failures.join("; ")));
        }
        Ok(())
    }
}
