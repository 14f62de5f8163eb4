pub mod alerts;
pub mod backup_manager;
pub mod health_checker;
pub mod performance_monitor;
pub mod service;
pub mod system_metrics;

pub use alerts::{
    Alert, AlertNotifier, AlertSeverity, CompositeNotifier, EmailNotifier, LogNotifier,
    NotificationError, WebhookNotifier,
};
pub use backup_manager::{rotate_logs, BackupError, BackupManager, BackupVerification};
pub use health_checker::HealthChecker;
pub use performance_monitor::{Aggregate, PerformanceMonitor};
pub use service::{
    CycleReport, MaintenanceReport, MonitoringService, OverallStatus, ServiceState, StatusReport,
};
pub use system_metrics::{available_space, SystemMetrics, SystemMetricsCollector};
