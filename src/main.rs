use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use job_agent::cli_style::{
    check_badge, get_styles, human_bytes, overall_badge, print_empty_list, print_error,
    print_info, print_key_value, print_list_item, print_section_footer, print_section_header,
    print_success, print_warning, TableBuilder,
};
use job_agent::config::{AppConfig, CommonArgs};
use job_agent::logging::init_logging;
use job_agent::monitoring::{
    BackupManager, CompositeNotifier, LogNotifier, MaintenanceReport, MonitoringService,
    StatusReport,
};
use job_agent::tracker_store::{BackupRecord, SqliteTrackerStore, TrackerStore};

#[derive(Parser, Debug)]
#[command(name = "job-monitor", version, styles = get_styles())]
/// Health checks, backups and maintenance for the job agent database.
struct CliArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Print machine-readable JSON instead of formatted output.
    #[clap(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Runs a health check and prints a one-shot status report.
    Status,

    /// Runs the monitoring loop until interrupted with Ctrl-C.
    Monitor,

    /// Takes a single backup of the database.
    Backup,

    /// Runs one maintenance pass: backup, pruning and log rotation.
    Maintenance,
}

fn format_ms(duration: Duration) -> String {
    format!("{:.1} ms", duration.as_secs_f64() * 1000.0)
}

fn format_rate(rate: Option<f64>) -> String {
    rate.map(|r| format!("{:.1}%", r * 100.0))
        .unwrap_or_else(|| "-".to_string())
}

fn print_status(report: &StatusReport) {
    print_section_header("System Status");
    print_key_value("Overall", &overall_badge(report.overall).to_string());
    print_key_value(
        "Checked at",
        &report.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    if report.issues.is_empty() {
        print_success("No issues detected");
    }
    for issue in &report.issues {
        print_warning(issue);
    }
    print_section_footer();

    print_section_header("Components");
    for sample in &report.components {
        let detail = sample
            .error
            .as_deref()
            .or(sample.detail.as_deref())
            .unwrap_or("");
        println!(
            "  {} {:<16} {:>10}  {}",
            check_badge(sample.passed),
            sample.component,
            format_ms(sample.latency),
            detail
        );
    }
    print_section_footer();

    print_section_header("System");
    match &report.system {
        Some(system) => {
            print_key_value("CPU", &format!("{:.1}%", system.cpu_percent));
            print_key_value(
                "Memory",
                &format!(
                    "{:.1}% used, {:.1} GB available",
                    system.memory_percent, system.memory_available_gb
                ),
            );
            match (system.disk_percent, system.disk_free_gb) {
                (Some(percent), Some(free)) => print_key_value(
                    "Disk",
                    &format!("{:.1}% used, {:.1} GB free", percent, free),
                ),
                _ => print_warning("Disk usage unavailable"),
            }
        }
        None => print_warning("System metrics unavailable"),
    }
    print_section_footer();

    print_section_header("Performance");
    let mut table = TableBuilder::new(&["Operation", "Count", "Success", "p50", "p95", "p99"]);
    for aggregate in &report.performance {
        table.add_row(vec![
            aggregate.operation.clone(),
            aggregate.count.to_string(),
            format_rate(aggregate.success_rate),
            format_ms(aggregate.p50),
            format_ms(aggregate.p95),
            format_ms(aggregate.p99),
        ]);
    }
    if table.is_empty() {
        print_empty_list("No samples in the aggregation window");
    } else {
        table.print();
    }
    print_section_footer();

    print_section_header("Pipeline");
    match &report.pipeline {
        Some(pipeline) if pipeline.total() > 0 => {
            for (status, count) in &pipeline.counts {
                print_key_value(status.as_str(), &count.to_string());
            }
        }
        Some(_) => print_empty_list("No tracked applications"),
        None => print_warning("Pipeline summary unavailable"),
    }
    print_section_footer();

    print_section_header("Storage");
    print_key_value("Database", &human_bytes(report.storage.database_bytes));
    print_key_value(
        "Backups",
        &format!(
            "{} in {} files",
            human_bytes(report.storage.backup_bytes),
            report.storage.backup_files
        ),
    );
    print_key_value("Logs", &human_bytes(report.storage.log_bytes));
    match &report.last_backup {
        Some(last) => {
            print_key_value(
                "Last backup",
                &format!(
                    "{} ({})",
                    last.record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                    last.verification
                ),
            );
        }
        None => print_warning("No backups yet"),
    }
    print_section_footer();
}

fn print_backup(record: &BackupRecord) {
    print_success("Backup created");
    print_key_value("Path", &record.path.display().to_string());
    print_key_value("Size", &human_bytes(record.size_bytes));
    print_key_value("Checksum", &record.checksum);
}

fn print_maintenance(report: &MaintenanceReport) {
    print_section_header("Maintenance");
    match &report.backup {
        Some(record) => print_key_value("Backup", &record.path.display().to_string()),
        None => print_warning("No backup taken"),
    }
    print_key_value("Backups pruned", &report.backups_pruned.to_string());
    print_key_value(
        "Health samples pruned",
        &report.health_samples_pruned.to_string(),
    );
    print_key_value(
        "Performance samples pruned",
        &report.performance_samples_pruned.to_string(),
    );
    print_key_value(
        "System samples pruned",
        &report.system_samples_pruned.to_string(),
    );
    print_key_value(
        "Error events pruned",
        &report.error_events_pruned.to_string(),
    );
    print_key_value("Logs compressed", &report.logs_rotated.to_string());
    for failure in &report.failures {
        print_list_item(failure, 1);
    }
    print_section_footer();
}

async fn run(command: Command, json: bool, config: AppConfig) -> Result<ExitCode> {
    info!("Opening tracker database at {:?}...", config.db_path);
    let store: Arc<dyn TrackerStore> = Arc::new(
        SqliteTrackerStore::open(&config.db_path)
            .with_context(|| format!("Failed to open database {:?}", config.db_path))?,
    );

    match command {
        Command::Status => {
            let service = MonitoringService::new(&config, store, Arc::new(LogNotifier))?;
            let report = service.status_snapshot().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_status(&report);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Monitor => {
            let notifier = CompositeNotifier::from_settings(&config.alerts);
            info!("Alert channels: {}", notifier.channel_names().join(", "));
            let mut service = MonitoringService::new(&config, store, Arc::new(notifier))?;

            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl-C: {}", e);
                    return;
                }
                info!("Shutdown requested, finishing current cycle...");
                signal_token.cancel();
            });

            if !json {
                print_info("Monitoring started, press Ctrl-C to stop");
            }
            service.run(shutdown).await;
            Ok(ExitCode::SUCCESS)
        }
        Command::Backup => {
            let manager = BackupManager::new(store, config.backup_dir.clone());
            let record = tokio::task::spawn_blocking(move || manager.backup())
                .await
                .context("Backup task panicked")?
                .context("Backup failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_backup(&record);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Maintenance => {
            let notifier = CompositeNotifier::from_settings(&config.alerts);
            let mut service = MonitoringService::new(&config, store, Arc::new(notifier))?;
            let report = service.run_maintenance().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_maintenance(&report);
            }
            if report.is_success() {
                if !json {
                    print_success("Maintenance completed");
                }
                Ok(ExitCode::SUCCESS)
            } else {
                print_error(&format!(
                    "Maintenance finished with {} failed steps",
                    report.failures.len()
                ));
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli_args = CliArgs::parse();

    let config = match cli_args.common.load() {
        Ok(config) => config,
        Err(e) => {
            print_error(&format!("Configuration error: {}", e));
            return ExitCode::from(2);
        }
    };

    // Only the long-running loop writes a log file
    let log_dir = (cli_args.command == Command::Monitor).then_some(config.log_dir.as_path());
    let _log_guard = init_logging(log_dir);

    match run(cli_args.command, cli_args.json, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}
