use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use crossterm::style::Stylize;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;

use job_agent::cli_style::{
    get_styles, print_empty_list, print_error, print_key_value, print_list_item,
    print_section_footer, print_section_header, print_success, status_color, TableBuilder,
};
use job_agent::config::CommonArgs;
use job_agent::logging::init_logging;
use job_agent::tracker::{ApplicationSummary, ApplicationTracker, TrackingReceipt};
use job_agent::tracker_store::{
    ApplicationFilter, ApplicationStatus, DateRange, JobApplication, NewApplication,
    SqliteTrackerStore, StatusChange,
};

#[derive(Parser, Debug)]
#[command(name = "job-tracker", version, styles = get_styles())]
/// Tracks job applications from the terminal.
struct CliArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Print machine-readable JSON instead of formatted output.
    #[clap(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: TrackerCommand,
}

#[derive(Subcommand, Debug)]
enum TrackerCommand {
    /// Starts tracking an application.
    Track {
        job_url: String,
        company: String,
        position: String,

        /// Application date as YYYY-MM-DD, defaults to today.
        #[clap(long)]
        date: Option<String>,

        #[clap(long, default_value = "applied")]
        status: String,

        #[clap(long)]
        notes: Option<String>,
    },

    /// Moves an application to a new status.
    Update {
        id: i64,
        status: String,

        /// Stored with the status change in the history.
        #[clap(long)]
        note: Option<String>,
    },

    /// Lists applications, newest first.
    List {
        #[clap(long)]
        status: Option<String>,

        /// First application date to include (YYYY-MM-DD).
        #[clap(long)]
        from: Option<NaiveDate>,

        /// Last application date to include (YYYY-MM-DD).
        #[clap(long)]
        to: Option<NaiveDate>,
    },

    /// Shows pipeline counts, follow-ups and success metrics.
    Summary,

    /// Shows the status history of an application.
    History { id: i64 },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn applications_table(applications: &[JobApplication]) {
    let mut table = TableBuilder::new(&["ID", "Company", "Position", "Applied", "Status"]);
    for app in applications {
        table.add_row(vec![
            app.id.to_string(),
            app.company.clone(),
            app.position.clone(),
            app.application_date.to_string(),
            app.status.to_string(),
        ]);
    }
    if table.is_empty() {
        print_empty_list("No applications found");
    } else {
        table.print();
    }
}

fn print_receipt(receipt: &TrackingReceipt) {
    let app = &receipt.application;
    print_success(&format!(
        "Tracking application {} for {} at {}",
        app.id, app.position, app.company
    ));
    print_section_header("Timeline");
    print_key_value("Submitted", &receipt.timeline.submitted.to_string());
    print_key_value("Follow up", &receipt.follow_up_date.to_string());
    print_key_value(
        "Expected response",
        &receipt.timeline.expected_response.to_string(),
    );
    print_key_value("Reminder", &receipt.reminder_date.to_string());
    print_key_value("Move on", &receipt.timeline.move_on.to_string());
    print_section_footer();

    print_section_header("Next Actions");
    for action in &receipt.next_actions {
        print_list_item(action, 1);
    }
    print_section_footer();
}

fn print_summary(summary: &ApplicationSummary) {
    print_section_header("Pipeline");
    print_key_value("Total", &summary.total.to_string());
    for (status, count) in &summary.status_breakdown.counts {
        println!(
            "    {:<12} {}",
            status.as_str().with(status_color(*status)),
            count
        );
    }
    print_section_footer();

    let metrics = &summary.success_metrics;
    let rate = |r: Option<f64>| {
        r.map(|r| format!("{:.1}%", r * 100.0))
            .unwrap_or_else(|| "-".to_string())
    };
    print_section_header("Success Metrics");
    print_key_value("Submitted", &metrics.submitted.to_string());
    print_key_value("Responses", &metrics.responded.to_string());
    print_key_value("Interviews", &metrics.interviews.to_string());
    print_key_value("Response rate", &rate(metrics.response_rate));
    print_key_value("Interview rate", &rate(metrics.interview_rate));
    print_key_value(
        "Avg. days to response",
        &metrics
            .average_days_to_response
            .map(|d| format!("{:.1}", d))
            .unwrap_or_else(|| "-".to_string()),
    );
    print_section_footer();

    print_section_header("Follow Up");
    if summary.follow_up_needed.is_empty() {
        print_empty_list("Nothing to follow up on");
    }
    for overview in &summary.follow_up_needed {
        print_list_item(
            &format!(
                "#{} {} at {} ({} days)",
                overview.application.id,
                overview.application.position,
                overview.application.company,
                overview.days_since_application
            ),
            1,
        );
    }
    print_section_footer();

    print_section_header("By Company");
    for (company, count) in &summary.by_company {
        print_key_value(company, &count.to_string());
    }
    print_section_footer();

    print_section_header("Recommendations");
    for recommendation in &summary.recommendations {
        print_list_item(recommendation, 1);
    }
    print_section_footer();
}

fn print_history(id: i64, history: &[StatusChange]) {
    print_section_header(&format!("Application {}", id));
    for change in history {
        let from = change
            .from_status
            .map(|s| s.as_str())
            .unwrap_or("(new)");
        let line = format!(
            "{}  {} -> {}",
            change.changed_at.format("%Y-%m-%d %H:%M"),
            from,
            change.to_status
        );
        print_list_item(&line, 1);
        if let Some(note) = &change.note {
            print_list_item(note, 3);
        }
    }
    print_section_footer();
}

fn parse_status_filter(status: Option<String>) -> Result<Option<ApplicationStatus>> {
    status
        .map(|s| {
            ApplicationStatus::parse(&s).with_context(|| {
                let valid: Vec<&str> = ApplicationStatus::ALL.iter().map(|s| s.as_str()).collect();
                format!("Unknown status '{}', expected one of: {}", s, valid.join(", "))
            })
        })
        .transpose()
}

fn run(command: TrackerCommand, json: bool, tracker: &ApplicationTracker) -> Result<()> {
    match command {
        TrackerCommand::Track {
            job_url,
            company,
            position,
            date,
            status,
            notes,
        } => {
            let new_app = NewApplication {
                job_url,
                company,
                position,
                application_date: date
                    .unwrap_or_else(|| Local::now().date_naive().format("%Y-%m-%d").to_string()),
                status,
                notes,
            };
            let receipt = tracker.track_application(&new_app)?;
            if json {
                print_json(&receipt)?;
            } else {
                print_receipt(&receipt);
            }
        }
        TrackerCommand::Update { id, status, note } => {
            let app = tracker.update_status(id, &status, note)?;
            if json {
                print_json(&app)?;
            } else {
                print_success(&format!(
                    "Application {} at {} is now {}",
                    app.id, app.company, app.status
                ));
            }
        }
        TrackerCommand::List { status, from, to } => {
            let date_range = match (from, to) {
                (None, None) => None,
                (from, to) => {
                    let last_day = NaiveDate::from_ymd_opt(9999, 12, 31).context("Invalid date")?;
                    Some(DateRange {
                        from: from.unwrap_or_default(),
                        to: to.unwrap_or(last_day),
                    })
                }
            };
            let filter = ApplicationFilter {
                status: parse_status_filter(status)?,
                date_range,
            };
            let applications = tracker.list(&filter)?;
            if json {
                print_json(&applications)?;
            } else {
                applications_table(&applications);
            }
        }
        TrackerCommand::Summary => {
            let summary = tracker.application_summary(Local::now().date_naive())?;
            if json {
                print_json(&summary)?;
            } else {
                print_summary(&summary);
            }
        }
        TrackerCommand::History { id } => {
            let history = tracker.history(id)?;
            if json {
                print_json(&history)?;
            } else {
                print_history(id, &history);
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli_args = CliArgs::parse();
    let _log_guard = init_logging(None);

    let config = match cli_args.common.load() {
        Ok(config) => config,
        Err(e) => {
            print_error(&format!("Configuration error: {}", e));
            return ExitCode::from(2);
        }
    };

    let store = match SqliteTrackerStore::open(&config.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            print_error(&format!("Failed to open database {:?}: {}", config.db_path, e));
            return ExitCode::FAILURE;
        }
    };
    let tracker = ApplicationTracker::new(store);

    match run(cli_args.command, cli_args.json, &tracker) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}
