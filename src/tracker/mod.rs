//! Application-tracking operations exposed to assistant tools and the
//! `job-tracker` CLI. Every store call is timed through the performance
//! monitor.

use crate::monitoring::PerformanceMonitor;
use crate::tracker_store::{
    ApplicationFilter, ApplicationStatus, JobApplication, NewApplication, PipelineSummary,
    StatusChange, StoreResult, TrackerStore,
};
use chrono::{Days, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

const FOLLOW_UP_DAYS: u64 = 7;
const REMINDER_DAYS: u64 = 14;
const EXPECTED_RESPONSE_DAYS: u64 = 14;
const MOVE_ON_DAYS: u64 = 30;
const RECENT_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    pub submitted: NaiveDate,
    pub expected_response: NaiveDate,
    pub follow_up_if_no_response: NaiveDate,
    pub move_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingReceipt {
    pub application: JobApplication,
    pub follow_up_date: NaiveDate,
    pub reminder_date: NaiveDate,
    pub timeline: Timeline,
    pub next_actions: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationOverview {
    #[serde(flatten)]
    pub application: JobApplication,
    pub days_since_application: i64,
    pub needs_follow_up: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessMetrics {
    /// Applications that left `not_applied`.
    pub submitted: usize,
    pub responded: usize,
    /// Applications that reached `interview` or `offer`.
    pub interviews: usize,
    pub response_rate: Option<f64>,
    pub interview_rate: Option<f64>,
    pub average_days_to_response: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationSummary {
    pub total: usize,
    pub status_breakdown: PipelineSummary,
    pub recent: Vec<ApplicationOverview>,
    pub follow_up_needed: Vec<ApplicationOverview>,
    pub by_company: BTreeMap<String, usize>,
    pub success_metrics: SuccessMetrics,
    pub recommendations: Vec<String>,
}

pub fn next_actions(status: ApplicationStatus) -> Vec<&'static str> {
    match status {
        ApplicationStatus::NotApplied => vec![
            "Tailor your CV to the job description",
            "Draft a cover letter",
            "Submit the application before the posting closes",
        ],
        ApplicationStatus::Applied => vec![
            "Research hiring manager on LinkedIn",
            "Set calendar reminder for follow-up in 1 week",
            "Prepare for potential screening call",
            "Research company recent news and developments",
        ],
        ApplicationStatus::Screening => vec![
            "Prepare a two-minute summary of your experience",
            "Confirm salary expectations and availability",
            "Prepare questions about the team and role",
        ],
        ApplicationStatus::Interview => vec![
            "Research interviewer backgrounds on LinkedIn",
            "Prepare technical examples relevant to role",
            "Practice common interview questions",
            "Send thank-you email within 24 hours of each interview",
        ],
        ApplicationStatus::Offer => vec![
            "Review the full compensation package",
            "Compare against other opportunities in progress",
            "Respond before the offer deadline",
        ],
        ApplicationStatus::Rejected => vec![
            "Ask for feedback on the application",
            "Reflect on interview questions for future prep",
            "Continue applying to other opportunities",
        ],
        ApplicationStatus::Withdrawn => vec![
            "Update application status as situation develops",
            "Continue job search activities",
            "Network within the industry",
        ],
    }
}

fn plus_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX)
}

fn ratio(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| part as f64 / whole as f64)
}

pub struct ApplicationTracker {
    store: Arc<dyn TrackerStore>,
    performance: PerformanceMonitor,
}

impl ApplicationTracker {
    pub fn new(store: Arc<dyn TrackerStore>) -> Self {
        let performance = PerformanceMonitor::new(store.clone());
        Self { store, performance }
    }

    pub fn track_application(&self, app: &NewApplication) -> StoreResult<TrackingReceipt> {
        let id = self
            .performance
            .measure("store.create_application", || self.store.create_application(app))?;
        let application = self.store.get_application(id)?;
        info!(
            "Tracking application {} for {} at {}",
            id, application.position, application.company
        );

        let submitted = application.application_date;
        let follow_up_date = plus_days(submitted, FOLLOW_UP_DAYS);
        Ok(TrackingReceipt {
            follow_up_date,
            reminder_date: plus_days(submitted, REMINDER_DAYS),
            timeline: Timeline {
                submitted,
                expected_response: plus_days(submitted, EXPECTED_RESPONSE_DAYS),
                follow_up_if_no_response: follow_up_date,
                move_on: plus_days(submitted, MOVE_ON_DAYS),
            },
            next_actions: next_actions(application.status),
            application,
        })
    }

    pub fn update_status(
        &self,
        id: i64,
        status: &str,
        note: Option<String>,
    ) -> StoreResult<JobApplication> {
        self.performance.measure("store.update_status", || {
            self.store.update_status(id, status, note)
        })?;
        self.store.get_application(id)
    }

    pub fn list(&self, filter: &ApplicationFilter) -> StoreResult<Vec<JobApplication>> {
        self.performance
            .measure("store.list_applications", || self.store.list_applications(filter))
    }

    pub fn history(&self, id: i64) -> StoreResult<Vec<StatusChange>> {
        self.store.status_history(id)
    }

    /// Pipeline overview relative to `today`.
    pub fn application_summary(&self, today: NaiveDate) -> StoreResult<ApplicationSummary> {
        let applications = self.list(&ApplicationFilter::default())?;
        let status_breakdown = self
            .performance
            .measure("store.summarize_pipeline", || self.store.summarize_pipeline())?;

        let mut by_company = BTreeMap::new();
        let mut recent = Vec::new();
        let mut follow_up_needed = Vec::new();
        let mut response_days = Vec::new();

        for application in &applications {
            *by_company.entry(application.company.clone()).or_insert(0) += 1;

            let days_since = (today - application.application_date).num_days();
            if application.status.is_response() {
                response_days.push(self.days_to_response(application, days_since)?);
            }

            let overview = ApplicationOverview {
                application: application.clone(),
                days_since_application: days_since,
                needs_follow_up: days_since >= FOLLOW_UP_DAYS as i64
                    && application.status == ApplicationStatus::Applied,
            };
            if overview.needs_follow_up {
                follow_up_needed.push(overview.clone());
            }
            if (0..=RECENT_DAYS).contains(&days_since) {
                recent.push(overview);
            }
        }

        let submitted =
            applications.len() - status_breakdown.get(ApplicationStatus::NotApplied);
        let responded = response_days.len();
        let interviews = status_breakdown.get(ApplicationStatus::Interview)
            + status_breakdown.get(ApplicationStatus::Offer);
        let average_days_to_response = (!response_days.is_empty())
            .then(|| response_days.iter().sum::<i64>() as f64 / response_days.len() as f64);

        let mut recommendations = Vec::new();
        if !follow_up_needed.is_empty() {
            recommendations.push(format!(
                "Follow up on {} applications that haven't received responses",
                follow_up_needed.len()
            ));
        }
        if recent.is_empty() {
            recommendations.push("No applications in the last week: keep the pipeline moving".to_string());
        }
        if status_breakdown.get(ApplicationStatus::Offer) > 0 {
            recommendations.push("Review open offers before their deadlines".to_string());
        }
        recommendations.push("Keep detailed notes on all interactions for future reference".to_string());

        Ok(ApplicationSummary {
            total: applications.len(),
            status_breakdown,
            recent,
            follow_up_needed,
            by_company,
            success_metrics: SuccessMetrics {
                submitted,
                responded,
                interviews,
                response_rate: ratio(responded, submitted),
                interview_rate: ratio(interviews, submitted),
                average_days_to_response,
            },
            recommendations,
        })
    }

    /// Days between applying and the first status change that counts as a
    /// response. Falls back to the application's age when the history has none.
    fn days_to_response(&self, application: &JobApplication, days_since: i64) -> StoreResult<i64> {
        let history = self.store.status_history(application.id)?;
        let first_response = history
            .iter()
            .filter(|change| change.from_status.is_some())
            .find(|change| change.to_status.is_response());
        let days = match first_response {
            Some(change) => (change.changed_at.date_naive() - application.application_date).num_days(),
            None => days_since,
        };
        Ok(days.max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker_store::{SampleWindow, SqliteTrackerStore, StoreError};
    use tempfile::TempDir;

    fn tracker() -> (TempDir, Arc<SqliteTrackerStore>, ApplicationTracker) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteTrackerStore::open(dir.path().join("jobs.db")).unwrap());
        let tracker = ApplicationTracker::new(store.clone());
        (dir, store, tracker)
    }

    fn new_app(company: &str, date: &str, status: &str) -> NewApplication {
        NewApplication {
            job_url: format!("https://{}.test/job", company.to_lowercase()),
            company: company.to_string(),
            position: "Engineer".to_string(),
            application_date: date.to_string(),
            status: status.to_string(),
            notes: None,
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn receipt_schedules_follow_ups() {
        let (_dir, store, tracker) = tracker();
        let receipt = tracker
            .track_application(&new_app("Acme", "2024-01-15", "applied"))
            .unwrap();

        assert_eq!(receipt.follow_up_date, date("2024-01-22"));
        assert_eq!(receipt.reminder_date, date("2024-01-29"));
        assert_eq!(receipt.timeline.expected_response, date("2024-01-29"));
        assert_eq!(receipt.timeline.move_on, date("2024-02-14"));
        assert_eq!(receipt.next_actions.len(), 4);
        assert_eq!(receipt.application.company, "Acme");

        let timings = store
            .performance_samples("store.create_application", SampleWindow::LastN(5))
            .unwrap();
        assert_eq!(timings.len(), 1);
        assert!(timings[0].success);
    }

    #[test]
    fn invalid_input_is_rejected_and_timed_as_failure() {
        let (_dir, store, tracker) = tracker();
        let err = tracker
            .track_application(&new_app("Acme", "15/01/2024", "applied"))
            .unwrap_err();
        assert!(err.is_validation());
        let timings = store
            .performance_samples("store.create_application", SampleWindow::LastN(5))
            .unwrap();
        assert!(!timings[0].success);
    }

    #[test]
    fn update_returns_fresh_record() {
        let (_dir, _store, tracker) = tracker();
        let id = tracker
            .track_application(&new_app("Acme", "2024-01-15", "applied"))
            .unwrap()
            .application
            .id;
        let updated = tracker
            .update_status(id, "interview", Some("Phone screen went well".to_string()))
            .unwrap();
        assert_eq!(updated.status, ApplicationStatus::Interview);
        assert!(updated.notes.contains("Phone screen went well"));

        assert!(matches!(
            tracker.update_status(999, "offer", None),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn summary_metrics() {
        let (_dir, _store, tracker) = tracker();
        let today = date("2024-02-01");
        tracker
            .track_application(&new_app("Acme", "2024-01-10", "applied"))
            .unwrap();
        tracker
            .track_application(&new_app("Acme", "2024-01-29", "applied"))
            .unwrap();
        let globex = tracker
            .track_application(&new_app("Globex", "2024-01-20", "applied"))
            .unwrap();
        tracker
            .update_status(globex.application.id, "interview", None)
            .unwrap();
        tracker
            .track_application(&new_app("Initech", "2024-01-31", "not_applied"))
            .unwrap();

        let summary = tracker.application_summary(today).unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.by_company["Acme"], 2);
        assert_eq!(summary.status_breakdown.get(ApplicationStatus::Applied), 2);
        assert_eq!(summary.follow_up_needed.len(), 1);
        assert_eq!(summary.follow_up_needed[0].application.application_date, date("2024-01-10"));
        assert_eq!(summary.recent.len(), 2);

        let metrics = &summary.success_metrics;
        assert_eq!(metrics.submitted, 3);
        assert_eq!(metrics.responded, 1);
        assert_eq!(metrics.interviews, 1);
        assert_eq!(metrics.response_rate, Some(1.0 / 3.0));
        assert!(metrics.average_days_to_response.unwrap() >= 0.0);
        assert!(summary.recommendations[0].starts_with("Follow up on 1"));
    }

    #[test]
    fn empty_summary_has_no_rates() {
        let (_dir, _store, tracker) = tracker();
        let summary = tracker.application_summary(date("2024-02-01")).unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.success_metrics.response_rate, None);
        assert_eq!(summary.success_metrics.average_days_to_response, None);
    }
}
