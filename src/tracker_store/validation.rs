//! Input validation for tracker store writes.
//!
//! Every write is validated before the writer lock is taken, so a rejected
//! input never touches the database.

use super::models::{ApplicationStatus, DateRange, NewApplication};
use chrono::NaiveDate;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyField { field: &'static str },
    InvalidDate { field: &'static str, value: String },
    InvalidStatus { value: String },
    InvalidDateRange { from: NaiveDate, to: NaiveDate },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField { field } => {
                write!(f, "Field '{}' is required but was empty", field)
            }
            ValidationError::InvalidDate { field, value } => {
                write!(f, "Field '{}' must be a YYYY-MM-DD date, got '{}'", field, value)
            }
            ValidationError::InvalidStatus { value } => {
                let allowed: Vec<&str> = ApplicationStatus::ALL.iter().map(|s| s.as_str()).collect();
                write!(
                    f,
                    "Unknown status '{}' (expected one of: {})",
                    value,
                    allowed.join(", ")
                )
            }
            ValidationError::InvalidDateRange { from, to } => {
                write!(f, "Date range start {} is after its end {}", from, to)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// A `NewApplication` whose fields have been trimmed and parsed.
#[derive(Debug, Clone)]
pub struct ValidatedApplication {
    pub job_url: String,
    pub company: String,
    pub position: String,
    pub application_date: NaiveDate,
    pub status: ApplicationStatus,
    pub notes: String,
}

fn require(field: &'static str, value: &str) -> ValidationResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    Ok(trimmed.to_string())
}

pub fn parse_status(value: &str) -> ValidationResult<ApplicationStatus> {
    ApplicationStatus::parse(value.trim()).ok_or_else(|| ValidationError::InvalidStatus {
        value: value.to_string(),
    })
}

pub fn parse_date(field: &'static str, value: &str) -> ValidationResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        ValidationError::InvalidDate {
            field,
            value: value.to_string(),
        }
    })
}

pub fn validate_new_application(app: &NewApplication) -> ValidationResult<ValidatedApplication> {
    Ok(ValidatedApplication {
        job_url: require("job_url", &app.job_url)?,
        company: require("company", &app.company)?,
        position: require("position", &app.position)?,
        application_date: parse_date("application_date", &app.application_date)?,
        status: parse_status(&app.status)?,
        notes: app
            .notes
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
    })
}

pub fn validate_date_range(range: &DateRange) -> ValidationResult<()> {
    if range.from > range.to {
        return Err(ValidationError::InvalidDateRange {
            from: range.from,
            to: range.to,
        });
    }
    Ok(())
}
