use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

pub type JobId = u64;

/// Top of every minute.
pub const DEFAULT_SCHEDULE: &str = "0 * * * * *";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum JobStatus {
    #[default]
    Active,
    Paused,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Active => write!(f, "active"),
            JobStatus::Paused => write!(f, "paused"),
        }
    }
}

/// Where a job prefers to run, as configured by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionPreference {
    #[default]
    Auto,
    Local,
    Distributed,
}

/// Where one fire event actually runs, resolved per fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    Local,
    Distributed,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Local => write!(f, "local"),
            ExecutionMode::Distributed => write!(f, "distributed"),
        }
    }
}

/// Cron firing schedule, seconds first as Quartz writes it:
/// `sec min hour day-of-month month day-of-week [year]`.
///
/// Travels as the bare expression string; parsing happens on the way in, so
/// a job with an unparsable schedule never reaches the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Schedule {
    expression: String,
    cron: cron::Schedule,
}

impl Schedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        let cron = cron::Schedule::from_str(expression)
            .map_err(|e| FleetError::InvalidSchedule(format!("{expression:?}: {e}")))?;
        Ok(Self {
            expression: expression.to_string(),
            cron,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire strictly after `after`, or `None` once the schedule is exhausted.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron.after(after).next()
    }
}

impl Default for Schedule {
    fn default() -> Self {
        // SAFETY: DEFAULT_SCHEDULE is a constant covered by default_schedule_fires_each_minute
        Self::parse(DEFAULT_SCHEDULE).expect("default schedule is valid")
    }
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for Schedule {}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expression)
    }
}

impl TryFrom<String> for Schedule {
    type Error = FleetError;

    fn try_from(expression: String) -> Result<Self> {
        Self::parse(&expression)
    }
}

impl From<Schedule> for String {
    fn from(schedule: Schedule) -> Self {
        schedule.expression
    }
}

/// A recurring HTTP job as held by the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    #[serde(default)]
    pub schedule: Schedule,
    pub method: String,
    pub url: String,
    /// Header map encoded as a JSON object string, `"{}"` when empty.
    #[serde(default = "empty_headers")]
    pub headers: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub execution: ExecutionPreference,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn empty_headers() -> String {
    "{}".to_string()
}

impl Job {
    pub fn new(id: JobId, name: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            schedule: Schedule::default(),
            method: method.into(),
            url: url.into(),
            headers: empty_headers(),
            body: String::new(),
            status: JobStatus::Active,
            execution: ExecutionPreference::Auto,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_execution(mut self, execution: ExecutionPreference) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_headers(mut self, headers: &HashMap<String, String>) -> Self {
        self.headers = serde_json::to_string(headers).unwrap_or_else(|_| empty_headers());
        self
    }

    /// Active with a non-blank URL. Anything else is skipped, not failed.
    pub fn is_executable(&self) -> bool {
        self.status == JobStatus::Active && !self.url.trim().is_empty()
    }

    /// Decode the stored header JSON.
    ///
    /// Malformed JSON degrades to an empty map with a warning; one bad
    /// header definition must not abort the fire.
    pub fn header_map(&self) -> HashMap<String, String> {
        let raw = self.headers.trim();
        if raw.is_empty() || raw == "{}" {
            return HashMap::new();
        }

        match serde_json::from_str::<HashMap<String, String>>(raw) {
            Ok(headers) => headers,
            Err(e) => {
                tracing::warn!(job_id = self.id, error = %e, "Failed to parse job headers, sending none");
                HashMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_defaults() {
        let job = Job::new(7, "ping", "GET", "https://ok.example/");
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.execution, ExecutionPreference::Auto);
        assert_eq!(job.headers, "{}");
        assert!(job.body.is_empty());
        assert!(job.is_executable());
    }

    #[test]
    fn paused_or_blank_url_is_not_executable() {
        let paused = Job::new(1, "a", "GET", "https://ok.example/").with_status(JobStatus::Paused);
        assert!(!paused.is_executable());

        let blank = Job::new(2, "b", "GET", "   ");
        assert!(!blank.is_executable());
    }

    #[test]
    fn header_map_parses_json_object() {
        let mut headers = HashMap::new();
        headers.insert("X-Token".to_string(), "abc".to_string());
        let job = Job::new(1, "a", "GET", "https://ok.example/").with_headers(&headers);

        assert_eq!(job.header_map().get("X-Token").map(String::as_str), Some("abc"));
    }

    #[test]
    fn header_map_tolerates_malformed_json() {
        let mut job = Job::new(1, "a", "GET", "https://ok.example/");
        job.headers = "{not json".to_string();
        assert!(job.header_map().is_empty());
    }

    #[test]
    fn job_deserializes_with_defaults() {
        let job: Job = serde_json::from_str(
            r#"{"id": 3, "name": "n", "method": "POST", "url": "https://ok.example/hook"}"#,
        )
        .unwrap();
        assert_eq!(job.id, 3);
        assert_eq!(job.headers, "{}");
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.schedule.expression(), DEFAULT_SCHEDULE);
    }

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn weekday_schedule_skips_the_weekend() {
        let nightly = Schedule::parse("0 0 2 * * Mon-Fri").unwrap();

        // Friday 2024-03-01, after the 02:00 run.
        let next = nightly.next_after(&at("2024-03-01T03:00:00Z")).unwrap();
        assert_eq!(next, at("2024-03-04T02:00:00Z"));

        // Strictly after: a fire time does not repeat itself.
        let following = nightly.next_after(&next).unwrap();
        assert_eq!(following, at("2024-03-05T02:00:00Z"));
    }

    #[test]
    fn default_schedule_fires_each_minute() {
        let schedule = Schedule::default();
        assert_eq!(
            schedule.next_after(&at("2024-03-01T10:15:30Z")),
            Some(at("2024-03-01T10:16:00Z"))
        );
    }

    #[test]
    fn unparsable_schedule_is_rejected() {
        assert!(matches!(
            Schedule::parse("every tuesday"),
            Err(FleetError::InvalidSchedule(_))
        ));

        let err = serde_json::from_str::<Job>(
            r#"{"id": 1, "name": "n", "schedule": "not a cron line", "method": "GET", "url": "https://ok.example/"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn schedule_travels_as_its_expression() {
        let job = Job::new(1, "n", "GET", "https://ok.example/")
            .with_schedule(Schedule::parse("*/15 * * * * *").unwrap());
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["schedule"], "*/15 * * * * *");

        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back.schedule, job.schedule);
    }
}
