use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job identifiers are opaque strings (UUIDs on the job source side).
pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ManualLogin,
    HealthCheck,
}

/// Server-side lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// One entry of the pending-job listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingJob {
    pub id: JobId,
    pub job_type: JobType,
    pub facility_id: String,
    #[serde(default)]
    pub facility_code: Option<String>,
    #[serde(default)]
    pub facility_name: Option<String>,
    pub channel_id: String,
    #[serde(default)]
    pub channel_code: Option<String>,
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub login_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The pending-job listing. Entries that do not parse as a [`PendingJob`]
/// are dropped and counted in `skipped` instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawListing")]
pub struct JobListing {
    pub jobs: Vec<PendingJob>,
    pub count: usize,
    #[serde(skip)]
    pub skipped: usize,
}

#[derive(Deserialize)]
struct RawListing {
    #[serde(default)]
    jobs: Vec<ListingEntry>,
    #[serde(default)]
    count: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListingEntry {
    Job(PendingJob),
    Malformed(serde::de::IgnoredAny),
}

impl From<RawListing> for JobListing {
    fn from(raw: RawListing) -> Self {
        let total = raw.jobs.len();
        let jobs: Vec<PendingJob> = raw
            .jobs
            .into_iter()
            .filter_map(|entry| match entry {
                ListingEntry::Job(job) => Some(job),
                ListingEntry::Malformed(_) => None,
            })
            .collect();
        Self {
            skipped: total - jobs.len(),
            jobs,
            count: raw.count,
        }
    }
}

/// Orders a batch oldest-first. The sort is stable, so jobs created at the
/// same instant keep the order the job source returned them in.
pub fn sort_oldest_first(jobs: &mut [PendingJob]) {
    jobs.sort_by_key(|job| job.created_at);
}

/// Login material for one dispatch attempt. Never persisted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCredentials {
    pub job_id: JobId,
    /// Empty when the job source leaves it out; the listing entry fills it.
    #[serde(default)]
    pub channel_code: String,
    #[serde(default)]
    pub login_url: String,
    pub login_id: String,
    pub password: String,
    #[serde(default)]
    pub extra_fields: BTreeMap<String, String>,
}

impl fmt::Debug for JobCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobCredentials")
            .field("job_id", &self.job_id)
            .field("channel_code", &self.channel_code)
            .field("login_url", &self.login_url)
            .field("login_id", &self.login_id)
            .field("password", &"<redacted>")
            .field("extra_fields", &self.extra_fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failed,
}

impl ResultStatus {
    /// The server-side status a report with this outcome moves the job to.
    pub fn job_status(self) -> JobStatus {
        match self {
            ResultStatus::Success => JobStatus::Success,
            ResultStatus::Failed => JobStatus::Failed,
        }
    }
}

/// Failure classification sent as `error_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthFailed,
    UiChanged,
    Timeout,
    NetworkError,
    AgentOffline,
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::UiChanged => "UI_CHANGED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::AgentOffline => "AGENT_OFFLINE",
            ErrorCode::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// Body of `POST /report`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl JobReport {
    pub fn success(job_id: impl Into<JobId>) -> Self {
        Self {
            job_id: job_id.into(),
            status: ResultStatus::Success,
            error_code: None,
            error_message: None,
            duration_ms: None,
        }
    }

    pub fn failed(job_id: impl Into<JobId>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: ResultStatus::Failed,
            error_code: Some(code),
            error_message: Some(message.into()),
            duration_ms: None,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportAck {
    #[serde(default)]
    pub success: bool,
}
