//! Messages exchanged between the orchestrator and the page-side executor.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ErrorCode, JobCredentials, JobId, JobReport, ResultStatus};

/// Wire shape: `{"type": "EXECUTE_LOGIN", ...}` / `{"type": "LOGIN_RESULT", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    ExecuteLogin(LoginRequest),
    LoginResult(LoginResult),
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub job_id: JobId,
    pub channel_code: String,
    pub login_id: String,
    pub password: String,
    #[serde(default)]
    pub extra_fields: BTreeMap<String, String>,
}

impl From<JobCredentials> for LoginRequest {
    fn from(credentials: JobCredentials) -> Self {
        Self {
            job_id: credentials.job_id,
            channel_code: credentials.channel_code,
            login_id: credentials.login_id,
            password: credentials.password,
            extra_fields: credentials.extra_fields,
        }
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("job_id", &self.job_id)
            .field("channel_code", &self.channel_code)
            .field("login_id", &self.login_id)
            .field("password", &"<redacted>")
            .field("extra_fields", &self.extra_fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResult {
    pub job_id: JobId,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl LoginResult {
    pub fn success(job_id: impl Into<JobId>) -> Self {
        Self {
            job_id: job_id.into(),
            status: ResultStatus::Success,
            error_message: None,
            error_code: None,
        }
    }

    pub fn failed(job_id: impl Into<JobId>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: ResultStatus::Failed,
            error_message: Some(message.into()),
            error_code: Some(code),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// Converts the page's verdict into a report. A failure without a code
    /// is classified as `UNKNOWN`.
    pub fn into_report(self) -> JobReport {
        match self.status {
            ResultStatus::Success => JobReport::success(self.job_id),
            ResultStatus::Failed => JobReport {
                job_id: self.job_id,
                status: ResultStatus::Failed,
                error_code: Some(self.error_code.unwrap_or(ErrorCode::Unknown)),
                error_message: self.error_message,
                duration_ms: None,
            },
        }
    }
}
