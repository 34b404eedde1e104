use crate::{JobId, JobReport, LoginRequest};

/// Side effects the scheduler performs on behalf of a [`crate::JobFlow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEffect {
    FetchCredentials { job_id: JobId },
    OpenTab { url: String },
    WaitForLoad,
    SendExecuteLogin(LoginRequest),
    CloseTab,
    Report(JobReport),
    /// Stop the whole cycle; nothing more can be done for any job.
    AbortCycle { reason: String },
}
