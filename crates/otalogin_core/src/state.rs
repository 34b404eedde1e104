use crate::{JobEffect, JobId, JobReport, JobStatus, LoginRequest, PendingJob, ResultStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Queued,
    FetchingCredentials,
    OpeningTab,
    LoadingPage,
    AwaitingResult,
    Reporting,
    Done,
    /// Dropped without a report because the cycle was aborted.
    Abandoned,
}

/// Progress of one job through a poll cycle.
///
/// Invariant: at most one `JobEffect::Report` is ever emitted per flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFlow {
    job_id: JobId,
    channel_code: Option<String>,
    phase: Phase,
    credentials_fetched: bool,
    tab_open: bool,
    close_tab_after_result: bool,
    request: Option<LoginRequest>,
    reported: Option<ResultStatus>,
}

impl JobFlow {
    pub fn new(job: &PendingJob) -> Self {
        Self {
            job_id: job.id.clone(),
            channel_code: job.channel_code.clone(),
            phase: Phase::Queued,
            credentials_fetched: false,
            tab_open: false,
            close_tab_after_result: false,
            request: None,
            reported: None,
        }
    }

    pub fn close_tab_after_result(mut self, close: bool) -> Self {
        self.close_tab_after_result = close;
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn channel_code(&self) -> Option<&str> {
        self.channel_code.as_deref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Done | Phase::Abandoned)
    }

    pub fn has_reported(&self) -> bool {
        self.reported.is_some()
    }

    pub fn reported_status(&self) -> Option<ResultStatus> {
        self.reported
    }

    pub fn tab_open(&self) -> bool {
        self.tab_open
    }

    /// What the job source believes the job's status is, given the effects
    /// emitted so far.
    pub fn remote_status(&self) -> JobStatus {
        match self.reported {
            Some(status) => status.job_status(),
            None if self.credentials_fetched => JobStatus::InProgress,
            None => JobStatus::Pending,
        }
    }

    pub(crate) fn begin(&mut self) -> Vec<JobEffect> {
        self.phase = Phase::FetchingCredentials;
        vec![JobEffect::FetchCredentials {
            job_id: self.job_id.clone(),
        }]
    }

    pub(crate) fn accept_credentials(&mut self, request: LoginRequest, url: String) -> Vec<JobEffect> {
        self.credentials_fetched = true;
        self.request = Some(request);
        self.phase = Phase::OpeningTab;
        vec![JobEffect::OpenTab { url }]
    }

    pub(crate) fn mark_tab_open(&mut self) -> Vec<JobEffect> {
        self.tab_open = true;
        self.phase = Phase::LoadingPage;
        vec![JobEffect::WaitForLoad]
    }

    pub(crate) fn take_request(&mut self) -> Option<LoginRequest> {
        self.phase = Phase::AwaitingResult;
        self.request.take()
    }

    pub(crate) fn close_tab(&mut self) -> Option<JobEffect> {
        if self.tab_open {
            self.tab_open = false;
            Some(JobEffect::CloseTab)
        } else {
            None
        }
    }

    pub(crate) fn wants_tab_closed_after_result(&self) -> bool {
        self.close_tab_after_result
    }

    /// Emits the single terminal report and drops any held credentials.
    pub(crate) fn finish(&mut self, mut report: JobReport) -> Vec<JobEffect> {
        report.job_id = self.job_id.clone();
        self.request = None;
        self.reported = Some(report.status);
        self.phase = Phase::Reporting;
        vec![JobEffect::Report(report)]
    }

    pub(crate) fn abandon(&mut self, reason: impl Into<String>) -> Vec<JobEffect> {
        self.request = None;
        self.phase = Phase::Abandoned;
        vec![JobEffect::AbortCycle {
            reason: reason.into(),
        }]
    }

    pub(crate) fn complete(&mut self) {
        self.phase = Phase::Done;
    }
}
