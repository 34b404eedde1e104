use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// No token, or the job source rejected it (401/403).
    NotPaired,
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Network,
    InvalidResponse,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::NotPaired => write!(f, "agent not paired"),
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::InvalidResponse => write!(f, "invalid response"),
        }
    }
}

/// Error returned by every job source call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ClientError {
    pub kind: FailureKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_not_paired(&self) -> bool {
        self.kind == FailureKind::NotPaired
    }
}

/// Per-cycle tally of what was reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Reports the job source never acknowledged. Those jobs stay
    /// in_progress remotely.
    pub lost_reports: usize,
}

impl CycleSummary {
    pub fn dispatched(&self) -> usize {
        self.succeeded + self.failed
    }
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed",
            self.succeeded, self.failed
        )?;
        if self.lost_reports > 0 {
            write!(f, ", {} report(s) lost", self.lost_reports)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was already running; this trigger did nothing.
    Busy,
    NotPaired,
    /// No pending jobs.
    Idle,
    Completed(CycleSummary),
    /// The cycle ended early. Jobs after the failure point were left pending.
    Aborted {
        reason: String,
        summary: CycleSummary,
    },
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Busy => write!(f, "skipped, a cycle is already running"),
            CycleOutcome::NotPaired => write!(f, "skipped, agent not paired"),
            CycleOutcome::Idle => write!(f, "no pending jobs"),
            CycleOutcome::Completed(summary) => write!(f, "completed: {summary}"),
            CycleOutcome::Aborted { reason, summary } => {
                write!(f, "aborted ({reason}) after {summary}")
            }
        }
    }
}
