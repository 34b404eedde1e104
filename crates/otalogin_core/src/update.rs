use crate::{ErrorCode, JobEffect, JobFlow, JobMsg, JobReport, Phase};

const DELIVERY_FAILED: &str = "Could not deliver login request to the page";
const RESULT_TIMED_OUT: &str = "No login result received in time";
const NO_LOGIN_URL: &str = "No login URL for this job";

/// Pure update function: applies a message to a job flow and returns the
/// effects the scheduler must run next.
///
/// Once a flow has emitted its report, every message except `Reported` is a
/// no-op, which keeps delivery of the terminal report at exactly once.
pub fn update(mut flow: JobFlow, msg: JobMsg) -> (JobFlow, Vec<JobEffect>) {
    if flow.is_finished() {
        return (flow, Vec::new());
    }
    if flow.phase() == Phase::Reporting {
        if msg == JobMsg::Reported {
            flow.complete();
        }
        return (flow, Vec::new());
    }

    let effects = match (flow.phase(), msg) {
        (Phase::Queued, JobMsg::Start) => flow.begin(),
        (Phase::FetchingCredentials, JobMsg::CredentialsFetched(credentials)) => {
            if credentials.login_url.trim().is_empty() {
                flow.finish(JobReport::failed(
                    flow.job_id(),
                    ErrorCode::Unknown,
                    NO_LOGIN_URL,
                ))
            } else {
                let url = credentials.login_url.clone();
                flow.accept_credentials(credentials.into(), url)
            }
        }
        (Phase::FetchingCredentials, JobMsg::CredentialsUnavailable { message }) => flow.finish(
            JobReport::failed(flow.job_id(), ErrorCode::NetworkError, message),
        ),
        (Phase::FetchingCredentials, JobMsg::NotPaired) => flow.abandon("agent not paired"),
        (Phase::OpeningTab, JobMsg::TabOpened) => flow.mark_tab_open(),
        (
            Phase::OpeningTab,
            JobMsg::TabFailed {
                browser_offline,
                message,
            },
        ) => {
            let code = if browser_offline {
                ErrorCode::AgentOffline
            } else {
                ErrorCode::Unknown
            };
            flow.finish(JobReport::failed(flow.job_id(), code, message))
        }
        (Phase::LoadingPage, JobMsg::PageReady { .. }) => match flow.take_request() {
            Some(request) => vec![JobEffect::SendExecuteLogin(request)],
            None => flow.finish(JobReport::failed(
                flow.job_id(),
                ErrorCode::Unknown,
                "credentials missing at dispatch",
            )),
        },
        (Phase::AwaitingResult, JobMsg::DeliveryFailed { message }) => {
            let detail = if message.is_empty() {
                DELIVERY_FAILED.to_string()
            } else {
                format!("{DELIVERY_FAILED}: {message}")
            };
            let mut effects = flow.finish(JobReport::failed(
                flow.job_id(),
                ErrorCode::UiChanged,
                detail,
            ));
            effects.extend(flow.close_tab());
            effects
        }
        (Phase::AwaitingResult, JobMsg::ResultReceived(result)) => {
            let mut effects = flow.finish(result.into_report());
            if flow.wants_tab_closed_after_result() {
                effects.extend(flow.close_tab());
            }
            effects
        }
        (Phase::AwaitingResult, JobMsg::ResultTimedOut) => flow.finish(JobReport::failed(
            flow.job_id(),
            ErrorCode::Timeout,
            RESULT_TIMED_OUT,
        )),
        (_, JobMsg::Crashed { message }) => {
            flow.finish(JobReport::failed(flow.job_id(), ErrorCode::Unknown, message))
        }
        // Out-of-order messages are ignored; the scheduler turns a stalled
        // flow into `Crashed`.
        _ => Vec::new(),
    };

    (flow, effects)
}
