//! One poll cycle: list pending jobs, then drive each through its
//! [`JobFlow`] by running the effects the flow asks for.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use agent_logging::{agent_debug, agent_error, agent_info, agent_warn};
use otalogin_core::{
    sort_oldest_first, update, ConnectorRegistry, CycleGate, JobCredentials, JobEffect, JobFlow,
    JobMsg, JobReport, PairingToken, PendingJob, ResultStatus,
};
use thiserror::Error;
use tokio::time::Instant;

use crate::dispatch::{DeliveryError, Dispatcher};
use crate::filler::FillerTimeouts;
use crate::wait::wait_until;
use crate::window::WindowManager;
use crate::{
    Browser, ClientError, CycleOutcome, CycleSummary, JobSource, PageSession, StateStore,
    StoreError, TabHandle, WindowHandle,
};

const STALLED: &str = "job stalled before reporting";

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub batch_size: usize,
    /// Pause between two jobs of the same cycle.
    pub inter_job_delay: Duration,
    pub page_load_timeout: Duration,
    /// Outer bound on waiting for `LOGIN_RESULT`. Off by default; the
    /// executor's own waits bound the attempt.
    pub result_timeout: Option<Duration>,
    pub close_tab_after_result: bool,
    pub filler: FillerTimeouts,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            inter_job_delay: Duration::from_secs(3),
            page_load_timeout: Duration::from_secs(30),
            result_timeout: None,
            close_tab_after_result: false,
            filler: FillerTimeouts::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("could not read agent state: {0}")]
    State(#[from] StoreError),
    #[error("could not list pending jobs: {0}")]
    Listing(ClientError),
    #[error("monitor window is not available")]
    WindowUnavailable,
}

/// How a single job ended from the cycle's point of view.
enum JobEnd {
    Reported {
        status: Option<ResultStatus>,
        acknowledged: bool,
    },
    /// The flow asked to stop the whole cycle.
    Abort { reason: String },
}

/// Resources a job holds while its effects run.
#[derive(Default)]
struct JobContext {
    login_url: String,
    tab: Option<TabHandle>,
    page: Option<Arc<dyn PageSession>>,
    acknowledged: bool,
    abort: Option<String>,
}

pub struct PollScheduler {
    source: Arc<dyn JobSource>,
    browser: Arc<dyn Browser>,
    store: StateStore,
    dispatcher: Dispatcher,
    settings: SchedulerSettings,
    gate: CycleGate,
}

impl PollScheduler {
    pub fn new(
        source: Arc<dyn JobSource>,
        browser: Arc<dyn Browser>,
        store: StateStore,
        registry: ConnectorRegistry,
        settings: SchedulerSettings,
    ) -> Self {
        let dispatcher = Dispatcher::new(registry, settings.filler);
        Self {
            source,
            browser,
            store,
            dispatcher,
            settings,
            gate: CycleGate::new(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    /// Runs one cycle unless one is already running. Never fails: errors
    /// end the cycle early and are reported in the outcome.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Some(permit) = self.gate.try_enter() else {
            agent_debug!("poll trigger ignored, cycle still running");
            return CycleOutcome::Busy;
        };
        agent_logging::set_cycle(permit.number());

        let mut summary = CycleSummary::default();
        let outcome = match self.poll(&mut summary).await {
            Ok(outcome) => outcome,
            Err(err) => {
                agent_error!("cycle aborted: {err}");
                CycleOutcome::Aborted {
                    reason: err.to_string(),
                    summary,
                }
            }
        };
        agent_info!("cycle finished: {outcome}");

        agent_logging::set_cycle(0);
        drop(permit);
        outcome
    }

    async fn poll(&self, summary: &mut CycleSummary) -> Result<CycleOutcome, CycleError> {
        let state = self.store.load()?;
        let Some(token) = state.device_token else {
            agent_debug!("not paired, nothing to poll");
            return Ok(CycleOutcome::NotPaired);
        };

        let mut jobs = match self
            .source
            .list_pending(&token, self.settings.batch_size)
            .await
        {
            Ok(jobs) => jobs,
            Err(err) if err.is_not_paired() => {
                agent_warn!("job source rejected the device token");
                return Ok(CycleOutcome::NotPaired);
            }
            Err(err) => return Err(CycleError::Listing(err)),
        };
        sort_oldest_first(&mut jobs);
        jobs.truncate(self.settings.batch_size);
        if jobs.is_empty() {
            return Ok(CycleOutcome::Idle);
        }
        agent_info!("{} pending job(s)", jobs.len());

        let window = WindowManager::new(Arc::clone(&self.browser), self.store.clone())
            .get_or_create_window()
            .await
            .ok_or(CycleError::WindowUnavailable)?;

        for (index, job) in jobs.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settings.inter_job_delay).await;
            }
            match self.run_job(&token, &window, job).await {
                JobEnd::Reported {
                    status,
                    acknowledged,
                } => {
                    match status {
                        Some(ResultStatus::Success) => summary.succeeded += 1,
                        Some(ResultStatus::Failed) => summary.failed += 1,
                        None => {}
                    }
                    if !acknowledged {
                        summary.lost_reports += 1;
                    }
                }
                JobEnd::Abort { reason } => {
                    return Ok(CycleOutcome::Aborted {
                        reason,
                        summary: *summary,
                    });
                }
            }
        }
        Ok(CycleOutcome::Completed(*summary))
    }

    async fn run_job(&self, token: &PairingToken, window: &WindowHandle, job: &PendingJob) -> JobEnd {
        agent_info!(
            "job {}: start ({})",
            job.id,
            job.channel_code.as_deref().unwrap_or("unknown channel")
        );
        let started = Instant::now();
        let mut ctx = JobContext::default();
        let mut flow =
            JobFlow::new(job).close_tab_after_result(self.settings.close_tab_after_result);
        let mut queue = VecDeque::new();

        let (next, effects) = update(flow, JobMsg::Start);
        flow = next;
        queue.extend(effects);

        loop {
            let Some(effect) = queue.pop_front() else {
                if flow.is_finished() {
                    break;
                }
                let (next, effects) = update(
                    flow,
                    JobMsg::Crashed {
                        message: STALLED.to_string(),
                    },
                );
                flow = next;
                if effects.is_empty() {
                    agent_error!("job {}: stuck in {:?}", job.id, flow.phase());
                    break;
                }
                queue.extend(effects);
                continue;
            };

            let Some(msg) = self
                .run_effect(effect, token, window, job, &mut ctx, started)
                .await
            else {
                continue;
            };
            let (next, effects) = update(flow, msg);
            flow = next;
            queue.extend(effects);
        }

        match ctx.abort {
            Some(reason) => JobEnd::Abort { reason },
            None => JobEnd::Reported {
                status: flow.reported_status(),
                acknowledged: ctx.acknowledged,
            },
        }
    }

    async fn run_effect(
        &self,
        effect: JobEffect,
        token: &PairingToken,
        window: &WindowHandle,
        job: &PendingJob,
        ctx: &mut JobContext,
        started: Instant,
    ) -> Option<JobMsg> {
        match effect {
            JobEffect::FetchCredentials { job_id } => {
                Some(self.fetch_credentials(token, &job_id, job).await)
            }
            JobEffect::OpenTab { url } => {
                let msg = match self.browser.open_tab(window, &url).await {
                    Ok(tab) => {
                        agent_debug!("job {}: opened tab {}", job.id, tab.target_id);
                        ctx.tab = Some(tab);
                        JobMsg::TabOpened
                    }
                    Err(err) => JobMsg::TabFailed {
                        browser_offline: err.is_unreachable(),
                        message: err.to_string(),
                    },
                };
                ctx.login_url = url;
                Some(msg)
            }
            JobEffect::WaitForLoad => {
                let timed_out = match ctx.tab.clone() {
                    Some(tab) => !self.wait_for_load(job, &tab, ctx).await,
                    None => true,
                };
                Some(JobMsg::PageReady { timed_out })
            }
            JobEffect::SendExecuteLogin(request) => {
                let delivered = match ctx.page.clone() {
                    Some(page) => {
                        self.dispatcher
                            .deliver(page, &ctx.login_url, request)
                            .await
                    }
                    None => Err(DeliveryError::NotAttached),
                };
                match delivered {
                    Ok(pending) => Some(pending.wait(self.settings.result_timeout).await),
                    Err(err) => {
                        agent_warn!("job {}: EXECUTE_LOGIN not delivered: {err}", job.id);
                        Some(JobMsg::DeliveryFailed {
                            message: err.to_string(),
                        })
                    }
                }
            }
            JobEffect::CloseTab => {
                ctx.page = None;
                if let Some(tab) = ctx.tab.take() {
                    if let Err(err) = self.browser.close_tab(&tab).await {
                        agent_debug!("job {}: closing tab failed: {err}", job.id);
                    }
                }
                None
            }
            JobEffect::Report(report) => {
                let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                ctx.acknowledged = self.report(token, report.with_duration_ms(elapsed)).await;
                Some(JobMsg::Reported)
            }
            JobEffect::AbortCycle { reason } => {
                agent_warn!("job {}: stopping cycle: {reason}", job.id);
                ctx.abort = Some(reason);
                None
            }
        }
    }

    async fn fetch_credentials(&self, token: &PairingToken, job_id: &str, job: &PendingJob) -> JobMsg {
        match self.source.fetch_credentials(token, job_id).await {
            Ok(credentials) => JobMsg::CredentialsFetched(with_listing_fallbacks(credentials, job)),
            Err(err) if err.is_not_paired() => JobMsg::NotPaired,
            Err(err) => {
                agent_warn!("job {job_id}: credentials unavailable: {err}");
                JobMsg::CredentialsUnavailable {
                    message: format!("Failed to fetch job credentials: {err}"),
                }
            }
        }
    }

    /// Attaches to the tab and waits for the page to finish loading.
    /// Returns false if the wait ran out or the page could not be reached.
    async fn wait_for_load(&self, job: &PendingJob, tab: &TabHandle, ctx: &mut JobContext) -> bool {
        let page = match self.browser.attach(tab).await {
            Ok(page) => page,
            Err(err) => {
                agent_warn!("job {}: cannot attach to tab: {err}", job.id);
                return false;
            }
        };
        ctx.page = Some(Arc::clone(&page));

        let mut changes = page.changes();
        let loaded = wait_until(&mut changes, self.settings.page_load_timeout, || {
            let page = Arc::clone(&page);
            async move {
                page.ready_state()
                    .await
                    .map(|state| (state == "complete").then_some(()))
            }
        })
        .await;
        match loaded {
            Ok(Some(())) => true,
            Ok(None) => {
                agent_info!("job {}: page load wait timed out, sending anyway", job.id);
                false
            }
            Err(err) => {
                agent_warn!("job {}: page load check failed: {err}", job.id);
                false
            }
        }
    }

    /// Sends a report once. Failures are logged and dropped.
    async fn report(&self, token: &PairingToken, report: JobReport) -> bool {
        match self.source.report(token, &report).await {
            Ok(ack) if ack.success => {
                agent_info!("job {}: reported {:?}", report.job_id, report.status);
                true
            }
            Ok(_) => {
                agent_warn!("job {}: job source did not accept the report", report.job_id);
                false
            }
            Err(err) => {
                agent_warn!("job {}: report lost: {err}", report.job_id);
                false
            }
        }
    }
}

/// Fills the login URL and channel code from the listing entry when the
/// credentials leave them blank.
fn with_listing_fallbacks(mut credentials: JobCredentials, job: &PendingJob) -> JobCredentials {
    if credentials.login_url.trim().is_empty() {
        if let Some(url) = &job.login_url {
            credentials.login_url = url.clone();
        }
    }
    if credentials.channel_code.trim().is_empty() {
        if let Some(code) = &job.channel_code {
            credentials.channel_code = code.clone();
        }
    }
    credentials
}
