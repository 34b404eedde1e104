//! In-memory stand-ins for the job source, the browser and a login page.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use otalogin_core::{
    ConnectorRegistry, JobCredentials, JobReport, JobType, PairRequest, PairResponse,
    PairingToken, PendingJob, ReportAck,
};
use otalogin_engine::{
    AgentState, Browser, BrowserError, ClientError, FailureKind, JobSource, PageSession,
    PollScheduler, SchedulerSettings, StateStore, TabHandle, WindowHandle,
};
use tokio::sync::watch;

pub const RAKUTEN_LOGIN: &str = "https://hotel.travel.rakuten.co.jp/extranet/login";
pub const TOKEN: &str = "device-token";

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(agent_logging::initialize_for_tests);
}

pub fn pending_job(id: &str, created_secs: i64) -> PendingJob {
    PendingJob {
        id: id.to_string(),
        job_type: JobType::HealthCheck,
        facility_id: "facility-1".to_string(),
        facility_code: None,
        facility_name: None,
        channel_id: "channel-rakuten".to_string(),
        channel_code: Some("rakuten".to_string()),
        channel_name: None,
        login_url: Some(RAKUTEN_LOGIN.to_string()),
        created_at: Utc.timestamp_opt(1_760_000_000 + created_secs, 0).unwrap(),
    }
}

pub fn credentials(job_id: &str, login_id: &str, password: &str) -> JobCredentials {
    JobCredentials {
        job_id: job_id.to_string(),
        channel_code: "rakuten".to_string(),
        login_url: RAKUTEN_LOGIN.to_string(),
        login_id: login_id.to_string(),
        password: password.to_string(),
        extra_fields: BTreeMap::new(),
    }
}

pub fn token() -> PairingToken {
    PairingToken::new(TOKEN).unwrap()
}

pub fn paired_store(dir: &Path) -> StateStore {
    let store = StateStore::new(dir);
    store
        .save(&AgentState {
            device_token: Some(token()),
            device_name: Some("front desk".to_string()),
            portal_url: Some("https://portal.example".to_string()),
            monitor_window: None,
            polling_enabled: true,
        })
        .unwrap();
    store
}

pub fn scheduler(
    source: Arc<FakeJobSource>,
    browser: Arc<FakeBrowser>,
    store: StateStore,
    settings: SchedulerSettings,
) -> PollScheduler {
    PollScheduler::new(
        source,
        browser,
        store,
        ConnectorRegistry::builtin(),
        settings,
    )
}

// ---------------------------------------------------------------------------
// Job source
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeJobSource {
    jobs: Vec<PendingJob>,
    credentials: HashMap<String, JobCredentials>,
    list_delay: Duration,
    reject_token: bool,
    reject_token_on_fetch: bool,
    fail_reports: bool,
    fail_listing: bool,
    calls: Mutex<Vec<String>>,
    reports: Mutex<Vec<JobReport>>,
}

impl FakeJobSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(mut self, job: PendingJob, credentials: JobCredentials) -> Self {
        self.credentials.insert(job.id.clone(), credentials);
        self.jobs.push(job);
        self
    }

    /// A job whose credentials cannot be fetched.
    pub fn with_job_without_credentials(mut self, job: PendingJob) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    pub fn rejecting_token(mut self) -> Self {
        self.reject_token = true;
        self
    }

    pub fn rejecting_token_on_fetch(mut self) -> Self {
        self.reject_token_on_fetch = true;
        self
    }

    pub fn failing_reports(mut self) -> Self {
        self.fail_reports = true;
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<JobReport> {
        self.reports.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_token(&self, token: &PairingToken) -> Result<(), ClientError> {
        if self.reject_token || token.expose() != TOKEN {
            return Err(ClientError::new(FailureKind::NotPaired, "401 Unauthorized"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobSource for FakeJobSource {
    async fn list_pending(
        &self,
        token: &PairingToken,
        limit: usize,
    ) -> Result<Vec<PendingJob>, ClientError> {
        self.record(format!("list {limit}"));
        self.check_token(token)?;
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        if self.fail_listing {
            return Err(ClientError::new(FailureKind::HttpStatus(500), "500"));
        }
        Ok(self.jobs.clone())
    }

    async fn fetch_credentials(
        &self,
        token: &PairingToken,
        job_id: &str,
    ) -> Result<JobCredentials, ClientError> {
        self.record(format!("fetch {job_id}"));
        self.check_token(token)?;
        if self.reject_token_on_fetch {
            return Err(ClientError::new(FailureKind::NotPaired, "403 Forbidden"));
        }
        self.credentials
            .get(job_id)
            .cloned()
            .ok_or_else(|| ClientError::new(FailureKind::HttpStatus(404), "Job not found"))
    }

    async fn report(
        &self,
        token: &PairingToken,
        report: &JobReport,
    ) -> Result<ReportAck, ClientError> {
        self.record(format!("report {}", report.job_id));
        self.check_token(token)?;
        self.reports.lock().unwrap().push(report.clone());
        if self.fail_reports {
            return Err(ClientError::new(FailureKind::Network, "connection reset"));
        }
        Ok(ReportAck { success: true })
    }

    async fn pair(&self, request: &PairRequest) -> Result<PairResponse, ClientError> {
        self.record("pair".to_string());
        Ok(PairResponse {
            success: request.pairing_code == "123456",
            device_token: Some(TOKEN.to_string()),
            error: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

type Reaction = Arc<dyn Fn(&mut FakeDom) + Send + Sync>;

#[derive(Default)]
pub struct FakeDom {
    pub url: String,
    pub ready_state: String,
    pub elements: BTreeSet<String>,
    pub values: BTreeMap<String, String>,
    /// `input <selector>` / `change <selector>` in dispatch order.
    pub events: Vec<String>,
    pub clicks: Vec<String>,
    /// Element lookups that fail as if the page were mid-navigation.
    pub navigating_lookups: usize,
    reactions: HashMap<String, Reaction>,
}

impl FakeDom {
    pub fn value(&self, selector: &str) -> Option<&str> {
        self.values.get(selector).map(String::as_str)
    }
}

/// A page whose DOM is a set of selectors that currently match.
pub struct FakePage {
    dom: Mutex<FakeDom>,
    changes: watch::Sender<u64>,
    broken: bool,
}

impl FakePage {
    pub fn blank(url: &str) -> Arc<Self> {
        Self::build(url, &[], false)
    }

    /// The login form used by the `rakuten` connector, with the behaviour of
    /// a real site: the dashboard only appears for `test_user`/`test_password`.
    pub fn login_form(url: &str) -> Arc<Self> {
        let page = Self::build(url, &["#username", "#password", "#login-button"], false);
        page.on_click("#login-button", |dom| {
            if dom.value("#username") == Some("test_user")
                && dom.value("#password") == Some("test_password")
            {
                dom.elements.insert(".dashboard-header".to_string());
            }
        });
        page
    }

    /// Every call fails as if the page's socket had dropped.
    pub fn broken(url: &str) -> Arc<Self> {
        Self::build(url, &["#username"], true)
    }

    fn build(url: &str, elements: &[&str], broken: bool) -> Arc<Self> {
        let (changes, _) = watch::channel(0);
        let dom = FakeDom {
            url: url.to_string(),
            ready_state: "complete".to_string(),
            elements: elements.iter().map(|s| s.to_string()).collect(),
            ..FakeDom::default()
        };
        Arc::new(Self {
            dom: Mutex::new(dom),
            changes,
            broken,
        })
    }

    pub fn on_click(&self, selector: &str, reaction: impl Fn(&mut FakeDom) + Send + Sync + 'static) {
        self.dom
            .lock()
            .unwrap()
            .reactions
            .insert(selector.to_string(), Arc::new(reaction));
    }

    pub fn set_ready_state(&self, state: &str) {
        self.dom.lock().unwrap().ready_state = state.to_string();
        self.bump();
    }

    pub fn insert(&self, selector: &str) {
        self.dom.lock().unwrap().elements.insert(selector.to_string());
        self.bump();
    }

    pub fn remove(&self, selector: &str) {
        self.dom.lock().unwrap().elements.remove(selector);
        self.bump();
    }

    /// Inserts `selector` after `delay`, as a script on the page would.
    pub fn insert_later(self: &Arc<Self>, selector: &str, delay: Duration) {
        let page = Arc::clone(self);
        let selector = selector.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            page.insert(&selector);
        });
    }

    pub fn snapshot<T>(&self, read: impl FnOnce(&FakeDom) -> T) -> T {
        read(&self.dom.lock().unwrap())
    }

    fn bump(&self) {
        self.changes.send_modify(|seq| *seq += 1);
    }

    fn check(&self) -> Result<(), BrowserError> {
        if self.broken {
            return Err(BrowserError::Protocol {
                detail: "connection closed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PageSession for FakePage {
    async fn current_url(&self) -> Result<String, BrowserError> {
        self.check()?;
        Ok(self.dom.lock().unwrap().url.clone())
    }

    async fn ready_state(&self) -> Result<String, BrowserError> {
        self.check()?;
        Ok(self.dom.lock().unwrap().ready_state.clone())
    }

    async fn has_element(&self, selector: &str) -> Result<bool, BrowserError> {
        self.check()?;
        let mut dom = self.dom.lock().unwrap();
        if dom.navigating_lookups > 0 {
            dom.navigating_lookups -= 1;
            return Err(BrowserError::Cdp {
                code: -32000,
                message: "Execution context was destroyed.".to_string(),
            });
        }
        Ok(dom.elements.contains(selector))
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<bool, BrowserError> {
        self.check()?;
        let mut dom = self.dom.lock().unwrap();
        if !dom.elements.contains(selector) {
            return Ok(false);
        }
        dom.values.insert(selector.to_string(), value.to_string());
        dom.events.push(format!("input {selector}"));
        dom.events.push(format!("change {selector}"));
        Ok(true)
    }

    async fn click(&self, selector: &str) -> Result<bool, BrowserError> {
        self.check()?;
        {
            let mut dom = self.dom.lock().unwrap();
            if !dom.elements.contains(selector) {
                return Ok(false);
            }
            dom.clicks.push(selector.to_string());
            if let Some(reaction) = dom.reactions.get(selector).cloned() {
                reaction(&mut dom);
            }
        }
        self.bump();
        Ok(true)
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Browser
// ---------------------------------------------------------------------------

type PageFactory = Box<dyn Fn(&str) -> Arc<FakePage> + Send + Sync>;

#[derive(Default)]
struct BrowserState {
    next_window: i64,
    open_windows: BTreeSet<i64>,
    windows_created: usize,
    tabs: Vec<(TabHandle, String, Arc<FakePage>)>,
    closed_tabs: Vec<String>,
    offline: bool,
    attach_fails: bool,
}

pub struct FakeBrowser {
    state: Mutex<BrowserState>,
    pages: PageFactory,
}

impl FakeBrowser {
    /// Every tab shows the login form at the URL it was opened with.
    pub fn new() -> Self {
        Self::with_pages(FakePage::login_form)
    }

    pub fn with_pages(pages: impl Fn(&str) -> Arc<FakePage> + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(BrowserState {
                next_window: 100,
                ..BrowserState::default()
            }),
            pages: Box::new(pages),
        }
    }

    pub fn offline() -> Self {
        let browser = Self::new();
        browser.state.lock().unwrap().offline = true;
        browser
    }

    pub fn set_attach_fails(&self) {
        self.state.lock().unwrap().attach_fails = true;
    }

    /// Simulates the user closing the window.
    pub fn close_window(&self, window_id: i64) {
        self.state.lock().unwrap().open_windows.remove(&window_id);
    }

    pub fn windows_created(&self) -> usize {
        self.state.lock().unwrap().windows_created
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .tabs
            .iter()
            .map(|(_, url, _)| url.clone())
            .collect()
    }

    pub fn page(&self, index: usize) -> Arc<FakePage> {
        Arc::clone(&self.state.lock().unwrap().tabs[index].2)
    }

    pub fn tab_id(&self, index: usize) -> String {
        self.state.lock().unwrap().tabs[index].0.target_id.clone()
    }

    pub fn closed_tabs(&self) -> Vec<String> {
        self.state.lock().unwrap().closed_tabs.clone()
    }

    fn unreachable() -> BrowserError {
        BrowserError::ConnectionFailed {
            url: "http://127.0.0.1:9222".to_string(),
            reason: "connection refused".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Browser for FakeBrowser {
    async fn window_exists(&self, window: &WindowHandle) -> Result<bool, BrowserError> {
        let state = self.state.lock().unwrap();
        if state.offline {
            return Err(Self::unreachable());
        }
        Ok(state.open_windows.contains(&window.window_id))
    }

    async fn create_window(&self) -> Result<WindowHandle, BrowserError> {
        let mut state = self.state.lock().unwrap();
        if state.offline {
            return Err(Self::unreachable());
        }
        state.next_window += 1;
        state.windows_created += 1;
        let window_id = state.next_window;
        state.open_windows.insert(window_id);
        Ok(WindowHandle {
            window_id,
            browser_context_id: format!("ctx-{window_id}"),
        })
    }

    async fn open_tab(&self, window: &WindowHandle, url: &str) -> Result<TabHandle, BrowserError> {
        let page = (self.pages)(url);
        let mut state = self.state.lock().unwrap();
        if state.offline {
            return Err(Self::unreachable());
        }
        if !state.open_windows.contains(&window.window_id) {
            return Err(BrowserError::Cdp {
                code: -32000,
                message: "No browser context with given id found".to_string(),
            });
        }
        let tab = TabHandle {
            target_id: format!("tab-{}", state.tabs.len() + 1),
        };
        state.tabs.push((tab.clone(), url.to_string(), page));
        Ok(tab)
    }

    async fn attach(&self, tab: &TabHandle) -> Result<Arc<dyn PageSession>, BrowserError> {
        let state = self.state.lock().unwrap();
        if state.attach_fails {
            return Err(Self::unreachable());
        }
        let page = state
            .tabs
            .iter()
            .find(|(handle, _, _)| handle == tab)
            .map(|(_, _, page)| Arc::clone(page))
            .ok_or_else(|| BrowserError::Protocol {
                detail: format!("no target {}", tab.target_id),
            })?;
        Ok(page as Arc<dyn PageSession>)
    }

    async fn close_tab(&self, tab: &TabHandle) -> Result<(), BrowserError> {
        self.state
            .lock()
            .unwrap()
            .closed_tabs
            .push(tab.target_id.clone());
        Ok(())
    }
}
