mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{
    credentials, init_logging, paired_store, pending_job, scheduler, FakeBrowser, FakeJobSource,
    FakePage, RAKUTEN_LOGIN,
};
use otalogin_core::{ErrorCode, ResultStatus};
use otalogin_engine::{CycleOutcome, CycleSummary, SchedulerSettings, StateStore};
use pretty_assertions::assert_eq;

fn good(id: &str, created: i64) -> (otalogin_core::PendingJob, otalogin_core::JobCredentials) {
    (pending_job(id, created), credentials(id, "test_user", "test_password"))
}

fn bad(id: &str, created: i64) -> (otalogin_core::PendingJob, otalogin_core::JobCredentials) {
    (pending_job(id, created), credentials(id, "test_user", "wrong"))
}

struct Harness {
    _dir: tempfile::TempDir,
    source: Arc<FakeJobSource>,
    browser: Arc<FakeBrowser>,
    store: StateStore,
}

impl Harness {
    fn paired(source: FakeJobSource, browser: FakeBrowser) -> Self {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let store = paired_store(dir.path());
        Self {
            _dir: dir,
            source: Arc::new(source),
            browser: Arc::new(browser),
            store,
        }
    }

    async fn run(&self, settings: SchedulerSettings) -> CycleOutcome {
        scheduler(
            self.source.clone(),
            self.browser.clone(),
            self.store.clone(),
            settings,
        )
        .run_cycle()
        .await
    }
}

#[tokio::test(start_paused = true)]
async fn empty_listing_touches_nothing() {
    let h = Harness::paired(FakeJobSource::new(), FakeBrowser::new());

    let outcome = h.run(SchedulerSettings::default()).await;

    assert_eq!(outcome, CycleOutcome::Idle);
    assert_eq!(h.source.calls(), vec!["list 10"]);
    assert_eq!(h.browser.windows_created(), 0);
    assert!(h.browser.opened_urls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unpaired_agent_never_calls_the_job_source() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeJobSource::new());
    let browser = Arc::new(FakeBrowser::new());

    let outcome = scheduler(
        source.clone(),
        browser,
        StateStore::new(dir.path()),
        SchedulerSettings::default(),
    )
    .run_cycle()
    .await;

    assert_eq!(outcome, CycleOutcome::NotPaired);
    assert!(source.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_token_skips_the_cycle() {
    let (job, creds) = good("job-1", 0);
    let h = Harness::paired(
        FakeJobSource::new().with_job(job, creds).rejecting_token(),
        FakeBrowser::new(),
    );

    assert_eq!(h.run(SchedulerSettings::default()).await, CycleOutcome::NotPaired);
    assert_eq!(h.browser.windows_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn successful_login_is_reported_once() {
    let (job, creds) = good("job-1", 0);
    let h = Harness::paired(FakeJobSource::new().with_job(job, creds), FakeBrowser::new());

    let outcome = h.run(SchedulerSettings::default()).await;

    assert_eq!(
        outcome,
        CycleOutcome::Completed(CycleSummary {
            succeeded: 1,
            failed: 0,
            lost_reports: 0,
        })
    );
    assert_eq!(h.source.calls(), vec!["list 10", "fetch job-1", "report job-1"]);
    let reports = h.source.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, ResultStatus::Success);
    assert_eq!(reports[0].error_code, None);
    assert!(reports[0].duration_ms.is_some());
    assert_eq!(h.browser.opened_urls(), vec![RAKUTEN_LOGIN]);
    assert!(h.browser.closed_tabs().is_empty());
    h.browser
        .page(0)
        .snapshot(|dom| assert_eq!(dom.value("#username"), Some("test_user")));
}

#[tokio::test(start_paused = true)]
async fn jobs_run_oldest_first_with_a_pause_between() {
    let (a, a_creds) = good("job-a", 10);
    let (b, b_creds) = bad("job-b", 20);
    let (c, c_creds) = good("job-c", 30);
    let h = Harness::paired(
        FakeJobSource::new()
            .with_job(c, c_creds)
            .with_job(a, a_creds)
            .with_job(b, b_creds),
        FakeBrowser::new(),
    );
    let settings = SchedulerSettings {
        filler: otalogin_engine::FillerTimeouts {
            element: Duration::from_secs(1),
            success: Duration::from_secs(1),
        },
        ..SchedulerSettings::default()
    };
    let started = tokio::time::Instant::now();

    let outcome = h.run(settings).await;

    assert_eq!(
        outcome,
        CycleOutcome::Completed(CycleSummary {
            succeeded: 2,
            failed: 1,
            lost_reports: 0,
        })
    );
    let order: Vec<_> = h.source.reports().into_iter().map(|r| r.job_id).collect();
    assert_eq!(order, vec!["job-a", "job-b", "job-c"]);
    assert!(started.elapsed() >= Duration::from_secs(6));
    assert_eq!(h.browser.windows_created(), 1);
}

#[tokio::test(start_paused = true)]
async fn every_dispatched_job_gets_exactly_one_report() {
    let mut source = FakeJobSource::new();
    for i in 0..4 {
        let (job, creds) = if i % 2 == 0 {
            good(&format!("job-{i}"), i)
        } else {
            bad(&format!("job-{i}"), i)
        };
        source = source.with_job(job, creds);
    }
    let h = Harness::paired(source, FakeBrowser::new());

    h.run(SchedulerSettings::default()).await;

    let reports = h.source.reports();
    let ids: BTreeSet<_> = reports.iter().map(|r| r.job_id.clone()).collect();
    assert_eq!(reports.len(), 4);
    assert_eq!(ids.len(), 4);
    let failed: Vec<_> = reports
        .iter()
        .filter(|r| r.status == ResultStatus::Failed)
        .map(|r| (r.job_id.as_str(), r.error_code))
        .collect();
    assert_eq!(
        failed,
        vec![
            ("job-1", Some(ErrorCode::AuthFailed)),
            ("job-3", Some(ErrorCode::AuthFailed)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn batch_is_capped() {
    let mut source = FakeJobSource::new();
    for i in 0..3 {
        let (job, creds) = good(&format!("job-{i}"), i);
        source = source.with_job(job, creds);
    }
    let h = Harness::paired(source, FakeBrowser::new());

    h.run(SchedulerSettings {
        batch_size: 2,
        ..SchedulerSettings::default()
    })
    .await;

    assert_eq!(h.source.calls()[0], "list 2");
    assert_eq!(h.source.reports().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn page_on_another_origin_is_a_ui_change() {
    let (job, creds) = good("job-1", 0);
    let h = Harness::paired(
        FakeJobSource::new().with_job(job, creds),
        FakeBrowser::with_pages(|_| FakePage::login_form("https://sso.example.com/landing")),
    );

    h.run(SchedulerSettings::default()).await;

    let reports = h.source.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].error_code, Some(ErrorCode::UiChanged));
    assert_eq!(h.browser.closed_tabs(), vec![h.browser.tab_id(0)]);
    h.browser.page(0).snapshot(|dom| assert!(dom.values.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn unattachable_tab_is_a_ui_change() {
    let (job, creds) = good("job-1", 0);
    let browser = FakeBrowser::new();
    browser.set_attach_fails();
    let h = Harness::paired(FakeJobSource::new().with_job(job, creds), browser);

    h.run(SchedulerSettings::default()).await;

    let reports = h.source.reports();
    assert_eq!(reports[0].error_code, Some(ErrorCode::UiChanged));
    assert_eq!(h.browser.closed_tabs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_page_load_still_attempts_login() {
    let (job, creds) = good("job-1", 0);
    let h = Harness::paired(
        FakeJobSource::new().with_job(job, creds),
        FakeBrowser::with_pages(|url| {
            let page = FakePage::login_form(url);
            page.set_ready_state("interactive");
            page
        }),
    );
    let started = tokio::time::Instant::now();

    h.run(SchedulerSettings::default()).await;

    assert_eq!(h.source.reports()[0].status, ResultStatus::Success);
    assert!(started.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn missing_credentials_are_a_network_error() {
    let h = Harness::paired(
        FakeJobSource::new().with_job_without_credentials(pending_job("job-1", 0)),
        FakeBrowser::new(),
    );

    h.run(SchedulerSettings::default()).await;

    let reports = h.source.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].error_code, Some(ErrorCode::NetworkError));
    assert!(h.browser.opened_urls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn revoked_token_stops_the_cycle() {
    let (a, a_creds) = good("job-a", 0);
    let (b, b_creds) = good("job-b", 1);
    let h = Harness::paired(
        FakeJobSource::new()
            .with_job(a, a_creds)
            .with_job(b, b_creds)
            .rejecting_token_on_fetch(),
        FakeBrowser::new(),
    );

    let outcome = h.run(SchedulerSettings::default()).await;

    assert!(matches!(outcome, CycleOutcome::Aborted { .. }), "{outcome}");
    assert_eq!(h.source.calls(), vec!["list 10", "fetch job-a"]);
    assert!(h.source.reports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn browser_without_window_aborts_before_any_job() {
    let (job, creds) = good("job-1", 0);
    let h = Harness::paired(FakeJobSource::new().with_job(job, creds), FakeBrowser::offline());

    let outcome = h.run(SchedulerSettings::default()).await;

    assert!(matches!(outcome, CycleOutcome::Aborted { .. }), "{outcome}");
    assert_eq!(h.source.calls(), vec!["list 10"]);
}

#[tokio::test(start_paused = true)]
async fn lost_reports_do_not_stop_the_cycle() {
    let (a, a_creds) = good("job-a", 0);
    let (b, b_creds) = good("job-b", 1);
    let h = Harness::paired(
        FakeJobSource::new()
            .with_job(a, a_creds)
            .with_job(b, b_creds)
            .failing_reports(),
        FakeBrowser::new(),
    );

    let outcome = h.run(SchedulerSettings::default()).await;

    assert_eq!(
        outcome,
        CycleOutcome::Completed(CycleSummary {
            succeeded: 2,
            failed: 0,
            lost_reports: 2,
        })
    );
    assert_eq!(h.source.reports().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn overlapping_trigger_is_a_no_op() {
    let (job, creds) = good("job-1", 0);
    let h = Harness::paired(
        FakeJobSource::new()
            .with_job(job, creds)
            .with_list_delay(Duration::from_secs(5)),
        FakeBrowser::new(),
    );
    let scheduler = scheduler(
        h.source.clone(),
        h.browser.clone(),
        h.store.clone(),
        SchedulerSettings::default(),
    );

    let (first, second) = tokio::join!(scheduler.run_cycle(), scheduler.run_cycle());

    assert_eq!(second, CycleOutcome::Busy);
    assert!(matches!(first, CycleOutcome::Completed(_)), "{first}");
    assert_eq!(h.source.reports().len(), 1);
    assert!(!scheduler.is_busy());
}

#[tokio::test(start_paused = true)]
async fn tab_can_be_closed_after_the_result() {
    let (job, creds) = good("job-1", 0);
    let h = Harness::paired(FakeJobSource::new().with_job(job, creds), FakeBrowser::new());

    h.run(SchedulerSettings {
        close_tab_after_result: true,
        ..SchedulerSettings::default()
    })
    .await;

    assert_eq!(h.browser.closed_tabs(), vec![h.browser.tab_id(0)]);
}

#[tokio::test(start_paused = true)]
async fn result_timeout_reports_timeout() {
    let (job, creds) = bad("job-1", 0);
    let h = Harness::paired(FakeJobSource::new().with_job(job, creds), FakeBrowser::new());

    h.run(SchedulerSettings {
        result_timeout: Some(Duration::from_secs(5)),
        ..SchedulerSettings::default()
    })
    .await;

    let reports = h.source.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].error_code, Some(ErrorCode::Timeout));
}

#[tokio::test(start_paused = true)]
async fn sparse_credentials_borrow_url_and_channel_from_the_listing() {
    let (job, mut creds) = good("job-1", 0);
    creds.login_url.clear();
    creds.channel_code.clear();
    let h = Harness::paired(FakeJobSource::new().with_job(job, creds), FakeBrowser::new());

    h.run(SchedulerSettings::default()).await;

    assert_eq!(h.browser.opened_urls(), vec![RAKUTEN_LOGIN]);
    let reports = h.source.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, ResultStatus::Success);
}
