//! OTA login engine: job source client, browser driver, field filler and
//! the poll scheduler that ties them together.
mod browser;
mod client;
mod dispatch;
mod engine;
mod filler;
mod scheduler;
mod store;
mod types;
mod wait;
mod window;

pub use browser::{
    Browser, BrowserError, CdpBrowser, CdpClient, CdpEvent, CdpPage, PageSession, TabHandle,
    WindowHandle, DEFAULT_DEVTOOLS_ENDPOINT,
};
pub use client::{api_base_for_portal, ClientSettings, JobSource, ReqwestJobSource, DEFAULT_API_BASE};
pub use dispatch::{DeliveryError, Dispatcher, PendingResult};
pub use engine::AgentHandle;
pub use filler::{execute_login, FillFailure, FillerTimeouts};
pub use scheduler::{CycleError, PollScheduler, SchedulerSettings};
pub use store::{AgentState, StateStore, StoreError, STATE_FILENAME};
pub use types::{ClientError, CycleOutcome, CycleSummary, FailureKind};
pub use wait::wait_until;
pub use window::WindowManager;
