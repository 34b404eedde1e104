//! Browser seam: the window/tab operations the scheduler needs and the
//! page-level operations the field filler needs.
//!
//! Production code drives Chrome over the DevTools protocol
//! ([`CdpBrowser`]); tests substitute in-memory fakes.

mod cdp;
mod chrome;
mod error;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub use cdp::{CdpClient, CdpEvent};
pub use chrome::{CdpBrowser, CdpPage, DEFAULT_DEVTOOLS_ENDPOINT};
pub use error::BrowserError;

/// The dedicated automation window. Persisted across agent restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowHandle {
    pub window_id: i64,
    /// Browser context the window's tabs are opened in.
    pub browser_context_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabHandle {
    pub target_id: String,
}

#[async_trait::async_trait]
pub trait Browser: Send + Sync {
    /// Get-by-id probe for a previously created window.
    async fn window_exists(&self, window: &WindowHandle) -> Result<bool, BrowserError>;

    /// Opens a new, unfocused window reserved for automation.
    async fn create_window(&self) -> Result<WindowHandle, BrowserError>;

    /// Opens `url` in a background tab of `window`.
    async fn open_tab(&self, window: &WindowHandle, url: &str) -> Result<TabHandle, BrowserError>;

    /// Connects to the tab's page context.
    async fn attach(&self, tab: &TabHandle) -> Result<Arc<dyn PageSession>, BrowserError>;

    async fn close_tab(&self, tab: &TabHandle) -> Result<(), BrowserError>;
}

/// Operations run inside one page's execution context.
#[async_trait::async_trait]
pub trait PageSession: Send + Sync {
    async fn current_url(&self) -> Result<String, BrowserError>;

    /// `document.readyState`.
    async fn ready_state(&self) -> Result<String, BrowserError>;

    async fn has_element(&self, selector: &str) -> Result<bool, BrowserError>;

    /// Sets the value of the first match and fires bubbling `input` and
    /// `change` events. Returns false if nothing matched.
    async fn fill(&self, selector: &str, value: &str) -> Result<bool, BrowserError>;

    /// Clicks the first match. Returns false if nothing matched.
    async fn click(&self, selector: &str) -> Result<bool, BrowserError>;

    /// Change feed: the value is bumped whenever the document structure
    /// changes or the page finishes loading. Closed when the page goes away.
    fn changes(&self) -> watch::Receiver<u64>;
}
