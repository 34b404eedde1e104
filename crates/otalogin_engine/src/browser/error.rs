use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to the browser over DevTools.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrowserError {
    /// The DevTools endpoint could not be reached or the socket did not open.
    #[error("failed to connect to DevTools at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// A command was answered with an error object.
    #[error("CDP error {code}: {message}")]
    Cdp { code: i64, message: String },

    #[error("CDP command '{method}' timed out after {duration:?}")]
    Timeout { method: String, duration: Duration },

    /// Unexpected message shape, or the socket closed mid-command.
    #[error("CDP protocol error: {detail}")]
    Protocol { detail: String },

    /// The page threw while evaluating a script.
    #[error("JavaScript exception: {message}")]
    JsException { message: String },
}

impl BrowserError {
    pub(crate) fn protocol(detail: impl Into<String>) -> Self {
        BrowserError::Protocol {
            detail: detail.into(),
        }
    }

    /// True when the browser itself is unreachable, as opposed to a
    /// command failing inside a live browser.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, BrowserError::ConnectionFailed { .. })
    }

    /// True for errors a page raises while it is between documents, such
    /// as a destroyed execution context during navigation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrowserError::Cdp { .. } | BrowserError::JsException { .. }
        )
    }
}
