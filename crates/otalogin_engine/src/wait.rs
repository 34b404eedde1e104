use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::BrowserError;

/// Waits until `probe` yields a value, re-checking only when the change feed
/// moves.
///
/// The probe runs once immediately, then once per change notification.
/// Returns `Ok(None)` when `limit` elapses or the feed closes first. Probe
/// errors end the wait.
pub async fn wait_until<T, F, Fut>(
    changes: &mut watch::Receiver<u64>,
    limit: Duration,
    mut probe: F,
) -> Result<Option<T>, BrowserError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, BrowserError>>,
{
    let watch = async {
        loop {
            // Anything that changed before this probe is covered by it.
            changes.borrow_and_update();
            if let Some(found) = probe().await? {
                return Ok(Some(found));
            }
            if changes.changed().await.is_err() {
                return Ok(None);
            }
        }
    };
    tokio::time::timeout(limit, watch)
        .await
        .unwrap_or(Ok(None))
}
