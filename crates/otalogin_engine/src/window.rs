use std::sync::Arc;

use agent_logging::{agent_error, agent_info, agent_warn};

use crate::{Browser, StateStore, WindowHandle};

/// Owns the persisted monitor window handle. Nothing else reads or writes
/// it.
pub struct WindowManager {
    browser: Arc<dyn Browser>,
    store: StateStore,
}

impl WindowManager {
    pub fn new(browser: Arc<dyn Browser>, store: StateStore) -> Self {
        Self { browser, store }
    }

    /// Returns the current monitor window, creating (and persisting) a new
    /// one if there is none or the stored one was closed.
    ///
    /// `None` means no window is available; the caller should give up on
    /// the cycle.
    pub async fn get_or_create_window(&self) -> Option<WindowHandle> {
        let stored = match self.store.load() {
            Ok(state) => state.monitor_window,
            Err(err) => {
                agent_error!("cannot read monitor window handle: {err}");
                return None;
            }
        };

        if let Some(handle) = stored {
            match self.browser.window_exists(&handle).await {
                Ok(true) => return Some(handle),
                Ok(false) => agent_info!("monitor window {} was closed", handle.window_id),
                Err(err) => agent_warn!("could not probe monitor window {}: {err}", handle.window_id),
            }
        }

        let handle = match self.browser.create_window().await {
            Ok(handle) => handle,
            Err(err) => {
                agent_error!("could not create monitor window: {err}");
                return None;
            }
        };
        agent_info!("created monitor window {}", handle.window_id);

        let persisted = handle.clone();
        if let Err(err) = self
            .store
            .update(move |state| state.monitor_window = Some(persisted))
        {
            agent_warn!("monitor window handle not persisted: {err}");
        }
        Some(handle)
    }
}
