#![deny(missing_docs)]
//! Shared logging utilities for the agent workspace.
//!
//! This crate provides the `agent_*` logging macros used across the codebase
//! and the simplelog settings shared by the agent binary and the test
//! suites. Every line is tagged with the poll cycle that was running on the
//! current thread when it was emitted.

use std::cell::Cell;

use log::LevelFilter;
use simplelog::{ColorChoice, Config, ConfigBuilder, TermLogger, TerminalMode};

#[doc(hidden)]
pub use log;

thread_local! {
    /// Thread-local storage for the number of the poll cycle in progress.
    static CYCLE: Cell<u64> = const { Cell::new(0) };
}

/// Sets the poll cycle number for the current thread.
/// The scheduler calls this when a cycle starts and resets it to 0 on exit.
pub fn set_cycle(cycle: u64) {
    CYCLE.with(|v| v.set(cycle));
}

/// Retrieves the poll cycle number for the current thread.
/// Returns 0 outside of a cycle.
pub fn current_cycle() -> u64 {
    CYCLE.with(|v| v.get())
}

/// Short label for the log prefix: the cycle number, or `-` between cycles.
pub fn cycle_label() -> String {
    match current_cycle() {
        0 => "-".to_string(),
        n => n.to_string(),
    }
}

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! agent_trace {
    ($($arg:tt)*) => {{
        $crate::log::trace!("[cycle {}] {}", $crate::cycle_label(), format_args!($($arg)*));
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! agent_debug {
    ($($arg:tt)*) => {{
        $crate::log::debug!("[cycle {}] {}", $crate::cycle_label(), format_args!($($arg)*));
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! agent_info {
    ($($arg:tt)*) => {{
        $crate::log::info!("[cycle {}] {}", $crate::cycle_label(), format_args!($($arg)*));
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! agent_warn {
    ($($arg:tt)*) => {{
        $crate::log::warn!("[cycle {}] {}", $crate::cycle_label(), format_args!($($arg)*));
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! agent_error {
    ($($arg:tt)*) => {{
        $crate::log::error!("[cycle {}] {}", $crate::cycle_label(), format_args!($($arg)*));
    }};
}

/// Level for the agent's own lines: debug with `--verbose`, info otherwise.
pub fn level_for(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Formatting and filtering shared by every logger the workspace installs.
/// Lines from dependencies (reqwest, tungstenite, ...) are dropped.
pub fn workspace_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .set_thread_level(LevelFilter::Off)
        .add_filter_allow_str("otalogin")
        .build()
}

/// Installs a stderr logger at debug level for test binaries.
///
/// No-ops if another test already installed one.
pub fn initialize_for_tests() {
    let _ = TermLogger::init(
        level_for(true),
        workspace_config(),
        TerminalMode::Stderr,
        ColorChoice::Never,
    );
}
