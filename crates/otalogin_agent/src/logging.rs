//! Logger installation for the agent binary.
//!
//! The log file is opened in append mode so restarts of a long-running
//! `run` keep the history.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

use agent_logging::{agent_info, agent_warn, level_for, workspace_config};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use simplelog::{ColorChoice, CombinedLogger, SharedLogger, TermLogger, TerminalMode, WriteLogger};

pub const DEFAULT_LOG_FILE: &str = "agent.log";

/// Destination for log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogDestination {
    /// Append to the configured log file only.
    File,
    /// Write to the terminal (stderr for warnings and errors).
    #[default]
    Terminal,
    Both,
}

impl LogDestination {
    fn to_terminal(self) -> bool {
        matches!(self, LogDestination::Terminal | LogDestination::Both)
    }

    fn to_file(self) -> bool {
        matches!(self, LogDestination::File | LogDestination::Both)
    }
}

/// Installs the global logger.
///
/// A log file that cannot be opened is fatal for `File` and a warning on
/// the terminal for `Both`.
pub fn initialize(destination: LogDestination, verbose: bool, file: &Path) -> Result<()> {
    let level = level_for(verbose);
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    if destination.to_terminal() {
        loggers.push(TermLogger::new(
            level,
            workspace_config(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }

    let mut file_error = None;
    if destination.to_file() {
        match open_log_file(file) {
            Ok(out) => loggers.push(WriteLogger::new(level, workspace_config(), out)),
            Err(err) if destination.to_terminal() => file_error = Some(err),
            Err(err) => {
                return Err(err).with_context(|| format!("opening log file {}", file.display()))
            }
        }
    }

    CombinedLogger::init(loggers).context("installing the logger")?;
    match file_error {
        Some(err) => agent_warn!("not writing {}: {err}", file.display()),
        None if destination.to_file() => agent_info!("logging to {}", file.display()),
        None => {}
    }
    Ok(())
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
