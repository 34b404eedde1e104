//! Optional `config.ron` next to the agent state.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use otalogin_core::{ConnectorDescriptor, ConnectorRegistry};
use otalogin_engine::{
    ClientSettings, FillerTimeouts, SchedulerSettings, DEFAULT_API_BASE, DEFAULT_DEVTOOLS_ENDPOINT,
};
use serde::{Deserialize, Serialize};

use crate::logging::{LogDestination, DEFAULT_LOG_FILE};

pub const CONFIG_FILENAME: &str = "config.ron";

/// Tunables. Every field has a default, so a partial file is fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Overrides the base derived from the paired portal URL.
    pub api_base: Option<String>,
    pub devtools_endpoint: String,
    pub poll_interval_secs: u64,
    pub batch_size: usize,
    pub inter_job_delay_secs: u64,
    pub page_load_timeout_secs: u64,
    pub element_timeout_secs: u64,
    pub success_timeout_secs: u64,
    pub result_timeout_secs: Option<u64>,
    pub close_tab_after_result: bool,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub devtools_command_timeout_secs: u64,
    pub log_destination: LogDestination,
    /// Relative paths are taken from the working directory.
    pub log_file: PathBuf,
    /// Added to the built-in connectors; a matching code replaces one.
    pub connectors: Vec<ConnectorDescriptor>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let scheduler = SchedulerSettings::default();
        let client = ClientSettings::default();
        Self {
            api_base: None,
            devtools_endpoint: DEFAULT_DEVTOOLS_ENDPOINT.to_string(),
            poll_interval_secs: 60,
            batch_size: scheduler.batch_size,
            inter_job_delay_secs: scheduler.inter_job_delay.as_secs(),
            page_load_timeout_secs: scheduler.page_load_timeout.as_secs(),
            element_timeout_secs: scheduler.filler.element.as_secs(),
            success_timeout_secs: scheduler.filler.success.as_secs(),
            result_timeout_secs: None,
            close_tab_after_result: scheduler.close_tab_after_result,
            connect_timeout_secs: client.connect_timeout.as_secs(),
            request_timeout_secs: client.request_timeout.as_secs(),
            devtools_command_timeout_secs: 15,
            log_destination: LogDestination::default(),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            connectors: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Reads `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
        };
        ron::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn devtools_command_timeout(&self) -> Duration {
        Duration::from_secs(self.devtools_command_timeout_secs)
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            batch_size: self.batch_size.max(1),
            inter_job_delay: Duration::from_secs(self.inter_job_delay_secs),
            page_load_timeout: Duration::from_secs(self.page_load_timeout_secs),
            result_timeout: self.result_timeout_secs.map(Duration::from_secs),
            close_tab_after_result: self.close_tab_after_result,
            filler: FillerTimeouts {
                element: Duration::from_secs(self.element_timeout_secs),
                success: Duration::from_secs(self.success_timeout_secs),
            },
        }
    }

    pub fn client_settings(&self, api_base: String) -> ClientSettings {
        ClientSettings {
            api_base,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn registry(&self) -> ConnectorRegistry {
        let mut registry = ConnectorRegistry::builtin();
        for connector in &self.connectors {
            registry.insert(connector.clone());
        }
        registry
    }
}

/// Picks the API base: explicit override, then the paired portal, then the
/// local development default.
pub fn resolve_api_base(explicit: Option<&str>, portal_url: Option<&str>) -> String {
    match (explicit, portal_url) {
        (Some(base), _) => base.to_string(),
        (None, Some(portal)) => otalogin_engine::api_base_for_portal(portal),
        (None, None) => DEFAULT_API_BASE.to_string(),
    }
}
