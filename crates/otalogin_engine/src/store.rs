//! The agent's persisted key-value state.
//!
//! Everything lives in one RON file inside the state directory. Writes go
//! through a temp file in the same directory which is synced and renamed
//! over the target, so a crash never leaves a truncated state file behind.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use otalogin_core::PairingToken;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::WindowHandle;

pub const STATE_FILENAME: &str = "agent_state.ron";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state directory {path:?} is not usable: {reason}")]
    StateDir { path: PathBuf, reason: String },
    #[error("could not parse {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("could not serialize agent state: {0}")]
    Serialize(#[from] ron::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Local state. Missing keys take their defaults; there is no versioning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentState {
    pub device_token: Option<PairingToken>,
    pub device_name: Option<String>,
    pub portal_url: Option<String>,
    pub monitor_window: Option<WindowHandle>,
    pub polling_enabled: bool,
}

impl AgentState {
    pub fn is_paired(&self) -> bool {
        self.device_token.is_some()
    }

    /// Forgets the pairing. The monitor window is kept.
    pub fn clear_pairing(&mut self) {
        self.device_token = None;
        self.device_name = None;
        self.portal_url = None;
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILENAME)
    }

    /// Reads the state file. A missing file is the default state.
    pub fn load(&self) -> Result<AgentState, StoreError> {
        let path = self.path();
        let content = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(AgentState::default()),
            Err(err) => return Err(err.into()),
        };
        let mut state: AgentState = ron::from_str(&content).map_err(|err| StoreError::Parse {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        // A blank token on disk means "not paired".
        state.device_token = state
            .device_token
            .and_then(|token| PairingToken::new(token.expose()));
        Ok(state)
    }

    pub fn save(&self, state: &AgentState) -> Result<(), StoreError> {
        let pretty = ron::ser::PrettyConfig::new();
        let content = ron::ser::to_string_pretty(state, pretty)?;
        self.replace_file(content.as_bytes())
    }

    /// Read-modify-write of the state file. Returns the state as saved.
    pub fn update<F>(&self, change: F) -> Result<AgentState, StoreError>
    where
        F: FnOnce(&mut AgentState),
    {
        let mut state = self.load()?;
        change(&mut state);
        self.save(&state)?;
        Ok(state)
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        let unusable = |reason: String| StoreError::StateDir {
            path: self.dir.clone(),
            reason,
        };
        match fs::metadata(&self.dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(unusable("path is not a directory".into())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&self.dir).map_err(|err| unusable(err.to_string()))
            }
            Err(err) => Err(unusable(err.to_string())),
        }
    }

    fn replace_file(&self, bytes: &[u8]) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(self.path()).map_err(|err| StoreError::Io(err.error))?;
        Ok(())
    }
}
