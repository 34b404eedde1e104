use std::fmt;

use serde::{Deserialize, Serialize};

pub const PAIRING_CODE_LEN: usize = 6;
pub const MAX_DEVICE_NAME_LEN: usize = 100;

/// Bearer credential identifying this agent to the job source.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingToken(String);

impl PairingToken {
    /// Returns `None` for blank input; a blank token is the same as no token.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PairingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PairingToken(<redacted>)")
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PairingError {
    #[error("pairing code must be exactly {PAIRING_CODE_LEN} characters")]
    InvalidCode,
    #[error("device name must be between 1 and {MAX_DEVICE_NAME_LEN} characters")]
    InvalidDeviceName,
}

/// Body of `POST /pair`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairRequest {
    pub pairing_code: String,
    pub device_name: String,
}

impl PairRequest {
    /// Trims both inputs and applies the job source's validation rules.
    pub fn new(pairing_code: &str, device_name: &str) -> Result<Self, PairingError> {
        let pairing_code = pairing_code.trim();
        let device_name = device_name.trim();
        if pairing_code.chars().count() != PAIRING_CODE_LEN {
            return Err(PairingError::InvalidCode);
        }
        let name_len = device_name.chars().count();
        if name_len == 0 || name_len > MAX_DEVICE_NAME_LEN {
            return Err(PairingError::InvalidDeviceName);
        }
        Ok(Self {
            pairing_code: pairing_code.to_string(),
            device_name: device_name.to_string(),
        })
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairResponse {
    pub success: bool,
    #[serde(default)]
    pub device_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PairResponse {
    /// The issued token, if pairing succeeded and the server sent one.
    pub fn token(&self) -> Option<PairingToken> {
        if !self.success {
            return None;
        }
        self.device_token.clone().and_then(PairingToken::new)
    }
}

impl fmt::Debug for PairResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairResponse")
            .field("success", &self.success)
            .field("device_token", &self.device_token.as_ref().map(|_| "<redacted>"))
            .field("error", &self.error)
            .finish()
    }
}
