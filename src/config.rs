//! Settings for sessions and ledger adapters, usually read from a TOML file.
//!
//! ```toml
//! [channel]
//! timeout_seconds = 3600
//!
//! [ledger]
//! program_id = "paychan-devnet"
//!
//! [retry]
//! max_attempts = 5
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{channel::DEFAULT_TIMEOUT_SECONDS, ledger::RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// `[ledger]` is required, the other sections fall back to defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub channel: ChannelConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Seconds after opening from which either party may force-close.
    pub timeout_seconds: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Identifier of the program holding the escrow accounts. There is no
    /// default: every deployment names its own.
    pub program_id: String,
}

impl LedgerConfig {
    pub fn new(program_id: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}
