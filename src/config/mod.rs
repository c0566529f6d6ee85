//! Modem and radio configuration
//!
//! This module contains the configuration types of the modem. It includes:
//! - Control-channel framing and timing (`ModemConfig`)
//! - Radio loop timeouts (`RadioConfig`)
//! - Initial radio settings, see [`crate::radio::RadioSettings`]

/// Modem configuration
pub mod modem;

use core::fmt;

pub use modem::{Framing, ModemConfig, RadioConfig};

/// Failure to decode a configuration
#[derive(Debug)]
pub enum ConfigError {
    /// Malformed JSON or a field of the wrong type
    Json(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Json(e) => write!(f, "invalid configuration: {}", e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

impl From<serde_json::Error> for ConfigError {
    fn from(error: serde_json::Error) -> Self {
        ConfigError::Json(error)
    }
}
