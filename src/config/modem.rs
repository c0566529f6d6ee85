use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::radio::RadioSettings;

/// Wire protocol spoken on the control stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Newline-delimited JSON records
    Json,
    /// RNode-compatible KISS frames
    Kiss,
}

/// Modem configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModemConfig {
    /// Control protocol
    pub framing: Framing,
    /// Period of JSON telemetry records
    pub telemetry_interval_ms: u64,
    /// Default pause between channel activity checks of a CAD transmit
    pub cad_wait_ms: u32,
    /// Default deadline of a CAD transmit
    pub cad_timeout_ms: u32,
    /// Run channel activity detection before KISS data frames
    pub kiss_cad: bool,
    /// Reported by `CMD_FW_VERSION`
    pub firmware_version: [u8; 2],
    /// Settings applied at bring-up
    pub radio: RadioSettings,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            framing: Framing::Json,
            telemetry_interval_ms: 2000,
            cad_wait_ms: 100,
            cad_timeout_ms: 10_000,
            kiss_cad: false,
            firmware_version: [1, 0x34],
            radio: RadioSettings::default(),
        }
    }
}

impl ModemConfig {
    /// Decode a JSON configuration, missing fields keep their defaults
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Use the given framing
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Use the given telemetry period
    pub fn with_telemetry_interval(mut self, interval_ms: u64) -> Self {
        self.telemetry_interval_ms = interval_ms;
        self
    }

    /// Run CAD before KISS data frames
    pub fn with_kiss_cad(mut self, enabled: bool) -> Self {
        self.kiss_cad = enabled;
        self
    }

    /// Use the given initial radio settings
    pub fn with_radio(mut self, radio: RadioSettings) -> Self {
        self.radio = radio;
        self
    }
}

/// Timeouts of the blocking radio loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioConfig {
    /// Longest a channel activity detection may take
    pub cad_timeout_ms: u32,
    /// Longest a synchronous transmission may take
    pub tx_timeout_ms: u32,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            cad_timeout_ms: 10_000,
            tx_timeout_ms: 10_000,
        }
    }
}
