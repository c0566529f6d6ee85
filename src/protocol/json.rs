//! Newline-delimited JSON control records
//!
//! Inbound lines carry a `type` tag (`settings`, `metaQ`, `packetTx`). Outbound records
//! are `meta`, `txAck`, `telemetry` and `packetRx`, plus the untagged settings echo.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest accepted line, newline excluded
pub const MAX_LINE_LEN: usize = 2048;

/// Inbound request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Apply radio settings
    #[serde(rename = "settings")]
    Settings(SettingsRequest),
    /// Ask for hardware limits
    #[serde(rename = "metaQ")]
    MetaQuery {},
    /// Transmit a packet
    #[serde(rename = "packetTx")]
    PacketTx(PacketTxRequest),
}

/// Settings to apply, absent fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsRequest {
    /// LNA gain level
    pub gain: Option<u16>,
    /// Transmit power in dBm
    pub tx_power: Option<u16>,
    /// Carrier frequency in Hz
    pub frequency: Option<u32>,
    /// Spreading factor
    pub spreading_factor: Option<u16>,
    /// Signal bandwidth in Hz
    pub signal_bandwidth: Option<u32>,
    /// Coding rate denominator
    pub coding_rate4: Option<u16>,
    /// Preamble length
    pub preamble_length: Option<u16>,
    /// Sync word
    pub sync_word: Option<u8>,
    /// Payload CRC
    #[serde(rename = "CRC")]
    pub crc: Option<bool>,
    /// IQ inversion
    #[serde(rename = "invertIQ")]
    pub invert_iq: Option<bool>,
    /// Low data rate optimization
    pub low_data_rate_optimize: Option<bool>,
    /// `true` enters continuous receive, `false` standby
    pub receive: Option<bool>,
}

/// Echo of the settings that were applied, with their applied values
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    /// LNA gain level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain: Option<u8>,
    /// Transmit power in dBm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_power: Option<u8>,
    /// Carrier frequency in Hz
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u32>,
    /// Spreading factor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spreading_factor: Option<u8>,
    /// Signal bandwidth in Hz
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_bandwidth: Option<u32>,
    /// Coding rate denominator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coding_rate4: Option<u8>,
    /// Preamble length
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preamble_length: Option<u16>,
    /// Sync word
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_word: Option<u8>,
    /// Payload CRC
    #[serde(rename = "CRC", skip_serializing_if = "Option::is_none")]
    pub crc: Option<bool>,
    /// IQ inversion
    #[serde(rename = "invertIQ", skip_serializing_if = "Option::is_none")]
    pub invert_iq: Option<bool>,
    /// Low data rate optimization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_data_rate_optimize: Option<bool>,
    /// Receive mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receive: Option<bool>,
}

/// Packet to transmit
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketTxRequest {
    /// Opaque id echoed in the acknowledgement
    #[serde(default)]
    pub id: Option<Value>,
    /// Payload bytes
    #[serde(default)]
    pub data: Vec<u8>,
    /// Wait for a clear channel before transmitting
    #[serde(default)]
    pub cad: bool,
    /// Pause between channel checks in ms
    pub cad_wait: Option<u32>,
    /// Give up after this many ms of busy channel
    pub cad_timeout: Option<u32>,
}

/// Reason a transmit request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TxFailure {
    /// Request had no payload
    #[serde(rename = "empty packet")]
    EmptyPacket,
    /// Channel stayed busy
    #[serde(rename = "cadTimeout")]
    CadTimeout,
    /// Radio refused to start a packet
    #[serde(rename = "beginPacket failed")]
    BeginPacket,
    /// Radio failed to transmit
    #[serde(rename = "endPacket failed")]
    EndPacket,
}

/// Outbound record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Record {
    /// Hardware limits
    #[serde(rename = "meta", rename_all = "camelCase")]
    Meta {
        /// Highest gain level
        gain_max: u8,
        /// Highest transmit power in dBm
        tx_power_max: u8,
    },
    /// Transmit acknowledgement
    #[serde(rename = "txAck")]
    TxAck {
        /// Echo of the request id
        id: Option<Value>,
        /// Whether the packet went out
        success: bool,
        /// Why it did not
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<TxFailure>,
    },
    /// Periodic status
    #[serde(rename = "telemetry")]
    Telemetry {
        /// Radio in continuous receive
        receiving: bool,
        /// Instantaneous RSSI, only while receiving
        #[serde(skip_serializing_if = "Option::is_none")]
        rssi: Option<i16>,
    },
    /// Received packet
    #[serde(rename = "packetRx", rename_all = "camelCase")]
    PacketRx {
        /// RSSI in dBm
        rssi: i16,
        /// SNR in dB
        snr: f32,
        /// Frequency error in Hz
        freq_error: i32,
        /// Payload bytes
        data: Vec<u8>,
    },
}

/// Serialize `value` as one line
pub fn to_line<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    Ok(line)
}

/// Inbound line that could not be turned into a request
#[derive(Debug)]
pub enum LineError {
    /// Line exceeded [`MAX_LINE_LEN`]
    TooLong,
    /// Malformed JSON or unknown type
    Invalid(serde_json::Error),
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineError::TooLong => f.write_str("line too long"),
            LineError::Invalid(e) => write!(f, "invalid request: {}", e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LineError {}

impl LineError {
    /// Plain-text diagnostic line sent back to the client
    pub fn diagnostic(&self) -> String {
        alloc::format!("{}\n", self)
    }
}

/// Splits a byte stream into lines and decodes them
#[derive(Debug, Default)]
pub struct LineReader {
    buf: Vec<u8>,
    overflow: bool,
}

impl LineReader {
    /// Create an empty reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partial line
    pub fn reset(&mut self) {
        self.buf.clear();
        self.overflow = false;
    }

    /// Feed one byte, returns a decoded line when `byte` ends one
    pub fn push(&mut self, byte: u8) -> Option<Result<Request, LineError>> {
        if byte != b'\n' {
            if self.overflow {
                return None;
            }
            if self.buf.len() == MAX_LINE_LEN {
                self.overflow = true;
                self.buf.clear();
                return Some(Err(LineError::TooLong));
            }
            self.buf.push(byte);
            return None;
        }

        if self.overflow {
            self.overflow = false;
            return None;
        }
        let line = trim(&self.buf);
        let result = if line.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(line).map_err(LineError::Invalid))
        };
        self.buf.clear();
        result
    }
}

fn trim(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(reader: &mut LineReader, bytes: &[u8]) -> Vec<Result<Request, LineError>> {
        bytes.iter().filter_map(|&b| reader.push(b)).collect()
    }

    #[test]
    fn decodes_requests() {
        let mut reader = LineReader::new();
        let out = feed(
            &mut reader,
            b"{\"type\":\"metaQ\"}\n  {\"type\":\"packetTx\",\"id\":7,\"data\":[1,2]}\r\n",
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), &Request::MetaQuery {});
        match out[1].as_ref().unwrap() {
            Request::PacketTx(tx) => {
                assert_eq!(tx.id, Some(Value::from(7)));
                assert_eq!(tx.data, [1, 2]);
                assert!(!tx.cad);
                assert_eq!(tx.cad_wait, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn settings_field_names() {
        let mut reader = LineReader::new();
        let out = feed(
            &mut reader,
            b"{\"type\":\"settings\",\"txPower\":20,\"CRC\":false,\"invertIQ\":true}\n",
        );
        match out[0].as_ref().unwrap() {
            Request::Settings(s) => {
                assert_eq!(s.tx_power, Some(20));
                assert_eq!(s.crc, Some(false));
                assert_eq!(s.invert_iq, Some(true));
                assert_eq!(s.receive, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn blank_lines_are_ignored() {
        let mut reader = LineReader::new();
        assert!(feed(&mut reader, b"\n   \n\r\n").is_empty());
    }

    #[test]
    fn unknown_type_is_invalid() {
        let mut reader = LineReader::new();
        let out = feed(&mut reader, b"{\"type\":\"reboot\"}\n");
        let diagnostic = out[0].as_ref().unwrap_err().diagnostic();
        assert!(diagnostic.starts_with("invalid request: "));
        assert!(diagnostic.ends_with('\n'));
    }

    #[test]
    fn overlong_line_reports_once_and_recovers() {
        let mut reader = LineReader::new();
        let mut bytes = alloc::vec![b'x'; MAX_LINE_LEN + 10];
        bytes.extend_from_slice(b"\n{\"type\":\"metaQ\"}\n");
        let out = feed(&mut reader, &bytes);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(LineError::TooLong)));
        assert!(matches!(out[1], Ok(Request::MetaQuery {})));
    }

    #[test]
    fn records_serialize_with_type_tag() {
        let ack = Record::TxAck {
            id: None,
            success: false,
            reason: Some(TxFailure::CadTimeout),
        };
        assert_eq!(
            serde_json::to_string(&ack).unwrap(),
            r#"{"type":"txAck","id":null,"success":false,"reason":"cadTimeout"}"#
        );
        let meta = Record::Meta {
            gain_max: 6,
            tx_power_max: 20,
        };
        assert_eq!(
            serde_json::to_string(&meta).unwrap(),
            r#"{"type":"meta","gainMax":6,"txPowerMax":20}"#
        );
        let echo = SettingsResponse {
            tx_power: Some(20),
            crc: Some(true),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&echo).unwrap(), r#"{"txPower":20,"CRC":true}"#);
    }
}
