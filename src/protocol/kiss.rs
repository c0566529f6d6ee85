//! KISS framing with RNode command ids
//!
//! A frame is `FEND <command> <escaped data> FEND`. Inside the data, FEND is sent as
//! `FESC TFEND` and FESC as `FESC TFESC`.

use core::fmt;

use heapless::Vec;

use crate::radio::MAX_PACKET_LEN;

// Framing bytes
/// Frame delimiter
pub const FEND: u8 = 0xC0;
/// Escape introducer
pub const FESC: u8 = 0xDB;
/// Escaped FEND
pub const TFEND: u8 = 0xDC;
/// Escaped FESC
pub const TFESC: u8 = 0xDD;

// Command ids
/// Packet payload
pub const CMD_DATA: u8 = 0x00;
/// Carrier frequency, 4 bytes big-endian, 0 queries
pub const CMD_FREQUENCY: u8 = 0x01;
/// Signal bandwidth, 4 bytes big-endian, 0 queries
pub const CMD_BANDWIDTH: u8 = 0x02;
/// Transmit power in dBm
pub const CMD_TXPOWER: u8 = 0x03;
/// Spreading factor
pub const CMD_SF: u8 = 0x04;
/// Coding rate denominator
pub const CMD_CR: u8 = 0x05;
/// Receive on or off
pub const CMD_RADIO_STATE: u8 = 0x06;
/// Device detection handshake
pub const CMD_DETECT: u8 = 0x08;
/// RSSI of the following data frame
pub const CMD_STAT_RSSI: u8 = 0x23;
/// SNR of the following data frame, quarter dB
pub const CMD_STAT_SNR: u8 = 0x24;
/// Firmware version query
pub const CMD_FW_VERSION: u8 = 0x50;
/// Error report
pub const CMD_ERROR: u8 = 0x90;

/// Detect request payload
pub const DETECT_REQ: u8 = 0x73;
/// Detect response payload
pub const DETECT_RESP: u8 = 0x46;

/// Radio in standby
pub const RADIO_STATE_OFF: u8 = 0x00;
/// Radio receiving
pub const RADIO_STATE_ON: u8 = 0x01;

/// Single-byte query sentinel
pub const QUERY: u8 = 0xFF;

/// Transmission failed
pub const ERROR_TXFAILED: u8 = 0x02;

/// RSSI is reported as `rssi + RSSI_OFFSET`
pub const RSSI_OFFSET: i16 = 157;

/// Longest unescaped frame payload
pub const MAX_FRAME_DATA: usize = MAX_PACKET_LEN;

/// Worst case encoded frame: every data byte escaped, plus command and two FENDs
pub const MAX_ENCODED_LEN: usize = 2 * MAX_FRAME_DATA + 3;

/// An encoded frame ready to be written to the stream
pub type EncodedFrame = Vec<u8, MAX_ENCODED_LEN>;

/// Framing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KissError {
    /// Data longer than [`MAX_FRAME_DATA`]
    FrameTooLong,
}

impl fmt::Display for KissError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KissError::FrameTooLong => f.write_str("KISS frame data too long"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for KissError {}

/// Append the escaped form of `data` to `out`
pub fn escape_into<const N: usize>(data: &[u8], out: &mut Vec<u8, N>) -> Result<(), KissError> {
    for &byte in data {
        let pushed = match byte {
            FEND => out.extend_from_slice(&[FESC, TFEND]),
            FESC => out.extend_from_slice(&[FESC, TFESC]),
            b => out.push(b).map_err(|_| ()),
        };
        pushed.map_err(|_| KissError::FrameTooLong)?;
    }
    Ok(())
}

/// Encode a complete frame
pub fn encode_frame(command: u8, data: &[u8]) -> Result<EncodedFrame, KissError> {
    if data.len() > MAX_FRAME_DATA {
        return Err(KissError::FrameTooLong);
    }
    let mut frame = EncodedFrame::new();
    frame
        .extend_from_slice(&[FEND, command])
        .map_err(|_| KissError::FrameTooLong)?;
    escape_into(data, &mut frame)?;
    frame.push(FEND).map_err(|_| KissError::FrameTooLong)?;
    Ok(frame)
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command id
    pub command: u8,
    /// Unescaped data
    pub data: Vec<u8, MAX_FRAME_DATA>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Outside a frame, waiting for FEND
    Idle,
    /// After FEND, next byte is the command
    Command,
    /// Collecting data
    Data,
    /// After FESC
    Escape,
    /// Broken frame, skipping to the next FEND
    Discard,
}

/// Byte-at-a-time KISS decoder
#[derive(Debug, Clone)]
pub struct Decoder {
    state: State,
    command: u8,
    data: Vec<u8, MAX_FRAME_DATA>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Create a decoder waiting for the first FEND
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            command: 0,
            data: Vec::new(),
        }
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.data.clear();
    }

    /// Feed one byte, returns a frame when `byte` closes one
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        if byte == FEND {
            let frame = match self.state {
                State::Data => Some(Frame {
                    command: self.command,
                    data: core::mem::take(&mut self.data),
                }),
                State::Escape => {
                    log::debug!("KISS frame ended inside an escape, dropped");
                    None
                }
                _ => None,
            };
            // Closing FEND opens the next frame
            self.state = State::Command;
            self.data.clear();
            return frame;
        }

        match self.state {
            State::Idle | State::Discard => {}
            State::Command => {
                self.command = byte;
                self.state = State::Data;
            }
            State::Data if byte == FESC => self.state = State::Escape,
            State::Data => self.collect(byte),
            State::Escape => match byte {
                TFEND => self.collect(FEND),
                TFESC => self.collect(FESC),
                _ => {
                    log::debug!("invalid KISS escape 0x{:02X}, frame dropped", byte);
                    self.discard();
                }
            },
        }
        None
    }

    fn collect(&mut self, byte: u8) {
        if self.data.push(byte).is_err() {
            log::debug!("KISS frame longer than {} bytes, dropped", MAX_FRAME_DATA);
            self.discard();
        } else {
            self.state = State::Data;
        }
    }

    fn discard(&mut self) {
        self.state = State::Discard;
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> alloc::vec::Vec<Frame> {
        let mut decoder = Decoder::new();
        bytes.iter().filter_map(|&b| decoder.push(b)).collect()
    }

    #[test]
    fn escapes_special_bytes() {
        let frame = encode_frame(CMD_DATA, &[0x01, FEND, FESC, 0x02]).unwrap();
        assert_eq!(
            &frame[..],
            &[FEND, CMD_DATA, 0x01, FESC, TFEND, FESC, TFESC, 0x02, FEND]
        );
    }

    #[test]
    fn rejects_oversized_data() {
        assert_eq!(
            encode_frame(CMD_DATA, &[0u8; MAX_FRAME_DATA + 1]),
            Err(KissError::FrameTooLong)
        );
        let worst = encode_frame(CMD_DATA, &[FEND; MAX_FRAME_DATA]).unwrap();
        assert_eq!(worst.len(), MAX_ENCODED_LEN);
    }

    #[test]
    fn decodes_back_to_back_frames_sharing_fend() {
        let frames = decode(&[FEND, FEND, CMD_SF, 0x09, FEND, CMD_CR, 0x05, FEND]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, CMD_SF);
        assert_eq!(&frames[0].data[..], &[0x09]);
        assert_eq!(frames[1].command, CMD_CR);
        assert_eq!(&frames[1].data[..], &[0x05]);
    }

    #[test]
    fn unescapes_data() {
        let frames = decode(&[FEND, CMD_DATA, FESC, TFEND, 0x10, FESC, TFESC, FEND]);
        assert_eq!(&frames[0].data[..], &[FEND, 0x10, FESC]);
    }

    #[test]
    fn bad_escape_discards_until_next_fend() {
        let frames = decode(&[
            FEND, CMD_DATA, 0x01, FESC, 0x42, 0x02, FEND, CMD_TXPOWER, 0x11, FEND,
        ]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, CMD_TXPOWER);
    }

    #[test]
    fn bytes_before_first_fend_are_ignored() {
        let frames = decode(&[0x01, 0x02, FEND, CMD_DETECT, DETECT_REQ, FEND]);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].data[..], &[DETECT_REQ]);
    }

    #[test]
    fn overlong_frame_is_dropped() {
        let mut bytes = alloc::vec![FEND, CMD_DATA];
        bytes.extend(core::iter::repeat(0x55).take(MAX_FRAME_DATA + 1));
        bytes.extend_from_slice(&[FEND, CMD_SF, 0x07, FEND]);
        let frames = decode(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, CMD_SF);
    }
}
