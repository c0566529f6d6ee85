pub mod lora;
pub mod mode;
/// Radio settings and per-chip legal ranges
pub mod settings;
/// SX127x (RFM95) register-level backend
pub mod sx127x;
/// SX126x (SX1262) command-level backend
#[cfg(feature = "sx126x")]
pub mod sx126x;
/// Transceiver and radio traits
pub mod traits;

use core::fmt;

use heapless::Vec;

pub use lora::LoRaRadio;
pub use mode::RadioMode;
pub use settings::{Bounds, Limits, RadioSettings};
pub use sx127x::Sx127x;
#[cfg(feature = "sx126x")]
pub use sx126x::Sx126x;
pub use traits::{PacketReader, Radio, RxCallback, Transceiver, TxDoneCallback};

/// Largest LoRa payload in bytes
pub const MAX_PACKET_LEN: usize = 255;

/// Bus-level errors of the register backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// SPI transfer error
    Spi,
    /// GPIO error
    Gpio,
    /// Chip did not identify itself correctly
    Hardware,
    /// Chip stayed busy
    Timeout,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Spi => f.write_str("SPI transfer failed"),
            DriverError::Gpio => f.write_str("GPIO access failed"),
            DriverError::Hardware => f.write_str("transceiver not responding"),
            DriverError::Timeout => f.write_str("transceiver stayed busy"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DriverError {}

/// Errors of the radio abstraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError<E> {
    /// Transceiver reported an error
    Device(E),
    /// Radio has not been brought up
    NotInitialized,
    /// Requested mode is not reachable from the current one
    InvalidTransition {
        /// Mode at the time of the request
        from: RadioMode,
        /// Requested mode
        to: RadioMode,
    },
    /// Asynchronous transmission requested but not supported by the backend
    AsyncUnsupported,
    /// Operation did not complete in time
    Timeout,
}

impl<E> From<mode::ModeError> for RadioError<E> {
    fn from(error: mode::ModeError) -> Self {
        if error.from == RadioMode::Uninitialized {
            RadioError::NotInitialized
        } else {
            RadioError::InvalidTransition {
                from: error.from,
                to: error.to,
            }
        }
    }
}

impl<E: fmt::Debug> fmt::Display for RadioError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioError::Device(e) => write!(f, "transceiver error: {:?}", e),
            RadioError::NotInitialized => f.write_str("radio not initialized"),
            RadioError::InvalidTransition { from, to } => {
                write!(f, "cannot switch radio from {:?} to {:?}", from, to)
            }
            RadioError::AsyncUnsupported => f.write_str("asynchronous transmit not supported"),
            RadioError::Timeout => f.write_str("radio operation timed out"),
        }
    }
}

#[cfg(feature = "std")]
impl<E: fmt::Debug> std::error::Error for RadioError<E> {}

/// A packet captured by the receive interrupt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceivedPacket {
    /// Payload bytes
    pub payload: Vec<u8, MAX_PACKET_LEN>,
    /// RSSI in dBm
    pub rssi: i16,
    /// SNR in dB
    pub snr: f32,
    /// Frequency error in Hz
    pub frequency_error: i32,
}
