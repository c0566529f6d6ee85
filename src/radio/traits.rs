use alloc::boxed::Box;
use core::fmt::Debug;

use crate::radio::mode::RadioMode;
use crate::radio::settings::{Limits, RadioSettings};

/// Access to a freshly received packet, handed to the receive callback
pub trait PacketReader {
    /// RSSI of the packet in dBm
    fn packet_rssi(&self) -> i16;
    /// SNR of the packet in dB
    fn packet_snr(&self) -> f32;
    /// Frequency error of the packet in Hz, zero if unknown
    fn packet_frequency_error(&self) -> i32;
    /// Copy the payload into `buf`, returns false if the hardware read failed
    fn read(&mut self, buf: &mut [u8]) -> bool;
}

/// Called from interrupt context with the received payload length
pub type RxCallback = Box<dyn FnMut(&mut dyn PacketReader, usize) + Send>;

/// Called from interrupt context when an asynchronous transmission finishes
pub type TxDoneCallback = Box<dyn FnMut() + Send>;

/// Interrupt status reported by a transceiver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqFlags {
    /// Transmission finished
    pub tx_done: bool,
    /// Packet received
    pub rx_done: bool,
    /// Received packet failed its CRC
    pub crc_error: bool,
    /// Channel activity detection finished
    pub cad_done: bool,
    /// Channel activity was detected
    pub cad_detected: bool,
}

impl IrqFlags {
    /// True if no flag is set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Signal metadata of the last received packet
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PacketStatus {
    /// RSSI in dBm
    pub rssi: i16,
    /// SNR in dB
    pub snr: f32,
    /// Frequency error in Hz
    pub frequency_error: i32,
}

/// Chip-level operations a LoRa transceiver backend provides
///
/// Values passed to the setters are already clamped to [`Transceiver::limits`].
pub trait Transceiver {
    /// Error type for bus operations
    type Error: Debug;

    /// Legal ranges of this chip
    fn limits(&self) -> Limits;

    /// Reset, verify the chip responds and configure it for LoRa; leaves it in standby
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Enter standby
    fn standby(&mut self) -> Result<(), Self::Error>;

    /// Enter sleep, keeping configuration
    fn sleep(&mut self) -> Result<(), Self::Error>;

    /// Set carrier frequency in Hz
    fn set_frequency(&mut self, hz: u32) -> Result<(), Self::Error>;

    /// Set spreading factor
    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), Self::Error>;

    /// Set bandwidth in Hz (one of the supported bandwidths)
    fn set_bandwidth(&mut self, hz: u32) -> Result<(), Self::Error>;

    /// Set coding rate denominator
    fn set_coding_rate4(&mut self, denominator: u8) -> Result<(), Self::Error>;

    /// Set preamble length in symbols
    fn set_preamble_length(&mut self, length: u16) -> Result<(), Self::Error>;

    /// Set sync word
    fn set_sync_word(&mut self, sync_word: u8) -> Result<(), Self::Error>;

    /// Enable or disable payload CRC
    fn set_crc(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Enable or disable IQ inversion
    fn set_invert_iq(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Enable or disable low data rate optimization
    fn set_low_data_rate_optimize(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Set transmit power in dBm
    fn set_tx_power(&mut self, dbm: u8) -> Result<(), Self::Error>;

    /// Set LNA gain level, 0 = AGC
    fn set_gain(&mut self, level: u8) -> Result<(), Self::Error>;

    /// Load `payload` and start transmitting; completion is reported through `take_irq`
    fn start_transmit(&mut self, payload: &[u8], implicit_header: bool) -> Result<(), Self::Error>;

    /// Start continuous receive, `Some(len)` selects implicit header with fixed length
    fn start_receive(&mut self, implicit_len: Option<u8>) -> Result<(), Self::Error>;

    /// Start channel activity detection; completion is reported through `take_irq`
    fn start_cad(&mut self) -> Result<(), Self::Error>;

    /// Read and clear pending interrupt flags
    fn take_irq(&mut self) -> Result<IrqFlags, Self::Error>;

    /// Length of the packet sitting in the receive buffer
    fn received_len(&mut self) -> Result<usize, Self::Error>;

    /// Read the received payload into `buf`
    fn read_payload(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Signal metadata of the last received packet
    fn packet_status(&mut self) -> Result<PacketStatus, Self::Error>;

    /// Instantaneous RSSI in dBm
    fn rssi(&mut self) -> Result<i16, Self::Error>;
}

/// Generic radio interface trait
pub trait Radio {
    /// Error type for radio operations
    type Error: Debug;

    /// Bring the radio up; on failure the radio stays unusable
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Current operating mode
    fn mode(&self) -> RadioMode;

    /// Legal setting ranges of the underlying hardware
    fn limits(&self) -> Limits;

    /// Currently applied settings
    fn settings(&self) -> &RadioSettings;

    //// TX

    /// Start assembling a packet
    fn begin_packet(&mut self, implicit_header: bool) -> Result<(), Self::Error>;

    /// Append bytes to the packet, returns how many were accepted
    fn write(&mut self, data: &[u8]) -> usize;

    /// Transmit the assembled packet
    fn end_packet(&mut self, asynchronous: bool) -> Result<(), Self::Error>;

    /// Register the transmit-done callback
    fn on_tx_done(&mut self, callback: Option<TxDoneCallback>);

    /// Check if the radio is currently transmitting
    fn is_transmitting(&self) -> bool {
        self.mode() == RadioMode::Transmitting
    }

    /// Transmit `payload` synchronously with an explicit header
    fn transmit(&mut self, payload: &[u8]) -> Result<(), Self::Error> {
        self.begin_packet(false)?;
        self.write(payload);
        self.end_packet(false)
    }

    //// RX

    /// Enter continuous receive, nonzero `frame_size` selects implicit header mode
    fn start_continuous_receive(&mut self, frame_size: usize) -> Result<(), Self::Error>;

    /// Register the receive callback
    fn on_receive(&mut self, callback: Option<RxCallback>);

    /// Interrupt trampoline: service pending radio events and run callbacks
    fn handle_interrupt(&mut self) -> Result<(), Self::Error>;

    //// OTHER

    /// Put the radio into standby mode
    fn standby(&mut self) -> Result<(), Self::Error>;

    /// Put the radio into sleep mode
    fn sleep(&mut self) -> Result<(), Self::Error>;

    /// Blocking clear-channel assessment, true if the channel is busy; leaves the radio in standby
    fn channel_active(&mut self) -> bool;

    /// Instantaneous RSSI in dBm
    fn rssi(&mut self) -> Result<i16, Self::Error>;

    //// Settings, setters return the value actually applied

    /// Set LNA gain level
    fn set_gain(&mut self, level: u8) -> Result<u8, Self::Error>;
    /// Set transmit power in dBm
    fn set_tx_power(&mut self, dbm: u8) -> Result<u8, Self::Error>;
    /// Set frequency in Hz
    fn set_frequency(&mut self, hz: u32) -> Result<u32, Self::Error>;
    /// Set spreading factor
    fn set_spreading_factor(&mut self, sf: u8) -> Result<u8, Self::Error>;
    /// Set signal bandwidth in Hz
    fn set_signal_bandwidth(&mut self, hz: u32) -> Result<u32, Self::Error>;
    /// Set coding rate denominator (4/x)
    fn set_coding_rate4(&mut self, denominator: u8) -> Result<u8, Self::Error>;
    /// Set preamble length
    fn set_preamble_length(&mut self, length: u16) -> Result<u16, Self::Error>;
    /// Set sync word
    fn set_sync_word(&mut self, sync_word: u8) -> Result<u8, Self::Error>;
    /// Enable or disable CRC
    fn set_crc(&mut self, enabled: bool) -> Result<bool, Self::Error>;
    /// Enable or disable IQ inversion
    fn set_invert_iq(&mut self, enabled: bool) -> Result<bool, Self::Error>;
    /// Enable or disable low data rate optimization
    fn set_low_data_rate_optimize(&mut self, enabled: bool) -> Result<bool, Self::Error>;

    /// LNA gain level
    fn gain(&self) -> u8 {
        self.settings().gain
    }
    /// Highest gain level
    fn gain_max(&self) -> u8 {
        self.limits().gain_max
    }
    /// Transmit power in dBm
    fn tx_power(&self) -> u8 {
        self.settings().tx_power
    }
    /// Highest transmit power in dBm
    fn tx_power_max(&self) -> u8 {
        self.limits().tx_power.max
    }
    /// Frequency in Hz
    fn frequency(&self) -> u32 {
        self.settings().frequency
    }
    /// Spreading factor
    fn spreading_factor(&self) -> u8 {
        self.settings().spreading_factor
    }
    /// Signal bandwidth in Hz
    fn signal_bandwidth(&self) -> u32 {
        self.settings().signal_bandwidth
    }
    /// Coding rate denominator
    fn coding_rate4(&self) -> u8 {
        self.settings().coding_rate4
    }
    /// Preamble length
    fn preamble_length(&self) -> u16 {
        self.settings().preamble_length
    }
    /// Sync word
    fn sync_word(&self) -> u8 {
        self.settings().sync_word
    }
    /// CRC enabled
    fn crc(&self) -> bool {
        self.settings().crc
    }
    /// IQ inversion enabled
    fn invert_iq(&self) -> bool {
        self.settings().invert_iq
    }
    /// Low data rate optimization enabled
    fn low_data_rate_optimize(&self) -> bool {
        self.settings().low_data_rate_optimize
    }
}
