use serde::{Deserialize, Serialize};

/// Inclusive range of legal values for a radio setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds<T> {
    /// Smallest legal value
    pub min: T,
    /// Largest legal value
    pub max: T,
}

impl<T: Ord + Copy> Bounds<T> {
    /// Create new bounds
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    /// Clamp `value` to the nearest legal value
    pub fn clamp(&self, value: T) -> T {
        value.clamp(self.min, self.max)
    }

    /// Check whether `value` is legal
    pub fn contains(&self, value: T) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Hardware-specific legal ranges of a transceiver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    /// Highest LNA gain level (0 selects AGC)
    pub gain_max: u8,
    /// Transmit power in dBm
    pub tx_power: Bounds<u8>,
    /// Carrier frequency in Hz
    pub frequency: Bounds<u32>,
    /// LoRa spreading factor
    pub spreading_factor: Bounds<u8>,
    /// Supported signal bandwidths in Hz, ascending
    pub bandwidths: &'static [u32],
    /// Coding rate denominator (4/x)
    pub coding_rate4: Bounds<u8>,
    /// Preamble length in symbols
    pub preamble_length: Bounds<u16>,
    /// Whether `end_packet` may return before transmission completes
    pub async_tx: bool,
}

impl Limits {
    /// Clamp a gain level
    pub fn gain(&self, level: u8) -> u8 {
        level.min(self.gain_max)
    }

    /// Clamp a bandwidth and snap it to the smallest supported bandwidth not below it
    pub fn bandwidth(&self, hz: u32) -> u32 {
        match self.bandwidths.iter().copied().find(|&bw| bw >= hz) {
            Some(bw) => bw,
            None => self.bandwidths.last().copied().unwrap_or(hz),
        }
    }
}

/// LoRa modem settings as applied to the hardware
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RadioSettings {
    /// Carrier frequency in Hz
    pub frequency: u32,
    /// Spreading factor
    pub spreading_factor: u8,
    /// Signal bandwidth in Hz
    pub signal_bandwidth: u32,
    /// Coding rate denominator (4/x)
    pub coding_rate4: u8,
    /// Preamble length in symbols
    pub preamble_length: u16,
    /// Sync word
    pub sync_word: u8,
    /// LNA gain level, 0 = AGC
    pub gain: u8,
    /// Transmit power in dBm
    pub tx_power: u8,
    /// Payload CRC enabled
    pub crc: bool,
    /// IQ inversion enabled
    pub invert_iq: bool,
    /// Low data rate optimization enabled
    pub low_data_rate_optimize: bool,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            frequency: 868_000_000,
            spreading_factor: 7,
            signal_bandwidth: 125_000,
            coding_rate4: 5,
            preamble_length: 16,
            sync_word: 0x34,
            gain: 0,
            tx_power: 2,
            crc: true,
            invert_iq: false,
            low_data_rate_optimize: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANDWIDTHS: [u32; 3] = [7_800, 125_000, 500_000];

    fn limits() -> Limits {
        Limits {
            gain_max: 6,
            tx_power: Bounds::new(2, 20),
            frequency: Bounds::new(137_000_000, 1_020_000_000),
            spreading_factor: Bounds::new(6, 12),
            bandwidths: &BANDWIDTHS,
            coding_rate4: Bounds::new(5, 8),
            preamble_length: Bounds::new(6, u16::MAX),
            async_tx: true,
        }
    }

    #[test]
    fn bounds_clamp_to_nearest_edge() {
        let b = Bounds::new(5u8, 8);
        assert_eq!(b.clamp(0), 5);
        assert_eq!(b.clamp(6), 6);
        assert_eq!(b.clamp(200), 8);
        assert!(b.contains(8));
        assert!(!b.contains(9));
    }

    #[test]
    fn bandwidth_snaps_up_and_saturates() {
        let l = limits();
        assert_eq!(l.bandwidth(1_000), 7_800);
        assert_eq!(l.bandwidth(7_800), 7_800);
        assert_eq!(l.bandwidth(100_000), 125_000);
        assert_eq!(l.bandwidth(900_000), 500_000);
    }

    #[test]
    fn gain_saturates_at_max() {
        assert_eq!(limits().gain(9), 6);
        assert_eq!(limits().gain(0), 0);
    }
}
