use embedded_hal::{
    blocking::delay::DelayMs,
    blocking::spi::{Transfer, Write},
    digital::v2::OutputPin,
};

use crate::radio::settings::{Bounds, Limits};
use crate::radio::traits::{IrqFlags, PacketStatus, Transceiver};
use crate::radio::DriverError;

// SX127x Register Map
const REG_FIFO: u8 = 0x00;
const REG_OP_MODE: u8 = 0x01;
const REG_FRF_MSB: u8 = 0x06;
const REG_FRF_MID: u8 = 0x07;
const REG_FRF_LSB: u8 = 0x08;
const REG_PA_CONFIG: u8 = 0x09;
const REG_OCP: u8 = 0x0B;
const REG_LNA: u8 = 0x0C;
const REG_FIFO_ADDR_PTR: u8 = 0x0D;
const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;
const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;
const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
const REG_IRQ_FLAGS: u8 = 0x12;
const REG_RX_NB_BYTES: u8 = 0x13;
const REG_PKT_SNR_VALUE: u8 = 0x19;
const REG_PKT_RSSI_VALUE: u8 = 0x1A;
const REG_RSSI_VALUE: u8 = 0x1B;
const REG_MODEM_CONFIG_1: u8 = 0x1D;
const REG_MODEM_CONFIG_2: u8 = 0x1E;
const REG_PREAMBLE_MSB: u8 = 0x20;
const REG_PREAMBLE_LSB: u8 = 0x21;
const REG_PAYLOAD_LENGTH: u8 = 0x22;
const REG_MODEM_CONFIG_3: u8 = 0x26;
const REG_FREQ_ERROR_MSB: u8 = 0x28;
const REG_FREQ_ERROR_MID: u8 = 0x29;
const REG_FREQ_ERROR_LSB: u8 = 0x2A;
const REG_DETECTION_OPTIMIZE: u8 = 0x31;
const REG_INVERTIQ: u8 = 0x33;
const REG_DETECTION_THRESHOLD: u8 = 0x37;
const REG_SYNC_WORD: u8 = 0x39;
const REG_INVERTIQ2: u8 = 0x3B;
const REG_DIO_MAPPING_1: u8 = 0x40;
const REG_VERSION: u8 = 0x42;
const REG_PA_DAC: u8 = 0x4D;

// Operating Mode bits
const MODE_LONG_RANGE_MODE: u8 = 0x80;
const MODE_SLEEP: u8 = 0x00;
const MODE_STDBY: u8 = 0x01;
const MODE_TX: u8 = 0x03;
const MODE_RX_CONTINUOUS: u8 = 0x05;
const MODE_CAD: u8 = 0x07;

// PA Config
const PA_BOOST: u8 = 0x80;

// IRQ Flags
const IRQ_CAD_DETECTED_MASK: u8 = 0x01;
const IRQ_CAD_DONE_MASK: u8 = 0x04;
const IRQ_TX_DONE_MASK: u8 = 0x08;
const IRQ_PAYLOAD_CRC_ERROR_MASK: u8 = 0x20;
const IRQ_RX_DONE_MASK: u8 = 0x40;

// DIO0 mapping
const DIO0_RX_DONE: u8 = 0x00;
const DIO0_TX_DONE: u8 = 0x40;
const DIO0_CAD_DONE: u8 = 0x80;

const CHIP_VERSION: u8 = 0x12;
const FXOSC: u64 = 32_000_000;
/// Frequencies below this use the LF port and its RSSI offset
const MID_BAND_THRESHOLD: u32 = 525_000_000;

/// Signal bandwidths selectable in `REG_MODEM_CONFIG_1`, indexed by register value
pub const BANDWIDTHS: [u32; 10] = [
    7_800, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000, 500_000,
];

/// Legal settings of the SX127x with its PA_BOOST output
pub const LIMITS: Limits = Limits {
    gain_max: 6,
    tx_power: Bounds::new(2, 20),
    frequency: Bounds::new(137_000_000, 1_020_000_000),
    spreading_factor: Bounds::new(6, 12),
    bandwidths: &BANDWIDTHS,
    coding_rate4: Bounds::new(5, 8),
    preamble_length: Bounds::new(6, u16::MAX),
    async_tx: true,
};

/// SX127x (RFM95/96/98) transceiver backend
pub struct Sx127x<SPI, CS, RESET, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    DELAY: DelayMs<u32>,
{
    spi: SPI,
    cs: CS,
    reset: RESET,
    delay: DELAY,
    frequency: u32,
    bandwidth: u32,
}

impl<SPI, CS, RESET, DELAY> Sx127x<SPI, CS, RESET, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    DELAY: DelayMs<u32>,
{
    /// Create new instance of SX127x driver, the chip is touched only by `init`
    pub fn new(spi: SPI, cs: CS, reset: RESET, delay: DELAY) -> Self {
        Self {
            spi,
            cs,
            reset,
            delay,
            frequency: 0,
            bandwidth: 125_000,
        }
    }

    /// Give back the bus and pins
    pub fn release(self) -> (SPI, CS, RESET, DELAY) {
        (self.spi, self.cs, self.reset, self.delay)
    }

    /// Read a radio register
    fn read_register(&mut self, addr: u8) -> Result<u8, DriverError> {
        self.cs.set_low().map_err(|_| DriverError::Gpio)?;
        let mut buffer = [addr & 0x7F, 0];
        let result = self.spi.transfer(&mut buffer).map(|b| b[1]);
        self.cs.set_high().map_err(|_| DriverError::Gpio)?;
        result.map_err(|_| DriverError::Spi)
    }

    /// Write to a radio register
    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), DriverError> {
        self.cs.set_low().map_err(|_| DriverError::Gpio)?;
        let result = self.spi.write(&[addr | 0x80, value]);
        self.cs.set_high().map_err(|_| DriverError::Gpio)?;
        result.map_err(|_| DriverError::Spi)
    }

    /// Read-modify-write: clear `mask`, then set `bits`
    fn update_register(&mut self, addr: u8, mask: u8, bits: u8) -> Result<(), DriverError> {
        let value = self.read_register(addr)?;
        self.write_register(addr, (value & !mask) | bits)
    }

    fn write_fifo(&mut self, data: &[u8]) -> Result<(), DriverError> {
        self.cs.set_low().map_err(|_| DriverError::Gpio)?;
        let result = self
            .spi
            .write(&[REG_FIFO | 0x80])
            .and_then(|_| self.spi.write(data));
        self.cs.set_high().map_err(|_| DriverError::Gpio)?;
        result.map_err(|_| DriverError::Spi)
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), DriverError> {
        self.cs.set_low().map_err(|_| DriverError::Gpio)?;
        let result = match self.spi.write(&[REG_FIFO & 0x7F]) {
            Ok(()) => self.spi.transfer(buf).map(|_| ()).map_err(|_| DriverError::Spi),
            Err(_) => Err(DriverError::Spi),
        };
        self.cs.set_high().map_err(|_| DriverError::Gpio)?;
        result
    }

    /// Set operating mode
    fn set_mode(&mut self, mode: u8) -> Result<(), DriverError> {
        self.write_register(REG_OP_MODE, MODE_LONG_RANGE_MODE | mode)
    }

    /// Set the over-current protection trim in mA
    fn set_ocp(&mut self, milliamps: u8) -> Result<(), DriverError> {
        let trim = match milliamps {
            0..=120 => milliamps.saturating_sub(45) / 5,
            121..=240 => ((milliamps as u16 + 30) / 10) as u8,
            _ => 27,
        };
        self.write_register(REG_OCP, 0x20 | (trim & 0x1F))
    }

    fn rssi_offset(&self) -> i16 {
        if self.frequency < MID_BAND_THRESHOLD {
            164
        } else {
            157
        }
    }
}

impl<SPI, CS, RESET, DELAY> Transceiver for Sx127x<SPI, CS, RESET, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    DELAY: DelayMs<u32>,
{
    type Error = DriverError;

    fn limits(&self) -> Limits {
        LIMITS
    }

    fn init(&mut self) -> Result<(), Self::Error> {
        // Perform hardware reset
        self.reset.set_low().map_err(|_| DriverError::Gpio)?;
        self.delay.delay_ms(10);
        self.reset.set_high().map_err(|_| DriverError::Gpio)?;
        self.delay.delay_ms(10);

        // Check version
        if self.read_register(REG_VERSION)? != CHIP_VERSION {
            return Err(DriverError::Hardware);
        }

        // LoRa mode can only be selected in sleep
        self.set_mode(MODE_SLEEP)?;

        // Set base addresses
        self.write_register(REG_FIFO_TX_BASE_ADDR, 0x00)?;
        self.write_register(REG_FIFO_RX_BASE_ADDR, 0x00)?;

        // Set LNA boost
        let lna = self.read_register(REG_LNA)?;
        self.write_register(REG_LNA, lna | 0x03)?;

        // Set auto AGC
        self.write_register(REG_MODEM_CONFIG_3, 0x04)?;

        self.set_mode(MODE_STDBY)
    }

    fn standby(&mut self) -> Result<(), Self::Error> {
        self.set_mode(MODE_STDBY)
    }

    fn sleep(&mut self) -> Result<(), Self::Error> {
        self.set_mode(MODE_SLEEP)
    }

    fn set_frequency(&mut self, hz: u32) -> Result<(), Self::Error> {
        let frf = ((hz as u64) << 19) / FXOSC;

        self.write_register(REG_FRF_MSB, (frf >> 16) as u8)?;
        self.write_register(REG_FRF_MID, (frf >> 8) as u8)?;
        self.write_register(REG_FRF_LSB, frf as u8)?;
        self.frequency = hz;
        Ok(())
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), Self::Error> {
        if sf == 6 {
            self.write_register(REG_DETECTION_OPTIMIZE, 0xC5)?;
            self.write_register(REG_DETECTION_THRESHOLD, 0x0C)?;
        } else {
            self.write_register(REG_DETECTION_OPTIMIZE, 0xC3)?;
            self.write_register(REG_DETECTION_THRESHOLD, 0x0A)?;
        }
        self.update_register(REG_MODEM_CONFIG_2, 0xF0, sf << 4)
    }

    fn set_bandwidth(&mut self, hz: u32) -> Result<(), Self::Error> {
        let index = BANDWIDTHS
            .iter()
            .position(|&bw| bw >= hz)
            .unwrap_or(BANDWIDTHS.len() - 1) as u8;
        self.update_register(REG_MODEM_CONFIG_1, 0xF0, index << 4)?;
        self.bandwidth = BANDWIDTHS[index as usize];
        Ok(())
    }

    fn set_coding_rate4(&mut self, denominator: u8) -> Result<(), Self::Error> {
        let cr = denominator.saturating_sub(4) & 0x07;
        self.update_register(REG_MODEM_CONFIG_1, 0x0E, cr << 1)
    }

    fn set_preamble_length(&mut self, length: u16) -> Result<(), Self::Error> {
        self.write_register(REG_PREAMBLE_MSB, (length >> 8) as u8)?;
        self.write_register(REG_PREAMBLE_LSB, length as u8)
    }

    fn set_sync_word(&mut self, sync_word: u8) -> Result<(), Self::Error> {
        self.write_register(REG_SYNC_WORD, sync_word)
    }

    fn set_crc(&mut self, enabled: bool) -> Result<(), Self::Error> {
        self.update_register(REG_MODEM_CONFIG_2, 0x04, if enabled { 0x04 } else { 0 })
    }

    fn set_invert_iq(&mut self, enabled: bool) -> Result<(), Self::Error> {
        if enabled {
            self.write_register(REG_INVERTIQ, 0x66)?;
            self.write_register(REG_INVERTIQ2, 0x19)
        } else {
            self.write_register(REG_INVERTIQ, 0x27)?;
            self.write_register(REG_INVERTIQ2, 0x1D)
        }
    }

    fn set_low_data_rate_optimize(&mut self, enabled: bool) -> Result<(), Self::Error> {
        self.update_register(REG_MODEM_CONFIG_3, 0x08, if enabled { 0x08 } else { 0 })
    }

    fn set_tx_power(&mut self, dbm: u8) -> Result<(), Self::Error> {
        let mut level = dbm.clamp(2, 20);
        if level > 17 {
            // +20 dBm needs the high power DAC and a higher current limit
            level -= 3;
            self.write_register(REG_PA_DAC, 0x87)?;
            self.set_ocp(140)?;
        } else {
            self.write_register(REG_PA_DAC, 0x84)?;
            self.set_ocp(100)?;
        }
        self.write_register(REG_PA_CONFIG, PA_BOOST | (level - 2))
    }

    fn set_gain(&mut self, level: u8) -> Result<(), Self::Error> {
        if level == 0 {
            self.update_register(REG_MODEM_CONFIG_3, 0x04, 0x04)
        } else {
            self.update_register(REG_MODEM_CONFIG_3, 0x04, 0)?;
            self.write_register(REG_LNA, (level.min(6) << 5) | 0x03)
        }
    }

    fn start_transmit(&mut self, payload: &[u8], implicit_header: bool) -> Result<(), Self::Error> {
        self.set_mode(MODE_STDBY)?;
        self.update_register(REG_MODEM_CONFIG_1, 0x01, implicit_header as u8)?;

        // Reset FIFO address and payload length
        self.write_register(REG_FIFO_ADDR_PTR, 0)?;
        self.write_fifo(payload)?;
        self.write_register(REG_PAYLOAD_LENGTH, payload.len() as u8)?;

        self.write_register(REG_IRQ_FLAGS, 0xFF)?;
        self.write_register(REG_DIO_MAPPING_1, DIO0_TX_DONE)?;
        self.set_mode(MODE_TX)
    }

    fn start_receive(&mut self, implicit_len: Option<u8>) -> Result<(), Self::Error> {
        match implicit_len {
            Some(len) => {
                self.update_register(REG_MODEM_CONFIG_1, 0x01, 0x01)?;
                self.write_register(REG_PAYLOAD_LENGTH, len)?;
            }
            None => self.update_register(REG_MODEM_CONFIG_1, 0x01, 0)?,
        }
        self.write_register(REG_DIO_MAPPING_1, DIO0_RX_DONE)?;
        self.set_mode(MODE_RX_CONTINUOUS)
    }

    fn start_cad(&mut self) -> Result<(), Self::Error> {
        self.write_register(REG_IRQ_FLAGS, IRQ_CAD_DONE_MASK | IRQ_CAD_DETECTED_MASK)?;
        self.write_register(REG_DIO_MAPPING_1, DIO0_CAD_DONE)?;
        self.set_mode(MODE_CAD)
    }

    fn take_irq(&mut self) -> Result<IrqFlags, Self::Error> {
        let flags = self.read_register(REG_IRQ_FLAGS)?;
        if flags != 0 {
            self.write_register(REG_IRQ_FLAGS, flags)?;
        }
        Ok(IrqFlags {
            tx_done: flags & IRQ_TX_DONE_MASK != 0,
            rx_done: flags & IRQ_RX_DONE_MASK != 0,
            crc_error: flags & IRQ_PAYLOAD_CRC_ERROR_MASK != 0,
            cad_done: flags & IRQ_CAD_DONE_MASK != 0,
            cad_detected: flags & IRQ_CAD_DETECTED_MASK != 0,
        })
    }

    fn received_len(&mut self) -> Result<usize, Self::Error> {
        let implicit = self.read_register(REG_MODEM_CONFIG_1)? & 0x01 != 0;
        let len = if implicit {
            self.read_register(REG_PAYLOAD_LENGTH)?
        } else {
            self.read_register(REG_RX_NB_BYTES)?
        };
        Ok(len as usize)
    }

    fn read_payload(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        let rx_addr = self.read_register(REG_FIFO_RX_CURRENT_ADDR)?;
        self.write_register(REG_FIFO_ADDR_PTR, rx_addr)?;
        self.read_fifo(buf)
    }

    fn packet_status(&mut self) -> Result<PacketStatus, Self::Error> {
        let rssi = self.read_register(REG_PKT_RSSI_VALUE)? as i16 - self.rssi_offset();
        let snr = self.read_register(REG_PKT_SNR_VALUE)? as i8 as f32 * 0.25;

        // 20-bit two's complement
        let msb = (self.read_register(REG_FREQ_ERROR_MSB)? & 0x0F) as i32;
        let mid = self.read_register(REG_FREQ_ERROR_MID)? as i32;
        let lsb = self.read_register(REG_FREQ_ERROR_LSB)? as i32;
        let mut raw = (msb << 16) | (mid << 8) | lsb;
        if raw & 0x8_0000 != 0 {
            raw -= 0x10_0000;
        }
        let frequency_error =
            (raw as f32 * (1u32 << 24) as f32 / FXOSC as f32 * (self.bandwidth as f32 / 500_000.0))
                as i32;

        Ok(PacketStatus {
            rssi,
            snr,
            frequency_error,
        })
    }

    fn rssi(&mut self) -> Result<i16, Self::Error> {
        Ok(self.read_register(REG_RSSI_VALUE)? as i16 - self.rssi_offset())
    }
}
