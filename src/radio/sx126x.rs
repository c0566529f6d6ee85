use embedded_hal::{
    blocking::delay::DelayMs,
    blocking::spi::{Transfer, Write},
    digital::v2::{InputPin, OutputPin},
};

use crate::radio::settings::{Bounds, Limits};
use crate::radio::traits::{IrqFlags, PacketStatus, Transceiver};
use crate::radio::DriverError;

// SX126x Register Map
mod registers {
    pub const REG_IQ_POLARITY_SETUP: u16 = 0x0736;
    pub const REG_LORA_SYNC_WORD_MSB: u16 = 0x0740;
    pub const REG_RX_GAIN: u16 = 0x08AC;
}

mod commands {
    pub const NOP: u8 = 0x00;
    pub const SET_SLEEP: u8 = 0x84;
    pub const SET_STANDBY: u8 = 0x80;
    pub const SET_TX: u8 = 0x83;
    pub const SET_RX: u8 = 0x82;
    pub const SET_CAD: u8 = 0xC5;
    pub const SET_CAD_PARAMS: u8 = 0x88;
    pub const SET_REGULATOR_MODE: u8 = 0x96;
    pub const CALIBRATE: u8 = 0x89;
    pub const SET_PA_CONFIG: u8 = 0x95;
    pub const WRITE_REGISTER: u8 = 0x0D;
    pub const READ_REGISTER: u8 = 0x1D;
    pub const WRITE_BUFFER: u8 = 0x0E;
    pub const READ_BUFFER: u8 = 0x1E;
    pub const SET_BUFFER_BASE: u8 = 0x8F;
    pub const SET_DIO_IRQ_PARAMS: u8 = 0x08;
    pub const GET_IRQ_STATUS: u8 = 0x12;
    pub const CLR_IRQ_STATUS: u8 = 0x02;
    pub const SET_DIO2_AS_RF_SWITCH_CTRL: u8 = 0x9D;
    pub const SET_RF_FREQUENCY: u8 = 0x86;
    pub const SET_PKT_TYPE: u8 = 0x8A;
    pub const SET_TX_PARAMS: u8 = 0x8E;
    pub const SET_MODULATION_PARAMS: u8 = 0x8B;
    pub const SET_PKT_PARAMS: u8 = 0x8C;
    pub const GET_RX_BUFFER_STATUS: u8 = 0x13;
    pub const GET_PKT_STATUS: u8 = 0x14;
    pub const GET_RSSI_INST: u8 = 0x15;
}

// IRQ bits
const IRQ_TX_DONE: u16 = 0x0001;
const IRQ_RX_DONE: u16 = 0x0002;
const IRQ_CRC_ERROR: u16 = 0x0040;
const IRQ_CAD_DONE: u16 = 0x0080;
const IRQ_CAD_DETECTED: u16 = 0x0100;
const IRQ_ALL: u16 = 0x03FF;

/// Reset value of the LoRa sync word MSB, read back to probe the chip
const SYNC_WORD_MSB_RESET: u8 = 0x14;
const BUSY_TIMEOUT_MS: u32 = 100;
const FXOSC: u64 = 32_000_000;

/// Signal bandwidths of the SX126x
pub const BANDWIDTHS: [u32; 10] = [
    7_810, 10_420, 15_630, 20_830, 31_250, 41_670, 62_500, 125_000, 250_000, 500_000,
];

/// `SetModulationParams` codes, parallel to [`BANDWIDTHS`]
const BANDWIDTH_CODES: [u8; 10] = [0x00, 0x08, 0x01, 0x09, 0x02, 0x0A, 0x03, 0x04, 0x05, 0x06];

/// Legal settings of the SX1262 high power PA
pub const LIMITS: Limits = Limits {
    gain_max: 1,
    tx_power: Bounds::new(0, 22),
    frequency: Bounds::new(150_000_000, 960_000_000),
    spreading_factor: Bounds::new(5, 12),
    bandwidths: &BANDWIDTHS,
    coding_rate4: Bounds::new(5, 8),
    preamble_length: Bounds::new(1, u16::MAX),
    async_tx: false,
};

/// Modulation and packet parameters; the chip takes them as two whole blocks
#[derive(Debug, Clone, Copy)]
struct LinkParams {
    spreading_factor: u8,
    bandwidth_code: u8,
    coding_rate: u8,
    low_data_rate_optimize: bool,
    preamble_length: u16,
    implicit_header: bool,
    payload_length: u8,
    crc: bool,
    invert_iq: bool,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            spreading_factor: 7,
            bandwidth_code: 0x04,
            coding_rate: 1,
            low_data_rate_optimize: false,
            preamble_length: 8,
            implicit_header: false,
            payload_length: 0xFF,
            crc: true,
            invert_iq: false,
        }
    }
}

/// SX126x (SX1261/SX1262) transceiver backend
pub struct Sx126x<SPI, CS, RESET, BUSY, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    BUSY: InputPin,
    DELAY: DelayMs<u32>,
{
    spi: SPI,
    cs: CS,
    reset: RESET,
    busy: BUSY,
    delay: DELAY,
    params: LinkParams,
    rx_start: u8,
}

impl<SPI, CS, RESET, BUSY, DELAY> Sx126x<SPI, CS, RESET, BUSY, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    BUSY: InputPin,
    DELAY: DelayMs<u32>,
{
    /// Create new SX126x driver instance
    ///
    /// # Arguments
    /// * `spi` - SPI interface
    /// * `cs` - Chip select pin
    /// * `reset` - Reset pin
    /// * `busy` - Busy pin
    /// * `delay` - Delay implementation
    pub fn new(spi: SPI, cs: CS, reset: RESET, busy: BUSY, delay: DELAY) -> Self {
        Self {
            spi,
            cs,
            reset,
            busy,
            delay,
            params: LinkParams::default(),
            rx_start: 0,
        }
    }

    /// Give back the bus and pins
    pub fn release(self) -> (SPI, CS, RESET, BUSY, DELAY) {
        (self.spi, self.cs, self.reset, self.busy, self.delay)
    }

    fn wait_busy(&mut self) -> Result<(), DriverError> {
        for _ in 0..BUSY_TIMEOUT_MS {
            if self.busy.is_low().map_err(|_| DriverError::Gpio)? {
                return Ok(());
            }
            self.delay.delay_ms(1);
        }
        Err(DriverError::Timeout)
    }

    /// Clock out `header` then `data` in one chip select cycle
    fn command(&mut self, header: &[u8], data: &[u8]) -> Result<(), DriverError> {
        self.cs.set_low().map_err(|_| DriverError::Gpio)?;
        let mut result = self.spi.write(header);
        if result.is_ok() && !data.is_empty() {
            result = self.spi.write(data);
        }
        self.cs.set_high().map_err(|_| DriverError::Gpio)?;
        result.map_err(|_| DriverError::Spi)?;
        self.wait_busy()
    }

    /// Clock out `header`, then clock the response into `out`
    fn query(&mut self, header: &[u8], out: &mut [u8]) -> Result<(), DriverError> {
        self.cs.set_low().map_err(|_| DriverError::Gpio)?;
        let result = match self.spi.write(header) {
            Ok(()) => self.spi.transfer(out).map(|_| ()).map_err(|_| DriverError::Spi),
            Err(_) => Err(DriverError::Spi),
        };
        self.cs.set_high().map_err(|_| DriverError::Gpio)?;
        result?;
        self.wait_busy()
    }

    fn write_command(&mut self, command: u8, data: &[u8]) -> Result<(), DriverError> {
        self.command(&[command], data)
    }

    fn read_command(&mut self, command: u8, data: &mut [u8]) -> Result<(), DriverError> {
        // NOP clocks out the status byte
        self.query(&[command, commands::NOP], data)
    }

    fn write_register(&mut self, address: u16, data: &[u8]) -> Result<(), DriverError> {
        let [hi, lo] = address.to_be_bytes();
        self.command(&[commands::WRITE_REGISTER, hi, lo], data)
    }

    fn read_register(&mut self, address: u16, data: &mut [u8]) -> Result<(), DriverError> {
        let [hi, lo] = address.to_be_bytes();
        self.query(&[commands::READ_REGISTER, hi, lo, commands::NOP], data)
    }

    fn write_modulation_params(&mut self) -> Result<(), DriverError> {
        let p = self.params;
        self.write_command(
            commands::SET_MODULATION_PARAMS,
            &[
                p.spreading_factor,
                p.bandwidth_code,
                p.coding_rate,
                p.low_data_rate_optimize as u8,
            ],
        )
    }

    fn write_packet_params(&mut self) -> Result<(), DriverError> {
        let p = self.params;
        let [preamble_msb, preamble_lsb] = p.preamble_length.to_be_bytes();
        self.write_command(
            commands::SET_PKT_PARAMS,
            &[
                preamble_msb,
                preamble_lsb,
                p.implicit_header as u8,
                p.payload_length,
                p.crc as u8,
                p.invert_iq as u8,
            ],
        )
    }

    fn clear_irq(&mut self, mask: u16) -> Result<(), DriverError> {
        self.write_command(commands::CLR_IRQ_STATUS, &mask.to_be_bytes())
    }
}

impl<SPI, CS, RESET, BUSY, DELAY> Transceiver for Sx126x<SPI, CS, RESET, BUSY, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    BUSY: InputPin,
    DELAY: DelayMs<u32>,
{
    type Error = DriverError;

    fn limits(&self) -> Limits {
        LIMITS
    }

    fn init(&mut self) -> Result<(), Self::Error> {
        // Reset sequence
        self.reset.set_low().map_err(|_| DriverError::Gpio)?;
        self.delay.delay_ms(10);
        self.reset.set_high().map_err(|_| DriverError::Gpio)?;
        self.delay.delay_ms(10);
        self.wait_busy()?;

        // Set to standby mode
        self.write_command(commands::SET_STANDBY, &[0x00])?; // STDBY_RC

        let mut sync_msb = [0u8];
        self.read_register(registers::REG_LORA_SYNC_WORD_MSB, &mut sync_msb)?;
        if sync_msb[0] != SYNC_WORD_MSB_RESET {
            return Err(DriverError::Hardware);
        }

        // Set packet type to LoRa
        self.write_command(commands::SET_PKT_TYPE, &[0x01])?;
        // Set DIO2 as RF switch control
        self.write_command(commands::SET_DIO2_AS_RF_SWITCH_CTRL, &[0x01])?;
        // Set regulator mode to DC-DC
        self.write_command(commands::SET_REGULATOR_MODE, &[0x01])?;
        // Calibrate all blocks
        self.write_command(commands::CALIBRATE, &[0x7F])?;

        self.write_command(commands::SET_BUFFER_BASE, &[0x00, 0x00])?;
        self.write_command(commands::SET_PA_CONFIG, &[0x04, 0x07, 0x00, 0x01])?;

        // Route every IRQ to DIO1
        let [mask_hi, mask_lo] = IRQ_ALL.to_be_bytes();
        self.write_command(
            commands::SET_DIO_IRQ_PARAMS,
            &[mask_hi, mask_lo, mask_hi, mask_lo, 0, 0, 0, 0],
        )?;

        self.params = LinkParams::default();
        self.write_modulation_params()?;
        self.write_packet_params()
    }

    fn standby(&mut self) -> Result<(), Self::Error> {
        self.write_command(commands::SET_STANDBY, &[0x00])
    }

    fn sleep(&mut self) -> Result<(), Self::Error> {
        // Warm start keeps the configuration
        self.write_command(commands::SET_SLEEP, &[0x04])
    }

    fn set_frequency(&mut self, hz: u32) -> Result<(), Self::Error> {
        let frf = (((hz as u64) << 25) / FXOSC) as u32;
        self.write_command(commands::SET_RF_FREQUENCY, &frf.to_be_bytes())
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), Self::Error> {
        self.params.spreading_factor = sf;
        self.write_modulation_params()
    }

    fn set_bandwidth(&mut self, hz: u32) -> Result<(), Self::Error> {
        let index = BANDWIDTHS
            .iter()
            .position(|&bw| bw >= hz)
            .unwrap_or(BANDWIDTHS.len() - 1);
        self.params.bandwidth_code = BANDWIDTH_CODES[index];
        self.write_modulation_params()
    }

    fn set_coding_rate4(&mut self, denominator: u8) -> Result<(), Self::Error> {
        self.params.coding_rate = denominator.saturating_sub(4);
        self.write_modulation_params()
    }

    fn set_preamble_length(&mut self, length: u16) -> Result<(), Self::Error> {
        self.params.preamble_length = length;
        self.write_packet_params()
    }

    fn set_sync_word(&mut self, sync_word: u8) -> Result<(), Self::Error> {
        self.write_register(
            registers::REG_LORA_SYNC_WORD_MSB,
            &[(sync_word & 0xF0) | 0x04, (sync_word << 4) | 0x04],
        )
    }

    fn set_crc(&mut self, enabled: bool) -> Result<(), Self::Error> {
        self.params.crc = enabled;
        self.write_packet_params()
    }

    fn set_invert_iq(&mut self, enabled: bool) -> Result<(), Self::Error> {
        self.params.invert_iq = enabled;
        self.write_packet_params()?;

        // Datasheet errata 15.4: IQ polarity register must track the packet setting
        let mut iq = [0u8];
        self.read_register(registers::REG_IQ_POLARITY_SETUP, &mut iq)?;
        let iq = if enabled { iq[0] & !0x04 } else { iq[0] | 0x04 };
        self.write_register(registers::REG_IQ_POLARITY_SETUP, &[iq])
    }

    fn set_low_data_rate_optimize(&mut self, enabled: bool) -> Result<(), Self::Error> {
        self.params.low_data_rate_optimize = enabled;
        self.write_modulation_params()
    }

    fn set_tx_power(&mut self, dbm: u8) -> Result<(), Self::Error> {
        // 40 us ramp
        self.write_command(commands::SET_TX_PARAMS, &[dbm.min(22), 0x02])
    }

    fn set_gain(&mut self, level: u8) -> Result<(), Self::Error> {
        let value = if level == 0 { 0x94 } else { 0x96 };
        self.write_register(registers::REG_RX_GAIN, &[value])
    }

    fn start_transmit(&mut self, payload: &[u8], implicit_header: bool) -> Result<(), Self::Error> {
        self.standby()?;
        self.command(&[commands::WRITE_BUFFER, 0x00], payload)?;

        self.params.implicit_header = implicit_header;
        self.params.payload_length = payload.len() as u8;
        self.write_packet_params()?;

        self.clear_irq(IRQ_ALL)?;
        // No timeout
        self.write_command(commands::SET_TX, &[0x00, 0x00, 0x00])
    }

    fn start_receive(&mut self, implicit_len: Option<u8>) -> Result<(), Self::Error> {
        self.params.implicit_header = implicit_len.is_some();
        self.params.payload_length = implicit_len.unwrap_or(0xFF);
        self.write_packet_params()?;

        self.clear_irq(IRQ_ALL)?;
        // Continuous receive
        self.write_command(commands::SET_RX, &[0xFF, 0xFF, 0xFF])
    }

    fn start_cad(&mut self) -> Result<(), Self::Error> {
        let sf = self.params.spreading_factor;
        // 4 symbols, CAD_ONLY exit
        self.write_command(
            commands::SET_CAD_PARAMS,
            &[0x02, sf + 13, 10, 0x00, 0x00, 0x00, 0x00],
        )?;
        self.clear_irq(IRQ_ALL)?;
        self.write_command(commands::SET_CAD, &[])
    }

    fn take_irq(&mut self) -> Result<IrqFlags, Self::Error> {
        let mut status = [0u8; 2];
        self.read_command(commands::GET_IRQ_STATUS, &mut status)?;
        let flags = u16::from_be_bytes(status);
        if flags != 0 {
            self.clear_irq(flags)?;
        }
        Ok(IrqFlags {
            tx_done: flags & IRQ_TX_DONE != 0,
            rx_done: flags & IRQ_RX_DONE != 0,
            crc_error: flags & IRQ_CRC_ERROR != 0,
            cad_done: flags & IRQ_CAD_DONE != 0,
            cad_detected: flags & IRQ_CAD_DETECTED != 0,
        })
    }

    fn received_len(&mut self) -> Result<usize, Self::Error> {
        let mut status = [0u8; 2];
        self.read_command(commands::GET_RX_BUFFER_STATUS, &mut status)?;
        self.rx_start = status[1];
        Ok(status[0] as usize)
    }

    fn read_payload(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.query(&[commands::READ_BUFFER, self.rx_start, commands::NOP], buf)
    }

    fn packet_status(&mut self) -> Result<PacketStatus, Self::Error> {
        let mut status = [0u8; 3];
        self.read_command(commands::GET_PKT_STATUS, &mut status)?;
        Ok(PacketStatus {
            rssi: -(status[0] as i16) / 2,
            snr: status[1] as i8 as f32 / 4.0,
            frequency_error: 0,
        })
    }

    fn rssi(&mut self) -> Result<i16, Self::Error> {
        let mut rssi = [0u8];
        self.read_command(commands::GET_RSSI_INST, &mut rssi)?;
        Ok(-(rssi[0] as i16) / 2)
    }
}
