//! Generic LoRa radio on top of a [`Transceiver`]
//!
//! [`LoRaRadio`] owns the mode state machine, clamps every setting to the chip limits,
//! caches what was applied and runs the blocking transmit and channel activity loops.
//! The chip backend only has to provide register-level primitives.

use embedded_hal::blocking::delay::DelayMs;
use heapless::Vec;
use log::{debug, error, info, warn};

use crate::config::RadioConfig;
use crate::radio::mode::{ModeMachine, RadioMode};
use crate::radio::settings::{Limits, RadioSettings};
use crate::radio::traits::{
    IrqFlags, PacketReader, PacketStatus, Radio, RxCallback, Transceiver, TxDoneCallback,
};
use crate::radio::{RadioError, MAX_PACKET_LEN};

/// A LoRa radio driven through a transceiver backend
pub struct LoRaRadio<T: Transceiver, D> {
    device: T,
    delay: D,
    config: RadioConfig,
    limits: Limits,
    settings: RadioSettings,
    mode: ModeMachine,
    tx_buffer: Vec<u8, MAX_PACKET_LEN>,
    implicit_header: bool,
    rx_implicit_len: Option<u8>,
    cad_result: Option<bool>,
    on_rx: Option<RxCallback>,
    on_tx_done: Option<TxDoneCallback>,
}

/// Hands the receive callback access to the packet sitting in the chip
struct Reception<'a, T: Transceiver> {
    device: &'a mut T,
    status: PacketStatus,
}

impl<'a, T: Transceiver> PacketReader for Reception<'a, T> {
    fn packet_rssi(&self) -> i16 {
        self.status.rssi
    }

    fn packet_snr(&self) -> f32 {
        self.status.snr
    }

    fn packet_frequency_error(&self) -> i32 {
        self.status.frequency_error
    }

    fn read(&mut self, buf: &mut [u8]) -> bool {
        self.device.read_payload(buf).is_ok()
    }
}

impl<T, D> LoRaRadio<T, D>
where
    T: Transceiver,
    D: DelayMs<u32>,
{
    /// Wrap a transceiver; the radio stays uninitialized until [`Radio::init`]
    pub fn new(device: T, delay: D, config: RadioConfig) -> Self {
        let limits = device.limits();
        Self {
            device,
            delay,
            config,
            limits,
            settings: RadioSettings::default(),
            mode: ModeMachine::new(),
            tx_buffer: Vec::new(),
            implicit_header: false,
            rx_implicit_len: None,
            cad_result: None,
            on_rx: None,
            on_tx_done: None,
        }
    }

    /// Use `settings` instead of the defaults when the radio is brought up
    pub fn with_settings(mut self, settings: RadioSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Underlying transceiver
    pub fn device(&self) -> &T {
        &self.device
    }

    /// Underlying transceiver, mutable
    pub fn device_mut(&mut self) -> &mut T {
        &mut self.device
    }

    /// Give back the transceiver and the delay provider
    pub fn release(self) -> (T, D) {
        (self.device, self.delay)
    }

    fn ensure_initialized(&self) -> Result<(), RadioError<T::Error>> {
        if self.mode.is_initialized() {
            Ok(())
        } else {
            Err(RadioError::NotInitialized)
        }
    }

    fn bring_up(&mut self) -> Result<(), RadioError<T::Error>> {
        self.device.init().map_err(RadioError::Device)?;
        self.mode.enter(RadioMode::Standby)?;

        let s = self.settings;
        self.set_frequency(s.frequency)?;
        self.set_spreading_factor(s.spreading_factor)?;
        self.set_signal_bandwidth(s.signal_bandwidth)?;
        self.set_coding_rate4(s.coding_rate4)?;
        self.set_preamble_length(s.preamble_length)?;
        self.set_sync_word(s.sync_word)?;
        self.set_crc(s.crc)?;
        self.set_invert_iq(s.invert_iq)?;
        self.set_low_data_rate_optimize(s.low_data_rate_optimize)?;
        self.set_tx_power(s.tx_power)?;
        self.set_gain(s.gain)?;
        Ok(())
    }

    /// Write an already clamped value to the chip
    fn apply<V: Copy>(
        &mut self,
        value: V,
        write: impl FnOnce(&mut T, V) -> Result<(), T::Error>,
    ) -> Result<V, RadioError<T::Error>> {
        self.ensure_initialized()?;
        write(&mut self.device, value).map_err(RadioError::Device)?;
        Ok(value)
    }

    /// Validate the transition, run `op` on the chip and commit the new mode
    fn transition(
        &mut self,
        to: RadioMode,
        op: impl FnOnce(&mut T) -> Result<(), T::Error>,
    ) -> Result<(), RadioError<T::Error>> {
        // Only bring-up may leave Uninitialized
        self.ensure_initialized()?;
        let saved = self.mode;
        self.mode.enter(to)?;
        if let Err(e) = op(&mut self.device) {
            self.mode = saved;
            return Err(RadioError::Device(e));
        }
        Ok(())
    }

    /// Force chip and state machine back to standby after an aborted operation
    fn force_standby(&mut self) {
        if let Err(e) = self.device.standby() {
            warn!("failed to force standby: {:?}", e);
        }
        // Standby is reachable from every initialized mode
        let _ = self.mode.enter(RadioMode::Standby);
    }

    fn complete_transmit(&mut self) -> Result<(), RadioError<T::Error>> {
        match self.mode.finish_transmit() {
            RadioMode::Receiving => self
                .device
                .start_receive(self.rx_implicit_len)
                .map_err(RadioError::Device),
            _ => Ok(()),
        }
    }

    fn deliver_packet(&mut self) -> Result<(), RadioError<T::Error>> {
        let Some(callback) = self.on_rx.as_mut() else {
            return Ok(());
        };
        let len = self.device.received_len().map_err(RadioError::Device)?;
        let status = self.device.packet_status().map_err(RadioError::Device)?;
        let mut reader = Reception {
            device: &mut self.device,
            status,
        };
        callback(&mut reader, len);
        Ok(())
    }

    fn service(&mut self, flags: IrqFlags) -> Result<(), RadioError<T::Error>> {
        if flags.cad_done {
            self.cad_result = Some(flags.cad_detected);
        }
        if flags.tx_done && self.mode.current() == RadioMode::Transmitting {
            debug!("transmission done");
            self.complete_transmit()?;
            if let Some(callback) = self.on_tx_done.as_mut() {
                callback();
            }
        }
        if flags.rx_done {
            if flags.crc_error {
                debug!("dropping packet with CRC error");
            } else {
                self.deliver_packet()?;
            }
        }
        Ok(())
    }

    fn poll_irq(&mut self) -> Result<IrqFlags, RadioError<T::Error>> {
        let flags = self.device.take_irq().map_err(RadioError::Device)?;
        if !flags.is_empty() {
            self.service(flags)?;
        }
        Ok(flags)
    }

    fn sense_channel(&mut self) -> Result<bool, RadioError<T::Error>> {
        if self.mode.current() != RadioMode::Standby {
            self.transition(RadioMode::Standby, T::standby)?;
        }
        self.cad_result = None;
        self.transition(RadioMode::ChannelSensing, T::start_cad)?;

        let mut elapsed = 0;
        loop {
            self.poll_irq()?;
            if let Some(detected) = self.cad_result.take() {
                return Ok(detected);
            }
            if elapsed >= self.config.cad_timeout_ms {
                warn!("channel activity detection timed out after {} ms", elapsed);
                return Ok(true);
            }
            self.delay.delay_ms(1);
            elapsed += 1;
        }
    }
}

impl<T, D> Radio for LoRaRadio<T, D>
where
    T: Transceiver,
    D: DelayMs<u32>,
{
    type Error = RadioError<T::Error>;

    fn init(&mut self) -> Result<(), Self::Error> {
        self.mode.reset();
        if let Err(e) = self.bring_up() {
            error!("radio bring-up failed: {:?}", e);
            self.mode.reset();
            return Err(e);
        }
        info!("radio up at {} Hz", self.settings.frequency);
        Ok(())
    }

    fn mode(&self) -> RadioMode {
        self.mode.current()
    }

    fn limits(&self) -> Limits {
        self.limits
    }

    fn settings(&self) -> &RadioSettings {
        &self.settings
    }

    fn begin_packet(&mut self, implicit_header: bool) -> Result<(), Self::Error> {
        self.ensure_initialized()?;
        if self.mode.current() == RadioMode::Transmitting {
            return Err(RadioError::InvalidTransition {
                from: RadioMode::Transmitting,
                to: RadioMode::Transmitting,
            });
        }
        self.tx_buffer.clear();
        self.implicit_header = implicit_header;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(MAX_PACKET_LEN - self.tx_buffer.len());
        match self.tx_buffer.extend_from_slice(&data[..n]) {
            Ok(()) => n,
            Err(()) => 0,
        }
    }

    fn end_packet(&mut self, asynchronous: bool) -> Result<(), Self::Error> {
        self.ensure_initialized()?;
        if asynchronous && !self.limits.async_tx {
            return Err(RadioError::AsyncUnsupported);
        }
        self.mode.enter(RadioMode::Transmitting)?;
        debug!("transmitting {} bytes", self.tx_buffer.len());
        if let Err(e) = self
            .device
            .start_transmit(&self.tx_buffer, self.implicit_header)
        {
            self.force_standby();
            return Err(RadioError::Device(e));
        }
        if asynchronous {
            return Ok(());
        }

        let mut elapsed = 0;
        loop {
            let flags = match self.device.take_irq() {
                Ok(flags) => flags,
                Err(e) => {
                    self.force_standby();
                    return Err(RadioError::Device(e));
                }
            };
            if flags.tx_done {
                return self.complete_transmit();
            }
            if elapsed >= self.config.tx_timeout_ms {
                warn!("transmission timed out after {} ms", elapsed);
                self.force_standby();
                return Err(RadioError::Timeout);
            }
            self.delay.delay_ms(1);
            elapsed += 1;
        }
    }

    fn on_tx_done(&mut self, callback: Option<TxDoneCallback>) {
        self.on_tx_done = callback;
    }

    fn start_continuous_receive(&mut self, frame_size: usize) -> Result<(), Self::Error> {
        let implicit_len = match frame_size {
            0 => None,
            n => Some(n.min(MAX_PACKET_LEN) as u8),
        };
        self.transition(RadioMode::Receiving, |device| device.start_receive(implicit_len))?;
        self.rx_implicit_len = implicit_len;
        Ok(())
    }

    fn on_receive(&mut self, callback: Option<RxCallback>) {
        self.on_rx = callback;
    }

    fn handle_interrupt(&mut self) -> Result<(), Self::Error> {
        if !self.mode.is_initialized() {
            return Ok(());
        }
        self.poll_irq().map(|_| ())
    }

    fn standby(&mut self) -> Result<(), Self::Error> {
        self.transition(RadioMode::Standby, T::standby)
    }

    fn sleep(&mut self) -> Result<(), Self::Error> {
        self.transition(RadioMode::Sleep, T::sleep)
    }

    fn channel_active(&mut self) -> bool {
        match self.mode.current() {
            RadioMode::Uninitialized | RadioMode::Transmitting => return true,
            _ => {}
        }
        let busy = self.sense_channel().unwrap_or_else(|e| {
            warn!("channel activity detection failed: {:?}", e);
            true
        });
        self.force_standby();
        busy
    }

    fn rssi(&mut self) -> Result<i16, Self::Error> {
        self.ensure_initialized()?;
        self.device.rssi().map_err(RadioError::Device)
    }

    fn set_gain(&mut self, level: u8) -> Result<u8, Self::Error> {
        let level = self.apply(self.limits.gain(level), T::set_gain)?;
        self.settings.gain = level;
        Ok(level)
    }

    fn set_tx_power(&mut self, dbm: u8) -> Result<u8, Self::Error> {
        let dbm = self.apply(self.limits.tx_power.clamp(dbm), T::set_tx_power)?;
        self.settings.tx_power = dbm;
        Ok(dbm)
    }

    fn set_frequency(&mut self, hz: u32) -> Result<u32, Self::Error> {
        let hz = self.apply(self.limits.frequency.clamp(hz), T::set_frequency)?;
        self.settings.frequency = hz;
        Ok(hz)
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<u8, Self::Error> {
        let sf = self.apply(
            self.limits.spreading_factor.clamp(sf),
            T::set_spreading_factor,
        )?;
        self.settings.spreading_factor = sf;
        Ok(sf)
    }

    fn set_signal_bandwidth(&mut self, hz: u32) -> Result<u32, Self::Error> {
        let hz = self.apply(self.limits.bandwidth(hz), T::set_bandwidth)?;
        self.settings.signal_bandwidth = hz;
        Ok(hz)
    }

    fn set_coding_rate4(&mut self, denominator: u8) -> Result<u8, Self::Error> {
        let cr = self.apply(
            self.limits.coding_rate4.clamp(denominator),
            T::set_coding_rate4,
        )?;
        self.settings.coding_rate4 = cr;
        Ok(cr)
    }

    fn set_preamble_length(&mut self, length: u16) -> Result<u16, Self::Error> {
        let length = self.apply(
            self.limits.preamble_length.clamp(length),
            T::set_preamble_length,
        )?;
        self.settings.preamble_length = length;
        Ok(length)
    }

    fn set_sync_word(&mut self, sync_word: u8) -> Result<u8, Self::Error> {
        let sync_word = self.apply(sync_word, T::set_sync_word)?;
        self.settings.sync_word = sync_word;
        Ok(sync_word)
    }

    fn set_crc(&mut self, enabled: bool) -> Result<bool, Self::Error> {
        let enabled = self.apply(enabled, T::set_crc)?;
        self.settings.crc = enabled;
        Ok(enabled)
    }

    fn set_invert_iq(&mut self, enabled: bool) -> Result<bool, Self::Error> {
        let enabled = self.apply(enabled, T::set_invert_iq)?;
        self.settings.invert_iq = enabled;
        Ok(enabled)
    }

    fn set_low_data_rate_optimize(&mut self, enabled: bool) -> Result<bool, Self::Error> {
        let enabled = self.apply(enabled, T::set_low_data_rate_optimize)?;
        self.settings.low_data_rate_optimize = enabled;
        Ok(enabled)
    }
}
