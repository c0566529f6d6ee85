//! High-level modem interface
//!
//! [`Modem`] ties a [`Radio`] to the active control stream. The receive interrupt fills
//! a ring buffer, and [`Modem::tick`] drains it, emits telemetry and dispatches at most
//! one inbound command per call. The wire format is chosen by [`ModemConfig::framing`].

mod json;
mod kiss;

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;

use embedded_hal::blocking::delay::DelayMs;
use log::{debug, info, warn};

use crate::config::{Framing, ModemConfig};
use crate::protocol::json::{LineError, LineReader, Request, TxFailure};
use crate::protocol::kiss::{Decoder, Frame};
use crate::queue::{Consumer, RxQueue, RX_QUEUE_LEN};
use crate::radio::{PacketReader, Radio, ReceivedPacket, MAX_PACKET_LEN};
use crate::stream::{ClientStream, RevokedCallback, StreamError, StreamId, StreamManager};

/// Granularity of the receive wait between channel activity checks
const RX_POLL_STEP_MS: u32 = 10;

/// Monotonic millisecond clock that can also block
pub trait Clock: DelayMs<u32> {
    /// Milliseconds since an arbitrary fixed point
    fn now_ms(&self) -> u64;
}

/// Modem error type
#[derive(Debug)]
pub enum ModemError<E> {
    /// Radio could not be brought up; the device should be restarted
    RadioInit(E),
    /// Radio operation failed
    Radio(E),
    /// Receive queue handle already claimed
    QueueUnavailable,
    /// Control stream failed
    Stream(StreamError),
}

impl<E> From<StreamError> for ModemError<E> {
    fn from(error: StreamError) -> Self {
        ModemError::Stream(error)
    }
}

impl<E: fmt::Debug> fmt::Display for ModemError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModemError::RadioInit(e) => write!(f, "radio bring-up failed: {:?}", e),
            ModemError::Radio(e) => write!(f, "radio error: {:?}", e),
            ModemError::QueueUnavailable => f.write_str("receive queue already claimed"),
            ModemError::Stream(e) => write!(f, "{}", e),
        }
    }
}

#[cfg(feature = "std")]
impl<E: fmt::Debug> std::error::Error for ModemError<E> {}

/// Protocol decoder state
enum Link {
    Json(LineReader),
    Kiss(Decoder),
}

impl Link {
    fn new(framing: Framing) -> Self {
        match framing {
            Framing::Json => Link::Json(LineReader::new()),
            Framing::Kiss => Link::Kiss(Decoder::new()),
        }
    }
}

/// A complete inbound command
enum Inbound {
    Line(Result<Request, LineError>),
    Frame(Frame),
}

/// LoRa modem driven by one control stream
pub struct Modem<R: Radio, C: Clock> {
    radio: R,
    clock: C,
    config: ModemConfig,
    queue: Arc<RxQueue>,
    consumer: Consumer<ReceivedPacket, RX_QUEUE_LEN>,
    streams: StreamManager,
    link: Link,
    standby: bool,
    last_telemetry: u64,
}

impl<R: Radio, C: Clock> Modem<R, C> {
    /// Bring up the radio and apply the configured settings
    ///
    /// A [`ModemError::RadioInit`] is fatal: the caller is expected to restart the device.
    pub fn new(mut radio: R, clock: C, config: ModemConfig) -> Result<Self, ModemError<R::Error>> {
        radio.init().map_err(ModemError::RadioInit)?;
        Self::apply_radio_settings(&mut radio, &config).map_err(ModemError::RadioInit)?;
        radio.standby().map_err(ModemError::RadioInit)?;

        let queue = Arc::new(RxQueue::new());
        let consumer = queue.consumer().ok_or(ModemError::QueueUnavailable)?;
        let last_telemetry = clock.now_ms();

        let mut modem = Self {
            radio,
            clock,
            link: Link::new(config.framing),
            config,
            queue,
            consumer,
            streams: StreamManager::new(),
            standby: true,
            last_telemetry,
        };
        modem.arm_receive_path()?;
        info!("modem up, framing {:?}", modem.config.framing);
        Ok(modem)
    }

    fn apply_radio_settings(radio: &mut R, config: &ModemConfig) -> Result<(), R::Error> {
        let s = &config.radio;
        radio.set_frequency(s.frequency)?;
        radio.set_spreading_factor(s.spreading_factor)?;
        radio.set_signal_bandwidth(s.signal_bandwidth)?;
        radio.set_coding_rate4(s.coding_rate4)?;
        radio.set_preamble_length(s.preamble_length)?;
        radio.set_sync_word(s.sync_word)?;
        radio.set_crc(s.crc)?;
        radio.set_invert_iq(s.invert_iq)?;
        radio.set_low_data_rate_optimize(s.low_data_rate_optimize)?;
        radio.set_tx_power(s.tx_power)?;
        radio.set_gain(s.gain)?;
        Ok(())
    }

    /// Replace the receive callback with one feeding a freshly claimed producer
    fn arm_receive_path(&mut self) -> Result<(), ModemError<R::Error>> {
        // Dropping the old callback releases its producer
        self.radio.on_receive(None);
        let mut producer = self
            .queue
            .producer()
            .ok_or(ModemError::QueueUnavailable)?;

        self.radio.on_receive(Some(Box::new(
            move |reader: &mut dyn PacketReader, len: usize| {
                if len > MAX_PACKET_LEN {
                    debug!("dropping oversized packet of {} bytes", len);
                    return;
                }
                let Some(mut slot) = producer.write_next() else {
                    debug!("receive queue full, packet dropped");
                    return;
                };
                slot.rssi = reader.packet_rssi();
                slot.snr = reader.packet_snr();
                slot.frequency_error = reader.packet_frequency_error();
                slot.payload.clear();
                if slot.payload.resize_default(len).is_err() || !reader.read(&mut slot.payload) {
                    debug!("failed to read packet payload");
                    return;
                }
                slot.commit();
            },
        )));
        Ok(())
    }

    /// Hand the control channel to `stream`
    ///
    /// Returns `Ok(false)` without side effects if `stream` is already active. Otherwise
    /// the previous owner is revoked, the receive path is re-armed, the radio goes to
    /// standby and any partial command is dropped.
    pub fn set_stream(
        &mut self,
        stream: Option<ClientStream>,
        on_revoked: Option<RevokedCallback>,
    ) -> Result<bool, ModemError<R::Error>> {
        if !self.streams.set_stream(stream, on_revoked) {
            return Ok(false);
        }
        self.arm_receive_path()?;
        self.radio.standby().map_err(ModemError::Radio)?;
        self.standby = true;
        self.link = Link::new(self.config.framing);
        Ok(true)
    }

    /// Interrupt trampoline, to be called from the radio's interrupt handler
    pub fn on_radio_interrupt(&mut self) {
        if let Err(e) = self.radio.handle_interrupt() {
            warn!("radio interrupt handling failed: {:?}", e);
        }
    }

    /// Run one iteration of the control loop
    pub fn tick(&mut self) -> Result<(), ModemError<R::Error>> {
        self.drain_packets()?;
        if self.config.framing == Framing::Json {
            self.send_telemetry_if_due()?;
        }
        self.poll_command()
    }

    fn drain_packets(&mut self) -> Result<(), ModemError<R::Error>> {
        while let Some(packet) = self.consumer.read_next() {
            let packet = packet.clone();
            self.consumer.read_next_done();
            match self.config.framing {
                Framing::Json => self.emit_packet_json(&packet)?,
                Framing::Kiss => self.emit_packet_kiss(&packet)?,
            }
        }
        Ok(())
    }

    fn poll_command(&mut self) -> Result<(), ModemError<R::Error>> {
        loop {
            let byte = match self.streams.stream().read() {
                Ok(byte) => byte,
                Err(nb::Error::WouldBlock) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(ModemError::Stream(e)),
            };
            let inbound = match &mut self.link {
                Link::Json(reader) => reader.push(byte).map(Inbound::Line),
                Link::Kiss(decoder) => decoder.push(byte).map(Inbound::Frame),
            };
            match inbound {
                None => continue,
                Some(Inbound::Line(Ok(request))) => return self.handle_request(request),
                Some(Inbound::Line(Err(e))) => {
                    debug!("rejected line: {}", e);
                    return Ok(self.streams.send(e.diagnostic().as_bytes())?);
                }
                Some(Inbound::Frame(frame)) => return self.handle_frame(frame),
            }
        }
    }

    /// Transmit `payload`, optionally waiting for a clear channel, then restore the
    /// receive or standby mode that was active before
    ///
    /// `cad` is `(wait_ms, timeout_ms)`.
    fn transmit_packet(&mut self, payload: &[u8], cad: Option<(u32, u32)>) -> Result<(), TxFailure> {
        let result = self.try_transmit(payload, cad);
        self.restore_mode();
        result
    }

    fn try_transmit(&mut self, payload: &[u8], cad: Option<(u32, u32)>) -> Result<(), TxFailure> {
        if let Some((wait_ms, timeout_ms)) = cad {
            self.wait_for_clear_channel(wait_ms, timeout_ms)?;
        }
        if let Err(e) = self.radio.begin_packet(false) {
            warn!("beginPacket failed: {:?}", e);
            return Err(TxFailure::BeginPacket);
        }
        self.radio.write(payload);
        match self.radio.end_packet(false) {
            Ok(()) => {
                debug!("transmitted {} bytes", payload.len());
                Ok(())
            }
            Err(e) => {
                warn!("endPacket failed: {:?}", e);
                Err(TxFailure::EndPacket)
            }
        }
    }

    fn wait_for_clear_channel(&mut self, wait_ms: u32, timeout_ms: u32) -> Result<(), TxFailure> {
        let start = self.clock.now_ms();
        while self.radio.channel_active() {
            if self.clock.now_ms().saturating_sub(start) >= timeout_ms as u64 {
                warn!("channel still busy after {} ms", timeout_ms);
                return Err(TxFailure::CadTimeout);
            }
            // Keep receiving while the channel is busy
            if let Err(e) = self.radio.start_continuous_receive(0) {
                debug!("failed to receive while waiting for channel: {:?}", e);
            }
            self.receive_for(wait_ms);
        }
        Ok(())
    }

    /// Wait on the engine clock, draining radio interrupts every step
    ///
    /// The next CAD start may clear latched IRQ flags, so a packet that
    /// arrived during the wait has to reach the queue before then.
    fn receive_for(&mut self, wait_ms: u32) {
        let mut waited = 0;
        loop {
            let step = (wait_ms - waited).min(RX_POLL_STEP_MS);
            self.clock.delay_ms(step);
            waited += step;
            if let Err(e) = self.radio.handle_interrupt() {
                warn!("radio interrupt failed while waiting for channel: {:?}", e);
            }
            if waited >= wait_ms {
                return;
            }
        }
    }

    fn restore_mode(&mut self) {
        let result = if self.standby {
            self.radio.standby()
        } else {
            self.radio.start_continuous_receive(0)
        };
        if let Err(e) = result {
            warn!("failed to restore radio mode: {:?}", e);
        }
    }

    /// Enter continuous receive or standby and remember the choice
    fn set_receiving(&mut self, receive: bool) -> Result<(), R::Error> {
        if receive {
            self.radio.start_continuous_receive(0)?;
        } else {
            self.radio.standby()?;
        }
        self.standby = !receive;
        Ok(())
    }

    /// The radio
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// The radio, mutable
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// The clock
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Active configuration
    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    /// Id of the active control stream
    pub fn active_stream(&self) -> Option<StreamId> {
        self.streams.active_id()
    }

    /// Whether the radio is parked in standby between commands
    pub fn is_standby(&self) -> bool {
        self.standby
    }

    /// Packets waiting to be relayed
    pub fn pending_packets(&self) -> usize {
        self.queue.len()
    }
}
