use core::fmt::Debug;

use log::{debug, warn};

use super::{Clock, Modem, ModemError};
use crate::protocol::kiss::*;
use crate::radio::{Radio, RadioMode, ReceivedPacket};

fn report<V: Debug, E: Debug>(name: &str, result: Result<V, E>) {
    match result {
        Ok(value) => debug!("kiss: {} = {:?}", name, value),
        Err(e) => warn!("kiss: {} rejected: {:?}", name, e),
    }
}

impl<R: Radio, C: Clock> Modem<R, C> {
    pub(super) fn handle_frame(&mut self, frame: Frame) -> Result<(), ModemError<R::Error>> {
        let data = &frame.data[..];
        match (frame.command, data.len()) {
            (CMD_DATA, len) if len > 0 => {
                let cad = self
                    .config
                    .kiss_cad
                    .then_some((self.config.cad_wait_ms, self.config.cad_timeout_ms));
                if self.transmit_packet(data, cad).is_err() {
                    self.send_frame(CMD_ERROR, &[ERROR_TXFAILED])?;
                }
            }
            (CMD_FREQUENCY, 4) => {
                let hz = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                if hz != 0 {
                    report("frequency", self.radio.set_frequency(hz));
                }
                let current = self.radio.frequency();
                self.send_frame(CMD_FREQUENCY, &current.to_be_bytes())?;
            }
            (CMD_BANDWIDTH, 4) => {
                let hz = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                if hz != 0 {
                    report("bandwidth", self.radio.set_signal_bandwidth(hz));
                }
                let current = self.radio.signal_bandwidth();
                self.send_frame(CMD_BANDWIDTH, &current.to_be_bytes())?;
            }
            (CMD_TXPOWER, 1) => {
                if data[0] != QUERY {
                    report("txpower", self.radio.set_tx_power(data[0]));
                }
                let current = self.radio.tx_power();
                self.send_frame(CMD_TXPOWER, &[current])?;
            }
            (CMD_SF, 1) => {
                if data[0] != QUERY {
                    report("sf", self.radio.set_spreading_factor(data[0]));
                }
                let current = self.radio.spreading_factor();
                self.send_frame(CMD_SF, &[current])?;
            }
            (CMD_CR, 1) => {
                if data[0] != QUERY {
                    report("cr", self.radio.set_coding_rate4(data[0]));
                }
                let current = self.radio.coding_rate4();
                self.send_frame(CMD_CR, &[current])?;
            }
            (CMD_RADIO_STATE, 1) => {
                match data[0] {
                    RADIO_STATE_OFF => {
                        let result = self.set_receiving(false);
                        report("radio state", result);
                    }
                    RADIO_STATE_ON => {
                        let result = self.set_receiving(true);
                        report("radio state", result);
                    }
                    QUERY => {}
                    other => {
                        debug!("ignoring radio state 0x{:02X}", other);
                        return Ok(());
                    }
                }
                let state = if self.radio.mode() == RadioMode::Receiving {
                    RADIO_STATE_ON
                } else {
                    RADIO_STATE_OFF
                };
                self.send_frame(CMD_RADIO_STATE, &[state])?;
            }
            (CMD_DETECT, 1) if data[0] == DETECT_REQ => {
                self.send_frame(CMD_DETECT, &[DETECT_RESP])?;
            }
            (CMD_FW_VERSION, 1) => {
                let version = self.config.firmware_version;
                self.send_frame(CMD_FW_VERSION, &version)?;
            }
            (command, len) => {
                debug!("ignoring KISS command 0x{:02X} with {} data bytes", command, len);
            }
        }
        Ok(())
    }

    pub(super) fn emit_packet_kiss(
        &mut self,
        packet: &ReceivedPacket,
    ) -> Result<(), ModemError<R::Error>> {
        let rssi = packet.rssi.saturating_add(RSSI_OFFSET).clamp(0, 255) as u8;
        let snr = (packet.snr * 4.0) as i8;
        self.send_frame(CMD_STAT_RSSI, &[rssi])?;
        self.send_frame(CMD_STAT_SNR, &[snr as u8])?;
        self.send_frame(CMD_DATA, &packet.payload)
    }

    fn send_frame(&mut self, command: u8, data: &[u8]) -> Result<(), ModemError<R::Error>> {
        match encode_frame(command, data) {
            Ok(frame) => Ok(self.streams.send(&frame)?),
            Err(e) => {
                warn!("failed to encode frame 0x{:02X}: {}", command, e);
                Ok(())
            }
        }
    }
}
