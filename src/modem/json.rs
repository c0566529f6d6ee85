use core::fmt::Debug;

use log::{debug, warn};
use serde::Serialize;

use super::{Clock, Modem, ModemError};
use crate::protocol::json::{
    to_line, PacketTxRequest, Record, Request, SettingsRequest, SettingsResponse, TxFailure,
};
use crate::radio::{Radio, RadioMode, ReceivedPacket};

/// Keep the applied value of a setter, log a rejection
fn applied<V: Debug, E: Debug>(field: &str, result: Result<V, E>) -> Option<V> {
    match result {
        Ok(value) => {
            debug!("settings: {} = {:?}", field, value);
            Some(value)
        }
        Err(e) => {
            warn!("settings: {} rejected: {:?}", field, e);
            None
        }
    }
}

/// Saturate a wide request value into a setter argument
fn narrow(value: u16) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

impl<R: Radio, C: Clock> Modem<R, C> {
    pub(super) fn handle_request(&mut self, request: Request) -> Result<(), ModemError<R::Error>> {
        match request {
            Request::Settings(settings) => {
                let response = self.apply_settings(settings);
                self.send_record(&response)
            }
            Request::MetaQuery {} => {
                let meta = Record::Meta {
                    gain_max: self.radio.gain_max(),
                    tx_power_max: self.radio.tx_power_max(),
                };
                self.send_record(&meta)
            }
            Request::PacketTx(tx) => {
                let ack = self.transmit_request(tx);
                self.send_record(&ack)
            }
        }
    }

    fn apply_settings(&mut self, s: SettingsRequest) -> SettingsResponse {
        let radio = &mut self.radio;
        let mut out = SettingsResponse::default();

        if let Some(v) = s.gain {
            out.gain = applied("gain", radio.set_gain(narrow(v)));
        }
        if let Some(v) = s.tx_power {
            out.tx_power = applied("txPower", radio.set_tx_power(narrow(v)));
        }
        if let Some(v) = s.frequency {
            out.frequency = applied("frequency", radio.set_frequency(v));
        }
        if let Some(v) = s.spreading_factor {
            out.spreading_factor =
                applied("spreadingFactor", radio.set_spreading_factor(narrow(v)));
        }
        if let Some(v) = s.signal_bandwidth {
            out.signal_bandwidth = applied("signalBandwidth", radio.set_signal_bandwidth(v));
        }
        if let Some(v) = s.coding_rate4 {
            out.coding_rate4 = applied("codingRate4", radio.set_coding_rate4(narrow(v)));
        }
        if let Some(v) = s.preamble_length {
            out.preamble_length = applied("preambleLength", radio.set_preamble_length(v));
        }
        if let Some(v) = s.sync_word {
            out.sync_word = applied("syncWord", radio.set_sync_word(v));
        }
        if let Some(v) = s.crc {
            out.crc = applied("CRC", radio.set_crc(v));
        }
        if let Some(v) = s.invert_iq {
            out.invert_iq = applied("invertIQ", radio.set_invert_iq(v));
        }
        if let Some(v) = s.low_data_rate_optimize {
            out.low_data_rate_optimize =
                applied("lowDataRateOptimize", radio.set_low_data_rate_optimize(v));
        }
        if let Some(receive) = s.receive {
            out.receive = applied("receive", self.set_receiving(receive).map(|_| receive));
        }
        out
    }

    fn transmit_request(&mut self, tx: PacketTxRequest) -> Record {
        let result = if tx.data.is_empty() {
            Err(TxFailure::EmptyPacket)
        } else {
            let cad = tx.cad.then(|| {
                (
                    tx.cad_wait.unwrap_or(self.config.cad_wait_ms),
                    tx.cad_timeout.unwrap_or(self.config.cad_timeout_ms),
                )
            });
            self.transmit_packet(&tx.data, cad)
        };
        Record::TxAck {
            id: tx.id,
            success: result.is_ok(),
            reason: result.err(),
        }
    }

    pub(super) fn emit_packet_json(
        &mut self,
        packet: &ReceivedPacket,
    ) -> Result<(), ModemError<R::Error>> {
        self.send_record(&Record::PacketRx {
            rssi: packet.rssi,
            snr: packet.snr,
            freq_error: packet.frequency_error,
            data: packet.payload.to_vec(),
        })
    }

    pub(super) fn send_telemetry_if_due(&mut self) -> Result<(), ModemError<R::Error>> {
        let now = self.clock.now_ms();
        if now.saturating_sub(self.last_telemetry) < self.config.telemetry_interval_ms {
            return Ok(());
        }
        self.last_telemetry = now;

        let receiving = self.radio.mode() == RadioMode::Receiving;
        let rssi = if receiving {
            self.radio.rssi().ok()
        } else {
            None
        };
        self.send_record(&Record::Telemetry { receiving, rssi })
    }

    fn send_record<T: Serialize>(&mut self, record: &T) -> Result<(), ModemError<R::Error>> {
        match to_line(record) {
            Ok(line) => Ok(self.streams.send(&line)?),
            Err(e) => {
                warn!("failed to encode record: {}", e);
                Ok(())
            }
        }
    }
}
