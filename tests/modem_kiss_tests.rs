
use lora_modem::config::{Framing, ModemConfig};
use lora_modem::protocol::kiss::*;
use lora_modem::radio::{Radio, RadioMode};
use mock::*;

fn kiss() -> ModemConfig {
    quiet(ModemConfig::default().with_framing(Framing::Kiss))
}

fn frame(command: u8, data: &[u8]) -> Vec<u8> {
    encode_frame(command, data).unwrap().to_vec()
}

fn request(modem: &mut TestModem, stream: &MockStream, command: u8, data: &[u8]) -> Vec<u8> {
    stream.feed(&frame(command, data));
    modem.tick().unwrap();
    stream.take()
}

#[test]
fn test_detect_handshake() {
    let (mut modem, stream, _) = modem(kiss());
    assert_eq!(
        request(&mut modem, &stream, CMD_DETECT, &[DETECT_REQ]),
        frame(CMD_DETECT, &[DETECT_RESP])
    );
    assert!(request(&mut modem, &stream, CMD_DETECT, &[0x00]).is_empty());
}

#[test]
fn test_firmware_version() {
    let (mut modem, stream, _) = modem(kiss());
    assert_eq!(
        request(&mut modem, &stream, CMD_FW_VERSION, &[0x00]),
        frame(CMD_FW_VERSION, &[1, 0x34])
    );
}

#[test]
fn test_frequency_query_and_set() {
    let (mut modem, stream, _) = modem(kiss());
    assert_eq!(
        request(&mut modem, &stream, CMD_FREQUENCY, &0u32.to_be_bytes()),
        frame(CMD_FREQUENCY, &868_000_000u32.to_be_bytes())
    );

    // 915 MHz ends in 0xC0 and has to be escaped both ways
    let hz = 915_000_000u32.to_be_bytes();
    assert_eq!(hz[3], FEND);
    assert_eq!(
        request(&mut modem, &stream, CMD_FREQUENCY, &hz),
        frame(CMD_FREQUENCY, &hz)
    );
    assert_eq!(modem.radio().frequency(), 915_000_000);
}

#[test]
fn test_bandwidth_reports_snapped_value() {
    let (mut modem, stream, _) = modem(kiss());
    assert_eq!(
        request(&mut modem, &stream, CMD_BANDWIDTH, &100_000u32.to_be_bytes()),
        frame(CMD_BANDWIDTH, &125_000u32.to_be_bytes())
    );
    assert_eq!(
        request(&mut modem, &stream, CMD_BANDWIDTH, &[0, 0, 0, 0]),
        frame(CMD_BANDWIDTH, &125_000u32.to_be_bytes())
    );
}

#[test]
fn test_single_byte_settings() {
    let (mut modem, stream, _) = modem(kiss());
    assert_eq!(
        request(&mut modem, &stream, CMD_TXPOWER, &[QUERY]),
        frame(CMD_TXPOWER, &[2])
    );
    assert_eq!(
        request(&mut modem, &stream, CMD_TXPOWER, &[30]),
        frame(CMD_TXPOWER, &[20])
    );
    assert_eq!(
        request(&mut modem, &stream, CMD_SF, &[9]),
        frame(CMD_SF, &[9])
    );
    assert_eq!(
        request(&mut modem, &stream, CMD_SF, &[QUERY]),
        frame(CMD_SF, &[9])
    );
    assert_eq!(
        request(&mut modem, &stream, CMD_CR, &[QUERY]),
        frame(CMD_CR, &[5])
    );
    assert_eq!(
        request(&mut modem, &stream, CMD_CR, &[8]),
        frame(CMD_CR, &[8])
    );
}

#[test]
fn test_rejected_setting_echoes_current_value() {
    let (mut modem, stream, _) = modem(kiss());
    modem.radio_mut().device_mut().fail_setters = true;
    assert_eq!(
        request(&mut modem, &stream, CMD_SF, &[10]),
        frame(CMD_SF, &[7])
    );
}

#[test]
fn test_radio_state() {
    let (mut modem, stream, _) = modem(kiss());

    assert_eq!(
        request(&mut modem, &stream, CMD_RADIO_STATE, &[RADIO_STATE_ON]),
        frame(CMD_RADIO_STATE, &[RADIO_STATE_ON])
    );
    assert_eq!(modem.radio().mode(), RadioMode::Receiving);
    assert_eq!(
        request(&mut modem, &stream, CMD_RADIO_STATE, &[QUERY]),
        frame(CMD_RADIO_STATE, &[RADIO_STATE_ON])
    );

    assert!(request(&mut modem, &stream, CMD_RADIO_STATE, &[0x07]).is_empty());
    assert_eq!(modem.radio().mode(), RadioMode::Receiving);

    assert_eq!(
        request(&mut modem, &stream, CMD_RADIO_STATE, &[RADIO_STATE_OFF]),
        frame(CMD_RADIO_STATE, &[RADIO_STATE_OFF])
    );
    assert_eq!(modem.radio().mode(), RadioMode::Standby);
}

#[test]
fn test_wrong_length_and_unknown_commands_are_ignored() {
    let (mut modem, stream, _) = modem(kiss());
    assert!(request(&mut modem, &stream, CMD_FREQUENCY, &[0, 0]).is_empty());
    assert!(request(&mut modem, &stream, CMD_TXPOWER, &[1, 2]).is_empty());
    assert!(request(&mut modem, &stream, CMD_RADIO_STATE, &[]).is_empty());
    assert!(request(&mut modem, &stream, 0x42, &[1]).is_empty());
    assert!(request(&mut modem, &stream, CMD_DATA, &[]).is_empty());

    assert_eq!(modem.radio().tx_power(), 2);
    assert_eq!(modem.radio().device().count("transmit"), 0);
}

#[test]
fn test_data_frame_transmits() {
    let (mut modem, stream, _) = modem(kiss());
    assert!(request(&mut modem, &stream, CMD_DATA, &[FEND, FESC, 0x01]).is_empty());
    assert_eq!(
        modem.radio().device().transmitted,
        vec![vec![FEND, FESC, 0x01]]
    );
    assert_eq!(modem.radio().device().count("cad"), 0);
    assert_eq!(modem.radio().mode(), RadioMode::Standby);
}

#[test]
fn test_data_frame_failure_reports_error() {
    let (mut modem, stream, _) = modem(kiss());
    request(&mut modem, &stream, CMD_RADIO_STATE, &[RADIO_STATE_ON]);
    modem.radio_mut().device_mut().fail_start_transmit = true;

    assert_eq!(
        request(&mut modem, &stream, CMD_DATA, &[0x10]),
        frame(CMD_ERROR, &[ERROR_TXFAILED])
    );
    assert_eq!(modem.radio().mode(), RadioMode::Receiving);
}

#[test]
fn test_kiss_cad_policy() {
    let mut config = kiss().with_kiss_cad(true);
    config.cad_timeout_ms = 200;
    let (mut modem, stream, clock) = modem(config);

    assert!(request(&mut modem, &stream, CMD_DATA, &[1]).is_empty());
    assert_eq!(modem.radio().device().count("cad"), 1);

    modem.radio_mut().device_mut().cad_fallback = Some(true);
    let start = clock.get();
    assert_eq!(
        request(&mut modem, &stream, CMD_DATA, &[2]),
        frame(CMD_ERROR, &[ERROR_TXFAILED])
    );
    assert_eq!(clock.get() - start, 200);
    assert_eq!(modem.radio().device().transmitted, vec![vec![1]]);
}

#[test]
fn test_bad_escape_discards_frame() {
    let (mut modem, stream, _) = modem(kiss());
    stream.feed(&[FEND, CMD_DATA, 0x01, FESC, 0x42, 0x02, FEND]);
    stream.feed(&[CMD_DETECT, DETECT_REQ, FEND]);

    settle(&mut modem);
    assert_eq!(stream.take(), frame(CMD_DETECT, &[DETECT_RESP]));
    assert!(modem.radio().device().transmitted.is_empty());
}

#[test]
fn test_one_frame_per_tick() {
    let (mut modem, stream, _) = modem(kiss());
    stream.feed(&[FEND, CMD_SF, QUERY, FEND, CMD_CR, QUERY, FEND]);

    modem.tick().unwrap();
    assert_eq!(stream.take(), frame(CMD_SF, &[7]));
    modem.tick().unwrap();
    assert_eq!(stream.take(), frame(CMD_CR, &[5]));
}

#[test]
fn test_received_packet_frames() {
    let (mut modem, stream, _) = modem(kiss());
    request(&mut modem, &stream, CMD_RADIO_STATE, &[RADIO_STATE_ON]);

    modem
        .radio_mut()
        .device_mut()
        .inject_packet(&[FEND, 0x05], -60, 7.25);
    modem.on_radio_interrupt();
    modem.tick().unwrap();

    let mut expected = frame(CMD_STAT_RSSI, &[97]);
    expected.extend(frame(CMD_STAT_SNR, &[29]));
    expected.extend(frame(CMD_DATA, &[FEND, 0x05]));
    assert_eq!(stream.take(), expected);
}

#[test]
fn test_signal_metadata_saturates() {
    let (mut modem, stream, _) = modem(kiss());

    modem.radio_mut().device_mut().inject_packet(&[1], -200, -10.5);
    modem.on_radio_interrupt();
    modem.radio_mut().device_mut().inject_packet(&[2], 120, 0.0);
    modem.on_radio_interrupt();
    modem.tick().unwrap();

    let mut expected = frame(CMD_STAT_RSSI, &[0]);
    expected.extend(frame(CMD_STAT_SNR, &[(-42i8) as u8]));
    expected.extend(frame(CMD_DATA, &[1]));
    expected.extend(frame(CMD_STAT_RSSI, &[255]));
    expected.extend(frame(CMD_STAT_SNR, &[0]));
    expected.extend(frame(CMD_DATA, &[2]));
    assert_eq!(stream.take(), expected);
}

#[test]
fn test_no_telemetry_in_kiss_mode() {
    let (mut modem, stream, clock) = modem(ModemConfig::default().with_framing(Framing::Kiss));
    clock.advance(10_000);
    modem.tick().unwrap();
    assert!(stream.take().is_empty());
}

#[test]
fn test_handoff_drops_partial_frame() {
    let (mut modem, first, _) = modem(kiss());
    first.feed(&[FEND, CMD_DETECT]);
    modem.tick().unwrap();

    let second = MockStream::default();
    modem.set_stream(Some(second.client(2)), None).unwrap();
    second.feed(&[DETECT_REQ, FEND]);
    modem.tick().unwrap();
    assert!(second.take().is_empty());

    second.feed(&[CMD_DETECT, DETECT_REQ, FEND]);
    modem.tick().unwrap();
    assert_eq!(second.take(), frame(CMD_DETECT, &[DETECT_RESP]));
}
