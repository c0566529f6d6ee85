
use std::cell::Cell;
use std::rc::Rc;

use lora_modem::config::ModemConfig;
use lora_modem::modem::{Modem, ModemError};
use lora_modem::protocol::json::MAX_LINE_LEN;
use lora_modem::radio::{Radio, RadioError, RadioMode};
use mock::*;
use serde_json::{json, Value};

fn send(modem: &mut TestModem, stream: &MockStream, line: &str) -> Vec<Value> {
    stream.feed(line.as_bytes());
    stream.feed(b"\n");
    modem.tick().unwrap();
    stream.take_records()
}

#[test]
fn test_meta_query() {
    let (mut modem, stream, _) = modem(quiet(ModemConfig::default()));
    let out = send(&mut modem, &stream, r#"{"type":"metaQ"}"#);
    assert_eq!(out, vec![json!({"type": "meta", "gainMax": 6, "txPowerMax": 20})]);
}

#[test]
fn test_settings_echo_applied_values() {
    let (mut modem, stream, _) = modem(quiet(ModemConfig::default()));
    let out = send(
        &mut modem,
        &stream,
        r#"{"type":"settings","txPower":30,"signalBandwidth":100000,"spreadingFactor":9,"CRC":false}"#,
    );
    assert_eq!(
        out,
        vec![json!({"txPower": 20, "signalBandwidth": 125000, "spreadingFactor": 9, "CRC": false})]
    );
    assert_eq!(modem.radio().tx_power(), 20);
    assert!(!modem.radio().crc());
    assert_eq!(modem.radio().mode(), RadioMode::Standby);
}

#[test]
fn test_settings_receive_switches_mode() {
    let (mut modem, stream, _) = modem(quiet(ModemConfig::default()));

    let out = send(&mut modem, &stream, r#"{"type":"settings","receive":true}"#);
    assert_eq!(out, vec![json!({"receive": true})]);
    assert_eq!(modem.radio().mode(), RadioMode::Receiving);
    assert!(!modem.is_standby());

    let out = send(&mut modem, &stream, r#"{"type":"settings","receive":false}"#);
    assert_eq!(out, vec![json!({"receive": false})]);
    assert_eq!(modem.radio().mode(), RadioMode::Standby);
    assert!(modem.is_standby());
}

#[test]
fn test_rejected_settings_are_omitted() {
    let (mut modem, stream, _) = modem(quiet(ModemConfig::default()));
    modem.radio_mut().device_mut().fail_setters = true;

    let out = send(
        &mut modem,
        &stream,
        r#"{"type":"settings","txPower":10,"frequency":915000000}"#,
    );
    assert_eq!(out, vec![json!({})]);
    assert_eq!(modem.radio().frequency(), 868_000_000);
}

#[test]
fn test_packet_tx() {
    let (mut modem, stream, _) = modem(quiet(ModemConfig::default()));
    let out = send(
        &mut modem,
        &stream,
        r#"{"type":"packetTx","id":"a1","data":[1,2,3]}"#,
    );
    assert_eq!(out, vec![json!({"type": "txAck", "id": "a1", "success": true})]);
    assert_eq!(modem.radio().device().transmitted, vec![vec![1, 2, 3]]);
    assert_eq!(modem.radio().mode(), RadioMode::Standby);
}

#[test]
fn test_empty_packet_is_rejected() {
    let (mut modem, stream, _) = modem(quiet(ModemConfig::default()));
    let out = send(&mut modem, &stream, r#"{"type":"packetTx","id":3,"data":[]}"#);
    assert_eq!(
        out,
        vec![json!({"type": "txAck", "id": 3, "success": false, "reason": "empty packet"})]
    );
    assert_eq!(modem.radio().device().count("transmit"), 0);

    let out = send(&mut modem, &stream, r#"{"type":"packetTx"}"#);
    assert_eq!(out[0]["id"], Value::Null);
    assert_eq!(out[0]["reason"], "empty packet");
}

#[test]
fn test_transmit_failure_restores_receive() {
    let (mut modem, stream, _) = modem(quiet(ModemConfig::default()));
    send(&mut modem, &stream, r#"{"type":"settings","receive":true}"#);
    modem.radio_mut().device_mut().fail_start_transmit = true;

    let out = send(&mut modem, &stream, r#"{"type":"packetTx","id":1,"data":[5]}"#);
    assert_eq!(out[0]["success"], false);
    assert_eq!(out[0]["reason"], "endPacket failed");
    assert_eq!(modem.radio().mode(), RadioMode::Receiving);
}

#[test]
fn test_cad_timeout_restores_prior_mode() {
    let (mut modem, stream, clock) = modem(quiet(ModemConfig::default()));
    send(&mut modem, &stream, r#"{"type":"settings","receive":true}"#);
    modem.radio_mut().device_mut().cad_fallback = Some(true);

    let start = clock.get();
    let out = send(
        &mut modem,
        &stream,
        r#"{"type":"packetTx","id":9,"data":[1],"cad":true,"cadWait":100,"cadTimeout":300}"#,
    );
    assert_eq!(
        out,
        vec![json!({"type": "txAck", "id": 9, "success": false, "reason": "cadTimeout"})]
    );
    assert_eq!(clock.get() - start, 300);
    assert!(modem.radio().device().transmitted.is_empty());
    assert_eq!(modem.radio().device().count("cad"), 4);
    assert_eq!(modem.radio().mode(), RadioMode::Receiving);
}

#[test]
fn test_cad_waits_for_clear_channel() {
    let (mut modem, stream, clock) = modem(quiet(ModemConfig::default()));
    modem
        .radio_mut()
        .device_mut()
        .cad_outcomes
        .extend([Some(true), Some(true), Some(false)]);

    let start = clock.get();
    let out = send(&mut modem, &stream, r#"{"type":"packetTx","data":[7],"cad":true}"#);
    assert_eq!(out[0]["success"], true);
    // Two busy rounds with the default wait
    assert_eq!(clock.get() - start, 200);
    assert_eq!(modem.radio().device().transmitted, vec![vec![7]]);
    assert_eq!(modem.radio().mode(), RadioMode::Standby);
}

#[test]
fn test_packets_received_during_cad_wait_are_kept() {
    let (mut modem, stream, clock) = modem(quiet(ModemConfig::default()));
    {
        let device = modem.radio_mut().device_mut();
        device.cad_clears_irq = true;
        device.cad_outcomes.extend([Some(true), Some(false)]);
        device.arrivals.push_back(vec![0x42]);
    }

    let start = clock.get();
    let out = send(
        &mut modem,
        &stream,
        r#"{"type":"packetTx","id":1,"data":[7],"cad":true,"cadWait":50}"#,
    );
    assert_eq!(out, vec![json!({"type": "txAck", "id": 1, "success": true})]);
    assert_eq!(clock.get() - start, 50);
    assert_eq!(modem.pending_packets(), 1);

    modem.tick().unwrap();
    assert_eq!(
        stream.take_records(),
        vec![json!({"type": "packetRx", "rssi": -90, "snr": 5.0, "freqError": 1200, "data": [66]})]
    );
}

#[test]
fn test_telemetry_cadence() {
    let (mut modem, stream, clock) = modem(ModemConfig::default());

    modem.tick().unwrap();
    assert!(stream.take().is_empty());

    clock.advance(1999);
    modem.tick().unwrap();
    assert!(stream.take().is_empty());

    clock.advance(1);
    modem.tick().unwrap();
    assert_eq!(
        stream.take_records(),
        vec![json!({"type": "telemetry", "receiving": false})]
    );

    modem.tick().unwrap();
    assert!(stream.take().is_empty());

    send(&mut modem, &stream, r#"{"type":"settings","receive":true}"#);
    modem.radio_mut().device_mut().rssi = -97;
    clock.advance(2000);
    modem.tick().unwrap();
    assert_eq!(
        stream.take_records(),
        vec![json!({"type": "telemetry", "receiving": true, "rssi": -97})]
    );
}

#[test]
fn test_invalid_lines_get_a_diagnostic() {
    let (mut modem, stream, _) = modem(quiet(ModemConfig::default()));

    stream.feed(b"{\"type\":\"reboot\"}\n");
    modem.tick().unwrap();
    let lines = stream.take_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("invalid request: "));

    stream.feed(b"not json\n");
    modem.tick().unwrap();
    assert!(stream.take_lines()[0].starts_with("invalid request: "));

    // Whitespace-only lines are skipped silently
    stream.feed(b"   \r\n");
    modem.tick().unwrap();
    assert!(stream.take().is_empty());
}

#[test]
fn test_overlong_line_is_discarded() {
    let (mut modem, stream, _) = modem(quiet(ModemConfig::default()));
    stream.feed(&vec![b'x'; MAX_LINE_LEN + 100]);
    stream.feed(b"\n{\"type\":\"metaQ\"}\n");

    settle(&mut modem);
    let lines = stream.take_lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "line too long");
    assert!(lines[1].contains("\"type\":\"meta\""));
}

#[test]
fn test_one_command_per_tick() {
    let (mut modem, stream, _) = modem(quiet(ModemConfig::default()));
    stream.feed(b"{\"type\":\"metaQ\"}\n{\"type\":\"settings\",\"syncWord\":18}\n");

    modem.tick().unwrap();
    assert_eq!(stream.take_records()[0]["type"], "meta");
    modem.tick().unwrap();
    assert_eq!(stream.take_records(), vec![json!({"syncWord": 18})]);
}

#[test]
fn test_received_packets_are_relayed() {
    let (mut modem, stream, _) = modem(quiet(ModemConfig::default()));
    send(&mut modem, &stream, r#"{"type":"settings","receive":true}"#);

    modem
        .radio_mut()
        .device_mut()
        .inject_packet(&[0xDE, 0xAD], -71, 9.25);
    modem.on_radio_interrupt();
    assert_eq!(modem.pending_packets(), 1);

    modem.tick().unwrap();
    assert_eq!(
        stream.take_records(),
        vec![json!({"type": "packetRx", "rssi": -71, "snr": 9.25, "freqError": 1200, "data": [222, 173]})]
    );
    assert_eq!(modem.pending_packets(), 0);
}

#[test]
fn test_full_queue_drops_packets() {
    let (mut modem, stream, _) = modem(quiet(ModemConfig::default()));
    for i in 0..12u8 {
        modem.radio_mut().device_mut().inject_packet(&[i], -50, 1.0);
        modem.on_radio_interrupt();
    }
    assert_eq!(modem.pending_packets(), 9);

    modem.tick().unwrap();
    let records = stream.take_records();
    assert_eq!(records.len(), 9);
    assert_eq!(records[0]["data"], json!([0]));
    assert_eq!(records[8]["data"], json!([8]));
}

#[test]
fn test_oversized_length_is_dropped() {
    let (mut modem, stream, _) = modem(quiet(ModemConfig::default()));
    let device = modem.radio_mut().device_mut();
    device.inject_packet(&[1; 4], -50, 1.0);
    device.rx_len = Some(300);
    modem.on_radio_interrupt();

    assert_eq!(modem.pending_packets(), 0);
    modem.tick().unwrap();
    assert!(stream.take().is_empty());
}

#[test]
fn test_handoff_rearms_and_resets() {
    let (mut modem, first, _) = modem(quiet(ModemConfig::default()));
    let revoked = Rc::new(Cell::new(false));
    let flag = Rc::clone(&revoked);
    assert!(!modem
        .set_stream(Some(first.client(1)), Some(Box::new(move || flag.set(true))))
        .unwrap());

    send(&mut modem, &first, r#"{"type":"settings","receive":true}"#);
    first.feed(br#"{"type":"me"#);
    modem.tick().unwrap();

    let second = MockStream::default();
    assert!(modem.set_stream(Some(second.client(2)), None).unwrap());
    assert_eq!(modem.active_stream(), Some(2));
    // The repeated hand-off to client 1 never registered its callback
    assert!(!revoked.get());
    assert_eq!(modem.radio().mode(), RadioMode::Standby);
    assert!(modem.is_standby());

    // The partial line from the first client is gone
    second.feed(b"taQ\"}\n");
    modem.tick().unwrap();
    assert!(second.take_lines()[0].starts_with("invalid request: "));

    // A fresh producer feeds the queue
    modem.radio_mut().device_mut().inject_packet(&[42], -60, 2.0);
    modem.on_radio_interrupt();
    modem.tick().unwrap();
    assert_eq!(second.take_records()[0]["data"], json!([42]));
    assert!(first.take().is_empty());
}

#[test]
fn test_revoked_callback_runs_on_handoff() {
    let (mut modem, _, _) = modem(quiet(ModemConfig::default()));
    let revoked = Rc::new(Cell::new(0));
    let flag = Rc::clone(&revoked);
    let stream = MockStream::default();

    modem
        .set_stream(
            Some(stream.client(5)),
            Some(Box::new(move || flag.set(flag.get() + 1))),
        )
        .unwrap();
    assert_eq!(revoked.get(), 0);
    modem.set_stream(None, None).unwrap();
    assert_eq!(revoked.get(), 1);
    assert_eq!(modem.active_stream(), None);
}

#[test]
fn test_bring_up_failure_is_fatal() {
    let clock = FakeClock::default();
    let mut device = FakeTransceiver::new();
    device.fail_init = true;
    let radio = radio_with(device, Default::default(), &clock);

    match Modem::new(radio, clock, ModemConfig::default()) {
        Err(ModemError::RadioInit(RadioError::Device(FakeError))) => {}
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("modem came up without a radio"),
    }
}

#[test]
fn test_configured_radio_settings_are_applied() {
    let mut config = quiet(ModemConfig::default());
    config.radio.frequency = 915_000_000;
    config.radio.tx_power = 17;
    let (modem, _, _) = modem(config);

    assert_eq!(modem.radio().frequency(), 915_000_000);
    assert_eq!(modem.radio().device().frequency, Some(915_000_000));
    assert_eq!(modem.radio().tx_power(), 17);
}
