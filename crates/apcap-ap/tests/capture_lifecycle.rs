use std::sync::mpsc;
use std::time::{Duration, Instant};

use apcap_ap::{AccessPoint, ApConfig, CaptureState};
use apcap_frame::{encode_frame, ACK};
use apcap_transport::mock::MockTransport;
use bytes::{Bytes, BytesMut};

fn config() -> ApConfig {
    ApConfig {
        read_chunk: 7,
        read_timeout: Duration::from_millis(5),
        response_delay: Duration::ZERO,
        response_attempts: 5,
        response_poll: Duration::from_millis(1),
        ..ApConfig::default()
    }
}

fn telemetry_frame(counter: u8) -> Vec<u8> {
    let mut payload = vec![0u8; 15];
    payload[0] = 1;
    payload[1] = counter;
    let mut out = BytesMut::new();
    encode_frame(ACK, &payload, &mut out).unwrap();
    out.to_vec()
}

#[test]
fn noisy_session_delivers_every_frame_in_order() {
    let mock = MockTransport::new();
    mock.reply_to([0xFF, 0x07, 0x03], [0xFF, 0x06, 0x03]);
    mock.reply_to([0xFF, 0x09, 0x03], [0xFF, 0x06, 0x03]);

    let (tx, rx) = mpsc::channel::<Bytes>();
    let mut ap = AccessPoint::new(mock.clone(), config());
    ap.start(move |payload: Bytes| {
        let _ = tx.send(payload);
    })
    .unwrap();
    assert_eq!(ap.state(), CaptureState::Running);

    let mut stream = vec![0x13, 0x37];
    for counter in 0..20u8 {
        stream.extend(telemetry_frame(counter));
        if counter % 5 == 0 {
            stream.extend([0x00, 0xFF, 0x01]);
        }
    }
    for chunk in stream.chunks(11) {
        mock.push_read(chunk.to_vec());
        mock.push_read(Vec::new());
    }

    let mut counters = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while counters.len() < 20 {
        let left = deadline.saturating_duration_since(Instant::now());
        let payload = rx.recv_timeout(left).expect("frame not delivered in time");
        assert_eq!(payload.len(), 15);
        counters.push(payload[1]);
    }
    assert_eq!(counters, (0..20u8).collect::<Vec<_>>());

    let report = ap.stop().unwrap().expect("capture was running");
    assert!(report.stop_acknowledged);
    assert_eq!(report.stats.frames_emitted, 20);
    assert_eq!(report.stats.bytes_received, stream.len() as u64);
    assert!(report.stats.bytes_discarded >= 2);
    assert_eq!(ap.state(), CaptureState::Stopped);
}

#[test]
fn report_serializes_for_cli_output() {
    let mock = MockTransport::new();
    mock.reply_to([0xFF, 0x07, 0x03], [0xFF, 0x06, 0x03]);
    let mut ap = AccessPoint::new(mock, config());
    ap.start(|_: Bytes| {}).unwrap();

    let report = ap.stop().unwrap().unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["stop_acknowledged"], false);
    assert_eq!(json["stats"]["frames_emitted"], 0);
    assert!(json["loop_error"].is_null());
}
