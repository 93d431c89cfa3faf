use std::io;
use std::net::UdpSocket;
use std::time::{Duration, Instant as StdInstant, SystemTime, UNIX_EPOCH};

use chrono::TimeZone;

use ntp_mimic::NtpResponder;
use ntp_mimic::protocol::{Mode, Packet, ReferenceId, Stratum, Version};
use ntp_mimic::unix_time::EPOCH_DELTA;

/// Build a 48-byte client request: flags 0x1B (client, version 3), all other fields
/// zero except the transmit timestamp.
fn client_request(transmit_ts: u64) -> [u8; 48] {
    let mut buf = [0u8; 48];
    buf[0] = 0x1B;
    buf[40..48].copy_from_slice(&transmit_ts.to_be_bytes());
    buf
}

/// Send a payload to the responder on `port` and wait up to one second for a reply.
fn exchange(port: u16, payload: &[u8]) -> io::Result<Vec<u8>> {
    let sock = UdpSocket::bind("127.0.0.1:0")?;
    sock.set_read_timeout(Some(Duration::from_secs(1)))?;
    sock.send_to(payload, ("127.0.0.1", port))?;
    let mut recv_buf = [0u8; 128];
    let (recv_len, _) = sock.recv_from(&mut recv_buf)?;
    Ok(recv_buf[..recv_len].to_vec())
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

#[test]
fn end_to_end_offset_zero() {
    let mut responder = NtpResponder::builder().port(9123).offset_secs(0.0).build();
    responder.start().expect("bind 9123");

    let before = unix_now_secs();
    let reply = exchange(9123, &client_request(0)).expect("no reply from responder");
    let after = unix_now_secs();
    responder.stop();

    assert_eq!(reply.len(), 48);
    assert_eq!(reply[0], 0x24, "flags must be LI=0, VN=4, Mode=server");

    let packet = Packet::from_datagram(&reply).unwrap();
    assert_eq!(packet.mode, Mode::Server);
    assert_eq!(packet.version, Version::V4);
    assert_eq!(packet.stratum, Stratum(2));
    assert!(packet.origin_timestamp.is_zero());

    let expected = before as i64 + EPOCH_DELTA;
    let got = packet.receive_timestamp.seconds as i64;
    assert!(
        got >= expected - 1 && got <= after as i64 + EPOCH_DELTA + 1,
        "receive timestamp {} outside [{}, {}]",
        got,
        expected - 1,
        after as i64 + EPOCH_DELTA + 1,
    );
    assert_eq!(packet.receive_timestamp, packet.transmit_timestamp);
    assert_eq!(packet.receive_timestamp, packet.reference_timestamp);
}

#[test]
fn end_to_end_pretend_2019() {
    let target = chrono::Utc.with_ymd_and_hms(2019, 11, 10, 0, 0, 0).unwrap();
    let mut responder = NtpResponder::pretending(target, 9124);
    responder.start().expect("bind 9124");

    let reply = exchange(9124, &client_request(0)).expect("no reply from responder");
    responder.stop();

    // 2019-11-10 00:00:00 UTC is 3_782_332_800 s after the 1900 epoch. The request
    // goes out immediately after construction, so at most one second has elapsed.
    let packet = Packet::from_datagram(&reply).unwrap();
    let got = packet.transmit_timestamp.seconds as i64;
    assert!(
        (got - 3_782_332_800).abs() <= 1,
        "impersonated timestamp {} not near 3782332800",
        got,
    );
}

#[test]
fn end_to_end_origin_echo() {
    let mut responder = NtpResponder::builder()
        .port(9125)
        .reference_id(ReferenceId(0x58_4D_49_4D)) // "XMIM"
        .build();
    responder.start().expect("bind 9125");

    let t = 0x0102_0304_0506_0708u64;
    let reply = exchange(9125, &client_request(t)).expect("no reply from responder");
    responder.stop();

    let packet = Packet::from_datagram(&reply).unwrap();
    assert_eq!(packet.origin_timestamp.seconds, 0x0102_0304);
    assert_eq!(packet.origin_timestamp.fraction, 0x0506_0708);
    assert_eq!(packet.reference_id, ReferenceId(0x584D_494D));
}

#[test]
fn malformed_datagram_gets_no_reply_and_loop_survives() {
    let mut responder = NtpResponder::builder().port(9126).build();
    responder.start().expect("bind 9126");

    // Too short: silently dropped.
    let err = exchange(9126, &[0u8; 10]).unwrap_err();
    assert!(
        matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
        "expected receive timeout, got {:?}",
        err,
    );

    // The loop must keep serving after the drop.
    let reply = exchange(9126, &client_request(0)).expect("responder stopped replying");
    assert_eq!(reply[0], 0x24);

    responder.stop();
}

#[test]
fn stop_returns_promptly_and_closes_the_port() {
    let mut responder = NtpResponder::builder().port(9127).build();
    responder.start().expect("bind 9127");

    let begin = StdInstant::now();
    responder.stop();
    assert!(
        begin.elapsed() < Duration::from_millis(500),
        "stop took {:?}, expected under one timeout interval",
        begin.elapsed(),
    );

    // No reply after shutdown.
    assert!(exchange(9127, &client_request(0)).is_err());
}

#[test]
fn start_twice_fails_fast() {
    let mut responder = NtpResponder::builder().port(9128).build();
    responder.start().expect("bind 9128");

    let err = responder.start().unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

    responder.stop();
    // Idempotent: stopping again is a no-op.
    responder.stop();
}

#[test]
fn bind_failure_is_surfaced() {
    let mut first = NtpResponder::builder().port(9129).build();
    first.start().expect("bind 9129");

    let mut second = NtpResponder::builder().port(9129).build();
    assert!(second.start().is_err(), "second bind on 9129 must fail");

    first.stop();
}

#[test]
fn ephemeral_port_binding() {
    let mut responder = NtpResponder::builder().port(0).build();
    assert!(responder.local_addr().is_err(), "no address before start");

    responder.start().expect("bind ephemeral port");
    let addr = responder.local_addr().unwrap();
    assert!(addr.port() > 0);

    let reply = exchange(addr.port(), &client_request(0)).expect("no reply from responder");
    assert_eq!(reply.len(), 48);

    responder.stop();
    assert!(responder.local_addr().is_err(), "no address after stop");
}

#[test]
fn responder_can_be_restarted() {
    let mut responder = NtpResponder::builder().port(9130).build();
    responder.start().expect("bind 9130");
    responder.stop();

    responder.start().expect("rebind 9130 after stop");
    let reply = exchange(9130, &client_request(0)).expect("no reply after restart");
    assert_eq!(reply[0], 0x24);
    responder.stop();
}
