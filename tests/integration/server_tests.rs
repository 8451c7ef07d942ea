//! Server integration tests: submit → wire → poll → answer routing.

use crate::mock_bus::{MockBus, RecordingClient};
use motorlink::LinkConfig;
use motorlink::error::{Error, TransportError};
use motorlink::mux::{Direct, Message, Server};

fn setup() -> (Server<MockBus>, MockBus) {
    let bus = MockBus::new();
    let server = Server::new(bus.clone(), &LinkConfig::default());
    (server, bus)
}

fn poll(server: &Server<MockBus>) -> usize {
    let mut buf = [0u8; 64];
    server.poll_transport(&mut buf).unwrap()
}

// ── Ordering ──────────────────────────────────────────────────

#[test]
fn ack_then_capture_from_one_read() {
    let (server, bus) = setup();
    let a = RecordingClient::new(1);
    let b = RecordingClient::new(2);
    server.register_client(a.clone(), Direct).unwrap();
    server.register_client(b.clone(), Direct).unwrap();

    server.submit(1, Message::with_ack(b"AA\r", b"OK\r\n").unwrap()).unwrap();
    server
        .submit(2, Message::with_pattern(b"BB\r", r"(\d+)\r\n").unwrap())
        .unwrap();
    assert_eq!(bus.written(), vec![b"AA\r".to_vec(), b"BB\r".to_vec()]);

    bus.inject(b"OK\r\n12\r\n");
    assert_eq!(poll(&server), 8);

    assert_eq!(a.answers(), vec![None]);
    assert_eq!(b.answers(), vec![Some(b"12".to_vec())]);
    assert_eq!(server.pending_len(), 0);
}

#[test]
fn responses_split_across_reads_are_reassembled() {
    let (server, bus) = setup();
    let m = RecordingClient::new(4);
    server.register_client(m.clone(), Direct).unwrap();

    server
        .submit(4, Message::with_pattern(b"\x80\x15", r"\x80([\x00-\xFF]{4})\r").unwrap())
        .unwrap();

    bus.inject(b"\x80\x00");
    poll(&server);
    assert!(m.answers().is_empty());
    assert_eq!(server.buffered_len(), 2);

    bus.inject(b"\x01\x02\x03\r");
    poll(&server);
    assert_eq!(m.answers(), vec![Some(vec![0x00, 0x01, 0x02, 0x03])]);
}

#[test]
fn head_of_line_blocks_later_clients() {
    let (server, bus) = setup();
    let slow = RecordingClient::new(1);
    let fast = RecordingClient::new(2);
    server.register_client(slow.clone(), Direct).unwrap();
    server.register_client(fast.clone(), Direct).unwrap();

    server.submit(1, Message::with_ack(b"SLOW\r", b"S\r\n").unwrap()).unwrap();
    server.submit(2, Message::with_ack(b"FAST\r", b"F\r\n").unwrap()).unwrap();

    // The answer to the second request cannot overtake the head.
    bus.inject(b"F\r\n");
    poll(&server);
    assert!(fast.answers().is_empty());
    assert_eq!(server.head_client(), Some(1));
}

// ── Discard ───────────────────────────────────────────────────

#[test]
fn chatter_on_idle_line_is_dropped() {
    let (server, bus) = setup();
    let a = RecordingClient::new(1);
    server.register_client(a.clone(), Direct).unwrap();

    bus.inject(b"12\r\nnoise");
    poll(&server);
    assert_eq!(server.buffered_len(), 0);

    server
        .submit(1, Message::with_pattern(b"GET\r", r"(\d+)\r\n").unwrap())
        .unwrap();
    bus.inject(b"34\r\n");
    poll(&server);
    assert_eq!(a.answers(), vec![Some(b"34".to_vec())]);
    assert_eq!(server.stats().discarded_bytes, 9);
}

// ── Timeouts ──────────────────────────────────────────────────

#[test]
fn late_bytes_are_tested_against_the_new_head() {
    let (server, bus) = setup();
    let a = RecordingClient::new(1);
    let b = RecordingClient::new(2);
    server.register_client(a.clone(), Direct).unwrap();
    server.register_client(b.clone(), Direct).unwrap();

    server
        .submit(1, Message::with_pattern(b"AA\r", r"A(\d)\r\n").unwrap())
        .unwrap();
    server
        .submit(2, Message::with_pattern(b"BB\r", r"B(\d)\r\n").unwrap())
        .unwrap();
    server.on_client_timeout(1).unwrap();

    bus.inject(b"A1\r\nB2\r\n");
    poll(&server);
    assert!(a.answers().is_empty());
    assert_eq!(b.answers(), vec![Some(b"2".to_vec())]);
}

#[test]
fn timeout_from_a_queued_client_abandons_its_request() {
    let (server, bus) = setup();
    let a = RecordingClient::new(1);
    let b = RecordingClient::new(2);
    server.register_client(a.clone(), Direct).unwrap();
    server.register_client(b.clone(), Direct).unwrap();
    server.submit(1, Message::with_ack(b"AA\r", b"OK\r\n").unwrap()).unwrap();
    server
        .submit(2, Message::with_pattern(b"GETV\r", r"(\d+)\r\n").unwrap())
        .unwrap();

    server.on_client_timeout(2).unwrap();
    assert_eq!(server.pending_len(), 2);
    assert_eq!(server.head_client(), Some(1));

    bus.inject(b"OK\r\n240\r\n");
    poll(&server);
    assert_eq!(a.answers(), vec![None]);
    assert!(b.answers().is_empty());
    assert_eq!(server.pending_len(), 0);
    assert_eq!(server.stats().dropped_answers, 1);
}

// ── Transport failures ────────────────────────────────────────

#[test]
fn failed_write_is_reported_and_evicted_by_timeout() {
    let (server, bus) = setup();
    server.register_client(RecordingClient::new(1), Direct).unwrap();

    bus.fail_writes(true);
    let err = server
        .submit(1, Message::with_ack(b"AA\r", b"OK\r\n").unwrap())
        .unwrap_err();
    assert_eq!(err, Error::Transport(TransportError::WriteFailed));
    assert_eq!(server.pending_len(), 1);

    server.on_client_timeout(1).unwrap();
    assert_eq!(server.pending_len(), 0);
    assert_eq!(server.stats().write_errors, 1);
}

#[test]
fn read_failure_surfaces_as_transport_error() {
    let (server, bus) = setup();
    bus.fail_reads(true);
    let mut buf = [0u8; 16];
    assert_eq!(
        server.poll_transport(&mut buf),
        Err(Error::Transport(TransportError::ReadFailed))
    );
}

#[test]
fn idle_line_is_never_read() {
    let (server, bus) = setup();
    server.register_client(RecordingClient::new(1), Direct).unwrap();
    server.submit(1, Message::with_ack(b"AA\r", b"OK\r\n").unwrap()).unwrap();

    assert_eq!(poll(&server), 0);
    assert_eq!(poll(&server), 0);
    assert_eq!(bus.read_count(), 0);

    bus.inject(b"OK\r\n");
    assert_eq!(poll(&server), 4);
    assert_eq!(bus.read_count(), 1);
}

#[test]
fn poll_drains_more_than_one_buffer() {
    let (server, bus) = setup();
    let a = RecordingClient::new(1);
    server.register_client(a.clone(), Direct).unwrap();
    server
        .submit(1, Message::with_pattern(b"DUMP\r", r"(\w+)\r\n").unwrap())
        .unwrap();

    let mut reply = vec![b'x'; 40];
    reply.extend_from_slice(b"\r\n");
    bus.inject(&reply);

    let mut small = [0u8; 16];
    assert_eq!(server.poll_transport(&mut small).unwrap(), 42);
    assert_eq!(a.answers(), vec![Some(vec![b'x'; 40])]);
}

#[test]
fn accessors_reflect_config() {
    let config = LinkConfig::from_json(r#"{"port_name":"/dev/ttyUSB3","baud_rate":115200}"#).unwrap();
    let server = Server::new(MockBus::new(), &config);
    assert_eq!(server.port_name(), "/dev/ttyUSB3");
    assert_eq!(server.baud_rate(), 115_200);
}
