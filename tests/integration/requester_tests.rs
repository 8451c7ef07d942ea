//! Requester tests: blocking request/timeout/retry against the io task.

use std::sync::Arc;

use crate::mock_bus::{MockBus, RecordingClient, wait_until};
use motorlink::LinkConfig;
use motorlink::error::{Error, LinkError};
use motorlink::mux::{Direct, IoTask, Link, Message, Requester, io_task};

fn config(timeout_ms: u32, retries: u8) -> LinkConfig {
    LinkConfig {
        answer_timeout_ms: timeout_ms,
        max_retries: retries,
        ..LinkConfig::default()
    }
}

#[test]
fn request_returns_captured_payload() {
    let bus = MockBus::new();
    bus.reply(b"\x80\x10\x0A\x00\r");
    let config = config(500, 0);
    let task = io_task::spawn(bus.clone(), &config, |_| {}).unwrap();

    let requester = Requester::connect(task.handle(), 1, &config).unwrap();
    let payload = requester
        .request_with(b"\x80\x18", r"\x80([\x00-\xFF]{3})\r")
        .unwrap();
    assert_eq!(payload, Some(vec![0x10, 0x0A, 0x00]));
    task.shutdown_and_join().unwrap();
}

#[test]
fn silent_controller_exhausts_retries() {
    let bus = MockBus::new();
    let config = config(10, 2);
    let task = io_task::spawn(bus.clone(), &config, |_| {}).unwrap();

    let requester = Requester::connect(task.handle(), 1, &config).unwrap();
    let err = requester
        .request(&Message::with_ack(b"AA\r", b"OK\r\n").unwrap())
        .unwrap_err();
    assert_eq!(err, Error::Link(LinkError::Timeout));

    task.shutdown_and_join().unwrap();
    assert_eq!(bus.write_count(), 3);
}

#[test]
fn retry_succeeds_after_a_dropped_reply() {
    let bus = MockBus::new();
    // First write gets no reply, the resend gets one.
    bus.reply(b"").reply(b"OK\r\n");
    let config = config(50, 1);
    let task = io_task::spawn(bus.clone(), &config, |_| {}).unwrap();

    let requester = Requester::connect(task.handle(), 1, &config).unwrap();
    let answer = requester
        .request(&Message::with_ack(b"AA\r", b"OK\r\n").unwrap())
        .unwrap();
    assert_eq!(answer, None);
    assert_eq!(bus.write_count(), 2);
    task.shutdown_and_join().unwrap();
}

#[test]
fn concurrent_requesters_each_get_their_own_answer() {
    let bus = MockBus::new();
    let config = config(1000, 0);
    for n in 0..4u8 {
        bus.reply(format!("V{n}\r\n").as_bytes());
    }
    let task = io_task::spawn(bus.clone(), &config, |_| {}).unwrap();

    // Serialise submissions so the scripted replies line up with writes.
    let gate = std::sync::Mutex::new(());
    std::thread::scope(|s| {
        for id in 0..4u8 {
            let handle = task.handle();
            let config = &config;
            let gate = &gate;
            s.spawn(move || {
                let requester = Requester::connect(handle, id, config).unwrap();
                let _turn = gate.lock().unwrap();
                let answer = requester.request_with(b"GETV\r", r"V(\d)\r\n").unwrap();
                assert!(answer.is_some_and(|v| v.len() == 1));
            });
        }
    });

    assert_eq!(bus.write_count(), 4);
    task.shutdown_and_join().unwrap();
}

// ── Another client holding the head ───────────────────────────

/// Spawn the io task with client 1 registered directly and its ack request
/// already written. The controller stays silent until the test injects.
fn spawn_behind_slow_head(bus: &MockBus, config: &LinkConfig) -> (IoTask, Arc<RecordingClient>) {
    let a = RecordingClient::new(1);
    let head = a.clone();
    let task = io_task::spawn(bus.clone(), config, move |server| {
        let link = server.register_client(head, Direct).unwrap();
        link.submit_request(Message::with_ack(b"AA\r", b"OK\r\n").unwrap())
            .unwrap();
    })
    .unwrap();
    assert!(wait_until(|| bus.write_count() == 1));
    (task, a)
}

#[test]
fn timed_out_request_behind_another_head_never_answers_the_next() {
    let bus = MockBus::new();
    bus.reply(b"").reply(b"").reply(b"7\r\n");
    let config = config(30, 0);
    let (task, a) = spawn_behind_slow_head(&bus, &config);

    let b = Requester::connect(task.handle(), 2, &config).unwrap();
    let err = b.request_with(b"GETV\r", r"(\d+)\r\n").unwrap_err();
    assert_eq!(err, Error::Link(LinkError::Timeout));

    // The head's ack and the stale reading arrive together.
    bus.inject(b"OK\r\n240\r\n");
    assert!(wait_until(|| a.answer_count() == 1));

    let current = b.request_with(b"GETI\r", r"(\d+)\r\n").unwrap();
    assert_eq!(current, Some(b"7".to_vec()));
    task.shutdown_and_join().unwrap();
}

#[test]
fn retry_behind_another_head_skips_the_first_reply() {
    let bus = MockBus::new();
    let config = config(200, 1);
    let (task, a) = spawn_behind_slow_head(&bus, &config);

    let handle = task.handle();
    std::thread::scope(|s| {
        let reading = s.spawn(|| {
            let b = Requester::connect(handle, 2, &config).unwrap();
            b.request_with(b"GETV\r", r"(\d+)\r\n")
        });

        // Original and resend are both on the wire before anything answers.
        assert!(wait_until(|| bus.write_count() == 3));
        bus.inject(b"OK\r\n240\r\n241\r\n");

        assert_eq!(reading.join().unwrap(), Ok(Some(b"241".to_vec())));
    });

    assert_eq!(a.answers(), vec![None]);
    task.shutdown_and_join().unwrap();
}
