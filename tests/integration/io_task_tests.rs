//! I/O task tests: the server running on its own thread.

use crate::mock_bus::{MockBus, RecordingClient, wait_until};
use motorlink::LinkConfig;
use motorlink::mux::{Direct, Link, Message, io_task};

#[test]
fn marshaled_request_is_answered_by_the_read_loop() {
    let bus = MockBus::new();
    bus.reply(b"OK\r\n");
    let task = io_task::spawn(bus.clone(), &LinkConfig::default(), |_| {}).unwrap();

    let a = RecordingClient::new(1);
    let link = task.handle().register_client(a.clone()).unwrap();
    link.submit_request(Message::with_ack(b"AA\r", b"OK\r\n").unwrap())
        .unwrap();

    assert!(wait_until(|| a.answer_count() == 1));
    assert_eq!(bus.written(), vec![b"AA\r".to_vec()]);
    task.shutdown_and_join().unwrap();
}

#[test]
fn direct_client_registered_in_setup() {
    let bus = MockBus::new();
    bus.reply(b"E1\r\n").reply(b"E2\r\n");
    let a = RecordingClient::new(3);

    let client = a.clone();
    let task = io_task::spawn(bus.clone(), &LinkConfig::default(), move |server| {
        let link = server.register_client(client, Direct).unwrap();
        for _ in 0..2 {
            link.submit_request(Message::with_pattern(b"ENC\r", r"E(\d)\r\n").unwrap())
                .unwrap();
        }
    })
    .unwrap();

    assert!(wait_until(|| a.answer_count() == 2));
    assert_eq!(a.answers(), vec![Some(b"1".to_vec()), Some(b"2".to_vec())]);
    task.shutdown_and_join().unwrap();
}

#[test]
fn commands_before_shutdown_are_applied() {
    let bus = MockBus::new();
    let task = io_task::spawn(bus.clone(), &LinkConfig::default(), |_| {}).unwrap();

    let link = task
        .handle()
        .register_client(RecordingClient::new(2))
        .unwrap();
    for _ in 0..5 {
        link.submit_request(Message::with_ack(b"X\r", b"OK\r\n").unwrap())
            .unwrap();
    }
    task.shutdown_and_join().unwrap();
    assert_eq!(bus.write_count(), 5);
}

#[test]
fn read_errors_do_not_stop_the_task() {
    let bus = MockBus::new();
    bus.fail_reads(true);
    let task = io_task::spawn(bus.clone(), &LinkConfig::default(), |_| {}).unwrap();

    let a = RecordingClient::new(1);
    let link = task.handle().register_client(a.clone()).unwrap();
    assert!(wait_until(|| bus.read_count() > 1));

    bus.reply(b"OK\r\n");
    bus.fail_reads(false);
    link.submit_request(Message::with_ack(b"AA\r", b"OK\r\n").unwrap())
        .unwrap();

    assert!(wait_until(|| a.answer_count() == 1));
    task.shutdown_and_join().unwrap();
}
