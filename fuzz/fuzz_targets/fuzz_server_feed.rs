//! Fuzz target: `Server::on_bytes_received`
//!
//! Interprets the input as a script of submits, timeouts and byte chunks
//! against a server with three clients, and checks the queue never
//! exceeds its bound and answers plus drops never outnumber submissions.
//!
//! cargo fuzz run fuzz_server_feed

#![no_main]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use libfuzzer_sys::fuzz_target;
use motorlink::LinkConfig;
use motorlink::mux::{Client, ClientId, Direct, MAX_PENDING, Message, NullTransport, Server};

struct Counter {
    id: ClientId,
    hits: AtomicUsize,
    drops: AtomicUsize,
}

impl Client for Counter {
    fn client_id(&self) -> ClientId {
        self.id
    }

    fn on_answer_received(&self, _payload: Option<&[u8]>) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn on_request_dropped(&self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }
}

fuzz_target!(|data: &[u8]| {
    let server = Server::new(NullTransport, &LinkConfig::default());
    let clients: Vec<Arc<Counter>> = (0..3)
        .map(|id| {
            let c = Arc::new(Counter {
                id,
                hits: AtomicUsize::new(0),
                drops: AtomicUsize::new(0),
            });
            let _ = server.register_client(c.clone(), Direct);
            c
        })
        .collect();

    let patterns = [r"OK\r\n", r"(\d+)\r\n", r"\x80(..)\r"];
    let mut accepted = 0usize;
    let mut ops = data.iter();

    while let Some(&op) = ops.next() {
        let client = op % 3;
        match op >> 6 {
            0 | 1 => {
                let message = Message::with_pattern(b"?", patterns[client as usize]);
                if let Ok(message) = message {
                    if server.submit(client, message).is_ok() {
                        accepted += 1;
                    }
                }
            }
            2 => {
                let _ = server.on_client_timeout(client);
            }
            _ => {
                let len = (op & 0x0F) as usize;
                let chunk: Vec<u8> = ops.by_ref().take(len).copied().collect();
                server.on_bytes_received(&chunk);
            }
        }
        assert!(server.pending_len() <= MAX_PENDING);
        if server.pending_len() == 0 {
            assert_eq!(server.buffered_len(), 0, "bytes kept with no recipient");
        }
    }

    let answered: usize = clients.iter().map(|c| c.hits.load(Ordering::Relaxed)).sum();
    let dropped: usize = clients.iter().map(|c| c.drops.load(Ordering::Relaxed)).sum();
    assert!(answered + dropped <= accepted);
    assert_eq!(server.stats().answered as usize, answered, "abandoned answer delivered");
});
