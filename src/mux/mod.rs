//! Command/response multiplexer for one shared half-duplex link.
//!
//! Many clients, one wire. Requests are written in submission order and
//! the controllers answer in that same order, so the oldest unanswered
//! request is the only one incoming bytes are ever matched against.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Mux Stack                             │
//! │                                                            │
//! │  ┌──────────┐   ┌──────────┐   ┌────────────────────────┐  │
//! │  │  Client  │──▶│   Link   │──▶│  Server (one thread)   │  │
//! │  │ (trait)  │   │ direct / │   │  queue + rx buffer     │  │
//! │  └──────────┘   │ mailbox  │   └───────────┬────────────┘  │
//! │       ▲         └──────────┘               │ write         │
//! │       │                                    ▼               │
//! │       │  answer  ┌──────────┐   ┌────────────────────────┐ │
//! │       └──────────│ Matcher  │◀──│  Transport (trait)     │ │
//! │                  │ (head)   │   │  read                  │ │
//! │                  └──────────┘   └────────────────────────┘ │
//! └────────────────────────────────────────────────────────────┘
//! ```

mod channels;

pub mod client;
pub mod io_task;
pub mod message;
pub mod pattern;
pub mod requester;
#[cfg(feature = "serial")]
pub mod serial;
pub mod server;
pub mod transport;

pub use channels::{Epoch, MAILBOX_DEPTH};
pub use client::{Client, ClientId, DeliveryMode, Direct, DirectLink, Link, Marshaled, MarshaledLink};
pub use io_task::IoTask;
pub use message::{MAX_PAYLOAD, Message};
pub use pattern::{Literal, Match, Matcher, Pattern};
pub use requester::{AnswerSlot, Outcome, Requester};
#[cfg(feature = "serial")]
pub use serial::{SerialTransport, spawn_serial};
pub use server::{MAX_CLIENTS, MAX_PENDING, Server, ServerHandle};
pub use transport::{NullTransport, Transport};
