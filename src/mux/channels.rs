//! Server mailbox: the only way into the server from other threads.
//!
//! Uses an `embassy-sync` bounded channel to bridge producer threads (control
//! loops, one per actuator) with the single consumer context that owns the
//! request queue, the receive buffer and the transport.
//!
//! ```text
//! ┌──────────────┐  Command   ┌──────────────┐
//! │ Control loop │───────────▶│              │
//! └──────────────┘            │   I/O Task   │──▶ Transport
//! ┌──────────────┐  Command   │ (sole owner) │
//! │ Control loop │───────────▶│              │
//! └──────────────┘            └──────────────┘
//! ```

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use super::client::{Client, ClientId};
use super::message::Message;
use crate::error::LinkError;

/// Channel depth for inbound commands.
pub const MAILBOX_DEPTH: usize = 32;

/// Registration generation. Every registration draws a fresh, larger one.
pub type Epoch = u32;

/// Work item for the consumer context.
pub(crate) enum Command {
    Register { client: Arc<dyn Client>, epoch: Epoch },
    Unregister { client: ClientId },
    Submit { client: ClientId, epoch: Epoch, message: Message },
    TimedOut { client: ClientId, epoch: Epoch },
    Shutdown,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register { client, epoch } => write!(f, "Register({}, e{epoch})", client.client_id()),
            Self::Unregister { client } => write!(f, "Unregister({client})"),
            Self::Submit { client, epoch, .. } => write!(f, "Submit({client}, e{epoch})"),
            Self::TimedOut { client, epoch } => write!(f, "TimedOut({client}, e{epoch})"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

struct Shared {
    commands: Channel<CriticalSectionRawMutex, Command, MAILBOX_DEPTH>,
    next_epoch: AtomicU32,
}

/// Cloneable, thread-safe sender side plus the consumer's receive side.
#[derive(Clone)]
pub(crate) struct Mailbox {
    shared: Arc<Shared>,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                commands: Channel::new(),
                next_epoch: AtomicU32::new(1),
            }),
        }
    }

    /// Enqueue without blocking.
    pub(crate) fn post(&self, command: Command) -> Result<(), LinkError> {
        self.shared
            .commands
            .try_send(command)
            .map_err(|_| LinkError::MailboxFull)
    }

    pub(crate) fn try_take(&self) -> Option<Command> {
        self.shared.commands.try_receive().ok()
    }

    /// Wait until a command arrives (wakes on send, no polling).
    pub(crate) async fn take(&self) -> Command {
        self.shared.commands.receive().await
    }

    pub(crate) fn next_epoch(&self) -> Epoch {
        self.shared.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn len(&self) -> usize {
        self.shared.commands.len()
    }
}
