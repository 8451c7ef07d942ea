//! Client capability and the links clients use to reach the server.
//!
//! A client is anything that issues requests on behalf of one actuator.
//! The server only ever sees its [`ClientId`] and calls back into
//! [`Client::on_answer_received`]; everything else is the client's business,
//! including how long it is willing to wait.
//!
//! The outbound half is a [`Link`], handed out by registration. The
//! delivery mode picked at registration decides what a link is:
//!
//! | Mode | Link | Where it may be used |
//! |---|---|---|
//! | [`Direct`] | [`DirectLink`] (`!Send`) | only on the server's own thread; calls run immediately |
//! | [`Marshaled`] | [`MarshaledLink`] (`Send + Sync`) | any thread; calls are posted to the server mailbox |

use std::rc::Weak;

use super::channels::{Command, Epoch, Mailbox};
use super::message::Message;
use crate::error::{LinkError, Result};

/// Identity of one logical caller (one per controlled actuator).
pub type ClientId = u8;

/// Inbound capability: what the server may invoke on a client.
pub trait Client: Send + Sync {
    /// Routing identity; must stay constant for the client's lifetime.
    fn client_id(&self) -> ClientId;

    /// Called at most once per submitted message, on the server's thread,
    /// with the captured payload (`None` when the matcher captures nothing).
    fn on_answer_received(&self, payload: Option<&[u8]>);

    /// Called on the server's thread once a request this client reported
    /// as timed out has been given up. No answer follows for it.
    fn on_request_dropped(&self) {}
}

/// Outbound capability: what a client may ask of the server.
pub trait Link {
    fn client_id(&self) -> ClientId;

    /// Queue `message` and write it to the transport. Never blocks.
    fn submit_request(&self, message: Message) -> Result<()>;

    /// Tell the server this client gave up waiting for its oldest request.
    fn report_timeout(&self) -> Result<()>;
}

/// Server-side entry points a direct link calls into.
pub(crate) trait Sink {
    fn submit_from(&self, client: ClientId, epoch: Epoch, message: Message) -> Result<()>;
    fn timeout_from(&self, client: ClientId, epoch: Epoch) -> Result<()>;
}

// ── Delivery modes ───────────────────────────────────────────

mod sealed {
    pub trait Sealed {}
}

/// Selects how a registered client's requests reach the server.
pub trait DeliveryMode: sealed::Sealed {
    type Link: Link;

    #[doc(hidden)]
    fn wire(self, wiring: Wiring) -> Self::Link;
}

/// Everything a link needs to reach the server. Built only by the server.
pub struct Wiring {
    pub(crate) client: ClientId,
    pub(crate) epoch: Epoch,
    pub(crate) sink: Weak<dyn Sink>,
    pub(crate) mailbox: Mailbox,
}

/// Same-thread delivery: the call executes inside the server immediately.
#[derive(Debug, Clone, Copy)]
pub struct Direct;

/// Cross-thread delivery: the call is posted to the server mailbox.
#[derive(Debug, Clone, Copy)]
pub struct Marshaled;

impl sealed::Sealed for Direct {}
impl sealed::Sealed for Marshaled {}

impl DeliveryMode for Direct {
    type Link = DirectLink;

    fn wire(self, wiring: Wiring) -> DirectLink {
        DirectLink {
            client: wiring.client,
            epoch: wiring.epoch,
            server: wiring.sink,
        }
    }
}

impl DeliveryMode for Marshaled {
    type Link = MarshaledLink;

    fn wire(self, wiring: Wiring) -> MarshaledLink {
        MarshaledLink::new(wiring.client, wiring.epoch, wiring.mailbox)
    }
}

// ── Links ────────────────────────────────────────────────────

/// Link that calls straight into the server. Cannot leave its thread.
pub struct DirectLink {
    client: ClientId,
    epoch: Epoch,
    server: Weak<dyn Sink>,
}

impl Link for DirectLink {
    fn client_id(&self) -> ClientId {
        self.client
    }

    fn submit_request(&self, message: Message) -> Result<()> {
        let server = self.server.upgrade().ok_or(LinkError::ServerGone)?;
        server.submit_from(self.client, self.epoch, message)
    }

    fn report_timeout(&self) -> Result<()> {
        let server = self.server.upgrade().ok_or(LinkError::ServerGone)?;
        server.timeout_from(self.client, self.epoch)
    }
}

/// Link that posts to the server mailbox from any thread.
#[derive(Clone)]
pub struct MarshaledLink {
    client: ClientId,
    epoch: Epoch,
    mailbox: Mailbox,
}

impl MarshaledLink {
    pub(crate) fn new(client: ClientId, epoch: Epoch, mailbox: Mailbox) -> Self {
        Self {
            client,
            epoch,
            mailbox,
        }
    }
}

impl Link for MarshaledLink {
    fn client_id(&self) -> ClientId {
        self.client
    }

    fn submit_request(&self, message: Message) -> Result<()> {
        self.mailbox.post(Command::Submit {
            client: self.client,
            epoch: self.epoch,
            message,
        })?;
        Ok(())
    }

    fn report_timeout(&self) -> Result<()> {
        self.mailbox.post(Command::TimedOut {
            client: self.client,
            epoch: self.epoch,
        })?;
        Ok(())
    }
}
