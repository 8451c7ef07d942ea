//! Request/response multiplexer for one half-duplex link.
//!
//! The server owns the transport, the FIFO of outstanding requests and the
//! receive buffer. Responses carry no request id, so the only correlation
//! is order: incoming bytes are only ever matched against the queue head.
//!
//! ```text
//!  submit ─▶ [ head | r2 | r3 ... ] ─▶ transport.write(payload)
//!               │
//!  transport.read ─▶ rx buffer ─▶ head.matcher.find(rx)
//!                                   │ match: consume rx[..end], pop head,
//!                                   │        answer head's client, repeat
//!                                   └ none:  wait for more bytes
//! ```
//!
//! # Thread confinement
//!
//! `Server` is `!Send`. It lives on exactly one thread and every mutation of
//! the queue and buffer happens there. Other threads reach it only through
//! the mailbox ([`MarshaledLink`], [`ServerHandle`]); same-thread clients may
//! use a [`DirectLink`](super::client::DirectLink). No locks guard the state.
//!
//! Client callbacks run with no internal borrow held, so a client may
//! submit its next request from inside `on_answer_received`.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, info, trace, warn};

use super::channels::{Command, Epoch, Mailbox};
use super::client::{Client, ClientId, DeliveryMode, MarshaledLink, Sink, Wiring};
use super::message::Message;
use super::transport::Transport;
use crate::config::LinkConfig;
use crate::diagnostics::LinkStats;
use crate::error::{LinkError, Result, TransportError};

/// Maximum outstanding requests across all clients.
pub const MAX_PENDING: usize = 32;

/// Maximum registered clients (power of two, index-map capacity).
pub const MAX_CLIENTS: usize = 16;

// ── State ────────────────────────────────────────────────────

struct PendingRequest {
    client: ClientId,
    message: Message,
    /// Its client gave up; the answer is still consumed, then discarded.
    abandoned: bool,
}

impl PendingRequest {
    fn waits_for(&self, client: ClientId) -> bool {
        self.client == client && !self.abandoned
    }
}

struct Registration {
    client: Arc<dyn Client>,
    epoch: Epoch,
}

#[derive(Default)]
struct State {
    pending: heapless::Deque<PendingRequest, MAX_PENDING>,
    rx: Vec<u8>,
    registry: heapless::FnvIndexMap<ClientId, Registration, MAX_CLIENTS>,
    stats: LinkStats,
}

impl State {
    fn check_epoch(&mut self, client: ClientId, epoch: Epoch) -> Result<()> {
        let current = self
            .registry
            .get(&client)
            .map(|reg| reg.epoch)
            .ok_or(LinkError::UnknownClient(client))?;
        if current != epoch {
            self.stats.stale_commands += 1;
            return Err(LinkError::StaleLink(client).into());
        }
        Ok(())
    }

    /// Bytes left behind with nobody waiting have no recipient.
    fn drop_orphan_bytes(&mut self) {
        if self.pending.is_empty() && !self.rx.is_empty() {
            trace!("Mux: queue drained, dropping {} trailing bytes", self.rx.len());
            self.stats.discarded_bytes += self.rx.len() as u64;
            self.rx.clear();
        }
    }
}

/// One resolved head request, ready to hand to its client.
struct Answer {
    client: Option<Arc<dyn Client>>,
    payload: Option<Vec<u8>>,
}

struct Inner<T> {
    transport: RefCell<T>,
    state: RefCell<State>,
    mailbox: Mailbox,
    port_name: heapless::String<64>,
    baud_rate: u32,
}

impl<T: Transport> Inner<T> {
    fn register(&self, client: Arc<dyn Client>, epoch: Epoch) -> Result<()> {
        let id = client.client_id();
        let mut state = self.state.borrow_mut();

        if let Some(existing) = state.registry.get_mut(&id) {
            if existing.epoch > epoch {
                // A newer registration already won.
                return Err(LinkError::StaleLink(id).into());
            }
            *existing = Registration { client, epoch };
            info!("Mux: client {} re-registered (e{}), previous link detached", id, epoch);
            return Ok(());
        }

        state
            .registry
            .insert(id, Registration { client, epoch })
            .map_err(|_| LinkError::RegistryFull)?;
        info!("Mux: client {} registered (e{})", id, epoch);
        Ok(())
    }

    fn unregister(&self, client: ClientId) -> bool {
        let removed = self.state.borrow_mut().registry.remove(&client).is_some();
        if removed {
            info!("Mux: client {} unregistered", client);
        }
        removed
    }

    fn submit(&self, client: ClientId, message: Message) -> Result<()> {
        {
            let mut state = self.state.borrow_mut();
            if !state.registry.contains_key(&client) {
                return Err(LinkError::UnknownClient(client).into());
            }
            state
                .pending
                .push_back(PendingRequest {
                    client,
                    message: message.clone(),
                    abandoned: false,
                })
                .map_err(|_| LinkError::QueueFull)?;
            state.stats.submitted += 1;
        }

        let written = {
            let mut transport = self.transport.borrow_mut();
            transport
                .write(message.payload())
                .and_then(|_| transport.flush())
        };
        if let Err(e) = written {
            // The entry stays queued; the client's timeout evicts it.
            warn!("Mux: write for client {} failed: {:?}", client, e);
            self.state.borrow_mut().stats.write_errors += 1;
            return Err(TransportError::WriteFailed.into());
        }

        trace!("Mux: client {} sent {:02X?}", client, message.payload());
        Ok(())
    }

    fn on_bytes_received(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        {
            let mut state = self.state.borrow_mut();
            if state.pending.is_empty() {
                trace!("Mux: discarding {} unsolicited bytes", chunk.len());
                state.stats.discarded_bytes += chunk.len() as u64;
                return;
            }
            state.rx.extend_from_slice(chunk);
        }

        while let Some(answer) = self.match_head() {
            if let Some(client) = answer.client {
                client.on_answer_received(answer.payload.as_deref());
            }
        }
    }

    /// Try the head's matcher against the whole buffer; resolve it on a hit.
    fn match_head(&self) -> Option<Answer> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;

        if state.rx.is_empty() {
            return None;
        }
        let found = state.pending.front()?.message.matcher().find(&state.rx)?;

        let end = found.end.min(state.rx.len());
        let payload = found
            .capture
            .and_then(|span| state.rx.get(span))
            .map(<[u8]>::to_vec);
        state.rx.drain(..end);

        let head = state.pending.pop_front()?;
        state.drop_orphan_bytes();

        let client = if head.abandoned {
            debug!("Mux: answer for abandoned request of client {} discarded", head.client);
            state.stats.dropped_answers += 1;
            None
        } else {
            state.stats.answered += 1;
            let client = state.registry.get(&head.client).map(|reg| reg.client.clone());
            if client.is_none() {
                warn!("Mux: answer for unregistered client {} dropped", head.client);
                state.stats.orphaned_answers += 1;
            }
            client
        };
        debug!(
            "Mux: client {} answered ({} bytes consumed, {} queued)",
            head.client,
            end,
            state.pending.len()
        );

        Some(Answer { client, payload })
    }

    fn on_client_timeout(&self, client: ClientId) -> Result<()> {
        if let Some(owner) = self.resolve_timeout(client)? {
            owner.on_request_dropped();
        }
        Ok(())
    }

    /// Give up the oldest request `client` still waits for. Returns the
    /// client to notify once the state borrow is released.
    fn resolve_timeout(&self, client: ClientId) -> Result<Option<Arc<dyn Client>>> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;

        if !state.pending.iter().any(|req| req.waits_for(client)) {
            warn!("Mux: client {} timed out with nothing queued", client);
            state.stats.rejected_timeouts += 1;
            return Err(LinkError::NoPendingRequest.into());
        }

        // The reporter waited a full timeout behind these; nobody else will
        // ever evict them.
        while state.pending.front().is_some_and(|req| req.abandoned) {
            state.pending.pop_front();
            debug!("Mux: stalled abandoned head evicted");
        }

        let Some(index) = state.pending.iter().position(|req| req.waits_for(client)) else {
            return Err(LinkError::NoPendingRequest.into());
        };
        if index == 0 {
            state.pending.pop_front();
            debug!(
                "Mux: client {} timed out, head evicted ({} queued)",
                client,
                state.pending.len()
            );
        } else {
            // Already written: the controller still answers it, in order.
            if let Some(req) = state.pending.iter_mut().nth(index) {
                req.abandoned = true;
            }
            debug!(
                "Mux: client {} timed out behind the head, request {} abandoned",
                client, index
            );
        }
        state.stats.timed_out += 1;
        state.drop_orphan_bytes();

        Ok(state.registry.get(&client).map(|reg| reg.client.clone()))
    }

    fn apply(&self, command: Command) -> Result<()> {
        match command {
            Command::Register { client, epoch } => self.register(client, epoch),
            Command::Unregister { client } => {
                self.unregister(client);
                Ok(())
            }
            Command::Submit {
                client,
                epoch,
                message,
            } => self.submit_from(client, epoch, message),
            Command::TimedOut { client, epoch } => self.timeout_from(client, epoch),
            Command::Shutdown => Ok(()),
        }
    }
}

impl<T: Transport> Sink for Inner<T> {
    fn submit_from(&self, client: ClientId, epoch: Epoch, message: Message) -> Result<()> {
        self.state.borrow_mut().check_epoch(client, epoch)?;
        self.submit(client, message)
    }

    fn timeout_from(&self, client: ClientId, epoch: Epoch) -> Result<()> {
        self.state.borrow_mut().check_epoch(client, epoch)?;
        self.on_client_timeout(client)
    }
}

// ── Server ───────────────────────────────────────────────────

/// Owner of one link. Cheap to clone; clones share the same state.
pub struct Server<T: Transport> {
    inner: Rc<Inner<T>>,
}

impl<T: Transport> Clone for Server<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Transport + 'static> Server<T> {
    /// Build a server around an already-open transport.
    ///
    /// The queue and buffer start empty and are never reset afterwards.
    pub fn new(transport: T, config: &LinkConfig) -> Self {
        Self::with_mailbox(transport, config, Mailbox::new())
    }

    pub(crate) fn with_mailbox(transport: T, config: &LinkConfig, mailbox: Mailbox) -> Self {
        Self {
            inner: Rc::new(Inner {
                transport: RefCell::new(transport),
                state: RefCell::new(State::default()),
                mailbox,
                port_name: config.port_name.clone(),
                baud_rate: config.baud_rate,
            }),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.inner.port_name
    }

    pub fn baud_rate(&self) -> u32 {
        self.inner.baud_rate
    }

    /// Wire `client` to this server.
    ///
    /// Registering a client id again replaces the earlier wiring: links from
    /// the earlier registration turn stale and answers go to the newest
    /// client object only, once.
    pub fn register_client<M: DeliveryMode>(
        &self,
        client: Arc<dyn Client>,
        mode: M,
    ) -> Result<M::Link> {
        let id = client.client_id();
        let epoch = self.inner.mailbox.next_epoch();
        self.inner.register(client, epoch)?;

        let sink: Rc<dyn Sink> = self.inner.clone();
        Ok(mode.wire(Wiring {
            client: id,
            epoch,
            sink: Rc::downgrade(&sink),
            mailbox: self.inner.mailbox.clone(),
        }))
    }

    /// Detach a client. Its queued requests stay (the device still answers
    /// them) but their answers are dropped.
    pub fn unregister_client(&self, client: ClientId) -> bool {
        self.inner.unregister(client)
    }

    /// Append a request to the queue tail and write its payload once.
    ///
    /// On a write failure the request stays queued and
    /// [`TransportError::WriteFailed`] is returned.
    pub fn submit(&self, client: ClientId, message: Message) -> Result<()> {
        self.inner.submit(client, message)
    }

    /// Feed bytes that arrived from the transport.
    ///
    /// Bytes arriving with an empty queue are discarded. Otherwise they are
    /// appended to the buffer and the head is matched against the whole
    /// buffer, repeatedly, until a match fails or the queue empties.
    pub fn on_bytes_received(&self, chunk: &[u8]) {
        self.inner.on_bytes_received(chunk);
    }

    /// Give up the oldest request `client` still waits for.
    ///
    /// If that request is the head it is evicted and later bytes are tested
    /// against the new head. If it sits behind another client's head it has
    /// already been written, so it stays in line and its answer is consumed
    /// and discarded when it arrives. Either way the client's
    /// [`on_request_dropped`](Client::on_request_dropped) runs before this
    /// returns. Abandoned requests stalling the head are evicted first.
    ///
    /// A client with nothing outstanding gets [`LinkError::NoPendingRequest`].
    pub fn on_client_timeout(&self, client: ClientId) -> Result<()> {
        self.inner.on_client_timeout(client)
    }

    /// Drain the transport into the matcher. Returns the bytes read.
    ///
    /// Reads only while the transport reports bytes waiting, so an idle
    /// line costs one readiness check per poll.
    pub fn poll_transport(&self, buf: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while self.inner.transport.borrow().available() {
            let read = self.inner.transport.borrow_mut().read(buf);
            let n = read.map_err(|e| {
                warn!("Mux: transport read failed: {:?}", e);
                TransportError::ReadFailed
            })?;
            if n == 0 {
                break;
            }
            total += n;
            self.on_bytes_received(&buf[..n]);
        }
        Ok(total)
    }

    /// Apply every command waiting in the mailbox. Returns how many ran.
    pub fn process_mailbox(&self) -> usize {
        let mut processed = 0;
        while let Some(command) = self.inner.mailbox.try_take() {
            self.dispatch(command);
            processed += 1;
        }
        processed
    }

    pub(crate) fn dispatch(&self, command: Command) {
        trace!("Mux: applying {:?}", command);
        if let Err(e) = self.inner.apply(command) {
            warn!("Mux: command rejected: {}", e);
        }
    }

    pub(crate) fn mailbox(&self) -> &Mailbox {
        &self.inner.mailbox
    }

    /// Thread-safe handle for registering marshaled clients from elsewhere.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle::new(self.inner.mailbox.clone())
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state.borrow().pending.len()
    }

    pub fn buffered_len(&self) -> usize {
        self.inner.state.borrow().rx.len()
    }

    /// Client owning the head request, if any.
    pub fn head_client(&self) -> Option<ClientId> {
        self.inner.state.borrow().pending.front().map(|req| req.client)
    }

    pub fn is_registered(&self, client: ClientId) -> bool {
        self.inner.state.borrow().registry.contains_key(&client)
    }

    pub fn stats(&self) -> LinkStats {
        self.inner.state.borrow().stats
    }
}

// ── ServerHandle ─────────────────────────────────────────────

/// `Send + Sync` handle to a server running on another thread.
///
/// Everything sent through a handle is marshaled through the mailbox and
/// applied in order on the server's thread.
#[derive(Clone)]
pub struct ServerHandle {
    mailbox: Mailbox,
}

impl ServerHandle {
    pub(crate) fn new(mailbox: Mailbox) -> Self {
        Self { mailbox }
    }

    /// Register `client` with marshaled delivery.
    ///
    /// The link is usable immediately; the registration is ordered ahead of
    /// anything later sent through it.
    pub fn register_client(&self, client: Arc<dyn Client>) -> Result<MarshaledLink> {
        let id = client.client_id();
        let epoch = self.mailbox.next_epoch();
        self.mailbox.post(Command::Register { client, epoch })?;
        Ok(MarshaledLink::new(id, epoch, self.mailbox.clone()))
    }

    pub fn unregister_client(&self, client: ClientId) -> Result<()> {
        self.mailbox.post(Command::Unregister { client })?;
        Ok(())
    }

    /// Ask the io task to stop after the commands already queued.
    pub fn shutdown(&self) -> Result<()> {
        self.mailbox.post(Command::Shutdown)?;
        Ok(())
    }

    /// Commands waiting to be applied.
    pub fn backlog(&self) -> usize {
        self.mailbox.len()
    }
}
