//! Blocking request helper for control loops.
//!
//! The server never times anything out on its own; each client owns its
//! timer. `Requester` is that timer: it submits through a marshaled link,
//! waits on an `embassy-sync` [`Signal`] raced against an `async-io-mini`
//! timer, and on expiry reports the timeout. A resend goes out only after
//! the server confirms it gave the old request up, so a late answer to the
//! first attempt can never be taken for the answer to the second.
//!
//! ```text
//!  control loop                  io thread
//!  ────────────                  ─────────
//!  reset slot
//!  submit ───── Submit ───────▶  queue + write
//!  wait(slot | timer)            ... bytes ... match
//!        ◀──────── signal ─────  on_answer_received
//!  (timer fired)
//!  report ───── TimedOut ─────▶  evict head, or abandon in place
//!  wait(slot | timer)
//!        ◀──────── signal ─────  on_request_dropped
//!  resend
//! ```

use core::time::Duration;
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::future;
use log::{debug, warn};

use super::client::{Client, ClientId, Link, MarshaledLink};
use super::message::Message;
use super::server::ServerHandle;
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};

/// How the server resolved the latest request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Matched; carries the captured span, if any.
    Answered(Option<Vec<u8>>),
    /// Given up after a timeout report. No answer will follow.
    Dropped,
}

/// What one blocking attempt came to.
enum Attempt {
    Answered(Option<Vec<u8>>),
    /// The server confirmed the drop; resending is safe.
    Dropped,
    /// The server never confirmed the drop in time.
    Unresolved,
}

/// Client half registered with the server: parks the latest outcome.
pub struct AnswerSlot {
    id: ClientId,
    outcome: Signal<CriticalSectionRawMutex, Outcome>,
}

impl AnswerSlot {
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            outcome: Signal::new(),
        }
    }
}

impl Client for AnswerSlot {
    fn client_id(&self) -> ClientId {
        self.id
    }

    fn on_answer_received(&self, payload: Option<&[u8]>) {
        self.outcome
            .signal(Outcome::Answered(payload.map(<[u8]>::to_vec)));
    }

    fn on_request_dropped(&self) {
        self.outcome.signal(Outcome::Dropped);
    }
}

/// Request-with-timeout on behalf of one client id.
pub struct Requester {
    slot: Arc<AnswerSlot>,
    link: MarshaledLink,
    timeout: Duration,
    max_retries: u8,
}

impl Requester {
    /// Register a fresh answer slot for `id` through `server`.
    ///
    /// Connecting an id that is already registered detaches the earlier
    /// requester; its link turns stale.
    pub fn connect(server: &ServerHandle, id: ClientId, config: &LinkConfig) -> Result<Self> {
        let slot = Arc::new(AnswerSlot::new(id));
        let link = server.register_client(slot.clone())?;
        Ok(Self {
            slot,
            link,
            timeout: Duration::from_millis(u64::from(config.answer_timeout_ms)),
            max_retries: config.max_retries,
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.slot.id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `message` and block until its answer arrives.
    ///
    /// An attempt that times out is reported to the server. Once the server
    /// confirms it dropped the request, the message is resent, up to
    /// `max_retries` times. An answer that turns up while the report is in
    /// flight still counts. Returns the captured payload (`None` if the
    /// matcher captures nothing), or [`LinkError::Timeout`] when every
    /// attempt expired or the server never confirmed a drop.
    pub fn request(&self, message: &Message) -> Result<Option<Vec<u8>>> {
        let mut attempt = 0u8;
        loop {
            match self.attempt(message.clone())? {
                Attempt::Answered(payload) => return Ok(payload),
                Attempt::Dropped if attempt < self.max_retries => {
                    attempt += 1;
                    debug!("Requester[{}]: retry {}/{}", self.slot.id, attempt, self.max_retries);
                }
                Attempt::Dropped => return Err(LinkError::Timeout.into()),
                Attempt::Unresolved => {
                    warn!(
                        "Requester[{}]: server did not confirm the drop, not resending",
                        self.slot.id
                    );
                    return Err(LinkError::Timeout.into());
                }
            }
        }
    }

    /// [`request`](Self::request) with a pattern compiled on the spot.
    pub fn request_with(&self, payload: &[u8], pattern: &str) -> Result<Option<Vec<u8>>> {
        self.request(&Message::with_pattern(payload, pattern)?)
    }

    fn attempt(&self, message: Message) -> Result<Attempt> {
        // The previous request is resolved; anything parked belongs to it.
        self.slot.outcome.reset();
        self.link.submit_request(message)?;

        if let Some(outcome) = self.wait_outcome() {
            return Ok(Self::settle(outcome));
        }
        warn!(
            "Requester[{}]: no answer within {}ms",
            self.slot.id,
            self.timeout.as_millis()
        );
        self.link.report_timeout()?;

        Ok(self.wait_outcome().map_or(Attempt::Unresolved, Self::settle))
    }

    fn settle(outcome: Outcome) -> Attempt {
        match outcome {
            Outcome::Answered(payload) => Attempt::Answered(payload),
            Outcome::Dropped => Attempt::Dropped,
        }
    }

    /// Wait up to one timeout for the slot to be signalled.
    fn wait_outcome(&self) -> Option<Outcome> {
        future::block_on(future::or(
            async { Some(self.slot.outcome.wait().await) },
            async {
                async_io_mini::Timer::after(self.timeout).await;
                None
            },
        ))
    }

    // ── Non-blocking use from a periodic control loop ────────

    /// Queue `message` without waiting. Clears any outcome not yet taken.
    pub fn submit(&self, message: Message) -> Result<()> {
        self.slot.outcome.reset();
        self.link.submit_request(message)
    }

    /// Take the outcome if the server has resolved the request.
    pub fn poll_answer(&self) -> Option<Outcome> {
        self.slot.outcome.try_take()
    }

    /// Give up on the oldest outstanding request. The server confirms with
    /// [`Outcome::Dropped`], unless the answer wins the race.
    pub fn report_timeout(&self) -> Result<()> {
        self.link.report_timeout()
    }
}
