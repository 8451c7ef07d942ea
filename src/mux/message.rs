//! Request unit: bytes to transmit plus the matcher for the reply.
//!
//! The payload is opaque; no header, checksum or length field is added.
//! Any framing the controller expects is already inside `payload`, and
//! any framing it answers with is expressed by the matcher.

use core::fmt;
use std::sync::Arc;

use super::pattern::{Literal, Matcher, Pattern};
use crate::error::{LinkError, Result};

/// Maximum request payload (stack-allocated).
pub const MAX_PAYLOAD: usize = 64;

/// One outgoing command and the shape of its answer.
///
/// Cloning is cheap: the matcher is shared, so a requester can resend
/// the same message on retry.
#[derive(Clone)]
pub struct Message {
    payload: heapless::Vec<u8, MAX_PAYLOAD>,
    matcher: Arc<dyn Matcher>,
}

impl Message {
    /// Build a message from raw bytes and any matcher.
    pub fn new(payload: &[u8], matcher: impl Matcher + 'static) -> Result<Self> {
        let payload = heapless::Vec::from_slice(payload).map_err(|_| LinkError::PayloadTooLarge)?;
        Ok(Self {
            payload,
            matcher: Arc::new(matcher),
        })
    }

    /// Build a message whose answer is described by a [`Pattern`] source.
    pub fn with_pattern(payload: &[u8], pattern: &str) -> Result<Self> {
        Self::new(payload, Pattern::new(pattern)?)
    }

    /// Build a message acknowledged by an exact byte string.
    pub fn with_ack(payload: &[u8], ack: &[u8]) -> Result<Self> {
        Self::new(payload, Literal::new(ack)?)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn matcher(&self) -> &dyn Matcher {
        self.matcher.as_ref()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("payload", &self.payload.as_slice())
            .finish_non_exhaustive()
    }
}
