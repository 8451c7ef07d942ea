//! Unified error types for the motor link.
//!
//! A single `Error` enum that every part of the multiplexer converts into,
//! keeping error handling at the server loop uniform. All variants are
//! `Copy` so they can be logged, counted and returned through the mailbox
//! path without allocation.

use core::fmt;

use crate::mux::client::ClientId;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The byte transport failed.
    Transport(TransportError),
    /// A request, registration or timeout report could not be routed.
    Link(LinkError),
    /// A response pattern could not be compiled.
    Pattern(PatternError),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Pattern(e) => write!(f, "pattern: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Writing a request payload failed.
    WriteFailed,
    /// Reading from the port failed.
    ReadFailed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteFailed => write!(f, "write failed"),
            Self::ReadFailed => write!(f, "read failed"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The server mailbox is full; the command was not delivered.
    MailboxFull,
    /// The server this link was wired to no longer exists.
    ServerGone,
    /// The pending-request queue is at capacity.
    QueueFull,
    /// A request payload exceeds the fixed message capacity.
    PayloadTooLarge,
    /// The registry has no free slot for another client.
    RegistryFull,
    /// No client with this id is registered.
    UnknownClient(ClientId),
    /// The link belongs to an older registration of this client.
    StaleLink(ClientId),
    /// A timeout was reported but the client has nothing queued.
    NoPendingRequest,
    /// No answer arrived before the client's deadline.
    Timeout,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MailboxFull => write!(f, "server mailbox full"),
            Self::ServerGone => write!(f, "server no longer running"),
            Self::QueueFull => write!(f, "pending queue full"),
            Self::PayloadTooLarge => write!(f, "payload too large"),
            Self::RegistryFull => write!(f, "client registry full"),
            Self::UnknownClient(id) => write!(f, "client {id} not registered"),
            Self::StaleLink(id) => write!(f, "stale link for client {id}"),
            Self::NoPendingRequest => write!(f, "no pending request"),
            Self::Timeout => write!(f, "answer timed out"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Pattern errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternError {
    /// The pattern source is empty.
    Empty,
    /// The pattern can match zero bytes and would never make progress.
    MatchesEmpty,
    /// A `(` or `)` has no partner.
    UnbalancedGroup,
    /// Groups may not nest.
    NestedGroup,
    /// Only one capture group is allowed.
    MultipleGroups,
    /// A quantifier follows nothing it can repeat.
    DanglingQuantifier,
    /// An escape sequence is malformed or unknown.
    BadEscape,
    /// A `{n,m}` bound is malformed or inverted.
    BadRepetition,
    /// A `[...]` set is unterminated or malformed.
    BadSet,
    /// The pattern compiles to more nodes than the matcher holds.
    TooLong,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty pattern"),
            Self::MatchesEmpty => write!(f, "pattern matches the empty string"),
            Self::UnbalancedGroup => write!(f, "unbalanced group"),
            Self::NestedGroup => write!(f, "nested group"),
            Self::MultipleGroups => write!(f, "more than one capture group"),
            Self::DanglingQuantifier => write!(f, "quantifier without atom"),
            Self::BadEscape => write!(f, "bad escape sequence"),
            Self::BadRepetition => write!(f, "bad repetition bounds"),
            Self::BadSet => write!(f, "bad byte set"),
            Self::TooLong => write!(f, "pattern too long"),
        }
    }
}

impl From<PatternError> for Error {
    fn from(e: PatternError) -> Self {
        Self::Pattern(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
