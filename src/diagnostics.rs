//! Link diagnostics.
//!
//! Counters kept by the server as requests flow through the queue. A
//! snapshot can be logged as one line or packed into a compact postcard
//! blob for telemetry.

use core::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    /// Requests accepted into the queue.
    pub submitted: u64,
    /// Requests resolved by a matching response.
    pub answered: u64,
    /// Requests given up after a client timeout.
    pub timed_out: u64,
    /// Timeout reports from clients with nothing queued.
    pub rejected_timeouts: u64,
    /// Payload writes the transport refused.
    pub write_errors: u64,
    /// Bytes dropped because no request was waiting for them.
    pub discarded_bytes: u64,
    /// Commands rejected because they came from an outdated link.
    pub stale_commands: u64,
    /// Answers matched for a client that is no longer registered.
    pub orphaned_answers: u64,
    /// Late answers consumed for requests their client had given up on.
    pub dropped_answers: u64,
}

impl LinkStats {
    /// Pack into a compact binary snapshot.
    pub fn encode(&self) -> postcard::Result<Vec<u8>> {
        postcard::to_allocvec(self)
    }

    pub fn decode(bytes: &[u8]) -> postcard::Result<Self> {
        postcard::from_bytes(bytes)
    }

    /// Requests that left the queue one way or another.
    pub fn resolved(&self) -> u64 {
        self.answered + self.timed_out
    }
}

impl fmt::Display for LinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "STATS | submitted={} answered={} timed_out={} | \
             rejected_timeouts={} write_errors={} stale={} orphaned={} dropped={} | discarded={}B",
            self.submitted,
            self.answered,
            self.timed_out,
            self.rejected_timeouts,
            self.write_errors,
            self.stale_commands,
            self.orphaned_answers,
            self.dropped_answers,
            self.discarded_bytes,
        )
    }
}
