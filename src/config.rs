//! Link configuration parameters
//!
//! All tunable parameters for one shared motor-controller link.
//! Values come from `LinkConfig::default()` or a JSON settings blob.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mux::io_task::READ_BUF_SIZE;

/// Serial link and request-timing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    // --- Port ---
    /// Serial device path (e.g. `/dev/ttyACM0`)
    pub port_name: heapless::String<64>,
    /// Baud rate of the motor controllers
    pub baud_rate: u32,

    // --- Receive path ---
    /// Interval between transport read polls (milliseconds)
    pub read_poll_interval_ms: u32,
    /// Maximum bytes taken from the transport per read
    pub read_chunk_size: u16,

    // --- Client timing ---
    /// How long a requester waits for an answer (milliseconds)
    pub answer_timeout_ms: u32,
    /// Extra attempts after the first timeout
    pub max_retries: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let mut port_name = heapless::String::new();
        let _ = port_name.push_str("/dev/ttyACM0");

        Self {
            // Port
            port_name,
            baud_rate: 460_800,

            // Receive path
            read_poll_interval_ms: 1, // 1 kHz
            read_chunk_size: 256,

            // Client timing
            answer_timeout_ms: 20,
            max_retries: 2,
        }
    }
}

impl LinkConfig {
    /// Parse a JSON settings blob; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|_| Error::Config("malformed link config"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the link cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.port_name.is_empty() {
            return Err(Error::Config("port name is empty"));
        }
        if self.baud_rate == 0 {
            return Err(Error::Config("baud rate must be non-zero"));
        }
        if self.read_poll_interval_ms == 0 {
            return Err(Error::Config("read poll interval must be non-zero"));
        }
        if self.read_chunk_size == 0 || self.read_chunk_size as usize > READ_BUF_SIZE {
            return Err(Error::Config("read chunk size out of range"));
        }
        if self.answer_timeout_ms == 0 {
            return Err(Error::Config("answer timeout must be non-zero"));
        }
        Ok(())
    }
}
