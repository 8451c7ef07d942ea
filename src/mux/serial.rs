//! Serial-port transport for the motor controllers.
//!
//! Wraps a `serialport` handle with a short read timeout so that `read`
//! behaves as a non-blocking poll: a timeout is reported as "0 bytes".

use core::time::Duration;
use std::io::{ErrorKind, Read, Write};

use anyhow::Context;
use log::info;

use super::io_task::{self, IoTask};
use super::server::Server;
use super::transport::Transport;
use crate::config::LinkConfig;

/// Read timeout handed to the OS driver; the io task polls on its own timer.
const READ_TIMEOUT: Duration = Duration::from_millis(1);

/// UART link to one or more daisy-chained motor controllers.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Open `config.port_name` at `config.baud_rate`.
    ///
    /// A port that cannot be opened is fatal: the error carries
    /// `"<port>: <reason>"` and no transport is produced.
    pub fn open(config: &LinkConfig) -> anyhow::Result<Self> {
        let port = serialport::new(config.port_name.as_str(), config.baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .with_context(|| format!("{}: cannot open serial port", config.port_name))?;

        info!(
            "Serial: opened {} @ {} baud",
            config.port_name, config.baud_rate
        );
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    type Error = std::io::Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        self.port.write_all(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.port.flush()
    }

    fn available(&self) -> bool {
        // A failing query lets the next read report the fault.
        self.port.bytes_to_read().map_or(true, |n| n > 0)
    }
}

impl Server<SerialTransport> {
    /// Open the configured serial port and build a server that owns it.
    pub fn open_serial(config: &LinkConfig) -> anyhow::Result<Self> {
        config.validate().map_err(anyhow::Error::new)?;
        let transport = SerialTransport::open(config)?;
        Ok(Self::new(transport, config))
    }
}

/// Open the configured serial port and run a server for it on the io thread.
pub fn spawn_serial<F>(config: &LinkConfig, setup: F) -> anyhow::Result<IoTask>
where
    F: FnOnce(&Server<SerialTransport>) + Send + 'static,
{
    config.validate().map_err(anyhow::Error::new)?;
    let transport = SerialTransport::open(config)?;
    io_task::spawn(transport, config, setup)
}
