//! The byte pipe underneath the server.
//!
//! A transport moves raw bytes to and from the shared line and nothing
//! else: no framing, no buffering of answers. Deciding where an answer ends
//! is the job of each message's matcher. The server owns its transport
//! exclusively and touches it only from its own thread.
//!
//! [`SerialTransport`](super::serial::SerialTransport) drives the real UART;
//! [`NullTransport`] stands in before the controllers are powered.

/// Half-duplex byte channel the server writes requests to and polls for
/// answers.
pub trait Transport {
    type Error: core::fmt::Debug;

    /// Copy whatever has arrived into `buf` without waiting for more.
    /// `Ok(0)` means the line is quiet.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Put all of `data` on the line; returns `data.len()` on success.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Cheap readiness check: `true` when a `read` has something to
    /// return, or would surface an error. The server skips reading while
    /// this is `false`.
    fn available(&self) -> bool;
}

/// Accepts every request and never answers.
pub struct NullTransport;

impl Transport for NullTransport {
    type Error = ();

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, ()> {
        Ok(0)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ()> {
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn available(&self) -> bool {
        false
    }
}
