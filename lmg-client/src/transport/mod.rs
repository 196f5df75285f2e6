//! Byte transports the instrument can be reached through.
//!
//! All variants implement [`Transport`]. Reads block for at most the configured
//! timeout and report an elapsed timeout as a zero-length read; retrying is left
//! to the caller.
use std::{io, time::Duration};

use lmg_protocol::{TERMINATOR, error::ReadError};

use crate::Error;

pub mod loopback;
pub mod serial;
pub mod tcp;
mod telnet;

pub use loopback::{Loopback, Wire};
pub use serial::{BreakSignal, SerialConfig, SerialTransport};
pub use tcp::{TcpConfig, TcpTransport};

/// Read timeout applied to every blocking read unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Upper bound for a single response line.
pub const MAX_LINE_LEN: usize = 4096;

/// An ordered, reliable byte connection to the instrument.
pub trait Transport {
    /// Write all bytes to the connection.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error>;

    /// Read up to `buf.len()` bytes.
    ///
    /// Blocks until at least one byte is available or the read timeout elapsed.
    /// Returns `0` when the read timeout elapsed. A connection closed by the
    /// peer is an error, so that callers retrying on timeouts do not spin.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Read exactly `n` bytes, or fewer if a read times out before.
    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let got = self.read(&mut buf[filled..])?;
            if got == 0 {
                break;
            }
            filled += got;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Read a single line and return it without the delimiter.
    ///
    /// Reads byte by byte so that nothing past the delimiter is consumed.
    fn read_until_delimiter(&mut self) -> Result<String, Error> {
        let mut line = Vec::with_capacity(64);
        let mut byte = [0u8];
        while !line.ends_with(TERMINATOR) {
            if line.len() > MAX_LINE_LEN {
                return Err(ReadError::LineTooLong { max: MAX_LINE_LEN }.into());
            }
            if self.read(&mut byte)? == 0 {
                return Err(Error::Timeout { partial: line });
            }
            line.push(byte[0]);
        }
        line.truncate(line.len() - TERMINATOR.len());
        String::from_utf8(line)
            .map_err(|e| ReadError::InvalidFormat(format!("Invalid UTF8: {}", e)).into())
    }

    /// Signal a break to the instrument. Transports without break support do nothing.
    fn send_break(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Discard all received but not yet read bytes.
    fn clear_input(&mut self) -> Result<(), Error>;

    /// Whether the other side echoes every byte written.
    fn echoes(&self) -> bool {
        false
    }

    fn timeout(&self) -> Duration;

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), Error>;

    /// Close the connection. Closing twice is a no-op.
    fn close(&mut self) -> Result<(), Error>;
}

/// Maps a read error caused by an elapsed read timeout to a zero-length read.
pub(crate) fn timeout_as_empty(result: io::Result<usize>) -> Result<usize, Error> {
    match result {
        Ok(n) => Ok(n),
        Err(err) if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
            Ok(0)
        }
        Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(0),
        Err(err) => Err(err.into()),
    }
}
