//! # Loopback Transport
//!
//! In-memory transport for testing drivers without an instrument.
//!
//! Every write and break is recorded. Input is served from a queue that the test
//! fills up front; when the queue is empty, reads report a timeout immediately.
//! Optionally the loopback echoes writes like a serial line, acknowledges every
//! `*OPC?` query with `1` and answers other queries from a list of scripted replies.
//!
//! ```
//! use lmg_client::transport::{Loopback, Transport};
//!
//! let mut transport = Loopback::new().with_auto_ack();
//! transport.write_all(b"*RST;*OPC?\r\n").unwrap();
//! assert_eq!(transport.read_until_delimiter().unwrap(), "1");
//! assert_eq!(transport.commands(), vec!["*RST;*OPC?".to_string()]);
//! ```
use std::{collections::VecDeque, time::Duration};

use lmg_protocol::{OPC_ACK, OPC_SUFFIX, TERMINATOR};

use crate::{Error, transport::Transport};

/// One event on the outgoing side of a [`Loopback`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Wire {
    Data(Vec<u8>),
    Break,
}

#[derive(Debug)]
pub struct Loopback {
    incoming: VecDeque<u8>,
    replies: VecDeque<String>,
    written: Vec<Wire>,
    echo: bool,
    auto_ack: bool,
    timeout: Duration,
    input_clears: usize,
    closed: bool,
}

impl Default for Loopback {
    fn default() -> Self {
        Loopback {
            incoming: VecDeque::new(),
            replies: VecDeque::new(),
            written: Vec::new(),
            echo: false,
            auto_ack: false,
            timeout: Duration::ZERO,
            input_clears: 0,
            closed: false,
        }
    }
}

impl Loopback {
    pub fn new() -> Loopback {
        Loopback::default()
    }

    /// Echo every write back into the input, like a serial line wired to echo.
    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Answer every `*OPC?` and `...;*OPC?` line with `1`.
    pub fn with_auto_ack(mut self) -> Self {
        self.auto_ack = true;
        self
    }

    /// Queue raw bytes to be read.
    pub fn push_incoming(&mut self, bytes: &[u8]) {
        self.incoming.extend(bytes);
    }

    /// Queue a line to be read; the delimiter is appended.
    pub fn push_line(&mut self, line: &str) {
        self.push_incoming(line.as_bytes());
        self.push_incoming(TERMINATOR);
    }

    /// Queue a reply that is delivered after the next written query line.
    pub fn push_reply(&mut self, reply: &str) {
        self.replies.push_back(reply.to_string());
    }

    /// Everything written so far, in order.
    pub fn wire(&self) -> &[Wire] {
        &self.written
    }

    /// Written data lines with their delimiter stripped; breaks are left out.
    pub fn commands(&self) -> Vec<String> {
        self.written
            .iter()
            .filter_map(|wire| match wire {
                Wire::Data(data) => Some(
                    String::from_utf8_lossy(data.strip_suffix(TERMINATOR).unwrap_or(&data[..]))
                        .into_owned(),
                ),
                Wire::Break => None,
            })
            .collect()
    }

    /// Number of bytes queued but not read yet.
    pub fn pending(&self) -> usize {
        self.incoming.len()
    }

    pub fn input_clears(&self) -> usize {
        self.input_clears
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn respond(&mut self, data: &[u8]) {
        let Some(line) = data.strip_suffix(TERMINATOR) else {
            return;
        };
        let opc_query = line.ends_with(OPC_SUFFIX.as_bytes()) || line == &OPC_SUFFIX.as_bytes()[1..];
        if self.auto_ack && opc_query {
            self.push_line(OPC_ACK);
        } else if line.ends_with(b"?") {
            if let Some(reply) = self.replies.pop_front() {
                self.push_line(&reply);
            }
        }
    }
}

impl Transport for Loopback {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.written.push(Wire::Data(bytes.to_vec()));
        if self.echo {
            self.push_incoming(bytes);
        }
        self.respond(bytes);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        let n = buf.len().min(self.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(self.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn send_break(&mut self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.written.push(Wire::Break);
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), Error> {
        self.incoming.clear();
        self.input_clears += 1;
        Ok(())
    }

    fn echoes(&self) -> bool {
        self.echo
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn echo_precedes_reply() {
        let mut transport = Loopback::new().with_echo();
        transport.push_reply("LMG95");
        transport.write_all(b"*IDN?\r\n").unwrap();
        assert_eq!(transport.read_exact(7).unwrap(), b"*IDN?\r\n".to_vec());
        assert_eq!(transport.read_until_delimiter().unwrap(), "LMG95");
    }

    #[test]
    fn commands_are_not_replied() {
        let mut transport = Loopback::new();
        transport.push_reply("1");
        transport.write_all(b"CONT ON\r\n").unwrap();
        assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn closed_transport_fails() {
        let mut transport = Loopback::new();
        transport.close().unwrap();
        transport.close().unwrap();
        assert!(matches!(transport.write_all(b"GTL\r\n"), Err(Error::Closed)));
    }
}
