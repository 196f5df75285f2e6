//! # TCP Transport
//!
//! Connection to an RS232-Ethernet converter that forwards the instrument's
//! serial line over TCP.
//!
//! Most converters speak telnet on their data port. With [`TcpConfig::telnet`]
//! enabled, option negotiation is refused and `IAC` bytes are escaped, and the
//! telnet `IAC BRK` command serves as break signal.
//!
//! ## Example Usage
//!
//! ```ignore
//! use lmg_client::transport::{TcpConfig, TcpTransport};
//!
//! let transport = TcpTransport::connect(("lmg-bridge", 2001), TcpConfig::default())?;
//! ```
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    time::Duration,
};

use lmg_protocol::TELNET_BREAK;

use crate::{
    Error,
    transport::{
        DEFAULT_TIMEOUT, Transport,
        telnet::{self, TelnetFilter},
        timeout_as_empty,
    },
};

/// Default data port of the serial bridge.
pub const DEFAULT_PORT: u16 = 2001;

#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub timeout: Duration,
    /// Speak telnet framing on the connection
    pub telnet: bool,
    /// The bridge forwards the echo of the instrument's serial interface
    pub echo: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            telnet: true,
            echo: false,
        }
    }
}

pub struct TcpTransport {
    stream: Option<TcpStream>,
    config: TcpConfig,
    filter: TelnetFilter,
    pending: VecDeque<u8>,
}

impl TcpTransport {
    pub fn connect(addr: impl ToSocketAddrs, config: TcpConfig) -> Result<TcpTransport, Error> {
        let stream = TcpStream::connect(addr)?;
        if let Ok(peer) = stream.peer_addr() {
            log::info!("Connected to {} (telnet={})", peer, config.telnet);
        }
        stream.set_read_timeout(Some(config.timeout))?;
        stream.set_write_timeout(Some(config.timeout))?;
        stream.set_nodelay(true)?;
        Ok(TcpTransport {
            stream: Some(stream),
            config,
            filter: TelnetFilter::default(),
            pending: VecDeque::new(),
        })
    }

    fn stream(&mut self) -> Result<&mut TcpStream, Error> {
        self.stream.as_mut().ok_or(Error::Closed)
    }

    /// Pass raw socket bytes through the telnet filter into the pending buffer.
    fn receive(&mut self, raw: &[u8]) -> Result<(), Error> {
        if !self.config.telnet {
            self.pending.extend(raw);
            return Ok(());
        }
        let mut data = Vec::with_capacity(raw.len());
        let mut reply = Vec::new();
        self.filter.feed(raw, &mut data, &mut reply);
        self.pending.extend(data);
        if !reply.is_empty() {
            self.stream()?.write_all(&reply)?;
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        log::trace!("TCP write: {:02x?}", bytes);
        let escaped;
        let payload = if self.config.telnet && bytes.contains(&telnet::IAC) {
            escaped = telnet::escape(bytes);
            &escaped[..]
        } else {
            bytes
        };
        self.stream()?.write_all(payload)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut chunk = [0u8; 512];
        while self.pending.is_empty() {
            let n = match self.stream()?.read(&mut chunk) {
                Ok(0) => {
                    log::warn!("Connection closed by the bridge");
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                }
                result => timeout_as_empty(result)?,
            };
            if n == 0 {
                return Ok(0);
            }
            log::trace!("TCP read: {:02x?}", &chunk[..n]);
            self.receive(&chunk[..n])?;
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn send_break(&mut self) -> Result<(), Error> {
        log::debug!("Sending telnet break");
        self.stream()?.write_all(&TELNET_BREAK)?;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), Error> {
        self.pending.clear();
        self.filter = TelnetFilter::default();
        let stream = self.stream()?;
        stream.set_nonblocking(true)?;
        let mut chunk = [0u8; 512];
        let mut discarded = 0;
        let result = loop {
            match stream.read(&mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => discarded += n,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        stream.set_nonblocking(false)?;
        log::debug!("Discarded {} buffered bytes", discarded);
        Ok(result?)
    }

    fn echoes(&self) -> bool {
        self.config.echo
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        let stream = self.stream()?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        self.config.timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Some(stream) = self.stream.take() {
            log::info!("Closing TCP connection");
            let _ = stream.shutdown(Shutdown::Both);
        }
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
