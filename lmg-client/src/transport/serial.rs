//! # Serial Transport
//!
//! RS232 connection to the instrument, 115200 baud 8N1 without flow control.
//!
//! The LMG95 interface echoes every received byte, so echo draining is enabled
//! by default.
//!
//! ## Example Usage
//!
//! ```ignore
//! use lmg_client::transport::{SerialConfig, SerialTransport};
//!
//! let transport = SerialTransport::open("/dev/ttyUSB0", SerialConfig::default())?;
//! ```
use std::{
    io::{Read, Write},
    thread,
    time::Duration,
};

use lmg_protocol::TELNET_BREAK;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::{
    Error,
    transport::{DEFAULT_TIMEOUT, Transport, timeout_as_empty},
};

/// How long the line is held in the break condition.
const BREAK_DURATION: Duration = Duration::from_millis(250);

/// The way a break is signalled on a serial port.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum BreakSignal {
    /// Hold the TX line low
    #[default]
    Line,
    /// Send the telnet `IAC BRK` sequence in-band, for virtual ports of network bridges
    Telnet,
}

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub timeout: Duration,
    pub echo: bool,
    pub break_signal: BreakSignal,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            timeout: DEFAULT_TIMEOUT,
            echo: true,
            break_signal: BreakSignal::default(),
        }
    }
}

pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    config: SerialConfig,
}

impl SerialTransport {
    pub fn open(path: &str, config: SerialConfig) -> Result<SerialTransport, Error> {
        log::debug!(
            "Opening serial port {} at {} baud (echo={})",
            path,
            config.baud_rate,
            config.echo
        );
        let port = serialport::new(path, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.timeout)
            .open()?;
        log::info!("Serial port {} opened", path);
        Ok(SerialTransport {
            port: Some(port),
            config,
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, Error> {
        self.port.as_mut().ok_or(Error::Closed)
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        log::trace!("Serial write: {:02x?}", bytes);
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let n = timeout_as_empty(self.port()?.read(buf))?;
        log::trace!("Serial read: {:02x?}", &buf[..n]);
        Ok(n)
    }

    fn send_break(&mut self) -> Result<(), Error> {
        match self.config.break_signal {
            BreakSignal::Line => {
                let port = self.port()?;
                port.set_break()?;
                thread::sleep(BREAK_DURATION);
                port.clear_break()?;
            }
            BreakSignal::Telnet => {
                self.write_all(&TELNET_BREAK)?;
                if self.config.echo {
                    let echo = self.read_exact(TELNET_BREAK.len())?;
                    log::trace!("Break echo: {:02x?}", echo);
                }
            }
        }
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), Error> {
        self.port()?.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn echoes(&self) -> bool {
        self.config.echo
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.port()?.set_timeout(timeout)?;
        self.config.timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Some(port) = self.port.take() {
            log::info!(
                "Closing serial port {}",
                port.name().unwrap_or_else(|| "<unnamed>".to_string())
            );
        }
        Ok(())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
