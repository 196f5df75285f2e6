//! Line framing on top of a [`Transport`].
//!
//! The link writes commands as delimiter-terminated lines, drains the echo of
//! transports that echo, and reads response lines.
//!
//! A timeout in the middle of a line leaves the rest of that line in flight.
//! The link remembers this and drops everything up to the next delimiter before
//! the following read, so later responses stay aligned to line boundaries.
use lmg_protocol::Command;

use crate::{Error, transport::Transport};

pub struct Link<T: Transport> {
    transport: T,
    in_sync: bool,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T) -> Link<T> {
        Link {
            transport,
            in_sync: true,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Whether the next read starts at a line boundary.
    pub fn is_in_sync(&self) -> bool {
        self.in_sync
    }

    /// Write one command line.
    ///
    /// On echoing transports exactly the written number of bytes is read back and
    /// discarded. A short or differing echo is reported but does not fail the command.
    pub fn send(&mut self, command: &Command) -> Result<(), Error> {
        log::debug!("w: {}", command);
        let encoded = command.encode();
        self.transport.write_all(&encoded)?;
        if self.transport.echoes() {
            let echo = self.transport.read_exact(encoded.len())?;
            if echo.len() < encoded.len() {
                log::warn!(
                    "Echo of {:?} incomplete: got {} of {} bytes",
                    command.as_str(),
                    echo.len(),
                    encoded.len()
                );
            } else if echo != encoded {
                log::warn!(
                    "Echo of {:?} differs: {:?}",
                    command.as_str(),
                    String::from_utf8_lossy(&echo)
                );
            }
        }
        Ok(())
    }

    /// Read one response line without its delimiter.
    pub fn recv(&mut self) -> Result<String, Error> {
        if !self.in_sync {
            self.resync()?;
        }
        match self.transport.read_until_delimiter() {
            Ok(line) => {
                log::debug!("r: {}", line);
                Ok(line)
            }
            Err(Error::Timeout { partial }) => {
                if !partial.is_empty() {
                    log::warn!(
                        "Response truncated by timeout: {:?}",
                        String::from_utf8_lossy(&partial)
                    );
                    self.in_sync = false;
                }
                Err(Error::Timeout { partial })
            }
            Err(other) => Err(other),
        }
    }

    /// Drop the remainder of a truncated line.
    fn resync(&mut self) -> Result<(), Error> {
        match self.transport.read_until_delimiter() {
            Ok(rest) => {
                log::warn!("Resynchronised, discarded {:?}", rest);
                self.in_sync = true;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Discard all unread input. The next read starts at a fresh line.
    pub fn clear_input(&mut self) -> Result<(), Error> {
        self.transport.clear_input()?;
        self.in_sync = true;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::Loopback;

    fn cmd(payload: &str) -> Command {
        Command::new(payload).unwrap()
    }

    #[test]
    fn send_terminates_once() {
        let mut link = Link::new(Loopback::new());
        link.send(&cmd("*CLS;*OPC?")).unwrap();
        assert_eq!(
            link.transport().wire(),
            &[crate::transport::Wire::Data(b"*CLS;*OPC?\r\n".to_vec())]
        );
    }

    #[test]
    fn echo_is_drained() {
        let mut link = Link::new(Loopback::new().with_echo());
        link.send(&cmd("CONT ON")).unwrap();
        assert_eq!(link.transport().pending(), 0);

        link.transport_mut().push_reply("LMG95");
        link.send(&cmd("*IDN?")).unwrap();
        assert_eq!(link.recv().unwrap(), "LMG95");
    }

    /// Claims to echo but never does.
    struct SilentEcho(Loopback);

    impl Transport for SilentEcho {
        fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
            self.0.write_all(bytes)
        }
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
            self.0.read(buf)
        }
        fn clear_input(&mut self) -> Result<(), Error> {
            self.0.clear_input()
        }
        fn echoes(&self) -> bool {
            true
        }
        fn timeout(&self) -> std::time::Duration {
            self.0.timeout()
        }
        fn set_timeout(&mut self, timeout: std::time::Duration) -> Result<(), Error> {
            self.0.set_timeout(timeout)
        }
        fn close(&mut self) -> Result<(), Error> {
            self.0.close()
        }
    }

    #[test]
    fn short_echo_is_not_fatal() {
        let mut link = Link::new(SilentEcho(Loopback::new()));
        link.transport_mut().0.push_incoming(b"CO");
        link.send(&cmd("CONT ON")).unwrap();
        assert_eq!(link.transport().0.pending(), 0);
        assert!(link.is_in_sync());
    }

    #[test]
    fn recv_strips_delimiter() {
        let mut link = Link::new(Loopback::new());
        link.transport_mut().push_incoming(b"3;120.5\r\n\r\n");
        assert_eq!(link.recv().unwrap(), "3;120.5");
        assert_eq!(link.recv().unwrap(), "");
    }

    #[test]
    fn empty_timeout_keeps_sync() {
        let mut link = Link::new(Loopback::new());
        assert!(link.recv().unwrap_err().is_timeout());
        assert!(link.is_in_sync());
    }

    #[test]
    fn partial_line_resynchronises() {
        let mut link = Link::new(Loopback::new());
        link.transport_mut().push_incoming(b"2;23");
        match link.recv() {
            Err(Error::Timeout { partial }) => assert_eq!(partial, b"2;23".to_vec()),
            other => panic!("expected Timeout, got {:?}", other),
        }
        assert!(!link.is_in_sync());

        link.transport_mut().push_incoming(b"0.4\r\n3;229.9\r\n");
        assert_eq!(link.recv().unwrap(), "3;229.9");
        assert!(link.is_in_sync());
    }

    #[test]
    fn clear_input_restores_sync() {
        let mut link = Link::new(Loopback::new());
        link.transport_mut().push_incoming(b"2;23");
        assert!(link.recv().is_err());
        link.clear_input().unwrap();
        assert!(link.is_in_sync());
        link.transport_mut().push_incoming(b"4;231.0\r\n");
        assert_eq!(link.recv().unwrap(), "4;231.0");
    }
}
