use lmg_protocol::{Command, Language, OPC_ACK};

use crate::{Error, link::Link, transport::Transport};

/// Upper bound on lines skipped while waiting for a synchronisation acknowledgement.
const MAX_SYNC_LINES: usize = 64;

/// Request/response session with an instrument that understands SCPI and a
/// short command language.
///
/// Requests are strictly sequential: every query is written and its answer read
/// before the next request is issued. The session tracks which language the
/// instrument currently interprets and switches only when needed.
pub struct Session<T: Transport> {
    link: Link<T>,
    language: Language,
}

impl<T: Transport> Session<T> {
    /// Starts a session on a freshly opened transport. The instrument is assumed to be in SCPI mode.
    pub fn new(transport: T) -> Session<T> {
        Session {
            link: Link::new(transport),
            language: Language::Scpi,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.link.transport_mut()
    }

    pub fn into_transport(self) -> T {
        self.link.into_transport()
    }

    /// Send a command that is not answered.
    pub fn send(&mut self, command: &str) -> Result<(), Error> {
        self.link.send(&Command::new(command)?)
    }

    /// Send a query and return the response line.
    pub fn query(&mut self, command: &str) -> Result<String, Error> {
        self.link.send(&Command::new(command)?)?;
        self.link.recv()
    }

    /// Send a command and wait until the instrument reports it completed.
    ///
    /// The command is sent with `;*OPC?` appended. Any answer other than `1` is
    /// logged and returned as [`Error::AckMismatch`]; callers that prefer to keep
    /// going can check [`Error::is_ack_mismatch`].
    pub fn send_command(&mut self, command: &str) -> Result<(), Error> {
        let command = Command::new(command)?.with_opc();
        self.link.send(&command)?;
        let received = self.link.recv()?;
        if received != OPC_ACK {
            log::warn!(
                "OPC of {:?} returned unexpected value {:?}",
                command.as_str(),
                received
            );
            return Err(Error::AckMismatch {
                command: command.as_str().to_string(),
                received,
            });
        }
        Ok(())
    }

    /// Wait until the instrument worked off everything sent before.
    ///
    /// Lines arriving before the acknowledgement, such as records still in flight
    /// after continuous mode was switched off, are discarded.
    ///
    /// The first line reading `1` is taken as the acknowledgement. A record
    /// that is exactly `1`, as the first record of a selection holding only
    /// `count`, cannot be told apart from it and ends the wait early; the real
    /// acknowledgement then stays in the input.
    pub fn synchronize(&mut self) -> Result<(), Error> {
        self.link.send(&Command::new("*OPC?")?)?;
        let mut received = String::new();
        for _ in 0..MAX_SYNC_LINES {
            received = self.link.recv()?;
            if received == OPC_ACK {
                return Ok(());
            }
            log::debug!("Skipping {:?} while synchronising", received);
        }
        Err(Error::AckMismatch {
            command: "*OPC?".to_string(),
            received,
        })
    }

    fn goto(&mut self, language: Language) -> Result<(), Error> {
        if self.language != language {
            log::debug!("Switching command language {} -> {}", self.language, language);
            self.link.send(&language.switch_command())?;
            self.language = language;
        }
        Ok(())
    }

    /// Switch to the short language unless it is already active.
    pub fn goto_short_commands(&mut self) -> Result<(), Error> {
        self.goto(Language::Short)
    }

    /// Switch to SCPI unless it is already active.
    pub fn goto_scpi_commands(&mut self) -> Result<(), Error> {
        self.goto(Language::Scpi)
    }

    pub fn send_short(&mut self, command: &str) -> Result<(), Error> {
        self.goto_short_commands()?;
        self.send(command)
    }

    pub fn send_scpi(&mut self, command: &str) -> Result<(), Error> {
        self.goto_scpi_commands()?;
        self.send(command)
    }

    pub fn send_short_command(&mut self, command: &str) -> Result<(), Error> {
        self.goto_short_commands()?;
        self.send_command(command)
    }

    pub fn send_scpi_command(&mut self, command: &str) -> Result<(), Error> {
        self.goto_scpi_commands()?;
        self.send_command(command)
    }

    pub fn query_short(&mut self, command: &str) -> Result<String, Error> {
        self.goto_short_commands()?;
        self.query(command)
    }

    pub fn query_scpi(&mut self, command: &str) -> Result<String, Error> {
        self.goto_scpi_commands()?;
        self.query(command)
    }

    /// Read one unsolicited line, e.g. a record in continuous mode.
    pub fn recv(&mut self) -> Result<String, Error> {
        self.link.recv()
    }

    pub fn send_break(&mut self) -> Result<(), Error> {
        log::debug!("Sending break");
        self.link.transport_mut().send_break()
    }

    pub fn clear_input(&mut self) -> Result<(), Error> {
        self.link.clear_input()
    }

    pub fn close(&mut self) -> Result<(), Error> {
        self.link.transport_mut().close()
    }
}
