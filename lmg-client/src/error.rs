use std::{error::Error as StdError, fmt::Display, io};

use lmg_protocol::error::ReadError;

/// Errors returned by transports, the session and the instrument driver.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Serial(serialport::Error),
    /// Invalid command text or an unparsable response
    Protocol(ReadError),
    /// No line delimiter arrived within the read timeout.
    /// Contains the bytes of the line received so far.
    Timeout { partial: Vec<u8> },
    /// An acknowledged command was answered with something other than `1`
    AckMismatch { command: String, received: String },
    /// A record does not have one value per selected channel
    RecordLength { expected: usize, got: usize },
    /// Continuous mode was requested before any values were selected
    NoSelection,
    /// The transport was already closed
    Closed,
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn is_ack_mismatch(&self) -> bool {
        matches!(self, Error::AckMismatch { .. })
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<serialport::Error> for Error {
    fn from(value: serialport::Error) -> Self {
        Error::Serial(value)
    }
}

impl From<ReadError> for Error {
    fn from(value: ReadError) -> Self {
        match value {
            ReadError::IoError(err) => Error::Io(err),
            other => Error::Protocol(other),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(error) => write!(f, "{}", error),
            Error::Serial(error) => write!(f, "Serial port: {}", error),
            Error::Protocol(error) => write!(f, "{}", error),
            Error::Timeout { partial } if partial.is_empty() => {
                write!(f, "Timed out waiting for a response")
            }
            Error::Timeout { partial } => write!(
                f,
                "Timed out waiting for the end of line {:?}",
                String::from_utf8_lossy(partial)
            ),
            Error::AckMismatch { command, received } => write!(
                f,
                "Command {:?} was acknowledged with {:?} instead of \"1\"",
                command, received
            ),
            Error::RecordLength { expected, got } => write!(
                f,
                "Record has {} values, but {} were selected",
                got, expected
            ),
            Error::NoSelection => write!(f, "No values selected"),
            Error::Closed => write!(f, "Connection is closed"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(error) => Some(error),
            Error::Serial(error) => Some(error),
            Error::Protocol(error) => Some(error),
            _ => None,
        }
    }
}
