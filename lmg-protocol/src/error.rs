use std::{
    error::Error,
    fmt::Display,
    io::{self},
    str::Utf8Error,
};

/// Errors that may occur when building, reading or parsing protocol lines.
#[derive(Debug)]
pub enum ReadError {
    IoError(io::Error),
    /// The command payload contains a line delimiter
    InvalidCommand(String),
    /// The name is not a valid value name
    InvalidChannel(String),
    /// A value selection needs at least one channel
    EmptySelection,
    InvalidFormat(String),
    /// A token of a measurement line is not a number
    MalformedRecord { line: String, token: String },
    /// No delimiter was found within the maximum line length
    LineTooLong { max: usize },
}

impl From<io::Error> for ReadError {
    fn from(value: io::Error) -> Self {
        ReadError::IoError(value)
    }
}

impl From<Utf8Error> for ReadError {
    fn from(value: Utf8Error) -> Self {
        ReadError::InvalidFormat(format!("Invalid UTF8: {}", value))
    }
}

impl Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::IoError(error) => write!(f, "{}", error),
            ReadError::InvalidCommand(cmd) => {
                write!(f, "Command {:?} contains a line delimiter", cmd)
            }
            ReadError::InvalidChannel(name) => write!(f, "Invalid value name {:?}", name),
            ReadError::EmptySelection => write!(f, "At least one value must be selected"),
            ReadError::InvalidFormat(format) => write!(f, "{}", format),
            ReadError::MalformedRecord { line, token } => {
                write!(f, "Malformed value {:?} in record {:?}", token, line)
            }
            ReadError::LineTooLong { max } => {
                write!(f, "Line exceeds the maximum length of {} bytes", max)
            }
        }
    }
}

impl Error for ReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadError::IoError(error) => Some(error),
            _ => None,
        }
    }
}
