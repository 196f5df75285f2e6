use std::{fmt::Display, str::FromStr};

use crate::error::ReadError;

/// Line delimiter terminating every command and every response.
pub const TERMINATOR: &[u8; 2] = b"\r\n";

/// Suffix appended to a command to request an operation-complete acknowledgement.
pub const OPC_SUFFIX: &str = ";*OPC?";

/// Response the instrument sends once an acknowledged command completed.
pub const OPC_ACK: &str = "1";

/// Telnet `IAC BRK`, used as a break signal on network bridges.
pub const TELNET_BREAK: [u8; 2] = [0xFF, 0xF3];

/// The command language the instrument currently interprets.
///
/// The LMG95 powers up in SCPI mode. The short language is a compact,
/// instrument specific vocabulary that is required for the measurement
/// commands (`ACTN`, `CONT`, `CYCL`, ...).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Language {
    #[default]
    Scpi,
    Short,
}

impl Language {
    /// The command that switches the instrument into this language.
    ///
    /// The switch must be authored in the language that is active before the switch.
    pub fn switch_command(&self) -> Command {
        match self {
            Language::Short => Command::from_static("SYST:LANG SHORT"),
            Language::Scpi => Command::from_static("LANG SCPI"),
        }
    }
}

impl Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Scpi => write!(f, "SCPI"),
            Language::Short => write!(f, "SHORT"),
        }
    }
}

/// A single command line without its terminator.
///
/// A command can never contain `CR` or `LF`, so encoding it always yields
/// exactly one line on the wire.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Command(String);

impl Command {
    pub fn new(payload: impl Into<String>) -> Result<Command, ReadError> {
        let payload = payload.into();
        if payload.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(ReadError::InvalidCommand(payload));
        }
        Ok(Command(payload))
    }

    /// Creates a command from a literal that is known to be free of line delimiters.
    pub(crate) fn from_static(payload: &'static str) -> Command {
        debug_assert!(!payload.contains(['\r', '\n']));
        Command(payload.to_owned())
    }

    /// Returns this command with the `;*OPC?` suffix appended.
    pub fn with_opc(&self) -> Command {
        Command(format!("{}{}", self.0, OPC_SUFFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Length of the command on the wire, terminator included.
    pub fn encoded_len(&self) -> usize {
        self.0.len() + TERMINATOR.len()
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Command {
    type Err = ReadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::new(s)
    }
}

/// A measurement value the instrument can report, named as in the short language.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Channel {
    /// Number of measurement cycles since continuous mode was entered
    Count,
    /// Sample count of the current cycle
    SampleCount,
    /// Cycle time
    CycleTime,
    /// True RMS voltage
    VoltageRms,
    /// True RMS current
    CurrentRms,
    /// DC voltage
    VoltageDc,
    /// DC current
    CurrentDc,
    /// Voltage crest factor
    VoltageCrest,
    /// Current crest factor
    CurrentCrest,
    /// Voltage form factor
    VoltageForm,
    /// Current form factor
    CurrentForm,
    /// Active power
    Power,
    /// Power factor
    PowerFactor,
    /// Frequency of the synchronisation source
    Frequency,
    /// Any other value name understood by the instrument
    Other(String),
}

impl Channel {
    pub const KNOWN: [Channel; 14] = [
        Channel::Count,
        Channel::SampleCount,
        Channel::CycleTime,
        Channel::VoltageRms,
        Channel::CurrentRms,
        Channel::VoltageDc,
        Channel::CurrentDc,
        Channel::VoltageCrest,
        Channel::CurrentCrest,
        Channel::VoltageForm,
        Channel::CurrentForm,
        Channel::Power,
        Channel::PowerFactor,
        Channel::Frequency,
    ];

    /// The short language name of this value, in lower case.
    pub fn name(&self) -> &str {
        match self {
            Channel::Count => "count",
            Channel::SampleCount => "sctc",
            Channel::CycleTime => "cycr",
            Channel::VoltageRms => "utrms",
            Channel::CurrentRms => "itrms",
            Channel::VoltageDc => "udc",
            Channel::CurrentDc => "idc",
            Channel::VoltageCrest => "ucf",
            Channel::CurrentCrest => "icf",
            Channel::VoltageForm => "uff",
            Channel::CurrentForm => "iff",
            Channel::Power => "p",
            Channel::PowerFactor => "pf",
            Channel::Frequency => "freq",
            Channel::Other(name) => name,
        }
    }
}

impl FromStr for Channel {
    type Err = ReadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(ReadError::InvalidChannel(s.to_string()));
        }
        Ok(Channel::KNOWN
            .into_iter()
            .find(|known| known.name() == name)
            .unwrap_or(Channel::Other(name)))
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[test]
fn channel_names_round_trip() {
    for channel in Channel::KNOWN {
        assert_eq!(channel.name().parse::<Channel>().unwrap(), channel);
    }
    assert_eq!("UTRMS".parse::<Channel>().unwrap(), Channel::VoltageRms);
    assert_eq!(
        "phi".parse::<Channel>().unwrap(),
        Channel::Other("phi".to_string())
    );
    assert!("u rms".parse::<Channel>().is_err());
    assert!("p?".parse::<Channel>().is_err());
}

/// Ordered, non-empty set of values requested from the instrument.
///
/// The order defines both the query sent to the instrument and the column order
/// of every record it reports afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValueSelection {
    channels: Vec<Channel>,
}

impl ValueSelection {
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Result<ValueSelection, ReadError> {
        let channels: Vec<Channel> = channels.into_iter().collect();
        if channels.is_empty() {
            return Err(ReadError::EmptySelection);
        }
        Ok(ValueSelection { channels })
    }

    /// Parses channel names, e.g. `["count", "utrms"]`.
    pub fn from_names<S: AsRef<str>>(
        names: impl IntoIterator<Item = S>,
    ) -> Result<ValueSelection, ReadError> {
        let channels = names
            .into_iter()
            .map(|name| name.as_ref().parse::<Channel>())
            .collect::<Result<Vec<_>, _>>()?;
        ValueSelection::new(channels)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// The short language command requesting all selected values,
    /// `ACTN;<a>?;<b>?;...`.
    pub fn to_command(&self) -> Command {
        let mut payload = String::from("ACTN");
        for channel in &self.channels {
            payload.push(';');
            payload.push_str(channel.name());
            payload.push('?');
        }
        Command(payload)
    }
}

impl FromStr for ValueSelection {
    type Err = ReadError;

    /// Parses a comma or whitespace separated list of channel names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ValueSelection::from_names(
            s.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|name| !name.is_empty()),
        )
    }
}

impl Display for ValueSelection {
    /// Space separated channel names, as used in the log header.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, channel) in self.channels.iter().enumerate() {
            if index > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", channel)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_rejects_delimiters() {
        assert!(matches!(
            Command::new("*RST\r\n*CLS"),
            Err(ReadError::InvalidCommand(_))
        ));
        assert!(Command::new("FILT 4\n").is_err());
        assert_eq!(Command::new("FILT 4").unwrap().as_str(), "FILT 4");
    }

    #[test]
    fn opc_suffix() {
        let cmd = Command::new("*CLS").unwrap();
        assert_eq!(cmd.with_opc().as_str(), "*CLS;*OPC?");
        assert_eq!(cmd.encoded_len(), 6);
    }

    #[test]
    fn language_switch_commands() {
        assert_eq!(Language::default(), Language::Scpi);
        assert_eq!(Language::Short.switch_command().as_str(), "SYST:LANG SHORT");
        assert_eq!(Language::Scpi.switch_command().as_str(), "LANG SCPI");
    }

    #[test]
    fn selection_query() {
        let selection = ValueSelection::from_names(["count", "utrms", "itrms", "p", "pf"]).unwrap();
        assert_eq!(
            selection.to_command().as_str(),
            "ACTN;count?;utrms?;itrms?;p?;pf?"
        );
        assert_eq!(selection.to_string(), "count utrms itrms p pf");
        assert_eq!(selection.len(), 5);
    }

    #[test]
    fn selection_from_list() {
        let selection: ValueSelection = "count, P,freq".parse().unwrap();
        assert_eq!(
            selection.channels(),
            &[Channel::Count, Channel::Power, Channel::Frequency]
        );
    }

    #[test]
    fn empty_selection() {
        assert!(matches!(
            ValueSelection::new(Vec::new()),
            Err(ReadError::EmptySelection)
        ));
        assert!(matches!(
            "".parse::<ValueSelection>(),
            Err(ReadError::EmptySelection)
        ));
    }
}
