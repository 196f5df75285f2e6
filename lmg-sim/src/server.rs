use std::{
    io::{ErrorKind, Read, Write},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

use crate::Instrument;
use lmg_protocol::{Channel, Language, TERMINATOR, codec::LineDecoder, error::ReadError};

const IAC: u8 = 0xFF;
const BRK: u8 = 0xF3;
const SB: u8 = 0xFA;
const SE: u8 = 0xF0;

const NO_ERROR: &str = "0,\"No error\"";
const UNDEFINED_HEADER: &str = "-113,\"Undefined header\"";
const ILLEGAL_VALUE: &str = "-224,\"Illegal parameter value\"";

#[derive(Debug, Clone)]
pub struct Config {
    /// Connections without traffic are closed after this time, unless in continuous mode
    pub idle_timeout: Duration,
    /// Cycle time after connecting and after `*RST`
    pub cycle: Duration,
    /// Echo every received byte, like the instrument's serial interface
    pub echo: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            cycle: Duration::from_secs(1),
            echo: false,
        }
    }
}

#[derive(Debug)]
pub struct Server<T: Instrument> {
    instrument: T,
    config: Config,
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use lmg_sim::{Synthetic, server::Builder};
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .cycle(Duration::from_millis(100))
///     .echo(true)
///     .build(Synthetic::default());
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set how long an idle connection is kept open.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the cycle time used until a client sends `CYCL`.
    pub fn cycle(mut self, cycle: Duration) -> Self {
        self.config.cycle = cycle;
        self
    }

    /// Echo received bytes back to the client.
    pub fn echo(mut self, echo: bool) -> Self {
        self.config.echo = echo;
        self
    }

    /// Build and return the server
    pub fn build<T: Instrument>(self, instrument: T) -> Server<T> {
        Server::new(instrument, self.config)
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
enum Telnet {
    #[default]
    Data,
    Iac,
    Option,
    Subnegotiation,
    SubnegotiationIac,
}

/// Per connection state of the simulated instrument.
#[derive(Debug)]
struct State {
    language: Language,
    errors: Vec<String>,
    cycle: Duration,
    continuous: bool,
    count: u64,
    selection: Vec<Channel>,
    next_record: Instant,
    powered_up: Instant,
    telnet: Telnet,
    decoder: LineDecoder,
}

impl State {
    fn new(config: &Config) -> State {
        State {
            language: Language::Scpi,
            errors: Vec::new(),
            cycle: config.cycle,
            continuous: false,
            count: 0,
            selection: Vec::new(),
            next_record: Instant::now(),
            powered_up: Instant::now(),
            telnet: Telnet::default(),
            decoder: LineDecoder::new(),
        }
    }

    fn reset(&mut self, config: &Config) {
        self.cycle = config.cycle;
        self.continuous = false;
        self.count = 0;
        self.selection.clear();
    }

    fn error(&mut self, error: &str, item: &str) {
        log::debug!("Rejected {:?}: {}", item, error);
        self.errors.push(error.to_string());
    }

    fn drain_errors(&mut self) -> String {
        if self.errors.is_empty() {
            NO_ERROR.to_string()
        } else {
            self.errors.drain(..).collect::<Vec<_>>().join(",")
        }
    }

    /// Strips telnet commands from the received bytes and returns the payload.
    ///
    /// A break discards the partially received line.
    fn filter(&mut self, input: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(input.len());
        for &byte in input {
            self.telnet = match (self.telnet, byte) {
                (Telnet::Data, IAC) => Telnet::Iac,
                (Telnet::Data, b) => {
                    data.push(b);
                    Telnet::Data
                }
                (Telnet::Iac, IAC) => {
                    data.push(IAC);
                    Telnet::Data
                }
                (Telnet::Iac, BRK) => {
                    log::info!("Break received");
                    data.clear();
                    self.decoder.clear();
                    Telnet::Data
                }
                (Telnet::Iac, SB) => Telnet::Subnegotiation,
                (Telnet::Iac, 0xFB..=0xFE) => Telnet::Option,
                (Telnet::Iac, _) | (Telnet::Option, _) => Telnet::Data,
                (Telnet::Subnegotiation, IAC) => Telnet::SubnegotiationIac,
                (Telnet::Subnegotiation, _) => Telnet::Subnegotiation,
                (Telnet::SubnegotiationIac, SE) => Telnet::Data,
                (Telnet::SubnegotiationIac, _) => Telnet::Subnegotiation,
            };
        }
        data
    }
}

fn format_values(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

impl<T: Instrument> Server<T> {
    pub fn new(instrument: T, config: Config) -> Server<T> {
        Server { instrument, config }
    }

    pub fn listen(&self, addr: impl ToSocketAddrs) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr)?;
        self.serve(listener)
    }

    /// Serve connections from an already bound listener, one at a time.
    pub fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        if let Ok(addr) = listener.local_addr() {
            log::info!("Simulator listening on {}", addr);
        }

        for stream in listener.incoming() {
            match stream {
                Ok(tcp) => {
                    if let Ok(addr) = tcp.peer_addr() {
                        log::info!("New client connection from {}", addr);
                    }
                    if let Err(e) = self.handle_client(tcp) {
                        log::error!("Client error: {}", e);
                    }
                }
                Err(e) => log::error!("Connection error: {}", e),
            }
        }
        Ok(())
    }

    fn handle_client(&self, mut tcp: TcpStream) -> Result<(), ReadError> {
        tcp.set_nodelay(true)?;
        let mut state = State::new(&self.config);
        let mut buf = [0u8; 1024];

        loop {
            let timeout = if state.continuous {
                state
                    .next_record
                    .saturating_duration_since(Instant::now())
                    .max(Duration::from_millis(1))
            } else {
                self.config.idle_timeout
            };
            tcp.set_read_timeout(Some(timeout))?;

            match tcp.read(&mut buf) {
                Ok(0) => break, // Client disconnected
                Ok(n) => {
                    let data = state.filter(&buf[..n]);
                    if self.config.echo && !data.is_empty() {
                        tcp.write_all(&data)?;
                    }
                    let out = self.process_bytes(&mut state, &data);
                    tcp.write_all(&out)?;
                }
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if !state.continuous {
                        log::error!("Client read timeout, closing connection");
                        break;
                    }
                }
                Err(err)
                    if err.kind() == ErrorKind::ConnectionAborted
                        || err.kind() == ErrorKind::ConnectionReset =>
                {
                    break;
                }
                Err(err) => return Err(err.into()),
            }

            if state.continuous && Instant::now() >= state.next_record {
                let record = self.record(&mut state);
                tcp.write_all(record.as_bytes())?;
                tcp.write_all(TERMINATOR)?;
                state.next_record = (state.next_record + state.cycle).max(Instant::now());
            }
        }
        log::info!("Client disconnected");
        Ok(())
    }

    /// Feed received payload bytes and return everything to send back.
    fn process_bytes(&self, state: &mut State, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        state.decoder.push(data);
        while let Some(line) = state.decoder.next_line() {
            match line {
                Ok(line) => {
                    if let Some(response) = self.process_line(state, &line) {
                        out.extend_from_slice(response.as_bytes());
                        out.extend_from_slice(TERMINATOR);
                    }
                }
                Err(e) => state.error(UNDEFINED_HEADER, &e.to_string()),
            }
        }
        out
    }

    /// Execute one command line and return the response line, if any.
    fn process_line(&self, state: &mut State, line: &str) -> Option<String> {
        log::debug!("Received line {:?}", line);
        let mut responses = Vec::new();
        let mut action = false;
        for item in line.split(';').map(str::trim).filter(|item| !item.is_empty()) {
            self.execute(state, item, &mut action, &mut responses);
        }
        if responses.is_empty() {
            None
        } else {
            Some(responses.join(";"))
        }
    }

    fn execute(&self, state: &mut State, item: &str, action: &mut bool, responses: &mut Vec<String>) {
        let upper = item.to_ascii_uppercase();
        match upper.as_str() {
            "*OPC?" => responses.push("1".to_string()),
            "*IDN?" => responses.push(self.instrument.identify()),
            "*CLS" => state.errors.clear(),
            "*RST" => state.reset(&self.config),
            "SYST:LANG SHORT" | "SYSTEM:LANGUAGE SHORT" => state.language = Language::Short,
            "LANG SCPI" => state.language = Language::Scpi,
            "GTL" => log::info!("Returning to local control"),
            "SYST:ERR:ALL?" | "SYSTEM:ERROR:ALL?" if state.language == Language::Scpi => {
                responses.push(state.drain_errors())
            }
            _ if state.language == Language::Scpi => state.error(UNDEFINED_HEADER, item),
            "ACTN" => {
                *action = true;
                state.selection.clear();
            }
            "CONT ON" => {
                state.continuous = true;
                state.next_record = Instant::now() + state.cycle;
            }
            "CONT OFF" => state.continuous = false,
            "BEEP" => log::info!("Beep"),
            _ => self.execute_short(state, &upper, item, *action, responses),
        }
    }

    fn execute_short(
        &self,
        state: &mut State,
        upper: &str,
        item: &str,
        action: bool,
        responses: &mut Vec<String>,
    ) {
        if let Some(seconds) = upper.strip_prefix("CYCL ") {
            match seconds.trim().parse::<f64>() {
                Ok(s) if s.is_finite() && s > 0.0 => state.cycle = Duration::from_secs_f64(s),
                _ => state.error(ILLEGAL_VALUE, item),
            }
        } else if ["IAM ", "UAM ", "IRNG ", "URNG ", "FAAF ", "FILT "]
            .iter()
            .any(|prefix| upper.starts_with(prefix))
        {
            log::debug!("Setting {}", upper);
        } else if let Some(name) = item.strip_suffix('?')
            && action
        {
            match name.parse::<Channel>() {
                Ok(channel) => {
                    let value = self.measure(state, &channel);
                    responses.push(format_values(&[value]));
                    state.selection.push(channel);
                }
                Err(_) => state.error(UNDEFINED_HEADER, item),
            }
        } else {
            state.error(UNDEFINED_HEADER, item);
        }
    }

    fn measure(&self, state: &mut State, channel: &Channel) -> f64 {
        match channel {
            Channel::Count => state.count as f64,
            Channel::CycleTime => state.cycle.as_secs_f64(),
            other => {
                let time = state.powered_up.elapsed().as_secs_f64();
                match self.instrument.measure(other, time) {
                    Some(value) => value,
                    None => {
                        state.error(UNDEFINED_HEADER, other.name());
                        0.0
                    }
                }
            }
        }
    }

    /// Produce the next record of continuous mode.
    fn record(&self, state: &mut State) -> String {
        state.count += 1;
        let channels = state.selection.clone();
        let values: Vec<f64> = channels
            .iter()
            .map(|channel| self.measure(state, channel))
            .collect();
        log::trace!("Record {}: {:?}", state.count, values);
        format_values(&values)
    }
}
