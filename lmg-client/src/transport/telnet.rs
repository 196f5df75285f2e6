//! Minimal telnet framing for serial bridges.
//!
//! All options are refused, so the connection stays a plain 8-bit byte stream
//! apart from the `IAC` escaping.

pub(crate) const IAC: u8 = 0xFF;
const DONT: u8 = 0xFE;
const DO: u8 = 0xFD;
const WONT: u8 = 0xFC;
const WILL: u8 = 0xFB;
const SB: u8 = 0xFA;
const SE: u8 = 0xF0;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
enum State {
    #[default]
    Data,
    Iac,
    Negotiation(u8),
    Subnegotiation,
    SubnegotiationIac,
}

#[derive(Debug, Default)]
pub(crate) struct TelnetFilter {
    state: State,
}

impl TelnetFilter {
    /// Separates payload bytes from telnet commands.
    ///
    /// Payload is appended to `data`, answers to option negotiation to `reply`.
    pub(crate) fn feed(&mut self, input: &[u8], data: &mut Vec<u8>, reply: &mut Vec<u8>) {
        for &byte in input {
            self.state = match (self.state, byte) {
                (State::Data, IAC) => State::Iac,
                (State::Data, b) => {
                    data.push(b);
                    State::Data
                }
                (State::Iac, IAC) => {
                    data.push(IAC);
                    State::Data
                }
                (State::Iac, DO | DONT | WILL | WONT) => State::Negotiation(byte),
                (State::Iac, SB) => State::Subnegotiation,
                (State::Iac, command) => {
                    log::debug!("Ignoring telnet command {:#04x}", command);
                    State::Data
                }
                (State::Negotiation(verb), option) => {
                    match verb {
                        DO => reply.extend_from_slice(&[IAC, WONT, option]),
                        WILL => reply.extend_from_slice(&[IAC, DONT, option]),
                        _ => {}
                    }
                    log::debug!("Refused telnet option {} ({:#04x})", option, verb);
                    State::Data
                }
                (State::Subnegotiation, IAC) => State::SubnegotiationIac,
                (State::Subnegotiation, _) => State::Subnegotiation,
                (State::SubnegotiationIac, SE) => State::Data,
                (State::SubnegotiationIac, _) => State::Subnegotiation,
            };
        }
    }
}

/// Doubles every `IAC` byte of the payload.
pub(crate) fn escape(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    for &byte in payload {
        out.push(byte);
        if byte == IAC {
            out.push(IAC);
        }
    }
    out
}
