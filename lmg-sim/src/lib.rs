//! # LMG95 Simulator Library
//!
//! A stand-in for the ZES Zimmer LMG95 power analyzer behind an RS232-Ethernet
//! converter, for testing clients without hardware.
//!
//! ## Architecture
//!
//! - **[`Instrument`] Trait**: supplies identification and measured values
//! - **[`server::Server`]**: accepts TCP connections and interprets the line
//!   protocol, including the SCPI/short language switch, the error queue,
//!   `*OPC?` acknowledgements and continuous mode
//! - **[`Synthetic`]**: an instrument measuring a steady 50 Hz mains load
//!
//! ## Basic Usage
//!
//! ```ignore
//! use lmg_sim::{Synthetic, server::Builder};
//!
//! let server = Builder::new().echo(true).build(Synthetic::default());
//! server.listen("127.0.0.1:2001")?;
//! ```
//!
//! ## Thread Model
//!
//! Connections are served one after another on the calling thread, like the
//! single serial line of the real instrument.
use std::f64::consts::PI;

use lmg_protocol::Channel;

pub mod server;

/// Source of the values a simulated instrument reports.
pub trait Instrument {
    /// The answer to `*IDN?`.
    fn identify(&self) -> String;

    /// The value of `channel` at `time` seconds after power-up.
    ///
    /// Returns `None` for values the instrument does not know. The cycle
    /// counter and cycle time are maintained by the server and never requested.
    fn measure(&self, channel: &Channel, time: f64) -> Option<f64>;
}

/// A resistive-inductive load on a 230 V / 50 Hz grid with slowly drifting voltage.
#[derive(Debug, Clone)]
pub struct Synthetic {
    pub voltage: f64,
    pub current: f64,
    pub power_factor: f64,
    pub frequency: f64,
}

impl Default for Synthetic {
    fn default() -> Self {
        Synthetic {
            voltage: 230.0,
            current: 1.0,
            power_factor: 0.98,
            frequency: 50.0,
        }
    }
}

impl Synthetic {
    fn drift(&self, time: f64) -> f64 {
        1.0 + 0.005 * (2.0 * PI * time / 60.0).sin()
    }
}

impl Instrument for Synthetic {
    fn identify(&self) -> String {
        "ZES ZIMMER Electronic Systems GmbH,LMG95,SIM,3.124".to_string()
    }

    fn measure(&self, channel: &Channel, time: f64) -> Option<f64> {
        let u = self.voltage * self.drift(time);
        let i = self.current * self.drift(time + 15.0);
        let value = match channel {
            Channel::VoltageRms => u,
            Channel::CurrentRms => i,
            Channel::VoltageDc | Channel::CurrentDc => 0.0,
            Channel::VoltageCrest | Channel::CurrentCrest => 2f64.sqrt(),
            Channel::VoltageForm | Channel::CurrentForm => PI / (2.0 * 2f64.sqrt()),
            Channel::Power => u * i * self.power_factor,
            Channel::PowerFactor => self.power_factor,
            Channel::Frequency => self.frequency,
            Channel::SampleCount => (time.fract() * 1e5).round(),
            Channel::Count | Channel::CycleTime | Channel::Other(_) => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn synthetic_power_is_consistent() {
        let load = Synthetic::default();
        let u = load.measure(&Channel::VoltageRms, 3.0).unwrap();
        let i = load.measure(&Channel::CurrentRms, 3.0).unwrap();
        let p = load.measure(&Channel::Power, 3.0).unwrap();
        assert!((p - u * i * 0.98).abs() < 1e-9);
        assert!((u - 230.0).abs() < 2.0);
    }

    #[test]
    fn unknown_values() {
        let load = Synthetic::default();
        assert_eq!(load.measure(&Channel::Other("phi".to_string()), 0.0), None);
        assert_eq!(load.measure(&Channel::Count, 0.0), None);
    }
}
