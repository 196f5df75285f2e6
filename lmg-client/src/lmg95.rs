//! # LMG95 Driver
//!
//! Instrument vocabulary of the ZES Zimmer LMG95 single-phase power analyzer.
//!
//! The driver owns its [`Session`] and thereby the transport. Commands are
//! issued in the language they are written in; switching between SCPI and the
//! short language happens automatically.
//!
//! ## Teardown
//!
//! [`Lmg95::disconnect`] reads the error queue, hands the instrument back to its
//! front panel and closes the transport. A driver that is dropped without being
//! disconnected performs the same steps and logs failures. Likewise a
//! [`Continuous`] guard switches continuous mode off when dropped.
use std::{thread, time::Duration};

use lmg_protocol::{ValueSelection, codec::parse_record};

use crate::{
    Error,
    session::Session,
    transport::{SerialConfig, SerialTransport, TcpConfig, TcpTransport, Transport},
};

#[derive(Debug, Clone)]
pub struct Config {
    /// Time the instrument is given to settle around the break during a reset
    pub settle_time: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settle_time: Duration::from_secs(1),
        }
    }
}

/// Builder to create an [Lmg95] instance with a modified configuration
///
/// # Example
///
/// ```
/// use lmg_client::{lmg95::Builder, transport::Loopback};
/// use std::time::Duration;
///
/// let lmg = Builder::new()
///     .settle_time(Duration::from_millis(200))
///     .build(Loopback::new());
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the delay before and after the break of a reset.
    pub fn settle_time(mut self, settle_time: Duration) -> Self {
        self.config.settle_time = settle_time;
        self
    }

    /// Build and return the driver
    pub fn build<T: Transport>(self, transport: T) -> Lmg95<T> {
        Lmg95::new(transport, self.config)
    }
}

/// Runs an acknowledged command sequence to its end.
///
/// Acknowledgement mismatches are held back and the first one is reported by
/// [`Acknowledgements::finish`]. Any other error ends the sequence.
#[derive(Debug, Default)]
struct Acknowledgements {
    mismatch: Option<Error>,
}

impl Acknowledgements {
    fn check(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        match result {
            Err(e) if e.is_ack_mismatch() => {
                if self.mismatch.is_none() {
                    self.mismatch = Some(e);
                }
                Ok(())
            }
            other => other,
        }
    }

    fn finish(self) -> Result<(), Error> {
        match self.mismatch {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub struct Lmg95<T: Transport> {
    session: Session<T>,
    config: Config,
    selection: Option<ValueSelection>,
    connected: bool,
}

impl Lmg95<SerialTransport> {
    /// Open the instrument on a serial port.
    pub fn open_serial(path: &str, config: SerialConfig) -> Result<Self, Error> {
        Ok(Lmg95::new(
            SerialTransport::open(path, config)?,
            Config::default(),
        ))
    }
}

impl Lmg95<TcpTransport> {
    /// Connect to the instrument through a TCP serial bridge.
    pub fn connect(addr: impl std::net::ToSocketAddrs, config: TcpConfig) -> Result<Self, Error> {
        Ok(Lmg95::new(
            TcpTransport::connect(addr, config)?,
            Config::default(),
        ))
    }
}

impl<T: Transport> Lmg95<T> {
    pub fn new(transport: T, config: Config) -> Lmg95<T> {
        Lmg95 {
            session: Session::new(transport),
            config,
            selection: None,
            connected: true,
        }
    }

    pub fn session(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    pub fn transport(&self) -> &T {
        self.session.transport()
    }

    /// The values requested by the last [`Lmg95::select_values`].
    pub fn selection(&self) -> Option<&ValueSelection> {
        self.selection.as_ref()
    }

    /// Bring the instrument into a defined state.
    ///
    /// Discards pending input, sends a break framed by settle delays and clears
    /// and resets the instrument. A rejected clear does not keep the reset from
    /// being sent; the first [`Error::AckMismatch`] is returned at the end.
    pub fn reset(&mut self) -> Result<(), Error> {
        log::info!("Resetting instrument");
        self.session.clear_input()?;
        thread::sleep(self.config.settle_time);
        self.session.send_break()?;
        thread::sleep(self.config.settle_time);
        let mut acks = Acknowledgements::default();
        acks.check(self.session.send_command("*CLS"))?;
        acks.check(self.session.send_command("*RST"))?;
        acks.finish()
    }

    pub fn read_id(&mut self) -> Result<String, Error> {
        self.session.query("*IDN?")
    }

    /// Read and clear the instrument's error queue.
    pub fn read_errors(&mut self) -> Result<String, Error> {
        self.session.query_scpi("SYST:ERR:ALL?")
    }

    /// Fix the current and voltage ranges instead of auto ranging.
    pub fn set_ranges(&mut self, current: u32, voltage: u32) -> Result<(), Error> {
        let mut acks = Acknowledgements::default();
        acks.check(self.session.send_short_command("IAM MANUAL"))?;
        acks.check(self.session.send_short_command(&format!("IRNG {}", current)))?;
        acks.check(self.session.send_short_command("UAM MANUAL"))?;
        acks.check(self.session.send_short_command(&format!("URNG {}", voltage)))?;
        acks.finish()
    }

    /// Set the measurement cycle time.
    pub fn set_cycle(&mut self, interval: Duration) -> Result<(), Error> {
        self.session
            .send_short_command(&format!("CYCL {}", interval.as_secs_f64()))
    }

    /// Enable the 60 Hz low-pass filter.
    pub fn enable_lowpass(&mut self) -> Result<(), Error> {
        let mut acks = Acknowledgements::default();
        acks.check(self.session.send_short_command("FAAF 0"))?;
        acks.check(self.session.send_short_command("FILT 4"))?;
        acks.finish()
    }

    pub fn beep(&mut self) -> Result<(), Error> {
        self.session.send_short_command("BEEP")
    }

    /// Request the given values.
    ///
    /// The selection defines the layout of every record read afterwards.
    pub fn select_values(&mut self, selection: &ValueSelection) -> Result<(), Error> {
        self.session.send_short(selection.to_command().as_str())?;
        self.selection = Some(selection.clone());
        Ok(())
    }

    /// Read one record.
    ///
    /// An empty line yields an empty record. Otherwise the record must hold one
    /// value per selected channel.
    pub fn read_values(&mut self) -> Result<Vec<f64>, Error> {
        let line = self.session.recv()?;
        let values = parse_record(&line)?;
        if let Some(selection) = &self.selection
            && !values.is_empty()
            && values.len() != selection.len()
        {
            return Err(Error::RecordLength {
                expected: selection.len(),
                got: values.len(),
            });
        }
        Ok(values)
    }

    /// Start sending one record per cycle without being asked.
    pub fn cont_on(&mut self) -> Result<(), Error> {
        self.session.send_short("CONT ON")
    }

    pub fn cont_off(&mut self) -> Result<(), Error> {
        self.session.send_short("CONT OFF")
    }

    /// Enter continuous mode and return a guard reading its records.
    pub fn start_continuous(&mut self) -> Result<Continuous<'_, T>, Error> {
        if self.selection.is_none() {
            return Err(Error::NoSelection);
        }
        self.cont_on()?;
        Ok(Continuous {
            lmg: self,
            active: true,
        })
    }

    /// Return the instrument to front panel control.
    pub fn goto_local(&mut self) -> Result<(), Error> {
        self.session.send("GTL")
    }

    /// Read the error queue, return to local control and close the transport.
    ///
    /// Local control is requested and the transport closed even if reading the
    /// error queue failed. Returns the content of the error queue.
    pub fn disconnect(mut self) -> Result<String, Error> {
        self.release()
    }

    fn release(&mut self) -> Result<String, Error> {
        self.connected = false;
        let errors = self.read_errors();
        let local = self.goto_local();
        let closed = self.session.close();
        let errors = errors?;
        local?;
        closed?;
        Ok(errors)
    }
}

impl<T: Transport> Drop for Lmg95<T> {
    fn drop(&mut self) {
        if self.connected {
            log::debug!("Driver dropped while connected, disconnecting");
            if let Err(e) = self.release() {
                log::warn!("Disconnect failed: {}", e);
            }
        }
    }
}

/// Continuous measurement mode.
///
/// Created by [`Lmg95::start_continuous`]. Leaves continuous mode on
/// [`Continuous::stop`] or when dropped.
pub struct Continuous<'a, T: Transport> {
    lmg: &'a mut Lmg95<T>,
    active: bool,
}

impl<T: Transport> Continuous<'_, T> {
    pub fn selection(&self) -> Option<&ValueSelection> {
        self.lmg.selection()
    }

    /// Read the next record of the stream.
    pub fn read_values(&mut self) -> Result<Vec<f64>, Error> {
        self.lmg.read_values()
    }

    /// Leave continuous mode and wait until records still in flight are drained.
    pub fn stop(mut self) -> Result<(), Error> {
        self.active = false;
        self.lmg.cont_off()?;
        self.lmg.session.synchronize()
    }
}

impl<T: Transport> Drop for Continuous<'_, T> {
    fn drop(&mut self) {
        if self.active {
            log::debug!("Continuous mode dropped while active, switching off");
            if let Err(e) = self.lmg.cont_off() {
                log::warn!("Stopping continuous mode failed: {}", e);
            } else if let Err(e) = self.lmg.session.synchronize() {
                log::warn!("Draining records after continuous mode failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::{Loopback, Wire};

    fn lmg(transport: Loopback) -> Lmg95<Loopback> {
        Builder::new().settle_time(Duration::ZERO).build(transport)
    }

    fn selection(names: &[&str]) -> ValueSelection {
        ValueSelection::from_names(names).unwrap()
    }

    #[test]
    fn reset_sequence() {
        let mut lmg = lmg(Loopback::new().with_auto_ack());
        lmg.reset().unwrap();
        assert_eq!(lmg.transport().input_clears(), 1);
        assert_eq!(
            lmg.transport().wire(),
            &[
                Wire::Break,
                Wire::Data(b"*CLS;*OPC?\r\n".to_vec()),
                Wire::Data(b"*RST;*OPC?\r\n".to_vec()),
            ]
        );
    }

    #[test]
    fn reset_reports_rejected_clear() {
        let mut transport = Loopback::new();
        transport.push_reply("0");
        transport.push_reply("1");
        let mut lmg = lmg(transport);
        match lmg.reset() {
            Err(Error::AckMismatch { command, received }) => {
                assert_eq!(command, "*CLS;*OPC?");
                assert_eq!(received, "0");
            }
            other => panic!("expected AckMismatch, got {:?}", other),
        }
        assert_eq!(lmg.transport().commands(), vec!["*CLS;*OPC?", "*RST;*OPC?"]);
    }

    #[test]
    fn range_setup_runs_past_mismatch() {
        let mut transport = Loopback::new();
        for reply in ["1", "0", "1", "0"] {
            transport.push_reply(reply);
        }
        let mut lmg = lmg(transport);
        match lmg.set_ranges(10, 250) {
            Err(Error::AckMismatch { command, .. }) => assert_eq!(command, "IRNG 10;*OPC?"),
            other => panic!("expected AckMismatch, got {:?}", other),
        }
        assert_eq!(
            lmg.transport().commands(),
            vec![
                "SYST:LANG SHORT",
                "IAM MANUAL;*OPC?",
                "IRNG 10;*OPC?",
                "UAM MANUAL;*OPC?",
                "URNG 250;*OPC?",
            ]
        );
    }

    #[test]
    fn timeout_ends_sequence() {
        let mut lmg = lmg(Loopback::new());
        assert!(lmg.enable_lowpass().unwrap_err().is_timeout());
        assert_eq!(
            lmg.transport().commands(),
            vec!["SYST:LANG SHORT", "FAAF 0;*OPC?"]
        );
    }

    #[test]
    fn read_id_and_errors() {
        let mut transport = Loopback::new();
        transport.push_reply("ZES ZIMMER,LMG95,0,3.124");
        transport.push_reply("0,\"No error\"");
        let mut lmg = lmg(transport);
        assert_eq!(lmg.read_id().unwrap(), "ZES ZIMMER,LMG95,0,3.124");
        assert_eq!(lmg.read_errors().unwrap(), "0,\"No error\"");
        assert_eq!(lmg.transport().commands(), vec!["*IDN?", "SYST:ERR:ALL?"]);
    }

    #[test]
    fn ranges_and_setup_commands() {
        let mut lmg = lmg(Loopback::new().with_auto_ack());
        lmg.set_ranges(10, 250).unwrap();
        lmg.set_cycle(Duration::from_millis(500)).unwrap();
        lmg.enable_lowpass().unwrap();
        lmg.beep().unwrap();
        assert_eq!(
            lmg.transport().commands(),
            vec![
                "SYST:LANG SHORT",
                "IAM MANUAL;*OPC?",
                "IRNG 10;*OPC?",
                "UAM MANUAL;*OPC?",
                "URNG 250;*OPC?",
                "CYCL 0.5;*OPC?",
                "FAAF 0;*OPC?",
                "FILT 4;*OPC?",
                "BEEP;*OPC?",
            ]
        );
    }

    #[test]
    fn whole_second_cycle() {
        let mut lmg = lmg(Loopback::new().with_auto_ack());
        lmg.set_cycle(Duration::from_secs(2)).unwrap();
        assert_eq!(lmg.transport().commands()[1], "CYCL 2;*OPC?");
    }

    #[test]
    fn select_and_read_values() {
        let mut lmg = lmg(Loopback::new());
        lmg.select_values(&selection(&["count", "p"])).unwrap();
        assert_eq!(
            lmg.transport().commands(),
            vec!["SYST:LANG SHORT", "ACTN;count?;p?"]
        );
        lmg.session().transport_mut().push_incoming(b"3;120.5\r\n\r\n");
        assert_eq!(lmg.read_values().unwrap(), vec![3.0, 120.5]);
        assert_eq!(lmg.read_values().unwrap(), Vec::<f64>::new());
    }

    #[test]
    fn malformed_record() {
        let mut lmg = lmg(Loopback::new());
        lmg.select_values(&selection(&["count", "p"])).unwrap();
        lmg.session().transport_mut().push_line("3;---");
        assert!(matches!(
            lmg.read_values(),
            Err(Error::Protocol(
                lmg_protocol::error::ReadError::MalformedRecord { .. }
            ))
        ));
    }

    #[test]
    fn record_length_must_match_selection() {
        let mut lmg = lmg(Loopback::new());
        lmg.select_values(&selection(&["count", "utrms", "p"])).unwrap();
        lmg.session().transport_mut().push_line("3;230.1");
        assert!(matches!(
            lmg.read_values(),
            Err(Error::RecordLength {
                expected: 3,
                got: 2
            })
        ));
    }

    #[test]
    fn truncated_record_times_out() {
        let mut lmg = lmg(Loopback::new());
        lmg.select_values(&selection(&["count"])).unwrap();
        lmg.session().transport_mut().push_incoming(b"12");
        assert!(lmg.read_values().unwrap_err().is_timeout());
    }

    #[test]
    fn continuous_mode_requires_selection() {
        let mut lmg = lmg(Loopback::new());
        assert!(matches!(lmg.start_continuous(), Err(Error::NoSelection)));
        assert!(lmg.transport().wire().is_empty());
    }

    #[test]
    fn continuous_stream() {
        let mut lmg = lmg(Loopback::new().with_auto_ack());
        lmg.reset().unwrap();
        lmg.select_values(&selection(&["count", "utrms"])).unwrap();
        {
            let mut stream = lmg.start_continuous().unwrap();
            let transport = stream.lmg.session().transport_mut();
            transport.push_line("1;230.1");
            transport.push_line("2;230.4");
            transport.push_line("");
            assert_eq!(stream.read_values().unwrap(), vec![1.0, 230.1]);
            assert_eq!(stream.read_values().unwrap(), vec![2.0, 230.4]);
            assert_eq!(stream.read_values().unwrap(), Vec::<f64>::new());
            stream.stop().unwrap();
        }
        assert_eq!(
            lmg.transport().commands(),
            vec![
                "*CLS;*OPC?",
                "*RST;*OPC?",
                "SYST:LANG SHORT",
                "ACTN;count?;utrms?",
                "CONT ON",
                "CONT OFF",
                "*OPC?",
            ]
        );
        assert_eq!(lmg.transport().wire()[0], Wire::Break);
    }

    #[test]
    fn dropped_stream_switches_off() {
        let mut lmg = lmg(Loopback::new().with_auto_ack());
        lmg.select_values(&selection(&["count", "p"])).unwrap();
        let mut stream = lmg.start_continuous().unwrap();
        stream.lmg.session().transport_mut().push_line("4;120.5");
        drop(stream);
        assert_eq!(
            lmg.transport().commands()[2..],
            ["CONT ON", "CONT OFF", "*OPC?"]
        );
        assert_eq!(lmg.transport().pending(), 0);
    }

    #[test]
    fn disconnect_reads_errors_before_local() {
        let mut transport = Loopback::new().with_auto_ack();
        transport.push_reply("0,\"No error\"");
        let mut lmg = lmg(transport);
        lmg.set_cycle(Duration::from_secs(1)).unwrap();
        let errors = lmg.disconnect().unwrap();
        assert_eq!(errors, "0,\"No error\"");
    }

    #[test]
    fn disconnect_order() {
        let mut lmg = lmg(Loopback::new().with_auto_ack());
        lmg.set_cycle(Duration::from_secs(1)).unwrap();
        lmg.session().transport_mut().push_reply("0,\"No error\"");
        lmg.release().unwrap();
        assert_eq!(
            lmg.transport().commands(),
            vec![
                "SYST:LANG SHORT",
                "CYCL 1;*OPC?",
                "LANG SCPI",
                "SYST:ERR:ALL?",
                "GTL",
            ]
        );
        assert!(lmg.transport().is_closed());
    }

    #[test]
    fn failed_error_read_still_closes() {
        let mut lmg = lmg(Loopback::new());
        assert!(lmg.release().unwrap_err().is_timeout());
        assert_eq!(lmg.transport().commands(), vec!["SYST:ERR:ALL?", "GTL"]);
        assert!(lmg.transport().is_closed());
    }
}
