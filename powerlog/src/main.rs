//! # LMG95 Power Logger
//!
//! Records the measurements of a ZES Zimmer LMG95 power analyzer to a text file.
//!
//! ## Overview
//!
//! The instrument is reached either on a local serial port or through an
//! RS232-Ethernet converter. After a reset, the requested values are selected
//! and the instrument is put into continuous mode, reporting one record per
//! measurement interval until the logger is interrupted with Ctrl-C. The
//! instrument is always returned to local control before the logger exits.
pub mod logfile;

use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use lmg_client::{
    Continuous, Lmg95,
    transport::{BreakSignal, SerialConfig, TcpConfig, Transport, tcp::DEFAULT_PORT},
};
use lmg_protocol::ValueSelection;

use crate::logfile::{MeasurementLog, format_record};

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Parser, Eq, PartialEq, Clone, Debug)]
enum Device {
    /// Instrument on a local serial port
    Serial {
        path: String,
        #[arg(long, help = "The port does not echo written characters")]
        no_echo: bool,
        #[arg(long, help = "Signal a break in-band as telnet IAC BRK")]
        telnet_break: bool,
    },
    /// Instrument behind a TCP serial bridge
    Tcp {
        host: String,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(long, help = "Plain TCP without telnet framing")]
        raw: bool,
        #[arg(long, help = "The bridge forwards the serial echo")]
        echo: bool,
    },
}

#[derive(Parser, Debug)]
#[command(about = "Continuous measurement logger for the ZES Zimmer LMG95", long_about=None)]
struct Args {
    /// File the records are written to
    logfile: PathBuf,

    #[arg(
        short,
        long,
        help = "The measurement interval in seconds",
        default_value = "1.0",
        value_parser = seconds
    )]
    interval: Duration,

    #[arg(short, long, help = "Enable the 60 Hz low-pass filter")]
    lowpass: bool,

    #[arg(short, long, help = "Reset the instrument and exit")]
    reset: bool,

    #[arg(short, long, help = "Print every record")]
    verbose: bool,

    #[arg(
        long,
        help = "Comma separated values to record",
        default_value = "count,utrms,itrms,p,pf"
    )]
    values: ValueSelection,

    #[arg(
        long,
        help = "The read timeout in seconds",
        default_value = "3",
        value_parser = seconds
    )]
    timeout: Duration,

    #[clap(subcommand)]
    device: Device,
}

fn seconds(s: &str) -> Result<Duration, String> {
    let seconds: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(format!("{} is not a positive number of seconds", s));
    }
    Ok(Duration::from_secs_f64(seconds))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::debug!("Parsed arguments: {:?}", args);

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, stopping measurement");
            flag.store(true, Ordering::SeqCst);
        }
    });

    tokio::task::spawn_blocking(move || run(&args, &interrupted)).await?
}

fn run(args: &Args, interrupted: &AtomicBool) -> Result<(), BoxError> {
    match &args.device {
        Device::Serial {
            path,
            no_echo,
            telnet_break,
        } => {
            let config = SerialConfig {
                timeout: args.timeout,
                echo: !no_echo,
                break_signal: if *telnet_break {
                    BreakSignal::Telnet
                } else {
                    BreakSignal::Line
                },
                ..SerialConfig::default()
            };
            log::info!("Opening serial port {}", path);
            measure(Lmg95::open_serial(path, config)?, args, interrupted)
        }
        Device::Tcp {
            host,
            port,
            raw,
            echo,
        } => {
            let config = TcpConfig {
                timeout: args.timeout,
                telnet: !raw,
                echo: *echo,
            };
            log::info!("Connecting to {}:{}", host, port);
            measure(
                Lmg95::connect((host.as_str(), *port), config)?,
                args,
                interrupted,
            )
        }
    }
}

fn measure<T: Transport>(
    mut lmg: Lmg95<T>,
    args: &Args,
    interrupted: &AtomicBool,
) -> Result<(), BoxError> {
    accept_mismatch(lmg.reset())?;
    if args.reset {
        lmg.cont_off()?;
        lmg.disconnect()?;
        println!("instrument reset");
        return Ok(());
    }

    println!("device found: {}", lmg.read_id()?);
    log::info!("Instrument errors: {}", lmg.read_errors()?);

    accept_mismatch(lmg.set_cycle(args.interval))?;
    if args.lowpass {
        accept_mismatch(lmg.enable_lowpass())?;
    }
    lmg.select_values(&args.values)?;

    let file = File::create(&args.logfile)?;
    let mut output = MeasurementLog::new(BufWriter::new(file));

    let outcome = {
        let mut stream = lmg.start_continuous()?;
        let outcome = output
            .write_header(&args.values)
            .map_err(BoxError::from)
            .and_then(|_| record(&mut stream, &mut output, args.verbose, interrupted));
        if let Err(e) = stream.stop() {
            log::warn!("Stopping continuous mode failed: {}", e);
        }
        outcome
    };

    match lmg.disconnect() {
        Ok(errors) => log::info!("Instrument errors: {}", errors),
        Err(e) => log::warn!("Disconnect failed: {}", e),
    }

    if !args.verbose {
        println!();
    }
    println!(
        "{} records written to {}",
        output.records(),
        args.logfile.display()
    );
    outcome
}

/// Setup continues when the instrument acknowledges a command with something else than `1`.
fn accept_mismatch(result: Result<(), lmg_client::Error>) -> Result<(), lmg_client::Error> {
    match result {
        Err(e) if e.is_ack_mismatch() => {
            log::warn!("{}", e);
            Ok(())
        }
        other => other,
    }
}

/// Log records until interrupted or a read fails for another reason than a timeout.
fn record<T: Transport, W: Write>(
    stream: &mut Continuous<'_, T>,
    output: &mut MeasurementLog<W>,
    verbose: bool,
    interrupted: &AtomicBool,
) -> Result<(), BoxError> {
    while !interrupted.load(Ordering::SeqCst) {
        let values = match stream.read_values() {
            Ok(values) => values,
            Err(e) if e.is_timeout() => {
                log::warn!("No record received: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if values.is_empty() {
            continue;
        }

        let now = chrono::Utc::now();
        output.write_record(now, &values)?;
        if verbose {
            println!("{}", format_record(now, &values));
        } else {
            print!("\r{} records", output.records());
            std::io::stdout().flush()?;
        }
    }
    Ok(())
}
