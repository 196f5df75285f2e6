use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use lmg_sim::{Synthetic, server::Builder};

#[derive(Parser)]
#[command(about = "Simulated ZES Zimmer LMG95 behind an RS232-Ethernet converter", long_about=None)]
struct Args {
    #[arg(short, long, default_value = "2001")]
    port: u16,

    #[arg(short, long, default_value = "127.0.0.1")]
    ip: IpAddr,

    #[arg(long, help = "Echo received characters like the serial interface")]
    echo: bool,

    #[arg(long, help = "Cycle time in milliseconds after a reset", default_value = "1000")]
    cycle_ms: u64,

    #[arg(long, help = "Voltage of the simulated grid", default_value = "230")]
    voltage: f64,

    #[arg(long, help = "Current drawn by the simulated load", default_value = "1")]
    current: f64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("Starting LMG95 simulator");

    let args = Args::parse();
    let addr = SocketAddr::new(args.ip, args.port);

    let instrument = Synthetic {
        voltage: args.voltage,
        current: args.current,
        ..Synthetic::default()
    };
    let server = Builder::new()
        .echo(args.echo)
        .cycle(Duration::from_millis(args.cycle_ms.max(1)))
        .build(instrument);
    server.listen(addr)
}
