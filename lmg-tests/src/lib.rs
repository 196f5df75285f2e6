//! Shared helpers for the end-to-end tests of the LMG95 workspace.
use std::{
    net::{SocketAddr, TcpListener},
    thread,
    time::Duration,
};

use lmg_client::{
    Lmg95,
    lmg95::Builder as DriverBuilder,
    transport::{TcpConfig, TcpTransport},
};
use lmg_sim::{Synthetic, server::Builder};

/// Starts a simulator on an ephemeral local port and returns its address.
///
/// The simulator thread lives until the test process exits.
pub fn spawn_simulator(builder: Builder) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind simulator");
    let addr = listener.local_addr().expect("simulator address");
    let server = builder.build(Synthetic::default());
    thread::spawn(move || {
        if let Err(e) = server.serve(listener) {
            log::error!("Simulator failed: {}", e);
        }
    });
    addr
}

/// Connects a driver with a short settle time, as the simulator needs none.
pub fn connect(addr: SocketAddr, config: TcpConfig) -> Lmg95<TcpTransport> {
    let transport = TcpTransport::connect(addr, config).expect("connect to simulator");
    DriverBuilder::new()
        .settle_time(Duration::from_millis(10))
        .build(transport)
}
