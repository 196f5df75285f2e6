use std::{
    io::ErrorKind,
    net::TcpListener,
    thread,
    time::{Duration, Instant},
};

use lmg_client::{Error, transport::TcpConfig};
use lmg_protocol::{Language, ValueSelection};
use lmg_sim::server::Builder;
use lmg_tests::{connect, spawn_simulator};

const NO_ERROR: &str = "0,\"No error\"";

#[test]
fn identify_after_reset() {
    let addr = spawn_simulator(Builder::new());
    let mut lmg = connect(addr, TcpConfig::default());

    lmg.reset().unwrap();
    assert!(lmg.read_id().unwrap().contains("LMG95"));
    assert_eq!(lmg.read_errors().unwrap(), NO_ERROR);
    assert_eq!(lmg.disconnect().unwrap(), NO_ERROR);
}

#[test]
fn continuous_measurement() {
    let addr = spawn_simulator(Builder::new());
    let mut lmg = connect(addr, TcpConfig::default());

    lmg.reset().unwrap();
    lmg.set_cycle(Duration::from_millis(50)).unwrap();
    lmg.enable_lowpass().unwrap();
    let selection = ValueSelection::from_names(["count", "utrms", "p"]).unwrap();
    lmg.select_values(&selection).unwrap();
    assert_eq!(lmg.session().language(), Language::Short);

    let mut counts = Vec::new();
    {
        let mut stream = lmg.start_continuous().unwrap();
        for _ in 0..5 {
            let values = stream.read_values().unwrap();
            assert_eq!(values.len(), 3);
            assert!((values[1] - 230.0).abs() < 5.0);
            counts.push(values[0]);
        }
        stream.stop().unwrap();
    }
    assert!(counts.windows(2).all(|pair| pair[0] < pair[1]), "{:?}", counts);

    assert_eq!(lmg.disconnect().unwrap(), NO_ERROR);
}

#[test]
fn echoing_bridge() {
    let addr = spawn_simulator(Builder::new().echo(true));
    let config = TcpConfig {
        echo: true,
        ..TcpConfig::default()
    };
    let mut lmg = connect(addr, config);

    lmg.reset().unwrap();
    assert!(lmg.read_id().unwrap().contains("LMG95"));
    lmg.set_ranges(2, 250).unwrap();
    lmg.beep().unwrap();
    assert_eq!(lmg.disconnect().unwrap(), NO_ERROR);
}

#[test]
fn short_command_in_scpi_mode_is_queued_as_error() {
    let addr = spawn_simulator(Builder::new());
    let mut lmg = connect(addr, TcpConfig::default());

    lmg.reset().unwrap();
    lmg.session().send("CYCL 1").unwrap();
    assert!(lmg.read_errors().unwrap().starts_with("-113"));
    assert_eq!(lmg.read_errors().unwrap(), NO_ERROR);
}

#[test]
fn unanswered_query_times_out() {
    let addr = spawn_simulator(Builder::new());
    let config = TcpConfig {
        timeout: Duration::from_millis(200),
        ..TcpConfig::default()
    };
    let mut lmg = connect(addr, config);

    match lmg.session().query("GTL") {
        Err(Error::Timeout { partial }) => assert!(partial.is_empty()),
        other => panic!("expected a timeout, got {:?}", other),
    }
    assert!(lmg.read_id().unwrap().contains("LMG95"));
}

#[test]
fn dropped_stream_leaves_continuous_mode() {
    let addr = spawn_simulator(Builder::new());
    let mut lmg = connect(addr, TcpConfig::default());

    lmg.reset().unwrap();
    lmg.set_cycle(Duration::from_millis(50)).unwrap();
    lmg.select_values(&"count pf".parse().unwrap()).unwrap();
    {
        let mut stream = lmg.start_continuous().unwrap();
        assert_eq!(stream.read_values().unwrap().len(), 2);
    }
    lmg.session().synchronize().unwrap();
    assert!(lmg.read_id().unwrap().contains("LMG95"));
}

#[test]
fn dropped_stream_drains_records_before_disconnect() {
    let addr = spawn_simulator(Builder::new());
    let mut lmg = connect(addr, TcpConfig::default());

    lmg.reset().unwrap();
    lmg.set_cycle(Duration::from_millis(20)).unwrap();
    lmg.select_values(&"count pf".parse().unwrap()).unwrap();
    {
        let mut stream = lmg.start_continuous().unwrap();
        stream.read_values().unwrap();
        thread::sleep(Duration::from_millis(150));
    }
    assert_eq!(lmg.disconnect().unwrap(), NO_ERROR);
}

#[test]
fn closed_bridge_is_not_a_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let bridge = thread::spawn(move || drop(listener.accept().unwrap()));
    let mut lmg = connect(addr, TcpConfig::default());
    bridge.join().unwrap();

    let started = Instant::now();
    match lmg.session().recv() {
        Err(Error::Io(e)) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
        other => panic!("expected end of stream, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!lmg.session().recv().unwrap_err().is_timeout());
}
