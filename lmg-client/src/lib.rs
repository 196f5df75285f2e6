//! # LMG95 Client
//!
//! A Rust library for remote control of the ZES Zimmer LMG95 single-phase power
//! analyzer and for streaming its measurements.
//!
//! ## Overview
//!
//! The crate is layered from the byte stream up:
//!
//! - [`transport`]: the [`Transport`](transport::Transport) trait with serial, TCP bridge
//!   and in-memory loopback implementations
//! - [`link`]: line framing, echo draining and resynchronisation after truncated lines
//! - [`session`]: queries, `*OPC?` acknowledged commands and the SCPI/short language switch
//! - [`lmg95`]: the instrument vocabulary and continuous measurement mode
//!
//! For the wire format, see the [`lmg_protocol`] crate.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use lmg_client::{Lmg95, transport::TcpConfig};
//! use lmg_protocol::ValueSelection;
//! use std::time::Duration;
//!
//! let mut lmg = Lmg95::connect(("lmg-bridge", 2001), TcpConfig::default())?;
//! lmg.reset()?;
//! println!("device found: {}", lmg.read_id()?);
//!
//! lmg.set_cycle(Duration::from_secs(1))?;
//! lmg.select_values(&ValueSelection::from_names(["count", "utrms", "p"])?)?;
//!
//! let mut stream = lmg.start_continuous()?;
//! for _ in 0..10 {
//!     println!("{:?}", stream.read_values()?);
//! }
//! stream.stop()?;
//! lmg.disconnect()?;
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Error`]. Timeouts are reported as
//! [`Error::Timeout`] and never retried. A command whose `*OPC?` is answered
//! with anything other than `1` fails with [`Error::AckMismatch`]; the
//! session stays usable, so callers may decide to carry on.
//!
//! ## Logging
//!
//! This crate uses the `log` crate. Every line written and read is logged at
//! `debug` level, raw transport bytes at `trace`.
//!
//! ## Thread Model
//!
//! All I/O is blocking and strictly sequential. A driver owns its transport
//! exclusively and is not meant to be shared between threads.
pub mod error;
pub mod link;
pub mod lmg95;
pub mod session;
pub mod transport;

pub use error::Error;
pub use lmg95::{Continuous, Lmg95};
pub use session::Session;
