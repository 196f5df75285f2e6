//! # LMG95 Protocol Library
//!
//! Wire vocabulary of the ZES Zimmer LMG95 single-phase power analyzer.
//!
//! ## Overview
//!
//! The LMG95 is controlled through a line based ASCII protocol over a serial line
//! (or a network bridge that emulates one). It understands two command languages:
//!
//! - **SCPI**: the standard dialect, active after power-up
//! - **Short**: a compact instrument specific dialect, needed for the measurement commands
//!
//! This crate provides the building blocks shared by clients and simulators:
//!
//! - [`Command`]: a validated command line that can never contain a line delimiter
//! - [`Language`]: the two command languages and the commands switching between them
//! - [`Channel`] and [`ValueSelection`]: the values requested from the instrument
//! - [`codec`]: line framing, incremental line decoding and record parsing
//!
//! ## Wire Format
//!
//! - Every command and every response ends with `CR LF`
//! - Several commands or queries in one line are separated by `;`
//! - An acknowledged command appends `;*OPC?` and the instrument answers `1`
//! - A measurement record is a line of `;` separated numbers
//!
//! ## Basic Usage
//!
//! ```
//! use lmg_protocol::{Command, ValueSelection, codec::parse_record};
//!
//! let cmd = Command::new("*RST").expect("no delimiter in command");
//! assert_eq!(cmd.with_opc().encode(), b"*RST;*OPC?\r\n");
//!
//! let selection = ValueSelection::from_names(["count", "p"]).expect("valid names");
//! assert_eq!(selection.to_command().as_str(), "ACTN;count?;p?");
//!
//! let record = parse_record("3;120.5").expect("numeric record");
//! assert_eq!(record, vec![3.0, 120.5]);
//! ```
//!
//! ## Async Framing
//!
//! With the `tokio` feature enabled, `codec::LineCodec` implements the
//! `tokio-util` `Decoder` and `Encoder` traits for use with `Framed`.
//!
//! ## Error Handling
//!
//! This library uses the [`error::ReadError`] type for construction and parsing errors.

pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod error;
