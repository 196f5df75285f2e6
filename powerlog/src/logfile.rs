use std::io::{self, Write};

use chrono::{DateTime, Utc};
use lmg_protocol::ValueSelection;

/// Writes measurement records as whitespace separated columns.
///
/// The first line names the columns, prefixed with `#`. Every record starts
/// with its Unix timestamp and is flushed as soon as it is written, so an
/// interrupted run leaves a complete file behind.
pub struct MeasurementLog<W: Write> {
    writer: W,
    records: u64,
}

impl<W: Write> MeasurementLog<W> {
    pub fn new(writer: W) -> MeasurementLog<W> {
        MeasurementLog { writer, records: 0 }
    }

    pub fn write_header(&mut self, selection: &ValueSelection) -> io::Result<()> {
        writeln!(self.writer, "# time {}", selection)?;
        self.writer.flush()
    }

    pub fn write_record(&mut self, time: DateTime<Utc>, values: &[f64]) -> io::Result<()> {
        writeln!(self.writer, "{}", format_record(time, values))?;
        self.writer.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Number of records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// One log line without its newline: the timestamp followed by every value.
pub fn format_record(time: DateTime<Utc>, values: &[f64]) -> String {
    let mut line = format_timestamp(time);
    for value in values {
        line.push(' ');
        line.push_str(&value.to_string());
    }
    line
}

/// Seconds since the Unix epoch with microsecond resolution.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    format!("{}.{:06}", time.timestamp(), time.timestamp_subsec_micros())
}
