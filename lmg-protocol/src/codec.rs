/// Line framing and record parsing for the protocol
use std::io::{self, Write};

use crate::{
    error::ReadError,
    protocol::{Command, TERMINATOR},
};

impl Command {
    /// The command as it appears on the wire, terminator included.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(self.as_bytes());
        out.extend_from_slice(TERMINATOR);
        out
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(&self.encode())
    }

    /// Reads a command back from a single wire line.
    ///
    /// A trailing terminator is stripped; a terminator anywhere else is rejected.
    pub fn decode(line: &[u8]) -> Result<Command, ReadError> {
        let payload = line.strip_suffix(TERMINATOR).unwrap_or(line);
        Command::new(str::from_utf8(payload)?)
    }
}

/// Splits a measurement line into its numeric values.
///
/// Values are separated by `;`. An empty line yields an empty record.
pub fn parse_record(line: &str) -> Result<Vec<f64>, ReadError> {
    if line.trim().is_empty() {
        return Ok(Vec::new());
    }
    line.split(';')
        .map(|token| {
            token
                .trim()
                .parse::<f64>()
                .map_err(|_| ReadError::MalformedRecord {
                    line: line.to_string(),
                    token: token.to_string(),
                })
        })
        .collect()
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(TERMINATOR.len()).position(|w| w == TERMINATOR)
}

/// Incremental splitter turning a byte stream into delimiter-terminated lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> LineDecoder {
        LineDecoder::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete line without its terminator, if one is buffered.
    pub fn next_line(&mut self) -> Option<Result<String, ReadError>> {
        let end = find_terminator(&self.buf)?;
        let line: Vec<u8> = self.buf.drain(..end + TERMINATOR.len()).take(end).collect();
        Some(
            String::from_utf8(line)
                .map_err(|e| ReadError::InvalidFormat(format!("Invalid UTF8: {}", e))),
        )
    }

    /// Drops everything up to and including the next terminator.
    ///
    /// Returns the dropped bytes if a terminator was found. Otherwise the buffer is
    /// left untouched.
    pub fn discard_line(&mut self) -> Option<Vec<u8>> {
        let end = find_terminator(&self.buf)?;
        Some(self.buf.drain(..end + TERMINATOR.len()).collect())
    }

    /// Takes the bytes of an unterminated line out of the decoder.
    pub fn take_partial(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    /// Takes up to `n` buffered bytes.
    pub fn take(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.buf.len());
        self.buf.drain(..n).collect()
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(feature = "tokio")]
mod framed {
    use bytes::{BufMut, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    use super::find_terminator;
    use crate::{
        error::ReadError,
        protocol::{Command, TERMINATOR},
    };

    /// `tokio-util` codec framing [`Command`]s out and response lines in.
    #[derive(Clone, Debug)]
    pub struct LineCodec {
        max_length: usize,
    }

    impl LineCodec {
        pub fn new() -> LineCodec {
            LineCodec::default()
        }

        pub fn new_with_max_length(max_length: usize) -> LineCodec {
            LineCodec { max_length }
        }

        pub fn max_length(&self) -> usize {
            self.max_length
        }
    }

    impl Default for LineCodec {
        fn default() -> Self {
            LineCodec { max_length: 4096 }
        }
    }

    impl Decoder for LineCodec {
        type Item = String;
        type Error = ReadError;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, ReadError> {
            match find_terminator(&src[..]) {
                Some(end) => {
                    let line = src.split_to(end + TERMINATOR.len());
                    Ok(Some(str::from_utf8(&line[..end])?.to_string()))
                }
                None if src.len() > self.max_length => Err(ReadError::LineTooLong {
                    max: self.max_length,
                }),
                None => Ok(None),
            }
        }
    }

    impl Encoder<Command> for LineCodec {
        type Error = ReadError;

        fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), ReadError> {
            dst.reserve(item.encoded_len());
            dst.put_slice(item.as_bytes());
            dst.put_slice(TERMINATOR);
            Ok(())
        }
    }

}

#[cfg(feature = "tokio")]
pub use framed::LineCodec;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_appends_terminator() {
        let cmd = Command::new("*RST;*OPC?").unwrap();
        assert_eq!(cmd.encode(), b"*RST;*OPC?\r\n".to_vec());

        let mut out = Vec::new();
        cmd.write_to(&mut out).unwrap();
        assert_eq!(out, b"*RST;*OPC?\r\n".to_vec());
    }

    #[test]
    fn framing_round_trips() {
        for payload in ["", "*IDN?", "ACTN;count?;utrms?", "CYCL 0.5", "SYST:LANG SHORT"] {
            let encoded = Command::new(payload).unwrap().encode();
            let decoded = Command::decode(&encoded).unwrap();
            assert_eq!(decoded.encode(), encoded);
        }
    }

    #[test]
    fn decode_rejects_inner_terminator() {
        assert!(matches!(
            Command::decode(b"*CLS\r\n*RST\r\n"),
            Err(ReadError::InvalidCommand(_))
        ));
    }

    #[test]
    fn parse_values() {
        assert_eq!(parse_record("3;120.5").unwrap(), vec![3.0, 120.5]);
        assert_eq!(
            parse_record(" 1.5E+01; -2.25e-3 ").unwrap(),
            vec![15.0, -0.00225]
        );
        assert_eq!(parse_record("").unwrap(), Vec::<f64>::new());
    }

    #[test]
    fn parse_malformed_value() {
        match parse_record("1;abc;3") {
            Err(ReadError::MalformedRecord { line, token }) => {
                assert_eq!(line, "1;abc;3");
                assert_eq!(token, "abc");
            }
            other => panic!("expected MalformedRecord, got {:?}", other),
        }
        assert!(parse_record("1;;3").is_err());
    }

    #[test]
    fn decoder_splits_lines() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"1;230.1\r\n\r\n2;23");
        assert_eq!(decoder.next_line().unwrap().unwrap(), "1;230.1");
        assert_eq!(decoder.next_line().unwrap().unwrap(), "");
        assert!(decoder.next_line().is_none());
        decoder.push(b"0.4\r");
        assert!(decoder.next_line().is_none());
        decoder.push(b"\n");
        assert_eq!(decoder.next_line().unwrap().unwrap(), "2;230.4");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn decoder_never_returns_delimiter() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"a\rb\nc\r\n");
        let line = decoder.next_line().unwrap().unwrap();
        assert_eq!(line, "a\rb\nc");
        assert!(!line.contains("\r\n"));
    }

    #[test]
    fn decoder_resynchronises() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"0.4\r\n3;229.9\r\n");
        assert_eq!(decoder.discard_line().unwrap(), b"0.4\r\n".to_vec());
        assert_eq!(decoder.next_line().unwrap().unwrap(), "3;229.9");
        decoder.push(b"4;2");
        assert!(decoder.discard_line().is_none());
        assert_eq!(decoder.take_partial(), b"4;2".to_vec());
    }
}
