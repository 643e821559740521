//! Newline-delimited JSON framing for the telemetry socket.

use super::event::{decode_line, DecodeError, TelemetryRecord};
use bytes::{Buf, BytesMut};
use std::io;
use tokio_util::codec::Decoder;

/// Frames the telemetry stream into [`TelemetryRecord`]s.
///
/// A bad line yields `Some(Err(DecodeError))` and decoding continues with the
/// next line. Only transport failures surface as the codec's `io::Error`.
/// Blank lines are skipped.
#[derive(Debug)]
pub struct TelemetryCodec {
    max_line_bytes: usize,
    next_index: usize,
    discarding: bool,
}

impl TelemetryCodec {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Default for TelemetryCodec {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

fn decode_frame(line: &[u8]) -> Option<Result<TelemetryRecord, DecodeError>> {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text,
        Err(_) => return Some(Err(DecodeError::InvalidUtf8)),
    };
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(decode_line(text))
}

impl Decoder for TelemetryCodec {
    type Item = Result<TelemetryRecord, DecodeError>;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, io::Error> {
        loop {
            let read_to = self.max_line_bytes.saturating_add(1).min(buf.len());
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let frame = buf.split_to(end + 1);
                    if let Some(item) = decode_frame(&frame[..end]) {
                        return Ok(Some(item));
                    }
                }
                (false, None) if buf.len() > self.max_line_bytes => {
                    self.discarding = true;
                    return Ok(Some(Err(DecodeError::LineTooLong {
                        limit: self.max_line_bytes,
                    })));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, io::Error> {
        if let Some(item) = self.decode(buf)? {
            return Ok(Some(item));
        }
        self.next_index = 0;
        if self.discarding || buf.is_empty() {
            self.discarding = false;
            buf.clear();
            return Ok(None);
        }
        let frame = buf.split_to(buf.len());
        Ok(decode_frame(&frame))
    }
}
