// crates/core/src/codec.rs
//! Line decoder for the job's merged stdout/stderr pipe.
//!
//! Download tools redraw progress bars with bare carriage returns, so `\r`,
//! `\n` and `\r\n` all terminate a line. Bytes are decoded as lossy UTF-8 and
//! overlong lines are cut at [`MAX_LINE_BYTES`] so a tool that never prints a
//! newline cannot grow the read buffer without bound.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug)]
pub struct OutputLineCodec {
    max_length: usize,
    /// Where the next terminator search starts (bytes before it were scanned).
    next_index: usize,
    /// The previous line ended in `\r` at the very end of the buffer; a `\n`
    /// arriving next belongs to the same terminator.
    skip_lf: bool,
}

impl OutputLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            next_index: 0,
            skip_lf: false,
        }
    }

    fn take_line(&mut self, buf: &mut BytesMut, len: usize) -> String {
        self.next_index = 0;
        let raw = buf.split_to(len);
        String::from_utf8_lossy(&raw).into_owned()
    }
}

impl Default for OutputLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for OutputLineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if self.skip_lf {
            let Some(&first) = buf.first() else {
                return Ok(None);
            };
            if first == b'\n' {
                buf.advance(1);
            }
            self.skip_lf = false;
        }

        let window = buf.len().min(self.max_length);
        let found = buf[self.next_index..window]
            .iter()
            .position(|b| *b == b'\n' || *b == b'\r');

        match found {
            Some(offset) => {
                let end = self.next_index + offset;
                let terminator = buf[end];
                let line = self.take_line(buf, end);
                buf.advance(1);
                if terminator == b'\r' {
                    match buf.first() {
                        Some(b'\n') => buf.advance(1),
                        Some(_) => {}
                        None => self.skip_lf = true,
                    }
                }
                Ok(Some(line))
            }
            None if buf.len() >= self.max_length => {
                let max = self.max_length;
                Ok(Some(self.take_line(buf, max)))
            }
            None => {
                self.next_index = window;
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.skip_lf = false;
        if buf.is_empty() {
            return Ok(None);
        }
        let len = buf.len();
        Ok(Some(self.take_line(buf, len)))
    }
}
