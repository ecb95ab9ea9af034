//! Newline framing shared by client sockets and the device stream.
//!
//! Both sides of the multiplexer speak the same text framing: one line per
//! message, terminated by `\n`.  A trailing `\r` is stripped on decode so
//! CRLF peers work unchanged; encode always writes a bare `\n`.
//!
//! Bytes are decoded as UTF-8 lossily.  A stray non-UTF-8 byte from a noisy
//! serial line becomes U+FFFD instead of tearing down the stream.
//!
//! A line longer than `max_length` is discarded up to and including its
//! terminator and decoding resumes with the next line.  The stream itself is
//! never ended by the codec, because a `FramedRead` stops yielding items after
//! its decoder returns an error.

use std::cmp;
use std::io;

use bytes::{Buf, BufMut, BytesMut};
use serialmux_core::LINE_TERMINATOR;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Line codec with a length cap and lossy UTF-8 decoding.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Bytes of the buffer already scanned for `\n`.
    next_index: usize,
    /// Set while skipping the tail of an over-long line.
    discarding: bool,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

fn to_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            // Never scan past the cap: a line of `max_length` bytes plus its
            // terminator is the longest thing that can still be accepted.
            let read_to = cmp::min(self.max_length.saturating_add(1), buf.len());
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
                    let newline_index = self.next_index + offset;
                    self.next_index = 0;
                    let frame = buf.split_to(newline_index + 1);
                    return Ok(Some(to_line(&frame[..newline_index])));
                }
                (false, None) if buf.len() > self.max_length => {
                    warn!(
                        "discarding line longer than {} bytes",
                        self.max_length
                    );
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if self.discarding || buf.is_empty() {
            self.discarding = false;
            buf.clear();
            return Ok(None);
        }
        let rest = buf.split_to(buf.len());
        Ok(Some(to_line(&rest)))
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: T, buf: &mut BytesMut) -> Result<(), io::Error> {
        let line = line.as_ref();
        buf.reserve(line.len() + LINE_TERMINATOR.len());
        buf.put_slice(line.as_bytes());
        buf.put_slice(LINE_TERMINATOR.as_bytes());
        Ok(())
    }
}
