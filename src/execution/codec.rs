//! Newline framing for engine diagnostic output.
//!
//! Unlike [`tokio_util::codec::LinesCodec`], [`LogLineCodec`] yields the raw
//! bytes of each unit, newline included, and never rejects input: output is
//! not required to be UTF-8, and an unterminated run longer than
//! [`MAX_LINE_BYTES`] is emitted as its own unit. Concatenating every decoded
//! unit reproduces the input exactly.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::AppError;

/// Longest unit emitted before a forced split: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Lossless newline codec for engine output.
#[derive(Debug)]
pub struct LogLineCodec {
    max_length: usize,
    /// Bytes of the buffer already searched for a newline.
    next_index: usize,
}

impl LogLineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec that splits unterminated runs at `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            next_index: 0,
        }
    }
}

impl Default for LogLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LogLineCodec {
    type Item = Bytes;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, AppError> {
        let start = self.next_index.min(src.len());
        let limit = src.len().min(self.max_length);

        if start < limit {
            if let Some(offset) = src[start..limit].iter().position(|b| *b == b'\n') {
                self.next_index = 0;
                return Ok(Some(src.split_to(start + offset + 1).freeze()));
            }
        }

        if src.len() >= self.max_length {
            self.next_index = 0;
            return Ok(Some(src.split_to(self.max_length).freeze()));
        }

        self.next_index = src.len();
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, AppError> {
        if let Some(unit) = self.decode(src)? {
            return Ok(Some(unit));
        }
        self.next_index = 0;
        if src.is_empty() {
            Ok(None)
        } else {
            let len = src.len();
            Ok(Some(src.split_to(len).freeze()))
        }
    }
}
