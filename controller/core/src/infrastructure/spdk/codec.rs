// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Framing for the SPDK JSON-RPC stream.
//!
//! Outbound frames are one JSON object followed by `\n`. SPDK does not
//! reliably terminate its replies, so inbound frames are delimited by
//! parsing: the decoder yields the next complete JSON value in the buffer,
//! skipping any whitespace between values. Objects and arrays are scanned
//! incrementally for their closing bracket and parsed once complete, so a
//! large reply arriving in small chunks is not re-parsed on every read.
//! Bytes that do not form a JSON value are a fatal framing error.

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Largest incomplete frame buffered before the stream is declared broken.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame exceeds {max} bytes (buffered {len})")]
    FrameTooLarge { len: usize, max: usize },
}

#[derive(Debug, Clone)]
pub struct JsonCodec {
    max_frame_len: usize,
    scan: FrameScan,
}

/// Progress through a partially received object, array or string. Kept
/// across `decode` calls so each byte is looked at once.
#[derive(Debug, Clone, Default)]
struct FrameScan {
    offset: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl FrameScan {
    /// Advance over `buf[self.offset..]`; returns the frame length once the
    /// outermost value closes.
    fn advance(&mut self, buf: &[u8]) -> Option<usize> {
        for (i, &b) in buf.iter().enumerate().skip(self.offset) {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        self.offset = buf.len();
        None
    }
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            scan: FrameScan::default(),
        }
    }

    fn check_len(&self, src: &BytesMut) -> Result<(), CodecError> {
        if src.len() > self.max_frame_len {
            return Err(CodecError::FrameTooLarge {
                len: src.len(),
                max: self.max_frame_len,
            });
        }
        Ok(())
    }

    /// Numbers and literals are short; let serde find where they end.
    fn decode_scalar(&mut self, src: &mut BytesMut) -> Result<Option<Value>, CodecError> {
        let (next, consumed) = {
            let mut stream = serde_json::Deserializer::from_slice(&src[..]).into_iter::<Value>();
            let next = stream.next();
            (next, stream.byte_offset())
        };

        match next {
            Some(Ok(value)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            // Partial frame: wait for more bytes.
            Some(Err(e)) if e.is_eof() => {
                self.check_len(src)?;
                Ok(None)
            }
            Some(Err(e)) => Err(CodecError::Json(e)),
            None => Ok(None),
        }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonCodec {
    type Item = Value;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.scan.offset == 0 {
            match src.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(skip) => src.advance(skip),
                None => {
                    src.clear();
                    return Ok(None);
                }
            }
            if !matches!(src[0], b'{' | b'[' | b'"') {
                return self.decode_scalar(src);
            }
        }

        let Some(len) = self.scan.advance(&src[..]) else {
            self.check_len(src)?;
            return Ok(None);
        };
        self.scan = FrameScan::default();

        let value = serde_json::from_slice(&src[..len])?;
        src.advance(len);
        Ok(Some(value))
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        serde_json::to_writer(dst.writer(), &item)?;
        dst.put_u8(b'\n');
        Ok(())
    }
}
