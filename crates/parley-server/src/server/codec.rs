// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Line codec: frames a TCP byte stream into text lines.
//!
//! Lines end with LF; a CR right before the LF is stripped. Bytes are held
//! across reads until a terminator arrives, so framing does not depend on
//! how the peer's writes were chunked. Outbound frames get a single LF.

use super::protocol::ServerFrame;
use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Codec error: framing overflow or transport failure.
#[derive(Debug, Error)]
pub enum LineCodecError {
    #[error("line exceeds maximum length ({0} bytes)")]
    LineTooLong(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// LF-delimited text codec with a hard cap on buffered bytes.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line_length: usize,
    /// Bytes of the residual already scanned for a terminator.
    next_index: usize,
}

impl LineCodec {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            next_index: 0,
        }
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = LineCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let newline = src[self.next_index..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|offset| self.next_index + offset);

        match newline {
            Some(pos) => {
                self.next_index = 0;
                let mut line = src.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                if line.len() > self.max_line_length {
                    return Err(LineCodecError::LineTooLong(self.max_line_length));
                }
                Ok(Some(String::from_utf8_lossy(&line).into_owned()))
            }
            None => {
                // one extra byte leaves room for a pending CR
                if src.len() > self.max_line_length + 1 {
                    return Err(LineCodecError::LineTooLong(self.max_line_length));
                }
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None => {
                // unterminated tail is not a frame
                src.clear();
                self.next_index = 0;
                Ok(None)
            }
        }
    }
}

impl Encoder<ServerFrame> for LineCodec {
    type Error = LineCodecError;

    fn encode(&mut self, item: ServerFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.to_string();
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
