//! Newline-terminated header codec for the ingestion channel
//!
//! A frame on the wire is:
//! ```text
//! [ UTF-8 JSON header ][ 0x0A ][ filesize raw bytes, image types only ]
//! ```
//!
//! The payload has no delimiter, so any bytes that arrived in the same read as
//! the header terminator already belong to it. [`HeaderDecoder`] keeps those
//! bytes buffered and hands them out through [`HeaderDecoder::take_payload`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use super::CodecError;
use crate::limits::MAX_HEADER_SIZE;
use crate::message::TransferFrame;

/// Header terminator
pub const TERMINATOR: u8 = b'\n';

/// Encode a header followed by its terminator
pub fn encode_header(frame: &TransferFrame) -> Result<Bytes, CodecError> {
    let json = serde_json::to_vec(frame)?;
    if json.len() > MAX_HEADER_SIZE {
        return Err(CodecError::FrameTooLarge(json.len()));
    }

    let mut buf = BytesMut::with_capacity(json.len() + 1);
    buf.extend_from_slice(&json);
    buf.put_u8(TERMINATOR);
    Ok(buf.freeze())
}

/// Try to decode one header from the front of `buf`
///
/// Returns:
/// - `Ok(Some(frame))` once a terminator is found and the bytes before it
///   parse; everything after the terminator stays in `buf`
/// - `Ok(None)` if more data is needed
/// - `Err(HeaderTooLarge)` if more than [`MAX_HEADER_SIZE`] bytes are buffered
///   without a terminator
///
/// A terminated line that is not a valid header is discarded together with
/// its terminator and scanning resumes on the next line.
pub fn decode_header(buf: &mut BytesMut) -> Result<Option<TransferFrame>, CodecError> {
    loop {
        let Some(pos) = buf.iter().position(|b| *b == TERMINATOR) else {
            if buf.len() > MAX_HEADER_SIZE {
                return Err(CodecError::HeaderTooLarge(buf.len()));
            }
            return Ok(None);
        };

        if pos > MAX_HEADER_SIZE {
            return Err(CodecError::HeaderTooLarge(pos));
        }

        let line = buf.split_to(pos);
        buf.advance(1);

        match serde_json::from_slice::<TransferFrame>(&line) {
            Ok(frame) => return Ok(Some(frame)),
            Err(e) => {
                warn!(
                    discarded = pos + 1,
                    error = %e,
                    "Discarding line that is not a valid header, resynchronizing"
                );
            }
        }
    }
}

/// Streaming header decoder for one ingestion connection
#[derive(Debug, Default)]
pub struct HeaderDecoder {
    buffer: BytesMut,
}

impl HeaderDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next header from the buffer
    pub fn decode_next(&mut self) -> Result<Option<TransferFrame>, CodecError> {
        decode_header(&mut self.buffer)
    }

    /// Take up to `max` already-buffered bytes as payload
    pub fn take_payload(&mut self, max: usize) -> Bytes {
        let n = max.min(self.buffer.len());
        self.buffer.split_to(n).freeze()
    }

    /// Bytes buffered but not yet consumed
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
