//! Length-prefixed JSON codec for the command channel
//!
//! Outgoing frames are:
//! ```text
//! [ 4 bytes: length (u32, little-endian) ][ N bytes: UTF-8 JSON ]
//! ```
//!
//! Decoding parses one JSON value and reports how many bytes that value
//! actually consumed, so a coordinator that writes bare concatenated JSON
//! values with no prefix is read by the same loop. For prefixed frames the
//! declared length is a lower bound: padding after the value inside the
//! declared payload is skipped, and a value that overruns it is still read
//! whole. Bare values are only recognised once at least four bytes are
//! buffered, since anything shorter may be the start of a prefix.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;
use tracing::warn;

use super::CodecError;
use crate::limits::MAX_HEADER_SIZE;
use crate::message::ControlFrame;

/// Length prefix size
pub const PREFIX_LEN: usize = 4;

/// Encode a frame into a length-prefixed byte buffer
pub fn encode(frame: &ControlFrame) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame directly into a provided buffer
pub fn encode_into(frame: &ControlFrame, buf: &mut BytesMut) -> Result<(), CodecError> {
    let json = serde_json::to_vec(frame)?;

    if json.len() > MAX_HEADER_SIZE {
        return Err(CodecError::FrameTooLarge(json.len()));
    }

    buf.reserve(PREFIX_LEN + json.len());
    buf.put_u32_le(json.len() as u32);
    buf.extend_from_slice(&json);

    Ok(())
}

/// Parse one JSON value starting at offset 0
///
/// Returns the value and the exact number of bytes it consumed (including
/// leading whitespace), `Ok(None)` if the value is still incomplete, or an
/// error if the bytes cannot be JSON.
pub fn parse_value(buf: &[u8]) -> Result<Option<(Value, usize)>, CodecError> {
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<Value>();
    match stream.next() {
        None => Ok(None),
        Some(Ok(value)) => Ok(Some((value, stream.byte_offset()))),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(CodecError::Json(e)),
    }
}

/// A prefix is recognised by its high byte: frames are capped well below
/// 16 MiB, so it is always zero, and JSON text never contains a NUL.
fn has_prefix(buf: &[u8]) -> bool {
    buf.len() >= PREFIX_LEN && buf[PREFIX_LEN - 1] == 0
}

/// Locate the next complete JSON value and the bytes it spans
fn next_value(buf: &[u8]) -> Result<Option<(Value, usize)>, CodecError> {
    if has_prefix(buf) {
        let declared = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if declared > MAX_HEADER_SIZE {
            return Err(CodecError::FrameTooLarge(declared));
        }
        // Wait for the whole declared payload so trailing padding goes with it
        if buf.len() < PREFIX_LEN + declared {
            return Ok(None);
        }
        return Ok(parse_value(&buf[PREFIX_LEN..])?
            .map(|(value, n)| (value, PREFIX_LEN + n.max(declared))));
    }

    // Could still be the start of a prefix
    if buf.len() < PREFIX_LEN {
        return Ok(None);
    }

    match parse_value(buf)? {
        Some(found) => Ok(Some(found)),
        None if buf.len() > MAX_HEADER_SIZE => Err(CodecError::FrameTooLarge(buf.len())),
        None => Ok(None),
    }
}

/// Number of leading JSON whitespace bytes
fn leading_whitespace(buf: &[u8]) -> usize {
    buf.iter()
        .take_while(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .count()
}

/// Try to decode one frame from the front of `buf`
///
/// Returns:
/// - `Ok(Some(frame))` if a complete frame was decoded; exactly the consumed
///   bytes are removed from `buf`
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the stream cannot be framed any more
///
/// A complete JSON value that is not a frame (for example missing `type`) is
/// dropped with a warning and decoding continues after it.
pub fn decode(buf: &mut BytesMut) -> Result<Option<ControlFrame>, CodecError> {
    loop {
        // Whitespace between bare values; never strip bytes that may be a prefix
        if buf.len() >= PREFIX_LEN && !has_prefix(buf) {
            let skip = leading_whitespace(buf);
            buf.advance(skip);
        }

        if buf.is_empty() {
            return Ok(None);
        }

        let Some((value, consumed)) = next_value(buf)? else {
            return Ok(None);
        };
        buf.advance(consumed);

        match serde_json::from_value::<ControlFrame>(value) {
            Ok(frame) => return Ok(Some(frame)),
            Err(e) => {
                warn!(consumed, error = %e, "Dropping JSON value that is not a control frame")
            }
        }
    }
}

/// Streaming decoder for the command channel receive loop
#[derive(Debug, Default)]
pub struct ControlDecoder {
    buffer: BytesMut,
}

impl ControlDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(20 * 1024),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<ControlFrame>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Drop everything buffered (used when the connection is replaced)
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
