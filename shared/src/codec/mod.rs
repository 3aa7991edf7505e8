//! Frame codecs for the two wire conventions
//!
//! The ingestion side ([`transfer`]) frames a JSON header with a trailing
//! `\n` and may follow it with raw binary bytes whose count the header
//! declares. The command side ([`control`]) frames JSON only, behind a 4-byte
//! length prefix. They are decoded by separate functions on purpose: a
//! transfer body has no delimiter, so nothing written for one side may be fed
//! to the other.

pub mod control;
pub mod transfer;

use thiserror::Error;

use crate::limits::MAX_HEADER_SIZE;

pub use control::ControlDecoder;
pub use transfer::HeaderDecoder;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Header too large: {0} bytes without terminator (max: {MAX_HEADER_SIZE})")]
    HeaderTooLarge(usize),

    #[error("Frame too large: {0} bytes (max: {MAX_HEADER_SIZE})")]
    FrameTooLarge(usize),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
