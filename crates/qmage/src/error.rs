//! Decoder error type.

use qmage_buffers::CursorError;
use thiserror::Error;

/// Error type for Qmage decoding operations.
///
/// Corrupt input (`BadMagic`, `TruncatedHeader`, `Invalid`, `Cursor`) is
/// kept distinguishable from bitstream variants the decoder recognizes but
/// does not support (`Unsupported*`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QmageError {
    #[error("bad magic number")]
    BadMagic,
    #[error("truncated header")]
    TruncatedHeader,
    #[error("invalid data: {0}")]
    Invalid(&'static str),
    #[error("unsupported raw type {0}")]
    UnsupportedRawType(u8),
    #[error("unsupported version 0x{0:x}")]
    UnsupportedVersion(u8),
    #[error("unsupported encoder mode {0}")]
    UnsupportedEncoderMode(u8),
    #[error("unsupported feature: {0}")]
    Unsupported(&'static str),
    #[error("cursor overrun")]
    Cursor(#[from] CursorError),
    #[error("allocation failed")]
    Alloc,
}
