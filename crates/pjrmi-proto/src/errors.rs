//! Framing-level errors.
//!
//! These are the only errors that can occur below the connection layer:
//! malformed headers, truncated frames, and tag bytes that do not name a
//! known message type or argument form. Anything above this (marshalling,
//! overload resolution, remote exceptions) is a `pjrmi-core`/`pjrmi-marshal`
//! concern.

use thiserror::Error;

/// Result alias for framing operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors from decoding bytes off the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer shorter than a complete header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum bytes required.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Buffer has a complete header but payload bytes are missing.
    #[error("frame truncated: header claims {expected} payload bytes, got {actual}")]
    FrameTruncated {
        /// Payload bytes the header claims.
        expected: usize,
        /// Payload bytes actually available.
        actual: usize,
    },

    /// Declared payload size exceeds the protocol maximum.
    #[error("payload too large: {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Declared payload size.
        size: usize,
        /// Maximum permitted payload size.
        max: usize,
    },

    /// Message type byte did not match any known tag.
    #[error("unknown message type byte: {0:#04x}")]
    UnknownMessageType(u8),

    /// Argument tag byte did not match `V`/`R`/`S`/`M`/`L`.
    #[error("unknown argument tag byte: {0:#04x} ({0:?} as char)")]
    UnknownArgTag(u8),

    /// A length-prefixed field (string, array) claimed more bytes than
    /// remained in the buffer.
    #[error("length-prefixed field truncated: expected {expected} bytes, got {actual}")]
    FieldTruncated {
        /// Bytes the length prefix claims.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// A UTF-16 string's byte length was odd (not a whole number of
    /// code units) or contained an unpaired surrogate.
    #[error("invalid UTF-16 string encoding")]
    InvalidUtf16,
}
