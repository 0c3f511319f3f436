//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire data
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Fewer bytes than a full frame header
    #[error("Incomplete header: expected {expected} bytes, got {actual}")]
    IncompleteHeader { expected: usize, actual: usize },

    /// Declared frame length cannot hold a type tag
    #[error("Invalid frame length: {0}")]
    InvalidLength(i32),

    /// Declared frame length exceeds the maximum frame size
    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// Unknown message type tag
    #[error("Unknown message type: {0:#x}")]
    UnknownMessageType(u32),

    /// Writing would exceed the target buffer capacity
    #[error("Capacity exceeded: need {needed} bytes, {available} available")]
    CapacityExceeded { needed: usize, available: usize },

    /// Reading past the end of the available data
    #[error("Truncated payload: need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// String without terminator or with invalid contents
    #[error("Invalid string: {0}")]
    InvalidString(&'static str),

    /// Message body does not match its type's layout
    #[error("Malformed {kind} message: {reason}")]
    Malformed {
        kind: &'static str,
        reason: &'static str,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn malformed(kind: &'static str, reason: &'static str) -> Self {
        Self::Malformed { kind, reason }
    }
}
