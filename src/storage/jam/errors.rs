use std::path::PathBuf;

use thiserror::Error;

/// Errors that can arise while interacting with a JAM message base.
#[derive(Debug, Error)]
pub enum JamError {
    /// Wrapper around IO errors on any of the base files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A fixed header or message header did not start with `JAM\0`.
    #[error("invalid signature in {what}: found {found:02X?}")]
    InvalidSignature { what: &'static str, found: [u8; 4] },

    /// Structural damage (truncated header, offsets outside a store, ...).
    #[error("corrupt message base: {0}")]
    Corrupt(String),

    /// Message number outside `1..=count`.
    #[error("invalid message number {number} (base holds {count})")]
    InvalidMessageNumber { number: u32, count: u32 },

    /// Operation attempted before open/create or after close.
    #[error("message base is not open")]
    NotOpen,

    /// The index slot holds the deleted sentinel.
    #[error("message {0} not found")]
    NotFound(u32),

    /// The exclusive lock could not be obtained within the configured bound.
    #[error("message base is locked: {}", .0.display())]
    Locked(PathBuf),

    /// A reply-chain field names a message outside the base.
    #[error("invalid {field} link {target} (base holds {count})")]
    InvalidReplyLink {
        field: &'static str,
        target: u32,
        count: u32,
    },

    /// A value does not fit the 32-bit fields of the on-disk format.
    #[error("{0} exceeds the 32-bit limits of the message base format")]
    TooLarge(&'static str),
}

impl JamError {
    /// True for the corruption family that the open path may heal by recreating.
    pub fn is_corruption(&self) -> bool {
        matches!(self, JamError::InvalidSignature { .. } | JamError::Corrupt(_))
    }
}
