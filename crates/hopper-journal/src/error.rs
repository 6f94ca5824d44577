use std::fmt::Display;

use crate::config::ItemId;

/// A specialized error type for journal operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A record could not be parsed starting at the given byte position.
    #[error("corrupted journal at byte {position}: {detail}")]
    Corruption { position: u64, detail: String },
    /// A record carried a tag outside the known tag space.
    #[error("unknown record tag {tag} at byte {position}")]
    UnknownTag { tag: u8, position: u64 },
    /// A read-behind scan needed a file for the given item id but no journal
    /// file covers it. Signals data loss.
    #[error("no journal file contains item {0}")]
    IdGap(ItemId),
    /// Configuration value was invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A write on the active file failed earlier; the journal rejects further
    /// appends until the process restarts.
    #[error("journal unhealthy after write failure: {0}")]
    Unhealthy(String),
    /// The journal has been closed.
    #[error("journal is closed")]
    Closed,
}

impl JournalError {
    /// Create a corruption error anchored at a byte position.
    pub fn corruption<T>(position: u64, detail: T) -> Self
    where
        T: Display,
    {
        Self::Corruption {
            position,
            detail: detail.to_string(),
        }
    }

    /// Create an invalid configuration error from a displayable value.
    pub fn invalid_config<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::InvalidConfig(msg.to_string())
    }
}

/// A Result type alias for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;
