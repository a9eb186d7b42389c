//! Log error types.
//!
//! All errors are explicit and typed. No string errors.

use rill_core::{LogPartition, Name};
use thiserror::Error;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur while appending to or tailing a log.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The log does not exist.
    #[error("unknown log: {name}")]
    UnknownLog {
        /// The log that was not found.
        name: Name,
    },

    /// Partition index is outside the log.
    #[error("partition {partition} out of range for {name} (size {size})")]
    PartitionOutOfRange {
        /// The log.
        name: Name,
        /// Requested partition.
        partition: u32,
        /// Number of partitions of the log.
        size: u32,
    },

    /// Another tailer of the same group already owns the partition.
    #[error("a tailer of group {group} is already open on {partition}")]
    TailerAlreadyOpen {
        /// The consumer group.
        group: Name,
        /// The contended partition.
        partition: LogPartition,
    },

    /// The partition is not assigned to this tailer.
    #[error("partition {partition} is not assigned to this tailer")]
    NotAssigned {
        /// The partition.
        partition: LogPartition,
    },

    /// The manager, appender or tailer has been closed.
    #[error("log is closed")]
    Closed,

    /// The partition reached its configured record limit.
    #[error("partition {partition} is full: {max} records")]
    PartitionFull {
        /// The partition.
        partition: LogPartition,
        /// Configured maximum.
        max: u64,
    },

    /// Encoded record exceeds the maximum size.
    #[error("record too large: {size} bytes exceeds max {max} bytes")]
    RecordTooLarge {
        /// Actual size in bytes.
        size: u64,
        /// Maximum allowed size.
        max: u32,
    },

    /// CRC checksum mismatch indicates corruption.
    #[error("checksum mismatch at byte {position}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Byte position of the frame.
        position: u64,
        /// Expected CRC32 value.
        expected: u32,
        /// Actual CRC32 value computed.
        actual: u32,
    },

    /// A record or metadata payload could not be decoded.
    #[error("corrupted data: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Invalid name or argument.
    #[error(transparent)]
    Core(#[from] rill_core::Error),

    /// I/O error from the file backend.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// What operation was being performed.
        operation: &'static str,
        /// Error message.
        message: String,
    },
}

impl LogError {
    /// Creates an I/O error.
    #[must_use]
    pub fn io(operation: &'static str, err: std::io::Error) -> Self {
        Self::Io {
            operation,
            message: err.to_string(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }
}
