//! Pattern error types.

use rill_log::LogError;
use thiserror::Error;

/// Result type for pool operations.
pub type PatternResult<T> = Result<T, PatternError>;

/// Errors that can occur while building or running a pool.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// The log rejected an operation.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// The pool was closed before its workers finished.
    #[error("pool cancelled")]
    Cancelled,

    /// A worker task panicked.
    #[error("worker panicked: {message}")]
    WorkerPanicked {
        /// Panic payload, when it was a string.
        message: String,
    },

    /// A policy or pool parameter is invalid.
    #[error("invalid policy: {field}: {reason}")]
    InvalidPolicy {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}

impl PatternError {
    /// Builds a `WorkerPanicked` error from a join error.
    pub(crate) fn from_join(err: tokio::task::JoinError) -> Self {
        if !err.is_panic() {
            return Self::Cancelled;
        }
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::WorkerPanicked { message }
    }
}

/// Failure reported by a [`crate::MessageConsumer`] callback.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("consume failed: {message}")]
pub struct ConsumeError {
    message: String,
}

impl ConsumeError {
    /// Creates an error with a description.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
