//! Error handling for SliceKit.
//!
//! Recoverable planning conditions (an unroutable travel, a layer-time
//! floor that cannot be met) are ordinary return values, not errors;
//! the planner degrades locally and keeps slicing. The `Error` type
//! covers the few pipeline-surface contract violations.
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for the planning pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The pipeline was handed an empty layer stack.
    #[error("no layers to plan")]
    NoLayers,

    /// Planning was cancelled cooperatively; nothing was flushed for
    /// layers that had not completed.
    #[error("planning cancelled after {layers_flushed} flushed layers")]
    Cancelled {
        /// Layers fully flushed to the exporter before cancellation.
        layers_flushed: usize,
    },

    /// Generic planner error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message.
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

/// Result type using Error.
pub type Result<T> = std::result::Result<T, Error>;
