//! Error types for grafene-rec.

use thiserror::Error;

/// grafene-rec error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Dimension mismatch between collaborating components.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Empty index batch passed to the ranking loss.
    #[error("empty batch: bpr loss requires at least one (user, pos, neg) triple")]
    EmptyBatch,

    /// Unrecognized scoring head name.
    #[error("unknown scoring head `{0}`, expected one of: dot, 1Linear, 2Linear, 3Linear")]
    UnknownHead(String),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
