//! Error types for admission control.

use crate::storage::StorageError;

/// Errors that can occur while building or running the admission pipeline.
///
/// A client being throttled is not an error, see [`crate::Verdict`].
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// A policy cannot be used by the token bucket engine.
    #[error("Invalid policy '{category}': {reason}")]
    InvalidPolicy {
        /// Category the policy belongs to.
        category: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The storage backend could not be set up.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A record could not be encoded for storage.
    #[error("Failed to encode {kind} record: {source}")]
    Encode {
        /// Which record type failed.
        kind: &'static str,
        /// The underlying serialization error.
        source: serde_json::Error,
    },
}
