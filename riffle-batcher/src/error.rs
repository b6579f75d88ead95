//! Batcher error types.

use riffle_checkpoint::CheckpointError;
use riffle_core::TrackingIndex;
use thiserror::Error;

/// Result type for batcher operations.
pub type BatcherResult<T> = Result<T, BatcherError>;

/// Errors that can occur in the shard batcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatcherError {
    /// The batch policy configuration could never trigger a flush.
    ///
    /// Fatal at setup time; propagated before any records are processed.
    #[error("invalid batch policy: {reason}")]
    InvalidPolicy {
        /// Why the configuration was rejected.
        reason: &'static str,
    },

    /// An ingested record failed validation against the workspace limits.
    ///
    /// The record was not buffered; the shard's position has not moved.
    #[error("record rejected: {0}")]
    Record(#[from] riffle_core::Error),

    /// Downstream processing reported failure for an emitted batch.
    ///
    /// The batch's slot was resolved (capacity freed); the caller decides
    /// on shard-level recovery, typically resuming later from the acked
    /// sequence.
    #[error("batch {index} failed downstream: {reason}")]
    BatchFailed {
        /// The failed batch's tracking index.
        index: TrackingIndex,
        /// The reason reported by the downstream processor.
        reason: String,
    },

    /// A checkpoint bookkeeping operation failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The record source failed to produce the next record.
    #[error("record source failed: {reason}")]
    Source {
        /// A description of the source failure.
        reason: String,
    },
}
