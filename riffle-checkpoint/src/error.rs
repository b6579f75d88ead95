//! Checkpoint tracking error types.

use std::time::Duration;

use riffle_core::TrackingIndex;
use thiserror::Error;

/// Result type for checkpoint operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    /// The in-flight cap was still full when the wait elapsed.
    ///
    /// Expected under steady-state backpressure: the index was NOT
    /// registered and the caller should retry on its next scheduling
    /// iteration.
    #[error("in-flight capacity ({capacity}) still full after {waited:?}")]
    CapacityTimeout {
        /// The configured in-flight cap.
        capacity: u32,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A tracked index was not the successor of the last issued index.
    ///
    /// Indices are assigned one per flush, strictly increasing with no
    /// gaps; anything else is a caller bug.
    #[error("tracking index {index} is not the successor of {last_issued}")]
    NonSequentialIndex {
        /// The index the caller tried to track.
        index: TrackingIndex,
        /// The highest index issued so far.
        last_issued: TrackingIndex,
    },

    /// An index was resolved that is not currently in flight.
    #[error("tracking index {index} is not in flight")]
    NotInFlight {
        /// The index that was not found.
        index: TrackingIndex,
    },
}

impl CheckpointError {
    /// Returns true if this is the retryable capacity-timeout condition.
    #[must_use]
    pub const fn is_capacity_timeout(&self) -> bool {
        matches!(self, Self::CapacityTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_timeout_is_retryable() {
        let err = CheckpointError::CapacityTimeout {
            capacity: 8,
            waited: Duration::from_millis(100),
        };
        assert!(err.is_capacity_timeout());

        let err = CheckpointError::NotInFlight {
            index: TrackingIndex::new(3),
        };
        assert!(!err.is_capacity_timeout());
    }

    #[test]
    fn test_non_sequential_display() {
        let err = CheckpointError::NonSequentialIndex {
            index: TrackingIndex::new(7),
            last_issued: TrackingIndex::new(4),
        };
        let msg = format!("{err}");
        assert!(msg.contains("track-7"));
        assert!(msg.contains("track-4"));
    }
}
