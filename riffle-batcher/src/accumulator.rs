//! Batch accumulator: aggregation of incoming records under a policy.
//!
//! A thin composition over a boxed [`BatchPolicy`]: the accumulator owns
//! the policy's lifecycle and counts what passes through, but all
//! completion decisions belong to the policy itself.

use std::time::Duration;

use riffle_core::Record;
use tracing::debug;

use crate::policy::BatchPolicy;

/// Accumulates records into a pending batch according to a policy.
pub struct BatchAccumulator {
    policy: Box<dyn BatchPolicy>,
    records_added: u64,
    batches_flushed: u64,
}

impl BatchAccumulator {
    /// Creates an accumulator over an already-constructed policy.
    #[must_use]
    pub fn new(policy: Box<dyn BatchPolicy>) -> Self {
        Self {
            policy,
            records_added: 0,
            batches_flushed: 0,
        }
    }

    /// Appends a record to the pending batch and returns whether the
    /// policy judges the batch complete (the caller must then flush).
    pub fn add(&mut self, record: Record) -> bool {
        self.records_added += 1;
        self.policy.add(record)
    }

    /// Forcibly extracts whatever is accumulated, or `None` if nothing
    /// is pending. Used on completion signals, timer expiry, and
    /// shutdown.
    pub fn flush(&mut self) -> Option<Vec<Record>> {
        let batch = self.policy.flush()?;
        self.batches_flushed += 1;
        debug!(records = batch.len(), batches = self.batches_flushed, "Flushed pending batch");
        Some(batch)
    }

    /// How long remains before a time-based flush is due, or `None` if
    /// the policy has no time threshold.
    #[must_use]
    pub fn until_next(&self) -> Option<Duration> {
        self.policy.until_next()
    }

    /// Total records accepted since construction.
    #[must_use]
    pub const fn records_added(&self) -> u64 {
        self.records_added
    }

    /// Releases the policy's resources. Safe once flushing is complete.
    pub fn close(&mut self) {
        self.policy.close();
    }
}

impl std::fmt::Debug for BatchAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchAccumulator")
            .field("records_added", &self.records_added)
            .field("batches_flushed", &self.batches_flushed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyConfig, StandardPolicy};

    fn accumulator(max_count: u32) -> BatchAccumulator {
        BatchAccumulator::new(StandardPolicy::boxed(PolicyConfig::with_count(max_count)).unwrap())
    }

    #[test]
    fn test_add_until_complete() {
        let mut acc = accumulator(2);

        assert!(!acc.add(Record::new("a", "1")));
        assert!(acc.add(Record::new("b", "2")));
        assert_eq!(acc.records_added(), 2);

        let batch = acc.flush().unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_flush_empty_is_none() {
        let mut acc = accumulator(2);
        assert!(acc.flush().is_none());
    }

    #[test]
    fn test_forced_flush_of_partial_batch() {
        let mut acc = accumulator(10);
        acc.add(Record::new("a", "1"));

        // Timer expiry and shutdown flush whatever is there.
        let batch = acc.flush().unwrap();
        assert_eq!(batch.len(), 1);
    }
}
