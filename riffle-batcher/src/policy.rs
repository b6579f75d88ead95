//! Batching policy: when is a pending batch complete?
//!
//! The batcher consumes the policy through the [`BatchPolicy`] trait and
//! never inspects its decision rules. [`StandardPolicy`] is the stock
//! implementation with count, byte-size, and period thresholds; at least
//! one threshold must be set or construction fails.

use std::time::{Duration, Instant};

use riffle_core::{Limits, Record};

use crate::error::{BatcherError, BatcherResult};

/// Decides when accumulated records form a complete batch.
///
/// Implementations own the buffered records between flushes.
pub trait BatchPolicy: Send {
    /// Buffers a record and returns true if the batch is now complete
    /// and the caller must flush.
    fn add(&mut self, record: Record) -> bool;

    /// Extracts whatever is accumulated, or `None` if nothing is pending.
    ///
    /// Used on completion signals, timer expiry, and shutdown.
    fn flush(&mut self) -> Option<Vec<Record>>;

    /// How long until a time-based flush is due, or `None` if the policy
    /// has no time threshold.
    fn until_next(&self) -> Option<Duration>;

    /// Releases any policy-held resources. Safe to call once all
    /// flushing is complete.
    fn close(&mut self);
}

/// Configuration for [`StandardPolicy`].
///
/// A zero count/bytes threshold means "unbounded"; a `None` period means
/// no time-based flushing. At least one threshold must be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Flush once this many records are buffered (0 = unbounded).
    pub max_count: u32,
    /// Flush once the buffered records reach this many bytes (0 = unbounded).
    pub max_bytes: usize,
    /// Flush once this long has passed since the last flush.
    pub period: Option<Duration>,
}

impl PolicyConfig {
    /// Creates a count-only configuration.
    #[must_use]
    pub const fn with_count(max_count: u32) -> Self {
        Self {
            max_count,
            max_bytes: 0,
            period: None,
        }
    }

    /// Sets the byte-size threshold.
    #[must_use]
    pub const fn with_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Sets the time threshold.
    #[must_use]
    pub const fn with_period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// Clamps the thresholds to the workspace limits.
    ///
    /// An unbounded count or byte threshold becomes the corresponding
    /// limit, so no flushed batch can exceed `max_records_per_batch` or
    /// `max_batch_bytes` regardless of how the policy was configured.
    #[must_use]
    pub fn bounded_by(mut self, limits: &Limits) -> Self {
        self.max_count = if self.max_count == 0 {
            limits.max_records_per_batch
        } else {
            self.max_count.min(limits.max_records_per_batch)
        };
        let batch_bytes = limits.max_batch_bytes as usize;
        self.max_bytes = if self.max_bytes == 0 {
            batch_bytes
        } else {
            self.max_bytes.min(batch_bytes)
        };
        self
    }

    /// Creates a configuration for testing: small batches, short period.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_count: 3,
            max_bytes: 0,
            period: Some(Duration::from_millis(50)),
        }
    }
}

/// Count / byte-size / period batching policy.
#[derive(Debug)]
pub struct StandardPolicy {
    config: PolicyConfig,
    buffered: Vec<Record>,
    buffered_bytes: usize,
    last_flush: Instant,
}

impl StandardPolicy {
    /// Creates a policy from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BatcherError::InvalidPolicy`] if no threshold is set:
    /// such a policy would buffer forever and never signal completion.
    pub fn new(config: PolicyConfig) -> BatcherResult<Self> {
        if config.max_count == 0 && config.max_bytes == 0 && config.period.is_none() {
            return Err(BatcherError::InvalidPolicy {
                reason: "at least one of count, bytes, or period must be set",
            });
        }

        Ok(Self {
            config,
            buffered: Vec::new(),
            buffered_bytes: 0,
            last_flush: Instant::now(),
        })
    }

    /// Creates a boxed policy, the form the batcher consumes.
    ///
    /// # Errors
    ///
    /// Same as [`StandardPolicy::new`].
    pub fn boxed(config: PolicyConfig) -> BatcherResult<Box<dyn BatchPolicy>> {
        Ok(Box::new(Self::new(config)?))
    }

    /// Returns the number of buffered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffered.len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffered.is_empty()
    }
}

impl BatchPolicy for StandardPolicy {
    fn add(&mut self, record: Record) -> bool {
        self.buffered_bytes += record.size();
        self.buffered.push(record);

        let count_full =
            self.config.max_count > 0 && self.buffered.len() >= self.config.max_count as usize;
        let bytes_full = self.config.max_bytes > 0 && self.buffered_bytes >= self.config.max_bytes;
        count_full || bytes_full
    }

    fn flush(&mut self) -> Option<Vec<Record>> {
        self.last_flush = Instant::now();
        if self.buffered.is_empty() {
            return None;
        }
        self.buffered_bytes = 0;
        Some(std::mem::take(&mut self.buffered))
    }

    fn until_next(&self) -> Option<Duration> {
        self.config
            .period
            .map(|period| period.saturating_sub(self.last_flush.elapsed()))
    }

    fn close(&mut self) {
        self.buffered.clear();
        self.buffered_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(payload: &str, token: &str) -> Record {
        Record::new(payload.as_bytes().to_vec(), token)
    }

    #[test]
    fn test_rejects_unbounded_config() {
        let config = PolicyConfig {
            max_count: 0,
            max_bytes: 0,
            period: None,
        };
        assert!(matches!(
            StandardPolicy::new(config),
            Err(BatcherError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn test_bounded_by_clamps_to_limits() {
        let limits = Limits::for_testing();

        let config = PolicyConfig::with_count(1_000_000)
            .with_bytes(usize::MAX)
            .bounded_by(&limits);
        assert_eq!(config.max_count, limits.max_records_per_batch);
        assert_eq!(config.max_bytes, limits.max_batch_bytes as usize);

        // A period-only policy picks up the batch-size backstops.
        let config = PolicyConfig {
            max_count: 0,
            max_bytes: 0,
            period: Some(Duration::from_secs(1)),
        }
        .bounded_by(&limits);
        assert_eq!(config.max_count, limits.max_records_per_batch);
        assert_eq!(config.max_bytes, limits.max_batch_bytes as usize);
    }

    #[test]
    fn test_count_threshold() {
        let mut policy = StandardPolicy::new(PolicyConfig::with_count(2)).unwrap();

        assert!(!policy.add(record("a", "1")));
        assert!(policy.add(record("b", "2")));

        let batch = policy.flush().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(policy.flush().is_none());
    }

    #[test]
    fn test_bytes_threshold() {
        let config = PolicyConfig {
            max_count: 0,
            max_bytes: 10,
            period: None,
        };
        let mut policy = StandardPolicy::new(config).unwrap();

        assert!(!policy.add(record("ab", "1")));
        assert!(policy.add(record("cdefghij", "2")));
    }

    #[test]
    fn test_flush_resets_period() {
        let config = PolicyConfig::with_count(100).with_period(Duration::from_secs(10));
        let mut policy = StandardPolicy::new(config).unwrap();

        policy.add(record("a", "1"));
        let before = policy.until_next().unwrap();
        assert!(before <= Duration::from_secs(10));

        policy.flush();
        let after = policy.until_next().unwrap();
        assert!(after > Duration::from_secs(9));
    }

    #[test]
    fn test_no_period_means_no_deadline() {
        let policy = StandardPolicy::new(PolicyConfig::with_count(5)).unwrap();
        assert!(policy.until_next().is_none());
    }

    #[test]
    fn test_flush_preserves_order() {
        let mut policy = StandardPolicy::new(PolicyConfig::with_count(10)).unwrap();
        for i in 0..5 {
            policy.add(record(&format!("payload-{i}"), &format!("{i}")));
        }

        let batch = policy.flush().unwrap();
        let tokens: Vec<&str> = batch.iter().map(|r| r.sequence_token.as_str()).collect();
        assert_eq!(tokens, vec!["0", "1", "2", "3", "4"]);
    }
}
