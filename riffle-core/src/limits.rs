//! System limits and configuration bounds.
//!
//! Put limits on everything: every buffer and in-flight set has an
//! explicit maximum size. This prevents unbounded growth and makes the
//! pipeline predictable under backpressure.

use std::time::Duration;

/// System-wide limits for Riffle.
///
/// All limits are explicit and configurable. Default values are chosen
/// to be safe for most deployments while allowing customization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    // Record and batch limits.
    /// Maximum size of a single record payload in bytes.
    pub max_record_bytes: u32,
    /// Maximum size of a flushed batch in bytes.
    pub max_batch_bytes: u32,
    /// Maximum number of records in a flushed batch.
    pub max_records_per_batch: u32,
    /// Maximum number of metadata entries on a record.
    pub max_metadata_entries: u32,

    // Delivery limits.
    /// Maximum number of unacknowledged batches in flight per shard.
    pub max_in_flight_batches: u32,

    // Timeout limits (in microseconds).
    /// Default wait for in-flight capacity before a flush attempt gives up.
    pub default_track_timeout_us: u64,
    /// Maximum allowed wait for in-flight capacity.
    pub max_track_timeout_us: u64,
}

impl Limits {
    /// Creates limits with safe defaults.
    ///
    /// These defaults are conservative. Production systems should tune
    /// them based on downstream processing latency and batch sizes.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // Records: 1MB payload, 16MB batch, 10k records/batch, 64 metadata entries.
            max_record_bytes: 1024 * 1024,
            max_batch_bytes: 16 * 1024 * 1024,
            max_records_per_batch: 10_000,
            max_metadata_entries: 64,

            // Delivery: 1024 in-flight batches per shard.
            max_in_flight_batches: 1024,

            // Timeouts: 1s default capacity wait, 1min max.
            default_track_timeout_us: 1_000_000,
            max_track_timeout_us: 60 * 1_000_000,
        }
    }

    /// Creates limits suitable for testing with small bounds.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_record_bytes: 64 * 1024,
            max_batch_bytes: 1024 * 1024,
            max_records_per_batch: 100,
            max_metadata_entries: 16,
            max_in_flight_batches: 4,
            default_track_timeout_us: 50_000,
            max_track_timeout_us: 1_000_000,
        }
    }

    /// Default wait for in-flight capacity, as a duration.
    #[must_use]
    pub const fn track_wait(&self) -> Duration {
        Duration::from_micros(self.default_track_timeout_us)
    }

    /// Maximum allowed wait for in-flight capacity, as a duration.
    ///
    /// Flush attempts clamp their wait to this value.
    #[must_use]
    pub const fn max_track_wait(&self) -> Duration {
        Duration::from_micros(self.max_track_timeout_us)
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_bounded() {
        let limits = Limits::default();
        assert!(limits.max_record_bytes <= limits.max_batch_bytes);
        assert!(limits.max_in_flight_batches > 0);
        assert!(limits.default_track_timeout_us <= limits.max_track_timeout_us);
    }

    #[test]
    fn test_testing_limits_are_small() {
        let limits = Limits::for_testing();
        assert!(limits.max_in_flight_batches <= 16);
        assert!(limits.max_records_per_batch <= 1000);
    }

    #[test]
    fn test_track_wait_durations() {
        let limits = Limits::for_testing();
        assert_eq!(limits.track_wait(), Duration::from_millis(50));
        assert_eq!(limits.max_track_wait(), Duration::from_secs(1));
        assert!(limits.track_wait() <= limits.max_track_wait());
    }
}
