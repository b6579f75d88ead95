//! Bounded in-flight checkpoint tracker.
//!
//! The tracker is the sole source of backpressure in the pipeline: a
//! flush may not proceed until the number of unacknowledged batches drops
//! below the configured cap. It also resolves out-of-order completions
//! into a contiguous watermark - the highest tracking index such that it
//! and every lower index have completed.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use riffle_core::{Limits, TrackingIndex};
use roaring::RoaringBitmap;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::bitmap::IndexBitmap;
use crate::error::{CheckpointError, CheckpointResult};

// -----------------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------------

/// What the watermark does when an acknowledgment reports failure.
///
/// Either way the failed slot is resolved and capacity is freed; the
/// policy only controls whether the acked sequence can move past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// The watermark never advances to or past a failed index.
    ///
    /// Resuming from the acked sequence replays the failed batch. This is
    /// the conservative default.
    #[default]
    StallOnFailure,

    /// Failed indices count as resolved for watermark purposes.
    ///
    /// The failed batch's token is consumed by contiguous resolution and
    /// its progress is passed over.
    AdvancePastFailure,
}

/// Configuration for a [`CheckpointTracker`].
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// Maximum number of unacknowledged batches in flight.
    pub capacity: u32,
    /// Watermark behavior on a failed acknowledgment.
    pub failure_policy: FailurePolicy,
}

impl TrackerConfig {
    /// Creates a config with the given in-flight cap.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        Self {
            capacity,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Creates a config with the cap taken from the workspace limits.
    #[must_use]
    pub fn from_limits(limits: &Limits) -> Self {
        Self::new(limits.max_in_flight_batches)
    }

    /// Sets the failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Creates a config for testing with a small cap.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            capacity: 4,
            failure_policy: FailurePolicy::StallOnFailure,
        }
    }
}

// -----------------------------------------------------------------------------
// Outcome
// -----------------------------------------------------------------------------

/// The result a downstream processor reports for a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The batch was processed successfully.
    Delivered,
    /// Processing failed; the reason is surfaced to the shard's caller.
    Failed(String),
}

impl BatchOutcome {
    /// Returns true for a successful outcome.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

// -----------------------------------------------------------------------------
// Tracker
// -----------------------------------------------------------------------------

/// Tracks unresolved indices relative to a base watermark.
///
/// Bit `i` of each bitmap stands for index `base + 1 + i`.
#[derive(Debug)]
struct TrackerState {
    /// Highest index such that it and everything below is resolved and
    /// released. Zero means nothing has resolved yet.
    base: TrackingIndex,
    /// Highest index ever registered.
    issued: TrackingIndex,
    /// Count of registered-but-unresolved indices.
    unresolved: u32,
    /// Resolved indices above `base` (success or failure).
    resolved: RoaringBitmap,
    /// Failed indices above `base` (`StallOnFailure` only).
    failed: RoaringBitmap,
}

/// Bounded in-flight checkpoint tracker.
///
/// # Thread Safety
///
/// [`CheckpointTracker::track`] is intended for the single per-shard
/// write path; [`CheckpointTracker::resolve`] may be called from any
/// number of concurrent acknowledgment contexts. All shared state lives
/// behind one short-critical-section mutex that is never held across an
/// await.
#[derive(Debug)]
pub struct CheckpointTracker {
    config: TrackerConfig,
    state: Mutex<TrackerState>,
    /// One permit per free in-flight slot. `track` acquires and forgets a
    /// permit; `resolve` adds one back.
    permits: Semaphore,
}

impl CheckpointTracker {
    /// Creates a tracker with the given configuration.
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TrackerState {
                base: TrackingIndex::new(0),
                issued: TrackingIndex::new(0),
                unresolved: 0,
                resolved: RoaringBitmap::new(),
                failed: RoaringBitmap::new(),
            }),
            permits: Semaphore::new(config.capacity as usize),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Registers a new in-flight index, waiting up to `wait` for capacity.
    ///
    /// Indices must be issued sequentially starting at 1.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::CapacityTimeout`] if the cap was still full
    ///   when `wait` elapsed. The index was NOT registered and the call
    ///   had no side effects; retry on the next scheduling iteration.
    /// - [`CheckpointError::NonSequentialIndex`] if `index` is not the
    ///   successor of the last issued index.
    pub async fn track(&self, index: TrackingIndex, wait: Duration) -> CheckpointResult<()> {
        let permit = match timeout(wait, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            // The semaphore is never closed, so both arms are the wait
            // elapsing without a free slot.
            Ok(Err(_)) | Err(_) => {
                return Err(CheckpointError::CapacityTimeout {
                    capacity: self.config.capacity,
                    waited: wait,
                });
            }
        };

        let mut state = self.lock_state();
        if index.get() != state.issued.get() + 1 {
            // Permit is returned when it drops.
            return Err(CheckpointError::NonSequentialIndex {
                index,
                last_issued: state.issued,
            });
        }

        state.issued = index;
        state.unresolved += 1;
        debug!(index = %index, in_flight = state.unresolved, "Tracked in-flight batch");
        drop(state);

        // The slot stays consumed until `resolve` adds the permit back.
        permit.forget();
        Ok(())
    }

    /// Marks an in-flight index resolved and returns the new contiguous
    /// watermark.
    ///
    /// The returned index is the highest `k` such that every issued index
    /// `1..=k` has resolved (subject to the failure policy); zero means
    /// nothing has resolved yet. Capacity is freed regardless of the
    /// outcome, waking any caller blocked in [`CheckpointTracker::track`].
    ///
    /// Safe under concurrent invocation from any number of
    /// acknowledgment contexts.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::NotInFlight`] if the index was never
    /// tracked or has already been resolved.
    pub fn resolve(
        &self,
        index: TrackingIndex,
        outcome: &BatchOutcome,
    ) -> CheckpointResult<TrackingIndex> {
        let watermark = {
            let mut state = self.lock_state();

            let in_flight = index.get() > state.base.get()
                && index.get() <= state.issued.get()
                && !state.resolved.has_index(state.base, index);
            if !in_flight {
                return Err(CheckpointError::NotInFlight { index });
            }

            let base = state.base;
            state.resolved.set_index(base, index);
            if !outcome.is_delivered() {
                warn!(index = %index, "Batch resolved with failure");
                if self.config.failure_policy == FailurePolicy::StallOnFailure {
                    state.failed.set_index(base, index);
                }
            }
            state.unresolved -= 1;

            Self::advance_watermark(&mut state);
            state.base
        };

        // Outside the critical section: wake one blocked `track` caller.
        self.permits.add_permits(1);
        Ok(watermark)
    }

    /// Advances `base` as far as contiguous resolution allows, stopping
    /// short of the first failed index.
    fn advance_watermark(state: &mut TrackerState) {
        let contiguous = state.resolved.contiguous_count();
        let stall_at = state.failed.min().map_or(u64::MAX, u64::from);
        let advance_by = contiguous.min(stall_at);

        if advance_by > 0 {
            state.resolved = state.resolved.shift_down(advance_by);
            state.failed = state.failed.shift_down(advance_by);
            state.base = TrackingIndex::new(state.base.get() + advance_by);
            debug!(watermark = %state.base, "Advanced contiguous watermark");
        }
    }

    /// Returns the current contiguous watermark (zero if nothing has
    /// resolved yet).
    #[must_use]
    pub fn watermark(&self) -> TrackingIndex {
        self.lock_state().base
    }

    /// Returns the number of registered-but-unresolved indices.
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.lock_state().unresolved
    }

    /// Returns the lowest failed index the watermark is stalled below,
    /// if any (`StallOnFailure` only).
    #[must_use]
    pub fn stalled_at(&self) -> Option<TrackingIndex> {
        let state = self.lock_state();
        state
            .failed
            .min()
            .map(|position| TrackingIndex::new(state.base.get() + 1 + u64::from(position)))
    }

    /// Locks the shared state, recovering from a poisoned lock. The
    /// bookkeeping inside the critical section cannot panic midway in a
    /// way that leaves the maps inconsistent.
    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
