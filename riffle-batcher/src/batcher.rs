//! Shard batcher: the per-shard composition root.
//!
//! Orchestrates the accumulator, checkpoint tracker, and sequence ledger
//! for one shard: ingests records, emits flushed batches paired with a
//! one-shot acknowledgment handle, and exposes the token it is safe to
//! resume the shard from.
//!
//! # Batch lifecycle
//!
//! `Accumulating -> Flushed-Pending-Track -> Tracked-In-Flight -> Resolved`.
//!
//! The pending-track transition may fail transiently on a capacity
//! timeout and loop back; no new batch is built while one is pending.
//! Records that arrive meanwhile are appended to the pending batch, so
//! per-record order survives a failed-then-retried flush.
//!
//! # Concurrency
//!
//! One logical scheduling loop drives [`ShardBatcher::add_record`] /
//! [`ShardBatcher::flush`] sequentially. Concurrency arises from the
//! acknowledgment handles, which may be invoked from arbitrary tasks in
//! any completion order; the shared bookkeeping behind them is its own
//! exclusion domain, scoped to this batcher instance so shards stay
//! independent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use riffle_checkpoint::{
    BatchOutcome, CheckpointTracker, SequenceLedger, TrackerConfig,
};
use riffle_core::{Limits, Record, SequenceToken, Shared, ShardId, StreamId, TrackingIndex};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::accumulator::BatchAccumulator;
use crate::error::{BatcherError, BatcherResult};
use crate::policy::BatchPolicy;

// -----------------------------------------------------------------------------
// Emission and acknowledgment handle
// -----------------------------------------------------------------------------

/// Bookkeeping shared between the batcher and its acknowledgment handles.
///
/// Handles hold this through an `Arc`, so acknowledgments stay
/// memory-safe even after the batcher is closed without draining.
#[derive(Debug)]
struct AckShared {
    tracker: CheckpointTracker,
    ledger: SequenceLedger,
    /// Emitted-but-unacknowledged batch count, for drain-on-close.
    in_flight: AtomicU64,
    drained: Notify,
}

/// One-shot completion handle for an emitted batch.
///
/// The downstream processor must invoke [`AckHandle::ack`] exactly once,
/// eventually, from any task. Taking `self` by value makes a second
/// invocation unrepresentable.
#[derive(Debug)]
pub struct AckHandle {
    index: TrackingIndex,
    shared: Arc<AckShared>,
}

impl AckHandle {
    /// Returns the batch's tracking index.
    #[must_use]
    pub const fn index(&self) -> TrackingIndex {
        self.index
    }

    /// Reports the processing outcome for this batch.
    ///
    /// Resolves the tracking slot (freeing in-flight capacity regardless
    /// of the outcome), advances the acked sequence if the watermark
    /// moved, and decrements the drain counter.
    ///
    /// # Errors
    ///
    /// Returns [`BatcherError::BatchFailed`] for a failed outcome, after
    /// bookkeeping, or the checkpoint error if resolution itself was
    /// rejected.
    pub fn ack(self, outcome: BatchOutcome) -> BatcherResult<()> {
        let result = match self.shared.tracker.resolve(self.index, &outcome) {
            Ok(top) => {
                if top.get() > 0 {
                    if let Some(token) = self.shared.ledger.resolve(top) {
                        debug!(index = %self.index, acked = %token, "Acked sequence advanced");
                    }
                }
                match outcome {
                    BatchOutcome::Delivered => Ok(()),
                    BatchOutcome::Failed(reason) => Err(BatcherError::BatchFailed {
                        index: self.index,
                        reason,
                    }),
                }
            }
            Err(e) => Err(e.into()),
        };

        // The drain counter always comes down, even when bookkeeping was
        // rejected, so close(drain) cannot wait forever.
        if self.shared.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.drained.notify_waiters();
        }

        result
    }
}

/// A flushed batch handed to the downstream processor.
#[derive(Debug)]
pub struct Emission {
    /// The batch's records, in the order they were added.
    ///
    /// Each record sits behind a copy-on-first-mutation wrapper: fanning
    /// a batch out to concurrent consumers is a cheap clone, and no
    /// consumer ever observes another's mutations.
    pub records: Vec<Shared<Record>>,
    /// The one-shot acknowledgment handle for this batch.
    pub ack: AckHandle,
}

// -----------------------------------------------------------------------------
// Shard batcher
// -----------------------------------------------------------------------------

/// A batch that was flushed from the accumulator but not yet accepted by
/// the tracker.
#[derive(Debug)]
struct PendingFlush {
    index: TrackingIndex,
    records: Vec<Record>,
    last_token: SequenceToken,
}

/// Per-shard batch-ack pipeline.
pub struct ShardBatcher {
    stream_id: StreamId,
    shard_id: ShardId,
    limits: Limits,
    accumulator: BatchAccumulator,
    /// Flushed batch awaiting a tracking slot, if any.
    pending: Option<PendingFlush>,
    /// Last tracking index assigned; the next flush gets `last + 1`.
    last_index: TrackingIndex,
    shared: Arc<AckShared>,
}

impl ShardBatcher {
    /// Creates a batcher for one shard.
    ///
    /// `seed` is the token consumption resumed from; it is what
    /// [`ShardBatcher::acked_sequence`] reports until the first batch
    /// resolves.
    #[must_use]
    pub fn new(
        stream_id: StreamId,
        shard_id: ShardId,
        seed: SequenceToken,
        policy: Box<dyn BatchPolicy>,
        tracker_config: TrackerConfig,
    ) -> Self {
        info!(stream = %stream_id, shard = %shard_id, "Starting shard batcher");
        Self {
            stream_id,
            shard_id,
            limits: Limits::new(),
            accumulator: BatchAccumulator::new(policy),
            pending: None,
            last_index: TrackingIndex::new(0),
            shared: Arc::new(AckShared {
                tracker: CheckpointTracker::new(tracker_config),
                ledger: SequenceLedger::new(seed),
                in_flight: AtomicU64::new(0),
                drained: Notify::new(),
            }),
        }
    }

    /// Replaces the workspace limits records are validated against.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Feeds one record and returns whether the caller should flush.
    ///
    /// The record is validated against the workspace limits, then
    /// stamped with its origin: stream, shard, and the sequence token it
    /// arrived with. While a previous flush is still awaiting a tracking
    /// slot the record is appended to that pending batch instead,
    /// preserving per-record order, and the method reports "complete" so
    /// the caller retries the flush path.
    ///
    /// # Errors
    ///
    /// Returns [`BatcherError::Record`] if the record exceeds the
    /// limits. The record was not buffered and the shard's position has
    /// not moved.
    pub fn add_record(&mut self, record: Record) -> BatcherResult<bool> {
        record.validate(&self.limits)?;

        let mut record = record;
        let token = record.sequence_token.clone();
        record.metadata.set("stream", self.stream_id.to_string());
        record.metadata.set("shard", self.shard_id.to_string());
        record.metadata.set("sequence", token.as_str());

        if let Some(pending) = &mut self.pending {
            pending.last_token = token;
            pending.records.push(record);
            return Ok(true);
        }

        Ok(self.accumulator.add(record))
    }

    /// Returns true if a flushed batch is still awaiting a tracking slot.
    #[must_use]
    pub const fn has_pending_flush(&self) -> bool {
        self.pending.is_some()
    }

    /// Flushes the current batch and emits it with its ack handle.
    ///
    /// Returns `Ok(None)` when there is nothing to emit this cycle:
    /// either no records are pending, or the in-flight cap was still
    /// full after `wait` (the batch is preserved for the next call).
    /// The wait is clamped to the limits' maximum track timeout.
    ///
    /// # Errors
    ///
    /// Any tracker error other than a capacity timeout is surfaced, with
    /// the pending batch preserved.
    pub async fn flush(&mut self, wait: Duration) -> BatcherResult<Option<Emission>> {
        let wait = wait.min(self.limits.max_track_wait());

        if self.pending.is_none() {
            let Some(records) = self.accumulator.flush() else {
                return Ok(None);
            };
            let index = self.last_index.next();
            self.last_index = index;
            let last_token = records
                .last()
                .map(|r| r.sequence_token.clone())
                .unwrap_or_default();
            self.pending = Some(PendingFlush {
                index,
                records,
                last_token,
            });
        }

        let Some((index, last_token)) = self
            .pending
            .as_ref()
            .map(|p| (p.index, p.last_token.clone()))
        else {
            return Ok(None);
        };

        match self.shared.tracker.track(index, wait).await {
            Ok(()) => {}
            Err(e) if e.is_capacity_timeout() => {
                debug!(index = %index, "No in-flight capacity this cycle");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        // The slot is ours: record the resumption token before the batch
        // is visible downstream, then hand it off.
        self.shared.ledger.record(index, last_token);
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);

        let records: Vec<Shared<Record>> = self
            .pending
            .take()
            .map(|p| p.records.into_iter().map(Shared::from_owned).collect())
            .unwrap_or_default();
        debug!(index = %index, records = records.len(), "Emitted batch");

        Ok(Some(Emission {
            records,
            ack: AckHandle {
                index,
                shared: Arc::clone(&self.shared),
            },
        }))
    }

    /// How long until a time-based flush is due, or `None` if the policy
    /// has no time threshold.
    #[must_use]
    pub fn until_next_flush(&self) -> Option<Duration> {
        self.accumulator.until_next()
    }

    /// Returns the token it is currently safe to resume this shard from.
    #[must_use]
    pub fn acked_sequence(&self) -> SequenceToken {
        self.shared.ledger.acked_sequence()
    }

    /// Returns the number of emitted-but-unacknowledged batches.
    #[must_use]
    pub fn emitted_in_flight(&self) -> u64 {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Closes the batcher.
    ///
    /// With `drain` set, waits until every emitted batch has been
    /// acknowledged before releasing the policy's resources. Without it,
    /// resources are released immediately; outstanding ack handles stay
    /// safe to invoke because their state is independent of the policy.
    pub async fn close(&mut self, drain: bool) {
        if drain {
            loop {
                let notified = self.shared.drained.notified();
                tokio::pin!(notified);
                // Register interest before checking the counter so an
                // ack between the check and the await is not missed.
                notified.as_mut().enable();
                if self.shared.in_flight.load(Ordering::Acquire) == 0 {
                    break;
                }
                notified.await;
            }
        }
        info!(stream = %self.stream_id, shard = %self.shard_id, "Closed shard batcher");
        self.accumulator.close();
    }
}

impl std::fmt::Debug for ShardBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardBatcher")
            .field("stream_id", &self.stream_id)
            .field("shard_id", &self.shard_id)
            .field("last_index", &self.last_index)
            .field("has_pending_flush", &self.pending.is_some())
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyConfig, StandardPolicy};

    const WAIT: Duration = Duration::from_millis(50);

    fn batcher(max_count: u32, capacity: u32) -> ShardBatcher {
        ShardBatcher::new(
            StreamId::new(1),
            ShardId::new(0),
            SequenceToken::new("seed"),
            StandardPolicy::boxed(PolicyConfig::with_count(max_count)).unwrap(),
            TrackerConfig::new(capacity),
        )
    }

    fn record(payload: &str, token: &str) -> Record {
        Record::new(payload.as_bytes().to_vec(), token)
    }

    #[tokio::test]
    async fn test_flush_with_nothing_pending_is_noop() {
        let mut batcher = batcher(2, 4);
        assert!(batcher.flush(WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_add_flush_ack_cycle() {
        let mut batcher = batcher(2, 4);

        assert!(!batcher.add_record(record("a", "10")).unwrap());
        assert!(batcher.add_record(record("b", "11")).unwrap());

        let emission = batcher.flush(WAIT).await.unwrap().unwrap();
        assert_eq!(emission.records.len(), 2);
        assert_eq!(emission.ack.index(), TrackingIndex::new(1));

        // Metadata is stamped at ingest.
        let first = emission.records[0].get();
        assert_eq!(first.metadata.get("stream"), Some("stream-1"));
        assert_eq!(first.metadata.get("shard"), Some("shard-0"));
        assert_eq!(first.metadata.get("sequence"), Some("10"));
        assert_eq!(emission.records[1].get().metadata.get("sequence"), Some("11"));

        assert_eq!(batcher.acked_sequence().as_str(), "seed");
        emission.ack.ack(BatchOutcome::Delivered).unwrap();
        assert_eq!(batcher.acked_sequence().as_str(), "11");
    }

    #[tokio::test]
    async fn test_tracking_indices_increase_per_flush() {
        let mut batcher = batcher(1, 8);

        for (i, token) in [(1u64, "10"), (2, "11"), (3, "12")] {
            batcher.add_record(record("x", token)).unwrap();
            let emission = batcher.flush(WAIT).await.unwrap().unwrap();
            assert_eq!(emission.ack.index(), TrackingIndex::new(i));
            emission.ack.ack(BatchOutcome::Delivered).unwrap();
        }
    }

    #[tokio::test]
    async fn test_capacity_timeout_preserves_pending_batch() {
        let mut batcher = batcher(1, 1);

        batcher.add_record(record("a", "10")).unwrap();
        let first = batcher.flush(WAIT).await.unwrap().unwrap();

        // Cap of one: the second flush cannot get a slot yet.
        batcher.add_record(record("b", "11")).unwrap();
        assert!(batcher.flush(WAIT).await.unwrap().is_none());
        assert!(batcher.has_pending_flush());

        // Records arriving meanwhile join the pending batch, in order.
        assert!(batcher.add_record(record("c", "12")).unwrap());

        first.ack.ack(BatchOutcome::Delivered).unwrap();
        let second = batcher.flush(WAIT).await.unwrap().unwrap();
        assert!(!batcher.has_pending_flush());

        let tokens: Vec<&str> = second
            .records
            .iter()
            .map(|r| r.get().sequence_token.as_str())
            .collect();
        assert_eq!(tokens, vec!["11", "12"]);

        // The retried flush still carries the index assigned at flush time.
        assert_eq!(second.ack.index(), TrackingIndex::new(2));
        second.ack.ack(BatchOutcome::Delivered).unwrap();
        assert_eq!(batcher.acked_sequence().as_str(), "12");
    }

    #[tokio::test]
    async fn test_out_of_order_acks_walk_the_watermark() {
        let mut batcher = batcher(1, 8);
        let mut emissions = Vec::new();

        for token in ["A", "B", "C"] {
            batcher.add_record(record("x", token)).unwrap();
            emissions.push(batcher.flush(WAIT).await.unwrap().unwrap());
        }
        let third = emissions.pop().unwrap();
        let second = emissions.pop().unwrap();
        let first = emissions.pop().unwrap();

        // Resolve 2 first: seed unchanged.
        second.ack.ack(BatchOutcome::Delivered).unwrap();
        assert_eq!(batcher.acked_sequence().as_str(), "seed");

        // Resolving 1 carries the watermark through the resolved 2.
        first.ack.ack(BatchOutcome::Delivered).unwrap();
        assert_eq!(batcher.acked_sequence().as_str(), "B");

        third.ack.ack(BatchOutcome::Delivered).unwrap();
        assert_eq!(batcher.acked_sequence().as_str(), "C");
    }

    #[tokio::test]
    async fn test_failed_ack_surfaces_error_and_stalls() {
        let mut batcher = batcher(1, 8);

        batcher.add_record(record("x", "A")).unwrap();
        let first = batcher.flush(WAIT).await.unwrap().unwrap();
        batcher.add_record(record("y", "B")).unwrap();
        let second = batcher.flush(WAIT).await.unwrap().unwrap();

        let err = first
            .ack
            .ack(BatchOutcome::Failed("boom".into()))
            .unwrap_err();
        assert!(matches!(err, BatcherError::BatchFailed { .. }));

        // Conservative default: the acked sequence never passes the
        // failed batch, so a restart replays it.
        second.ack.ack(BatchOutcome::Delivered).unwrap();
        assert_eq!(batcher.acked_sequence().as_str(), "seed");
    }

    #[tokio::test]
    async fn test_close_with_drain_waits_for_acks() {
        let mut batcher = batcher(1, 8);

        batcher.add_record(record("x", "A")).unwrap();
        let emission = batcher.flush(WAIT).await.unwrap().unwrap();
        assert_eq!(batcher.emitted_in_flight(), 1);

        let ack_task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            emission.ack.ack(BatchOutcome::Delivered).unwrap();
        });

        // Blocks until the spawned ack lands.
        tokio::time::timeout(Duration::from_secs(5), batcher.close(true))
            .await
            .expect("drain should complete once the ack arrives");
        assert_eq!(batcher.emitted_in_flight(), 0);

        ack_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_without_drain_keeps_acks_safe() {
        let mut batcher = batcher(1, 8);

        batcher.add_record(record("x", "A")).unwrap();
        let emission = batcher.flush(WAIT).await.unwrap().unwrap();

        batcher.close(false).await;

        // A late ack after release must not fault.
        emission.ack.ack(BatchOutcome::Delivered).unwrap();
        assert_eq!(batcher.acked_sequence().as_str(), "A");
    }

    #[tokio::test]
    async fn test_oversized_record_rejected() {
        let limits = Limits::for_testing();
        let mut batcher = batcher(2, 4).with_limits(limits);

        let big = Record::new(vec![0u8; limits.max_record_bytes as usize + 1], "10");
        let err = batcher.add_record(big).unwrap_err();
        assert!(matches!(err, BatcherError::Record(_)));

        // The rejected record was not buffered.
        assert!(batcher.flush(WAIT).await.unwrap().is_none());
        assert_eq!(batcher.acked_sequence().as_str(), "seed");
    }

    #[tokio::test]
    async fn test_flush_wait_clamped_to_limits() {
        let limits = Limits {
            max_track_timeout_us: 10_000,
            ..Limits::for_testing()
        };
        let mut batcher = batcher(1, 1).with_limits(limits);

        batcher.add_record(record("a", "10")).unwrap();
        let first = batcher.flush(WAIT).await.unwrap().unwrap();

        // An hour-long wait on a full cap is cut down to the limit.
        batcher.add_record(record("b", "11")).unwrap();
        let flush = tokio::time::timeout(
            Duration::from_secs(1),
            batcher.flush(Duration::from_secs(3600)),
        )
        .await
        .expect("clamped wait should expire well within a second")
        .unwrap();
        assert!(flush.is_none());
        assert!(batcher.has_pending_flush());

        first.ack.ack(BatchOutcome::Delivered).unwrap();
    }

    #[tokio::test]
    async fn test_emitted_records_do_not_alias() {
        let mut batcher = batcher(1, 4);
        batcher.add_record(record("a", "10")).unwrap();
        let emission = batcher.flush(WAIT).await.unwrap().unwrap();

        // A fanned-out consumer's mutation stays private to its copy.
        let mut copy = emission.records[0].clone();
        copy.make_mut().metadata.set("consumer", "b");
        assert_eq!(emission.records[0].get().metadata.get("consumer"), None);
        assert_eq!(copy.get().metadata.get("consumer"), Some("b"));

        emission.ack.ack(BatchOutcome::Delivered).unwrap();
    }
}
