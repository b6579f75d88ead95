//! Sequence ledger: tracking index to sequence token bookkeeping.
//!
//! The ledger remembers which external-log position each flushed batch
//! ended at, so that when the tracker's watermark advances, the shard can
//! expose the matching resumption token. Entries are pruned as soon as
//! the watermark subsumes them, keeping the map bounded by the in-flight
//! cap.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use riffle_core::{SequenceToken, TrackingIndex};
use tracing::debug;

/// Maps tracking indices to sequence tokens and derives the acked
/// sequence.
///
/// # Thread Safety
///
/// All methods are safe under concurrent invocation from acknowledgment
/// contexts; the single internal mutex is held only for map lookups and
/// pruning.
#[derive(Debug)]
pub struct SequenceLedger {
    state: Mutex<LedgerState>,
}

#[derive(Debug)]
struct LedgerState {
    /// Latest resolved token, or the seed supplied at construction.
    acked: SequenceToken,
    /// Tokens for flushed-but-unresolved batches, keyed by raw index.
    index_to_token: BTreeMap<u64, SequenceToken>,
}

impl SequenceLedger {
    /// Creates a ledger seeded with the token consumption started from.
    ///
    /// The seed is what [`SequenceLedger::acked_sequence`] returns until
    /// the first watermark resolves.
    #[must_use]
    pub fn new(seed: SequenceToken) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                acked: seed,
                index_to_token: BTreeMap::new(),
            }),
        }
    }

    /// Records the token a flushed batch ended at.
    ///
    /// Called exactly once per flushed batch, before the batch is exposed
    /// to the downstream caller.
    pub fn record(&self, index: TrackingIndex, token: SequenceToken) {
        let mut state = self.lock_state();
        let replaced = state.index_to_token.insert(index.get(), token);
        debug_assert!(replaced.is_none(), "index {index} recorded twice");
    }

    /// Resolves the watermark reported by the tracker.
    ///
    /// Looks up the token recorded for exactly `top`, prunes every entry
    /// at or below it, and - if the token was still present - advances the
    /// acked sequence to it. Returns `None` (and leaves the acked
    /// sequence unchanged) when the entry was already pruned by a prior
    /// call, which makes repeated resolution of the same top a no-op.
    pub fn resolve(&self, top: TrackingIndex) -> Option<SequenceToken> {
        let mut state = self.lock_state();

        let hit = state.index_to_token.remove(&top.get());
        // Prune everything subsumed by the watermark, hit or not.
        state.index_to_token = state.index_to_token.split_off(&(top.get() + 1));

        if let Some(token) = hit {
            state.acked = token.clone();
            debug!(top = %top, acked = %token, "Advanced acked sequence");
            Some(token)
        } else {
            None
        }
    }

    /// Returns the latest resolved token, or the seed if nothing has
    /// resolved yet. Never blocks beyond the brief internal lock.
    #[must_use]
    pub fn acked_sequence(&self) -> SequenceToken {
        self.lock_state().acked.clone()
    }

    /// Returns the number of unresolved entries (for observability).
    #[must_use]
    pub fn pending_entries(&self) -> usize {
        self.lock_state().index_to_token.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
