//! Checkpoint tracking for the Riffle shard batch-ack pipeline.
//!
//! This crate provides the delivery-guarantee bookkeeping that sits
//! between batch emission and checkpoint persistence:
//!
//! - **[`CheckpointTracker`]**: bounds the number of unacknowledged
//!   batches in flight and resolves out-of-order completions into a
//!   monotonically advancing contiguous watermark.
//! - **[`SequenceLedger`]**: maps tracking indices to the external log's
//!   sequence tokens and derives the "safe to resume from" token as the
//!   watermark advances.
//!
//! # Overview
//!
//! Batches are acknowledged asynchronously and in any order, but a shard
//! may only resume from a position all of whose predecessors have
//! completed. The tracker therefore keeps a base watermark plus a bitmap
//! of completions above it, advancing the base only while the next
//! sequential index has resolved. The ledger prunes its index-to-token
//! map as the watermark moves, so memory stays bounded by the in-flight
//! cap.
//!
//! # Failure policy
//!
//! When an acknowledgment reports failure the slot is still resolved, so
//! capacity frees up and the pipeline never wedges on backpressure. What
//! the watermark does next is a policy decision:
//!
//! - [`FailurePolicy::StallOnFailure`] (default): the watermark never
//!   advances to or past a failed index, so resuming from the acked
//!   sequence replays the failed batch.
//! - [`FailurePolicy::AdvancePastFailure`]: failed indices count as
//!   resolved for watermark purposes and their tokens are passed over.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use riffle_checkpoint::{BatchOutcome, CheckpointTracker, TrackerConfig};
//! use riffle_core::TrackingIndex;
//!
//! let tracker = CheckpointTracker::new(TrackerConfig::new(16));
//!
//! tracker.track(TrackingIndex::new(1), Duration::from_secs(1)).await?;
//! tracker.track(TrackingIndex::new(2), Duration::from_secs(1)).await?;
//!
//! // Acks arrive out of order: 2 first, then 1. The watermark only
//! // moves once the gap at 1 is filled.
//! assert_eq!(
//!     tracker.resolve(TrackingIndex::new(2), &BatchOutcome::Delivered)?,
//!     TrackingIndex::new(0),
//! );
//! assert_eq!(
//!     tracker.resolve(TrackingIndex::new(1), &BatchOutcome::Delivered)?,
//!     TrackingIndex::new(2),
//! );
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod bitmap;
mod error;
mod ledger;
mod tracker;

pub use bitmap::IndexBitmap;
pub use error::{CheckpointError, CheckpointResult};
pub use ledger::SequenceLedger;
pub use tracker::{BatchOutcome, CheckpointTracker, FailurePolicy, TrackerConfig};
