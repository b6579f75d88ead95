//! Shard batcher for the Riffle batch-ack pipeline.
//!
//! This crate turns an ordered per-shard record feed into acknowledged
//! batches with at-least-once delivery and safe resumption:
//!
//! - **[`BatchPolicy`] / [`StandardPolicy`]**: decides when buffered
//!   records form a complete batch (count, bytes, or period).
//! - **[`ShardBatcher`]**: the per-shard composition root; ingests
//!   records, emits flushed batches as [`Emission`]s carrying a one-shot
//!   [`AckHandle`], and exposes the acked resumption token.
//! - **[`run_shard`]**: the scheduling loop wiring a [`RecordSource`] to
//!   a [`Processor`] through a batcher, including timer-based flushing
//!   and drain-on-close.
//!
//! # Overview
//!
//! Records are buffered until the policy signals completion, then the
//! batch is flushed under a bounded in-flight cap: if too many emitted
//! batches are still unacknowledged, the flush waits and falls back to
//! the next cycle while newly arrived records join the pending batch.
//! Acks may land in any order; the checkpoint machinery in
//! `riffle-checkpoint` converts them into a contiguous watermark, and
//! [`ShardBatcher::acked_sequence`] reports the external log token it is
//! safe to resume the shard from after a crash.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use riffle_batcher::{run_shard, PolicyConfig, ShardBatcher, StandardPolicy};
//! use riffle_checkpoint::TrackerConfig;
//! use riffle_core::{Limits, SequenceToken, ShardId, StreamId};
//!
//! let limits = Limits::new();
//! let policy = PolicyConfig::with_count(500)
//!     .with_period(Duration::from_secs(1))
//!     .bounded_by(&limits);
//! let mut batcher = ShardBatcher::new(
//!     StreamId::new(7),
//!     ShardId::new(0),
//!     SequenceToken::new(last_checkpoint),
//!     StandardPolicy::boxed(policy)?,
//!     TrackerConfig::from_limits(&limits),
//! )
//! .with_limits(limits);
//!
//! let acked = run_shard(&mut batcher, &mut source, &mut processor,
//!     Duration::from_millis(100)).await?;
//! checkpoint_store.persist(shard, acked).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod accumulator;
mod batcher;
mod error;
mod policy;
mod source;

pub use accumulator::BatchAccumulator;
pub use batcher::{AckHandle, Emission, ShardBatcher};
pub use error::{BatcherError, BatcherResult};
pub use policy::{BatchPolicy, PolicyConfig, StandardPolicy};
pub use source::{run_shard, Processor, RecordSource};
