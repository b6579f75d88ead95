//! Riffle Core - Strongly-typed identifiers and the record model for Riffle.
//!
//! This crate provides the types shared by every stage of the shard
//! batch-ack pipeline: the immutable [`Record`] read from the external
//! partitioned log, the [`SequenceToken`] used to resume consumption, and
//! the [`TrackingIndex`] assigned to each flushed batch.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: Prevent mixing up a `TrackingIndex` with a
//!   raw counter or a `ShardId` with a `StreamId`
//! - **Explicit limits**: Every resource has a bounded maximum
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod record;
mod shared;
mod types;

pub use error::{Error, Result};
pub use limits::Limits;
pub use record::{Metadata, Record};
pub use shared::Shared;
pub use types::{SequenceToken, ShardId, StreamId, TrackingIndex};
