//! Record source, downstream processor, and the per-shard run loop.
//!
//! [`run_shard`] is the scheduling loop the batcher is designed around:
//! it pulls records from a [`RecordSource`], flushes on policy completion
//! signals and timer expiry, hands emissions to a [`Processor`], and on
//! source exhaustion drains everything out before closing. The returned
//! token is where a restarted consumer should resume the shard.

use std::time::Duration;

use async_trait::async_trait;
use riffle_core::{Record, SequenceToken};
use tracing::{debug, info};

use crate::batcher::{Emission, ShardBatcher};
use crate::error::BatcherResult;

/// An ordered record feed for one shard.
#[async_trait]
pub trait RecordSource: Send {
    /// Pulls the next record, or `None` once the shard is exhausted.
    ///
    /// Implementations must be cancellation-safe: the run loop drops a
    /// pending call when a flush timer fires and reissues it afterwards.
    async fn next_record(&mut self) -> BatcherResult<Option<Record>>;
}

/// Downstream consumer of emitted batches.
///
/// The processor owns each emission's [ack handle](crate::AckHandle) and
/// must arrange for it to be invoked exactly once, from any task. It may
/// hold emissions concurrently up to the tracker's in-flight cap.
#[async_trait]
pub trait Processor: Send {
    /// Accepts an emitted batch for processing.
    async fn process(&mut self, emission: Emission) -> BatcherResult<()>;
}

/// Sleeps until a time-based flush is due, or forever if the policy has
/// no time threshold.
async fn flush_timer(until: Option<Duration>) {
    match until {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

/// Drives one shard from source exhaustion to a clean close.
///
/// `flush_wait` bounds how long each flush attempt waits for an
/// in-flight slot; on timeout the loop simply comes back around, so the
/// value trades scheduling latency against busy-looping under sustained
/// backpressure.
///
/// Returns the acked sequence after a full drain: every record the
/// source produced has been emitted, processed, and acknowledged.
///
/// # Errors
///
/// Source, processor, record-validation, and non-transient checkpoint
/// errors abort the loop immediately, without draining. The shard can be
/// resumed from whatever the batcher had acked at that point.
pub async fn run_shard<S, P>(
    batcher: &mut ShardBatcher,
    source: &mut S,
    processor: &mut P,
    flush_wait: Duration,
) -> BatcherResult<SequenceToken>
where
    S: RecordSource,
    P: Processor,
{
    loop {
        tokio::select! {
            record = source.next_record() => {
                match record? {
                    Some(record) => {
                        if batcher.add_record(record)? {
                            if let Some(emission) = batcher.flush(flush_wait).await? {
                                processor.process(emission).await?;
                            }
                        }
                    }
                    None => break,
                }
            }
            () = flush_timer(batcher.until_next_flush()) => {
                debug!("Flush timer fired");
                if let Some(emission) = batcher.flush(flush_wait).await? {
                    processor.process(emission).await?;
                }
            }
        }
    }

    // Source exhausted: drain the partial batch and any flush still
    // waiting on capacity, then wait for outstanding acks.
    loop {
        match batcher.flush(flush_wait).await? {
            Some(emission) => processor.process(emission).await?,
            None if batcher.has_pending_flush() => {}
            None => break,
        }
    }
    batcher.close(true).await;

    let acked = batcher.acked_sequence();
    info!(acked = %acked, "Shard drained");
    Ok(acked)
}
