//! Chunked event-log retrieval.
//!
//! Log queries are bounded by provider limits, so a block range is walked in
//! consecutive sub-ranges with a pause between requests. Two retry layers
//! apply:
//! - every single query is retried with backoff at its original width
//! - if a query still fails, the whole range is retried with the chunk size
//!   halved (down to the configured floor)
//!
//! A range either comes back complete or not at all: reconstruction needs a
//! gap-free event set.

use std::{sync::Arc, time::Duration};

use alloy::primitives::Address;
use log::{debug, error, info};
use num_bigint::BigUint;

use super::{
    retry::{with_retry, RetryPolicy},
    LogSource,
};
use crate::{
    config::FetchSettings,
    error::{HistoryError, Result},
    models::{LogKind, ProgressTracker, RawEvent, ReserveSnapshot},
};

/// Events of a range, grouped by kind.
#[derive(Debug, Clone, Default)]
pub struct LogBatch {
    pub mints: Vec<RawEvent>,
    pub burns: Vec<RawEvent>,
    pub swaps: Vec<RawEvent>,
}

impl LogBatch {
    pub fn len(&self) -> usize {
        self.mints.len() + self.burns.len() + self.swaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate all kinds. Order is not meaningful until sorted.
    pub fn into_events(self) -> Vec<RawEvent> {
        let mut events = self.mints;
        events.extend(self.burns);
        events.extend(self.swaps);
        events
    }
}

/// Result of [`ChunkedLogFetcher::fetch_events`]: the range's events plus the
/// pair reserves at the range's last block.
#[derive(Debug, Clone)]
pub struct FetchedEvents {
    pub mint_events: Vec<RawEvent>,
    pub burn_events: Vec<RawEvent>,
    pub swap_events: Vec<RawEvent>,
    pub reserve0: BigUint,
    pub reserve1: BigUint,
    pub to_block: u64,
}

impl FetchedEvents {
    pub fn anchor(&self) -> ReserveSnapshot {
        ReserveSnapshot::new(self.to_block, self.reserve0.clone(), self.reserve1.clone())
    }

    pub fn event_count(&self) -> usize {
        self.mint_events.len() + self.burn_events.len() + self.swap_events.len()
    }

    pub fn into_events(self) -> Vec<RawEvent> {
        LogBatch {
            mints: self.mint_events,
            burns: self.burn_events,
            swaps: self.swap_events,
        }
        .into_events()
    }
}

pub struct ChunkedLogFetcher {
    source: Arc<dyn LogSource>,
    policy: RetryPolicy,
    request_delay: Duration,
    default_chunk_size: u64,
}

impl ChunkedLogFetcher {
    pub fn new(source: Arc<dyn LogSource>, settings: &FetchSettings) -> Self {
        Self {
            source,
            policy: RetryPolicy::from_settings(settings),
            request_delay: Duration::from_millis(settings.request_delay_ms),
            default_chunk_size: settings.chunk_size.max(1),
        }
    }

    pub fn default_chunk_size(&self) -> u64 {
        self.default_chunk_size
    }

    /// Current reserves (pinned to `to_block`) plus every mint, burn and swap
    /// in `[from_block, to_block]`.
    ///
    /// With `initial_chunk_size`, a failing range is retried on halved chunks;
    /// without it, the configured chunk size is used for every attempt.
    pub async fn fetch_events(
        &self,
        pool: Address,
        from_block: u64,
        to_block: u64,
        initial_chunk_size: Option<u64>,
        progress: &ProgressTracker,
    ) -> Result<FetchedEvents> {
        if from_block > to_block {
            return Err(HistoryError::InvalidRange {
                from_block,
                to_block,
            });
        }

        let anchor = self.reserves_at(pool, to_block).await?;
        let batch = self
            .fetch_logs(pool, from_block, to_block, initial_chunk_size, progress)
            .await?;

        Ok(FetchedEvents {
            mint_events: batch.mints,
            burn_events: batch.burns,
            swap_events: batch.swaps,
            reserve0: anchor.reserve0,
            reserve1: anchor.reserve1,
            to_block,
        })
    }

    /// Pair reserves at `block`, retried. Unreadable or empty reserves are a
    /// [`HistoryError::StaleAnchor`]: nothing can be reconstructed from them.
    pub async fn reserves_at(&self, pool: Address, block: u64) -> Result<ReserveSnapshot> {
        let source = &self.source;
        let (reserve0, reserve1) =
            with_retry(&self.policy, "getReserves", None, |_| source.reserves(pool, Some(block)))
                .await
                .map_err(|failure| {
                    error!(
                        "Pool {}: reserves unreadable at block {} after {} attempts: {:#}",
                        pool, block, failure.attempts, failure.last_error
                    );
                    HistoryError::StaleAnchor { pool }
                })?;

        let snapshot = ReserveSnapshot::new(block, reserve0, reserve1);
        if snapshot.is_empty() {
            error!("Pool {}: zero reserves at block {}", pool, block);
            return Err(HistoryError::StaleAnchor { pool });
        }

        Ok(snapshot)
    }

    /// All events in `[from_block, to_block]`, complete or an error.
    pub async fn fetch_logs(
        &self,
        pool: Address,
        from_block: u64,
        to_block: u64,
        initial_chunk_size: Option<u64>,
        progress: &ProgressTracker,
    ) -> Result<LogBatch> {
        if from_block > to_block {
            return Err(HistoryError::InvalidRange {
                from_block,
                to_block,
            });
        }

        let what = format!("logs for {}", pool);
        let batch = with_retry(&self.policy, &what, initial_chunk_size, |chunk| {
            let chunk_size = chunk.unwrap_or(self.default_chunk_size);
            async move {
                self.fetch_range_once(pool, from_block, to_block, chunk_size, progress)
                    .await
                    .map_err(anyhow::Error::from)
            }
        })
        .await
        .map_err(|failure| HistoryError::RetriesExhausted {
            what,
            from_block,
            to_block,
            attempts: failure.attempts,
            last_error: format!("{:#}", failure.last_error),
        })?;

        info!(
            "Pool {}: fetched {} events ({} mint, {} burn, {} swap) for blocks {}-{}",
            pool,
            batch.len(),
            batch.mints.len(),
            batch.burns.len(),
            batch.swaps.len(),
            from_block,
            to_block
        );

        Ok(batch)
    }

    /// One pass over the range at a fixed chunk size. Any query that exhausts
    /// its own retries aborts the pass.
    async fn fetch_range_once(
        &self,
        pool: Address,
        from_block: u64,
        to_block: u64,
        chunk_size: u64,
        progress: &ProgressTracker,
    ) -> Result<LogBatch> {
        let chunk_size = chunk_size.max(1);
        let swap_chunk_size = (chunk_size / 2).max(1);
        let mut batch = LogBatch::default();

        progress.restart_range();

        let mut start = from_block;
        loop {
            let end = start.saturating_add(chunk_size - 1).min(to_block);

            let mints = self.query(pool, LogKind::Mint, start, end).await?;
            self.throttle().await;
            let burns = self.query(pool, LogKind::Burn, start, end).await?;
            self.throttle().await;

            // Swaps dominate log volume, so they get half-width windows
            let mut swaps = Vec::new();
            let mut swap_start = start;
            loop {
                let swap_end = swap_start.saturating_add(swap_chunk_size - 1).min(end);
                swaps.extend(self.query(pool, LogKind::Swap, swap_start, swap_end).await?);
                if swap_end >= end {
                    break;
                }
                self.throttle().await;
                swap_start = swap_end + 1;
            }

            let found = mints.len() + burns.len() + swaps.len();
            progress.record_chunk(end - start + 1, found);
            debug!(
                "Pool {}: blocks {}-{} -> {} events (chunk size {})",
                pool, start, end, found, chunk_size
            );

            batch.mints.extend(mints);
            batch.burns.extend(burns);
            batch.swaps.extend(swaps);

            if end >= to_block {
                break;
            }
            self.throttle().await;
            start = end + 1;
        }

        Ok(batch)
    }

    async fn query(
        &self,
        pool: Address,
        kind: LogKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>> {
        let source = &self.source;
        with_retry(&self.policy, kind.as_str(), None, |_| {
            source.logs(pool, kind, from_block, to_block)
        })
        .await
        .map_err(|failure| HistoryError::RetriesExhausted {
            what: format!("{} logs for {}", kind.as_str(), pool),
            from_block,
            to_block,
            attempts: failure.attempts,
            last_error: format!("{:#}", failure.last_error),
        })
    }

    async fn throttle(&self) {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
    }
}
