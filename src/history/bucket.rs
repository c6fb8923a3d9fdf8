use chrono::{DateTime, Duration, Utc};

use crate::{
    config::HistorySettings,
    models::{PriceObservation, PricePoint},
    utils::bucket_key,
};

/// Downsamples per-event price points into one observation per block bucket.
#[derive(Debug, Clone, Copy)]
pub struct TimeBucketAggregator {
    pub blocks_per_bucket: u64,
    pub seconds_per_block: u64,
}

impl TimeBucketAggregator {
    pub fn new(blocks_per_bucket: u64, seconds_per_block: u64) -> Self {
        Self {
            blocks_per_bucket: blocks_per_bucket.max(1),
            seconds_per_block,
        }
    }

    pub fn from_settings(settings: &HistorySettings) -> Self {
        Self::new(settings.blocks_per_bucket, settings.seconds_per_block)
    }

    #[inline]
    pub fn bucket_key(&self, block_number: u64) -> u64 {
        bucket_key(block_number, self.blocks_per_bucket)
    }

    /// Extrapolate a block's wall-clock time from the current head.
    ///
    /// Blocks past `current_block` (a lagging head read) are pinned to `now`.
    pub fn timestamp_for(
        &self,
        block_number: u64,
        current_block: u64,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let behind = current_block.saturating_sub(block_number);
        let seconds = behind.saturating_mul(self.seconds_per_block);
        i64::try_from(seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|elapsed| now.checked_sub_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Fold points into ascending observations, keeping the highest block of
    /// each bucket regardless of input order.
    pub fn bucketize(
        &self,
        points: &[PricePoint],
        current_block: u64,
        now: DateTime<Utc>,
    ) -> Vec<PriceObservation> {
        let mut latest: Vec<&PricePoint> = Vec::with_capacity(points.len());

        let mut sorted: Vec<&PricePoint> = points.iter().collect();
        // Stable: for equal blocks the later input wins below
        sorted.sort_by_key(|p| p.block_number());

        for point in sorted {
            let key = self.bucket_key(point.block_number());
            match latest.last_mut() {
                Some(last) if self.bucket_key(last.block_number()) == key => *last = point,
                _ => latest.push(point),
            }
        }

        latest
            .into_iter()
            .map(|point| self.observe(point, current_block, now))
            .collect()
    }

    /// Single observation for one point, stamped against the head.
    pub fn observe(
        &self,
        point: &PricePoint,
        current_block: u64,
        now: DateTime<Utc>,
    ) -> PriceObservation {
        let block_number = point.block_number();
        PriceObservation {
            bucket_key: self.bucket_key(block_number),
            block_number,
            timestamp: self.timestamp_for(block_number, current_block, now),
            price: point.price,
            price_inverted: point.price_inverted,
        }
    }
}
