//! Per-pool observation series.
//!
//! - Readers get an `Arc` snapshot and never block writers for long
//! - Writers copy-on-write through `Arc::make_mut`
//! - Every mutation keeps bucket keys unique and strictly increasing;
//!   a segment that would break this is rejected, not reordered

use std::sync::Arc;

use alloy::primitives::Address;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::{
    error::{HistoryError, Result},
    models::{PriceObservation, ReserveSnapshot},
};

#[derive(Debug, Clone, Default)]
pub struct HistorySeries {
    pub observations: Arc<Vec<PriceObservation>>,
    /// Reserves at the oldest covered block, the anchor for backward extension
    pub oldest: Option<ReserveSnapshot>,
    /// Highest block the series reflects
    pub latest_block: u64,
}

impl HistorySeries {
    pub fn first_key(&self) -> Option<u64> {
        self.observations.first().map(|o| o.bucket_key)
    }

    pub fn last_key(&self) -> Option<u64> {
        self.observations.last().map(|o| o.bucket_key)
    }
}

#[derive(Default)]
pub struct HistorySeriesStore {
    series: RwLock<FxHashMap<Address, HistorySeries>>,
}

impl HistorySeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Immutable snapshot of a pool's observations.
    pub fn read(&self, pool: &Address) -> Option<Arc<Vec<PriceObservation>>> {
        self.series.read().get(pool).map(|s| Arc::clone(&s.observations))
    }

    pub fn get(&self, pool: &Address) -> Option<HistorySeries> {
        self.series.read().get(pool).cloned()
    }

    pub fn anchor(&self, pool: &Address) -> Option<ReserveSnapshot> {
        self.series.read().get(pool).and_then(|s| s.oldest.clone())
    }

    pub fn contains(&self, pool: &Address) -> bool {
        self.series.read().contains_key(pool)
    }

    pub fn pools(&self) -> Vec<Address> {
        self.series.read().keys().copied().collect()
    }

    /// Install a freshly reconstructed series, dropping whatever was there.
    pub fn replace(
        &self,
        pool: Address,
        observations: Vec<PriceObservation>,
        oldest: ReserveSnapshot,
        latest_block: u64,
    ) -> Result<()> {
        ensure_increasing(pool, &observations)?;

        self.series.write().insert(
            pool,
            HistorySeries {
                observations: Arc::new(observations),
                oldest: Some(oldest),
                latest_block,
            },
        );
        Ok(())
    }

    /// Concatenate newer observations after the last bucket.
    pub fn append(
        &self,
        pool: Address,
        newer: Vec<PriceObservation>,
        latest_block: u64,
    ) -> Result<usize> {
        ensure_increasing(pool, &newer)?;

        let mut guard = self.series.write();
        let series = guard.get_mut(&pool).ok_or(HistoryError::NoHistory(pool))?;

        if let (Some(last), Some(first_new)) = (series.last_key(), newer.first()) {
            if first_new.bucket_key <= last {
                return Err(HistoryError::SegmentOutOfOrder {
                    pool,
                    detail: format!(
                        "appended bucket {} is not after last bucket {}",
                        first_new.bucket_key, last
                    ),
                });
            }
        }

        let added = newer.len();
        Arc::make_mut(&mut series.observations).extend(newer);
        series.latest_block = series.latest_block.max(latest_block);
        Ok(added)
    }

    /// Insert older observations before the first bucket and move the anchor
    /// back to `oldest`.
    ///
    /// An empty segment still moves the anchor: the range was scanned and
    /// simply had no events.
    pub fn prepend(
        &self,
        pool: Address,
        older: Vec<PriceObservation>,
        oldest: ReserveSnapshot,
    ) -> Result<usize> {
        ensure_increasing(pool, &older)?;

        let mut guard = self.series.write();
        let series = guard.get_mut(&pool).ok_or(HistoryError::NoHistory(pool))?;

        if let (Some(first), Some(last_new)) = (series.first_key(), older.last()) {
            if last_new.bucket_key >= first {
                return Err(HistoryError::SegmentOutOfOrder {
                    pool,
                    detail: format!(
                        "prepended bucket {} is not before first bucket {}",
                        last_new.bucket_key, first
                    ),
                });
            }
        }
        if let Some(current) = &series.oldest {
            if oldest.block_number >= current.block_number {
                return Err(HistoryError::SegmentOutOfOrder {
                    pool,
                    detail: format!(
                        "new anchor block {} is not before current anchor block {}",
                        oldest.block_number, current.block_number
                    ),
                });
            }
        }

        let added = older.len();
        let observations = Arc::make_mut(&mut series.observations);
        observations.splice(0..0, older);
        series.oldest = Some(oldest);
        Ok(added)
    }

    /// Overwrite the last bucket when keys match, otherwise append.
    ///
    /// Returns `true` when a new bucket was added.
    pub fn refresh_last(&self, pool: Address, observation: PriceObservation) -> Result<bool> {
        let mut guard = self.series.write();
        let series = guard.get_mut(&pool).ok_or(HistoryError::NoHistory(pool))?;

        let latest_block = observation.block_number;
        let observations = Arc::make_mut(&mut series.observations);
        let appended = match observations.last_mut() {
            Some(last) if last.bucket_key == observation.bucket_key => {
                *last = observation;
                false
            },
            Some(last) if last.bucket_key > observation.bucket_key => {
                return Err(HistoryError::SegmentOutOfOrder {
                    pool,
                    detail: format!(
                        "refreshed bucket {} is older than last bucket {}",
                        observation.bucket_key, last.bucket_key
                    ),
                });
            },
            _ => {
                observations.push(observation);
                true
            },
        };

        series.latest_block = series.latest_block.max(latest_block);
        Ok(appended)
    }

    /// Drop a pool's series entirely. Returns whether one existed.
    pub fn reset(&self, pool: &Address) -> bool {
        self.series.write().remove(pool).is_some()
    }
}

fn ensure_increasing(pool: Address, observations: &[PriceObservation]) -> Result<()> {
    match observations
        .windows(2)
        .find(|pair| pair[0].bucket_key >= pair[1].bucket_key)
    {
        Some(pair) => Err(HistoryError::SegmentOutOfOrder {
            pool,
            detail: format!(
                "bucket {} followed by bucket {}",
                pair[0].bucket_key, pair[1].bucket_key
            ),
        }),
        None => Ok(()),
    }
}
