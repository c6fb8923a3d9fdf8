use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::utils::reserve_ratio;

/// Raw pair reserves (native token units) at a block.
///
/// Unsigned by construction: reconstruction clamps before building one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveSnapshot {
    pub block_number: u64,
    pub reserve0: BigUint,
    pub reserve1: BigUint,
}

impl ReserveSnapshot {
    pub fn new(block_number: u64, reserve0: impl Into<BigUint>, reserve1: impl Into<BigUint>) -> Self {
        Self {
            block_number,
            reserve0: reserve0.into(),
            reserve1: reserve1.into(),
        }
    }

    /// True when both sides are zero, which cannot anchor a reconstruction.
    pub fn is_empty(&self) -> bool {
        self.reserve0.is_zero() && self.reserve1.is_zero()
    }

    /// `(token1 per token0, token0 per token1)` adjusted for decimals.
    pub fn prices(&self, decimals0: u8, decimals1: u8) -> (f64, f64) {
        (
            reserve_ratio(&self.reserve1, decimals1, &self.reserve0, decimals0),
            reserve_ratio(&self.reserve0, decimals0, &self.reserve1, decimals1),
        )
    }
}

/// Reserve state tagged to a block, with its decimal prices.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub snapshot: ReserveSnapshot,
    pub price: f64,
    pub price_inverted: f64,
}

impl PricePoint {
    pub fn from_snapshot(snapshot: ReserveSnapshot, decimals0: u8, decimals1: u8) -> Self {
        let (price, price_inverted) = snapshot.prices(decimals0, decimals1);
        Self {
            snapshot,
            price,
            price_inverted,
        }
    }

    pub fn block_number(&self) -> u64 {
        self.snapshot.block_number
    }
}

/// One bucket of a pool's price series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    /// Block number floored to the bucket width
    pub bucket_key: u64,
    /// Block the price was taken from (highest in the bucket)
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub price_inverted: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prices_adjust_for_decimals() {
        // 1000 USDC (6 decimals) against 2 WETH (18 decimals)
        let snapshot = ReserveSnapshot::new(
            1,
            1_000_000_000u64,
            2_000_000_000_000_000_000u128,
        );
        let (price, inverted) = snapshot.prices(6, 18);
        assert!((price - 0.002).abs() < 1e-15);
        assert!((inverted - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_denominator_yields_zero_price() {
        let snapshot = ReserveSnapshot::new(1, 0u32, 5u32);
        assert_eq!(snapshot.prices(18, 18), (0.0, 0.0));
        assert!(!snapshot.is_empty());
        assert!(ReserveSnapshot::new(1, 0u32, 0u32).is_empty());
    }
}
