//! Backward replay of pair events.
//!
//! Historical reserves are recovered by starting from a trusted reserve
//! state and undoing every event, newest first:
//!
//! | event | forward effect        | undo                        |
//! |-------|-----------------------|-----------------------------|
//! | Mint  | `r += (a0, a1)`       | `r -= (a0, a1)`             |
//! | Burn  | `r -= (a0, a1)`       | `r += (a0, a1)`             |
//! | Swap  | `r += in - out`       | `r = r - in + out`          |
//!
//! Each event's point carries the reserves right after it was undone, i.e.
//! the state immediately preceding it on-chain.

use log::warn;
use num_bigint::BigInt;

use crate::{
    models::{EventKind, Pool, PricePoint, RawEvent, ReserveSnapshot},
    utils::clamp_to_unsigned,
};

/// Trusted reserve state a replay starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// Live on-chain reserves at the range's last block. A synthetic point
    /// at that block is added so the series ends at ground truth.
    Current(ReserveSnapshot),
    /// Oldest reconstructed state of an existing series, used to extend it
    /// backward. No synthetic point: that block already belongs to the series.
    Boundary(ReserveSnapshot),
}

impl Anchor {
    pub fn snapshot(&self) -> &ReserveSnapshot {
        match self {
            Anchor::Current(snapshot) | Anchor::Boundary(snapshot) => snapshot,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// Points in ascending block order
    pub points: Vec<PricePoint>,
    /// Reserves before the oldest replayed event, tagged with `from_block`
    pub oldest: ReserveSnapshot,
    /// Number of reserve components that went negative and were zeroed
    pub clamped: usize,
}

pub struct ReserveReconstructor {
    decimals0: u8,
    decimals1: u8,
}

impl ReserveReconstructor {
    pub fn new(decimals0: u8, decimals1: u8) -> Self {
        Self {
            decimals0,
            decimals1,
        }
    }

    pub fn for_pool(pool: &Pool) -> Self {
        let (decimals0, decimals1) = pool.decimals();
        Self::new(decimals0, decimals1)
    }

    /// Replay `events` backward from `anchor`.
    ///
    /// `events` may arrive in any order (typically concatenated per kind and
    /// per chunk); they are ordered globally by `(block, log_index)` first.
    /// `from_block` tags the returned oldest snapshot and must not exceed the
    /// lowest event block.
    pub fn reconstruct(
        &self,
        anchor: &Anchor,
        mut events: Vec<RawEvent>,
        from_block: u64,
    ) -> Reconstruction {
        // Stable ascending sort, then walk it reversed: ties without a log
        // index are undone in reverse arrival order.
        events.sort_by_key(RawEvent::sort_key);

        let start = anchor.snapshot();
        let mut reserve0 = BigInt::from(start.reserve0.clone());
        let mut reserve1 = BigInt::from(start.reserve1.clone());
        let mut points = Vec::with_capacity(events.len() + 1);
        let mut clamped = 0;

        for event in events.iter().rev() {
            match &event.kind {
                EventKind::Mint { amount0, amount1 } => {
                    reserve0 -= BigInt::from(amount0.clone());
                    reserve1 -= BigInt::from(amount1.clone());
                },
                EventKind::Burn { amount0, amount1 } => {
                    reserve0 += BigInt::from(amount0.clone());
                    reserve1 += BigInt::from(amount1.clone());
                },
                EventKind::Swap {
                    amount0_in,
                    amount1_in,
                    amount0_out,
                    amount1_out,
                } => {
                    reserve0 = reserve0 - BigInt::from(amount0_in.clone())
                        + BigInt::from(amount0_out.clone());
                    reserve1 = reserve1 - BigInt::from(amount1_in.clone())
                        + BigInt::from(amount1_out.clone());
                },
            }

            let (r0, clamped0) = clamp_to_unsigned(&reserve0);
            let (r1, clamped1) = clamp_to_unsigned(&reserve1);
            if clamped0 || clamped1 {
                clamped += usize::from(clamped0) + usize::from(clamped1);
                reserve0 = BigInt::from(r0.clone());
                reserve1 = BigInt::from(r1.clone());
            }

            points.push(PricePoint::from_snapshot(
                ReserveSnapshot::new(event.block_number, r0, r1),
                self.decimals0,
                self.decimals1,
            ));
        }

        if clamped > 0 {
            warn!(
                "Clamped {} negative reserve value(s) while replaying {} events back to block {}; \
                 the event set may be incomplete",
                clamped,
                events.len(),
                from_block
            );
        }

        let (oldest0, _) = clamp_to_unsigned(&reserve0);
        let (oldest1, _) = clamp_to_unsigned(&reserve1);
        let oldest = ReserveSnapshot::new(from_block, oldest0, oldest1);

        points.reverse();

        if let Anchor::Current(snapshot) = anchor {
            points.push(PricePoint::from_snapshot(
                snapshot.clone(),
                self.decimals0,
                self.decimals1,
            ));
        }

        Reconstruction {
            points,
            oldest,
            clamped,
        }
    }
}
