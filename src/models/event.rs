use alloy::{primitives::B256, sol_types::SolEvent};
use num_bigint::BigUint;

use crate::abis::{V2Burn, V2Mint, V2Swap};

/// The three pair events that move reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    Mint,
    Burn,
    Swap,
}

impl LogKind {
    pub fn signature_hash(self) -> B256 {
        match self {
            LogKind::Mint => V2Mint::SIGNATURE_HASH,
            LogKind::Burn => V2Burn::SIGNATURE_HASH,
            LogKind::Swap => V2Swap::SIGNATURE_HASH,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::Mint => "mint",
            LogKind::Burn => "burn",
            LogKind::Swap => "swap",
        }
    }
}

/// Raw token amounts carried by a reserve-moving event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Mint {
        amount0: BigUint,
        amount1: BigUint,
    },
    Burn {
        amount0: BigUint,
        amount1: BigUint,
    },
    Swap {
        amount0_in: BigUint,
        amount1_in: BigUint,
        amount0_out: BigUint,
        amount1_out: BigUint,
    },
}

/// A decoded pair event. Never mutated after decoding.
///
/// Ordering key is `(block_number, log_index)`. Sources that cannot provide a
/// log index report 0, in which case per-chunk arrival order decides ties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub block_number: u64,
    pub log_index: u64,
    pub kind: EventKind,
}

impl RawEvent {
    pub fn mint(block_number: u64, amount0: impl Into<BigUint>, amount1: impl Into<BigUint>) -> Self {
        Self {
            block_number,
            log_index: 0,
            kind: EventKind::Mint {
                amount0: amount0.into(),
                amount1: amount1.into(),
            },
        }
    }

    pub fn burn(block_number: u64, amount0: impl Into<BigUint>, amount1: impl Into<BigUint>) -> Self {
        Self {
            block_number,
            log_index: 0,
            kind: EventKind::Burn {
                amount0: amount0.into(),
                amount1: amount1.into(),
            },
        }
    }

    pub fn swap(
        block_number: u64,
        amount0_in: impl Into<BigUint>,
        amount1_in: impl Into<BigUint>,
        amount0_out: impl Into<BigUint>,
        amount1_out: impl Into<BigUint>,
    ) -> Self {
        Self {
            block_number,
            log_index: 0,
            kind: EventKind::Swap {
                amount0_in: amount0_in.into(),
                amount1_in: amount1_in.into(),
                amount0_out: amount0_out.into(),
                amount1_out: amount1_out.into(),
            },
        }
    }

    pub fn with_log_index(mut self, log_index: u64) -> Self {
        self.log_index = log_index;
        self
    }

    pub fn log_kind(&self) -> LogKind {
        match self.kind {
            EventKind::Mint { .. } => LogKind::Mint,
            EventKind::Burn { .. } => LogKind::Burn,
            EventKind::Swap { .. } => LogKind::Swap,
        }
    }

    pub fn sort_key(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}
