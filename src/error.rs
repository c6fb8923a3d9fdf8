//! Error taxonomy for the history engine.
//!
//! Transient RPC failures never escape this crate directly: they are retried
//! locally and only surface as [`HistoryError::RetriesExhausted`]. Every other
//! variant describes a call that cannot produce a consistent series.

use alloy::primitives::Address;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("{what} failed for blocks {from_block}-{to_block} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        what: String,
        from_block: u64,
        to_block: u64,
        attempts: u32,
        last_error: String,
    },
    #[error("No usable reserve anchor for pool {pool}")]
    StaleAnchor { pool: Address },
    #[error("Pool {0} could not be resolved")]
    UnknownPool(Address),
    #[error("No history loaded for pool {0}")]
    NoHistory(Address),
    #[error("A fetch is already in progress for pool {0}")]
    FetchInProgress(Address),
    #[error("Segment out of order for pool {pool}: {detail}")]
    SegmentOutOfOrder { pool: Address, detail: String },
    #[error("Invalid block range {from_block}-{to_block}")]
    InvalidRange { from_block: u64, to_block: u64 },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HistoryError {
    /// Whether the next periodic cycle may reasonably retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HistoryError::Rpc(_)
                | HistoryError::RetriesExhausted { .. }
                | HistoryError::StaleAnchor { .. }
                | HistoryError::FetchInProgress(_)
        )
    }
}

pub type Result<T, E = HistoryError> = std::result::Result<T, E>;
