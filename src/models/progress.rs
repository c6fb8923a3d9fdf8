use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum FetchStatus {
    #[default]
    Idle,
    Fetching,
    Reconstructing,
    Done,
    Failed(String),
}

/// Status of the current (or last) fetch for one pool.
///
/// Lets consumers tell "no data yet" (`Idle`) from "in progress" from
/// "failed" without touching the series itself.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchProgress {
    pub processed_events: usize,
    pub processed_blocks: u64,
    /// Blocks in the requested range
    pub total_expected: u64,
    pub status: FetchStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Shared handle to a pool's [`FetchProgress`], updated by the fetcher
/// while the engine and API read it.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker(Arc<RwLock<FetchProgress>>);

impl ProgressTracker {
    pub fn snapshot(&self) -> FetchProgress {
        self.0.read().clone()
    }

    /// Reset the record for a new operation over `total_expected` blocks.
    pub fn begin(&self, total_expected: u64) {
        *self.0.write() = FetchProgress {
            total_expected,
            status: FetchStatus::Fetching,
            started_at: Some(Utc::now()),
            ..Default::default()
        };
    }

    pub fn record_chunk(&self, blocks: u64, events: usize) {
        let mut progress = self.0.write();
        progress.processed_blocks = progress.processed_blocks.saturating_add(blocks);
        progress.processed_events += events;
    }

    /// Drop chunk counters after a whole-range retry so they never exceed the total.
    pub fn restart_range(&self) {
        let mut progress = self.0.write();
        progress.processed_blocks = 0;
        progress.processed_events = 0;
    }

    pub fn set_status(&self, status: FetchStatus) {
        self.0.write().status = status;
    }

    pub fn finish(&self) {
        let mut progress = self.0.write();
        progress.status = FetchStatus::Done;
        progress.ended_at = Some(Utc::now());
    }

    pub fn fail(&self, reason: impl Into<String>) {
        let mut progress = self.0.write();
        progress.status = FetchStatus::Failed(reason.into());
        progress.ended_at = Some(Utc::now());
    }
}
