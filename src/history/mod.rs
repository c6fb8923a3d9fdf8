pub mod bucket;
pub mod engine;
pub mod reconstruct;
pub mod store;

pub use bucket::TimeBucketAggregator;
pub use engine::{HistoryEngine, RefreshOutcome};
pub use reconstruct::{Anchor, Reconstruction, ReserveReconstructor};
pub use store::{HistorySeries, HistorySeriesStore};
