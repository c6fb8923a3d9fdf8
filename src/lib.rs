pub mod abis;
pub mod api;
pub mod config;
pub mod cron;
pub mod error;
pub mod fetcher;
pub mod history;
pub mod models;
pub mod selector;
pub mod utils;

pub use config::Settings;
pub use cron::CronScheduler;
pub use error::HistoryError;
pub use fetcher::{ChunkedLogFetcher, LogSource, RpcLogSource};
pub use history::{HistoryEngine, HistorySeriesStore, ReserveReconstructor, TimeBucketAggregator};
pub use selector::BestStableSelector;
