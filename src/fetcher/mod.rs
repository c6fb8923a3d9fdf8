pub mod chunked;
pub mod retry;
pub mod source;

#[cfg(test)]
pub(crate) mod mock;

pub use chunked::{ChunkedLogFetcher, FetchedEvents, LogBatch};
pub use retry::{with_retry, RetryFailure, RetryPolicy};
pub use source::{LogSource, RpcLogSource};
