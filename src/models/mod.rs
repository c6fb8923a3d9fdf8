pub mod event;
pub mod observation;
pub mod pool;
pub mod progress;

pub use event::{EventKind, LogKind, RawEvent};
pub use observation::{PriceObservation, PricePoint, ReserveSnapshot};
pub use pool::{Pool, Side, Token};
pub use progress::{FetchProgress, FetchStatus, ProgressTracker};
