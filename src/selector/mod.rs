pub mod best_stable;

pub use best_stable::{BestStableSelector, SelectionChange, StableQuote, StableSelection};
