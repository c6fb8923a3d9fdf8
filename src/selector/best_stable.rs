//! Fiat anchor selection for the wrapped native token.
//!
//! Several reference pools pair the native token against stable assets. The
//! one implying the highest native price wins, but an incumbent is only
//! displaced when a challenger beats it by more than `switch_threshold`
//! (relative to the challenger's price). This keeps noisy, nearly-equal
//! candidates from flapping.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::Address;
use log::info;
use parking_lot::RwLock;
use serde::Serialize;

/// Native token price implied by one reference pool this round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StableQuote {
    pub pool: Address,
    pub native_price: f64,
}

/// Currently selected anchor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StableSelection {
    pub pool: Address,
    pub price: f64,
    /// Bumped on every anchor switch, never on price updates
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionChange {
    /// No usable quote, or the incumbent was not quoted this round
    Unchanged,
    /// First usable round; no previous anchor to replace
    Selected(Address),
    /// Incumbent kept, its price refreshed
    PriceUpdated,
    /// Anchor moved to a different pool
    Switched { from: Address, to: Address },
}

#[derive(Debug, Clone, Copy)]
struct Selected {
    pool: Address,
    price: f64,
}

pub struct BestStableSelector {
    threshold: f64,
    state: RwLock<Option<Selected>>,
    generation: AtomicU64,
}

impl BestStableSelector {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            state: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> Option<StableSelection> {
        let state = *self.state.read();
        state.map(|selected| StableSelection {
            pool: selected.pool,
            price: selected.price,
            generation: self.generation(),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Fold one round of quotes into the selection.
    pub fn observe(&self, quotes: &[StableQuote]) -> SelectionChange {
        let best = quotes
            .iter()
            .filter(|q| q.native_price.is_finite() && q.native_price > 0.0)
            .max_by(|a, b| a.native_price.total_cmp(&b.native_price));

        let Some(best) = best.copied() else {
            return SelectionChange::Unchanged;
        };

        let mut state = self.state.write();

        let Some(current) = *state else {
            *state = Some(Selected {
                pool: best.pool,
                price: best.native_price,
            });
            info!(
                "Stable anchor selected: {} at {:.6}",
                best.pool, best.native_price
            );
            return SelectionChange::Selected(best.pool);
        };

        // The incumbent is judged on this round's price when it has one
        let incumbent = quotes
            .iter()
            .find(|q| q.pool == current.pool && q.native_price.is_finite() && q.native_price > 0.0)
            .map(|q| q.native_price);
        let current_price = incumbent.unwrap_or(current.price);

        if best.pool != current.pool && self.exceeds_threshold(best.native_price, current_price) {
            *state = Some(Selected {
                pool: best.pool,
                price: best.native_price,
            });
            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            info!(
                "Stable anchor switched {} -> {} ({:.6} -> {:.6}, generation {})",
                current.pool, best.pool, current_price, best.native_price, generation
            );
            return SelectionChange::Switched {
                from: current.pool,
                to: best.pool,
            };
        }

        match incumbent {
            Some(price) => {
                *state = Some(Selected {
                    pool: current.pool,
                    price,
                });
                SelectionChange::PriceUpdated
            },
            None => SelectionChange::Unchanged,
        }
    }

    /// Convert a price denominated in the native token into fiat.
    pub fn to_fiat(&self, native_denominated: f64) -> Option<f64> {
        let selected = (*self.state.read())?;
        let value = native_denominated * selected.price;
        value.is_finite().then_some(value)
    }

    fn exceeds_threshold(&self, candidate: f64, current: f64) -> bool {
        (candidate - current) / candidate > self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const DAI_POOL: Address = address!("e56043671df55de5cdf8459710433c10324de0ae");
    const USDC_POOL: Address = address!("6753560538eca67617a9ce605178f788be7e524e");
    const USDT_POOL: Address = address!("322df7921f28f1146cdf62afdac0d6bc0ab80711");

    fn quote(pool: Address, native_price: f64) -> StableQuote {
        StableQuote { pool, native_price }
    }

    #[test]
    fn test_first_selection_picks_highest_without_bumping() {
        let selector = BestStableSelector::new(0.02);
        let change = selector.observe(&[quote(DAI_POOL, 0.000040), quote(USDC_POOL, 0.000041)]);

        assert_eq!(change, SelectionChange::Selected(USDC_POOL));
        let current = selector.current().unwrap();
        assert_eq!(current.pool, USDC_POOL);
        assert_eq!(current.generation, 0);
    }

    #[test]
    fn test_hysteresis_within_threshold() {
        let selector = BestStableSelector::new(0.02);
        selector.observe(&[quote(DAI_POOL, 100.0)]);

        // (101.5 - 100) / 101.5 ~= 1.48%
        let change = selector.observe(&[quote(DAI_POOL, 100.0), quote(USDC_POOL, 101.5)]);
        assert_eq!(change, SelectionChange::PriceUpdated);
        assert_eq!(selector.current().unwrap().pool, DAI_POOL);

        // Exactly 2% still holds
        let change = selector.observe(&[quote(DAI_POOL, 98.0), quote(USDC_POOL, 100.0)]);
        assert_eq!(change, SelectionChange::PriceUpdated);
        assert_eq!(selector.generation(), 0);
    }

    #[test]
    fn test_switches_above_threshold() {
        let selector = BestStableSelector::new(0.02);
        selector.observe(&[quote(DAI_POOL, 100.0)]);

        let change = selector.observe(&[quote(DAI_POOL, 100.0), quote(USDT_POOL, 103.0)]);
        assert_eq!(
            change,
            SelectionChange::Switched {
                from: DAI_POOL,
                to: USDT_POOL
            }
        );
        let current = selector.current().unwrap();
        assert_eq!(current.pool, USDT_POOL);
        assert_eq!(current.price, 103.0);
        assert_eq!(current.generation, 1);
    }

    #[test]
    fn test_incumbent_price_refreshes_without_generation_bump() {
        let selector = BestStableSelector::new(0.02);
        selector.observe(&[quote(DAI_POOL, 100.0)]);
        selector.observe(&[quote(DAI_POOL, 95.0), quote(USDC_POOL, 96.0)]);

        let current = selector.current().unwrap();
        assert_eq!(current.pool, DAI_POOL);
        assert_eq!(current.price, 95.0);
        assert_eq!(current.generation, 0);
    }

    #[test]
    fn test_unusable_quotes_leave_state_alone() {
        let selector = BestStableSelector::new(0.02);
        assert_eq!(selector.observe(&[]), SelectionChange::Unchanged);
        assert_eq!(
            selector.observe(&[quote(DAI_POOL, f64::NAN), quote(USDC_POOL, 0.0)]),
            SelectionChange::Unchanged
        );
        assert!(selector.current().is_none());
        assert_eq!(selector.to_fiat(2.0), None);
    }

    #[test]
    fn test_missing_incumbent_compared_to_last_known_price() {
        let selector = BestStableSelector::new(0.02);
        selector.observe(&[quote(DAI_POOL, 100.0)]);

        assert_eq!(selector.observe(&[quote(USDC_POOL, 101.0)]), SelectionChange::Unchanged);
        assert_eq!(selector.current().unwrap().pool, DAI_POOL);

        assert!(matches!(
            selector.observe(&[quote(USDC_POOL, 110.0)]),
            SelectionChange::Switched { .. }
        ));
    }

    #[test]
    fn test_to_fiat() {
        let selector = BestStableSelector::new(0.02);
        selector.observe(&[quote(DAI_POOL, 0.00004)]);
        let fiat = selector.to_fiat(250_000.0).unwrap();
        assert!((fiat - 10.0).abs() < 1e-9);
    }
}
