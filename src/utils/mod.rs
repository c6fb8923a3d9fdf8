//! Utility functions for the history engine.
//!
//! - [`conversion`] - Integer conversions (U256, BigUint, BigInt) and powers of ten
//! - [`price`] - Decimal-adjusted reserve ratios and bucket arithmetic

mod conversion;
mod price;

pub use conversion::{clamp_to_unsigned, u256_to_biguint};
pub use price::{bucket_key, reserve_ratio};
