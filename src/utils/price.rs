//! Price derivation from raw reserves.
//!
//! Reserves are only turned into floating point here, as the very last step,
//! after the decimal scaling has been applied in BigDecimal.

use bigdecimal::BigDecimal;
use num_bigint::{BigInt, BigUint};
use num_traits::{ToPrimitive, Zero};

use super::conversion::big_pow10;

/// `(numerator / 10^numerator_decimals) / (denominator / 10^denominator_decimals)`.
///
/// A zero denominator yields `0.0` rather than an error, as does any result
/// that does not fit a finite f64.
pub fn reserve_ratio(
    numerator: &BigUint,
    numerator_decimals: u8,
    denominator: &BigUint,
    denominator_decimals: u8,
) -> f64 {
    if denominator.is_zero() {
        return 0.0;
    }

    let num = BigDecimal::from(BigInt::from(numerator.clone())) / big_pow10(numerator_decimals);
    let den = BigDecimal::from(BigInt::from(denominator.clone())) / big_pow10(denominator_decimals);

    match (num / den).to_f64() {
        Some(value) if value.is_finite() => value,
        _ => 0.0,
    }
}

/// Floor a block number to the start of its bucket.
#[inline]
pub fn bucket_key(block_number: u64, blocks_per_bucket: u64) -> u64 {
    if blocks_per_bucket == 0 {
        return block_number;
    }
    block_number / blocks_per_bucket * blocks_per_bucket
}
