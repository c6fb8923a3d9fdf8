//! Integer conversion utilities.
//!
//! Reserve math stays in arbitrary-precision integers; these helpers move
//! values between the wire type (U256), the running signed state (BigInt)
//! and the stored unsigned state (BigUint).

use alloy::primitives::U256;
use bigdecimal::BigDecimal;
use num_bigint::{BigInt, BigUint};
use once_cell::sync::Lazy;

// ============================================
// U256 Conversions
// ============================================

/// Convert alloy U256 to BigUint via little-endian bytes (no string round trip).
pub fn u256_to_biguint(value: U256) -> BigUint {
    let bytes: [u8; 32] = value.to_le_bytes();
    BigUint::from_bytes_le(&bytes)
}

// ============================================
// Signed / Unsigned
// ============================================

/// Convert a running reserve to unsigned, saturating negatives at zero.
///
/// Returns the value and whether it had to be clamped.
pub fn clamp_to_unsigned(value: &BigInt) -> (BigUint, bool) {
    match value.to_biguint() {
        Some(v) => (v, false),
        None => (BigUint::default(), true),
    }
}

// ============================================
// Internal Helpers
// ============================================

static POW10_CACHE: Lazy<[BigDecimal; 25]> =
    Lazy::new(|| std::array::from_fn(|i| BigDecimal::from(BigInt::from(10u32).pow(i as u32))));

/// Compute 10^exp as BigDecimal.
pub(crate) fn big_pow10(exp: u8) -> BigDecimal {
    if (exp as usize) < POW10_CACHE.len() {
        POW10_CACHE[exp as usize].clone()
    } else {
        BigDecimal::from(BigInt::from(10u32).pow(exp as u32))
    }
}
