use alloy::primitives::Address;
use serde::Serialize;

/// Which side of a pair a token occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Token0,
    Token1,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub address: Address,
    pub decimals: u8,
}

impl Token {
    pub fn new(address: Address, decimals: u8) -> Self {
        Self { address, decimals }
    }
}

/// Constant-product pair identity.
///
/// Immutable once resolved: token order and decimals never change for a
/// deployed pair, so a resolved `Pool` can be cached for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pool {
    pub address: Address,
    pub token0: Token,
    pub token1: Token,
    /// Side holding the chain's wrapped native token, if any
    pub native_side: Option<Side>,
}

impl Pool {
    pub fn new(address: Address, token0: Token, token1: Token, native_token: Address) -> Self {
        let native_side = if token0.address == native_token {
            Some(Side::Token0)
        } else if token1.address == native_token {
            Some(Side::Token1)
        } else {
            None
        };

        Self {
            address,
            token0,
            token1,
            native_side,
        }
    }

    pub fn decimals(&self) -> (u8, u8) {
        (self.token0.decimals, self.token1.decimals)
    }

    /// Price of the wrapped native token in units of the other token.
    ///
    /// `price` is token1 per token0, `price_inverted` token0 per token1:
    /// - native is token0: the other side per native = `price`
    /// - native is token1: the other side per native = `price_inverted`
    ///
    /// Returns `None` for pools without the native token or a non-positive price.
    pub fn native_price(&self, price: f64, price_inverted: f64) -> Option<f64> {
        let value = match self.native_side? {
            Side::Token0 => price,
            Side::Token1 => price_inverted,
        };

        if value > 0.0 && value.is_finite() {
            Some(value)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const WPLS: Address = address!("a1077a294dde1b09bb078844df40758a5d0f9a27");
    const DAI: Address = address!("efd766ccb38eaf1dfd701853bfce31359239f305");

    #[test]
    fn test_native_side_detection() {
        let pool = Pool::new(Address::ZERO, Token::new(DAI, 18), Token::new(WPLS, 18), WPLS);
        assert_eq!(pool.native_side, Some(Side::Token1));

        let pool = Pool::new(Address::ZERO, Token::new(WPLS, 18), Token::new(DAI, 18), WPLS);
        assert_eq!(pool.native_side, Some(Side::Token0));

        let pool = Pool::new(Address::ZERO, Token::new(DAI, 18), Token::new(DAI, 18), WPLS);
        assert_eq!(pool.native_side, None);
    }

    #[test]
    fn test_native_price_uses_matching_orientation() {
        // DAI/WPLS: price = WPLS per DAI, inverted = DAI per WPLS
        let pool = Pool::new(Address::ZERO, Token::new(DAI, 18), Token::new(WPLS, 18), WPLS);
        assert_eq!(pool.native_price(25_000.0, 0.00004), Some(0.00004));
        assert_eq!(pool.native_price(25_000.0, 0.0), None);
    }
}
