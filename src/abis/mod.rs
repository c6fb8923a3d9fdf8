pub mod erc20;
pub mod v2;

pub use erc20::IERC20;
pub use v2::{Burn as V2Burn, IUniswapV2Pair, Mint as V2Mint, Swap as V2Swap};
