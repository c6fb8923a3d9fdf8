//! Chain access behind a narrow trait.
//!
//! The engine only needs five reads from a node; [`LogSource`] is the seam
//! that lets the fetcher run against alloy HTTP providers in production and
//! scripted sources in tests.

use std::{future::Future, time::Duration};

use alloy::{
    eips::BlockId,
    primitives::Address,
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{Filter, Log},
    sol_types::SolEvent,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use num_bigint::BigUint;
use url::Url;

use crate::{
    abis::{IUniswapV2Pair, V2Burn, V2Mint, V2Swap, IERC20},
    models::{EventKind, LogKind, RawEvent},
    utils::u256_to_biguint,
};

#[async_trait]
pub trait LogSource: Send + Sync {
    /// Current chain head.
    async fn block_number(&self) -> Result<u64>;

    /// Pair reserves, pinned to `block` when given.
    async fn reserves(&self, pool: Address, block: Option<u64>) -> Result<(BigUint, BigUint)>;

    /// Decoded events of one kind emitted by `pool` in `[from_block, to_block]`.
    async fn logs(
        &self,
        pool: Address,
        kind: LogKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>>;

    /// `(token0, token1)` of a pair.
    async fn pair_tokens(&self, pool: Address) -> Result<(Address, Address)>;

    async fn token_decimals(&self, token: Address) -> Result<u8>;
}

/// JSON-RPC source over one or more HTTP endpoints.
///
/// Each request goes to the first endpoint; on error or timeout the next one
/// is tried. Retrying the whole list is left to the caller.
pub struct RpcLogSource {
    providers: Vec<(String, DynProvider)>,
    request_timeout: Duration,
}

impl RpcLogSource {
    pub fn new(urls: &[String], request_timeout: Duration) -> Result<Self> {
        let providers = urls
            .iter()
            .map(|raw| {
                let url = Url::parse(raw).with_context(|| format!("Invalid RPC URL: {}", raw))?;
                let provider = DynProvider::new(ProviderBuilder::new().connect_http(url));
                Ok((raw.clone(), provider))
            })
            .collect::<Result<Vec<_>>>()?;

        if providers.is_empty() {
            return Err(anyhow!("No RPC endpoints configured"));
        }

        info!("RPC source ready with {} endpoint(s)", providers.len());

        Ok(Self {
            providers,
            request_timeout,
        })
    }

    async fn with_fallback<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for (url, provider) in &self.providers {
            match tokio::time::timeout(self.request_timeout, op(provider.clone())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    debug!("{} failed on {}: {:#}", what, url, e);
                    last_error = Some(e.context(format!("{} failed on {}", what, url)));
                },
                Err(_) => {
                    debug!("{} timed out on {}", what, url);
                    last_error = Some(anyhow!(
                        "{} timed out after {:?} on {}",
                        what,
                        self.request_timeout,
                        url
                    ));
                },
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("{} had no endpoint to run on", what)))
    }
}

#[async_trait]
impl LogSource for RpcLogSource {
    async fn block_number(&self) -> Result<u64> {
        self.with_fallback("eth_blockNumber", |provider| async move {
            provider
                .get_block_number()
                .await
                .context("eth_blockNumber failed")
        })
        .await
    }

    async fn reserves(&self, pool: Address, block: Option<u64>) -> Result<(BigUint, BigUint)> {
        self.with_fallback("getReserves", |provider| async move {
            let pair = IUniswapV2Pair::new(pool, provider);
            let call = pair.getReserves();
            let call = match block {
                Some(number) => call.block(BlockId::number(number)),
                None => call,
            };
            let reserves = call.call().await.context("getReserves call failed")?;

            Ok((
                BigUint::from(reserves.reserve0.to::<u128>()),
                BigUint::from(reserves.reserve1.to::<u128>()),
            ))
        })
        .await
    }

    async fn logs(
        &self,
        pool: Address,
        kind: LogKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>> {
        let filter = Filter::new()
            .address(pool)
            .event_signature(kind.signature_hash())
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .with_fallback("eth_getLogs", |provider| {
                let filter = filter.clone();
                async move { provider.get_logs(&filter).await.context("eth_getLogs failed") }
            })
            .await?;

        logs.iter().map(|log| decode_log(kind, log)).collect()
    }

    async fn pair_tokens(&self, pool: Address) -> Result<(Address, Address)> {
        self.with_fallback("token0/token1", |provider| async move {
            let pair = IUniswapV2Pair::new(pool, provider);
            let token0 = pair.token0();
            let token1 = pair.token1();
            let (token0, token1) = tokio::try_join!(token0.call(), token1.call())
                .context("token0/token1 call failed")?;
            Ok((token0, token1))
        })
        .await
    }

    async fn token_decimals(&self, token: Address) -> Result<u8> {
        self.with_fallback("decimals", |provider| async move {
            IERC20::new(token, provider)
                .decimals()
                .call()
                .await
                .context("decimals call failed")
        })
        .await
    }
}

fn decode_log(kind: LogKind, log: &Log) -> Result<RawEvent> {
    let block_number = log
        .block_number
        .with_context(|| format!("{} log without block number", kind.as_str()))?;
    let log_index = log.log_index.unwrap_or_default();
    let data = &log.inner.data;

    let kind = match kind {
        LogKind::Mint => {
            let event = V2Mint::decode_log_data(data).context("Malformed Mint log")?;
            EventKind::Mint {
                amount0: u256_to_biguint(event.amount0),
                amount1: u256_to_biguint(event.amount1),
            }
        },
        LogKind::Burn => {
            let event = V2Burn::decode_log_data(data).context("Malformed Burn log")?;
            EventKind::Burn {
                amount0: u256_to_biguint(event.amount0),
                amount1: u256_to_biguint(event.amount1),
            }
        },
        LogKind::Swap => {
            let event = V2Swap::decode_log_data(data).context("Malformed Swap log")?;
            EventKind::Swap {
                amount0_in: u256_to_biguint(event.amount0In),
                amount1_in: u256_to_biguint(event.amount1In),
                amount0_out: u256_to_biguint(event.amount0Out),
                amount1_out: u256_to_biguint(event.amount1Out),
            }
        },
    };

    Ok(RawEvent {
        block_number,
        log_index,
        kind,
    })
}
