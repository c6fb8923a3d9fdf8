//! Scripted in-memory [`LogSource`] for unit tests.

use std::sync::atomic::{AtomicU32, Ordering};

use alloy::primitives::Address;
use anyhow::{bail, Result};
use async_trait::async_trait;
use num_bigint::BigUint;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::LogSource;
use crate::models::{LogKind, RawEvent};

pub(crate) struct MockSource {
    pub head: Mutex<u64>,
    pub reserves: Mutex<FxHashMap<Address, (BigUint, BigUint)>>,
    pub events: Mutex<FxHashMap<Address, Vec<RawEvent>>>,
    pub tokens: FxHashMap<Address, (Address, Address)>,
    pub decimals: FxHashMap<Address, u8>,
    /// Log queries spanning more blocks than this fail
    pub max_span: Option<u64>,
    /// Number of upcoming log queries that fail regardless of span
    pub fail_next_logs: AtomicU32,
    pub fail_reserves: bool,
    /// Every log query as (kind, from, to, succeeded)
    pub calls: Mutex<Vec<(LogKind, u64, u64, bool)>>,
}

impl MockSource {
    pub fn new(head: u64) -> Self {
        Self {
            head: Mutex::new(head),
            reserves: Mutex::new(FxHashMap::default()),
            events: Mutex::new(FxHashMap::default()),
            tokens: FxHashMap::default(),
            decimals: FxHashMap::default(),
            max_span: None,
            fail_next_logs: AtomicU32::new(0),
            fail_reserves: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_pool(
        mut self,
        pool: Address,
        tokens: (Address, u8, Address, u8),
        reserves: (u128, u128),
        events: Vec<RawEvent>,
    ) -> Self {
        self.tokens.insert(pool, (tokens.0, tokens.2));
        self.decimals.insert(tokens.0, tokens.1);
        self.decimals.insert(tokens.2, tokens.3);
        self.reserves
            .lock()
            .insert(pool, (BigUint::from(reserves.0), BigUint::from(reserves.1)));
        self.events.lock().insert(pool, events);
        self
    }

    pub fn successful_calls(&self, kind: LogKind) -> Vec<(u64, u64)> {
        self.calls
            .lock()
            .iter()
            .filter(|(k, _, _, ok)| *k == kind && *ok)
            .map(|(_, from, to, _)| (*from, *to))
            .collect()
    }
}

#[async_trait]
impl LogSource for MockSource {
    async fn block_number(&self) -> Result<u64> {
        Ok(*self.head.lock())
    }

    async fn reserves(&self, pool: Address, _block: Option<u64>) -> Result<(BigUint, BigUint)> {
        if self.fail_reserves {
            bail!("execution reverted");
        }
        match self.reserves.lock().get(&pool) {
            Some(reserves) => Ok(reserves.clone()),
            None => bail!("no contract at {}", pool),
        }
    }

    async fn logs(
        &self,
        pool: Address,
        kind: LogKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>> {
        let forced = self
            .fail_next_logs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let too_wide = self
            .max_span
            .is_some_and(|max| to_block - from_block + 1 > max);

        let ok = !forced && !too_wide;
        self.calls.lock().push((kind, from_block, to_block, ok));
        if !ok {
            bail!("query returned more than 10000 results");
        }

        Ok(self
            .events
            .lock()
            .get(&pool)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| {
                        e.log_kind() == kind
                            && e.block_number >= from_block
                            && e.block_number <= to_block
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn pair_tokens(&self, pool: Address) -> Result<(Address, Address)> {
        match self.tokens.get(&pool) {
            Some(tokens) => Ok(*tokens),
            None => bail!("not a pair: {}", pool),
        }
    }

    async fn token_decimals(&self, token: Address) -> Result<u8> {
        match self.decimals.get(&token) {
            Some(decimals) => Ok(*decimals),
            None => bail!("decimals() reverted for {}", token),
        }
    }
}
