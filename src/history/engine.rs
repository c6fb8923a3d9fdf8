//! Orchestration of fetch, replay, bucketing and storage per pool.
//!
//! Windows are aligned to bucket boundaries:
//! - the initial window starts on a bucket boundary and ends at the head
//! - `load_more` covers whole buckets ending right before the current anchor
//! - `extend_forward` starts right after the last block the series reflects
//!
//! so a prepended segment never shares a bucket with the series it extends.
//!
//! Each pool has at most one fetch in flight. The periodic refresh skips a
//! pool while a fetch holds it instead of queuing behind it.

use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use alloy::primitives::Address;
use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, info, warn};
use moka::future::Cache;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use super::{
    bucket::TimeBucketAggregator,
    reconstruct::{Anchor, Reconstruction, ReserveReconstructor},
    store::HistorySeriesStore,
};
use crate::{
    config::{HistorySettings, Settings},
    error::{HistoryError, Result},
    fetcher::{with_retry, ChunkedLogFetcher, LogSource, RetryPolicy},
    models::{
        FetchProgress, FetchStatus, Pool, PricePoint, ProgressTracker, RawEvent, ReserveSnapshot,
        Token,
    },
    selector::{BestStableSelector, SelectionChange, StableQuote},
};

/// What a periodic refresh did for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A fetch for the pool was in flight, or the head read lagged the series
    Skipped,
    /// The last bucket was updated or a new one started
    Updated,
    /// The gap to the head was wider than a bucket and got replayed
    Extended(usize),
}

/// Marks a pool as busy until dropped.
struct InFlight<'a> {
    pools: &'a Mutex<FxHashSet<Address>>,
    pool: Address,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.pools.lock().remove(&self.pool);
    }
}

pub struct HistoryEngine {
    source: Arc<dyn LogSource>,
    fetcher: ChunkedLogFetcher,
    aggregator: TimeBucketAggregator,
    store: HistorySeriesStore,
    selector: BestStableSelector,
    policy: RetryPolicy,
    history: HistorySettings,
    native_token: Address,
    stable_candidates: Vec<Address>,
    /// Pools configured for tracking; never dropped by an anchor switch
    tracked: FxHashSet<Address>,
    /// Resolved pools; pair tokens and decimals never change
    pools: Cache<Address, Pool>,
    in_flight: Mutex<FxHashSet<Address>>,
    progress: RwLock<FxHashMap<Address, ProgressTracker>>,
    clamped_reserves: AtomicU64,
}

impl HistoryEngine {
    pub fn new(source: Arc<dyn LogSource>, settings: &Settings) -> Result<Self> {
        let native_token = parse_address(&settings.stable.native_token)?;
        let stable_candidates = settings
            .stable
            .candidates
            .iter()
            .map(String::as_str)
            .map(parse_address)
            .collect::<Result<Vec<_>>>()?;
        // Invalid entries are reported and skipped by the loader
        let tracked = settings
            .pools
            .iter()
            .filter_map(|raw| Address::from_str(raw.trim()).ok())
            .collect();

        Ok(Self {
            fetcher: ChunkedLogFetcher::new(Arc::clone(&source), &settings.fetch),
            source,
            aggregator: TimeBucketAggregator::from_settings(&settings.history),
            store: HistorySeriesStore::new(),
            selector: BestStableSelector::new(settings.stable.switch_threshold),
            policy: RetryPolicy::from_settings(&settings.fetch),
            history: settings.history.clone(),
            native_token,
            stable_candidates,
            tracked,
            pools: Cache::builder().max_capacity(10_000).build(),
            in_flight: Mutex::new(FxHashSet::default()),
            progress: RwLock::new(FxHashMap::default()),
            clamped_reserves: AtomicU64::new(0),
        })
    }

    pub fn store(&self) -> &HistorySeriesStore {
        &self.store
    }

    pub fn selector(&self) -> &BestStableSelector {
        &self.selector
    }

    pub fn stable_candidates(&self) -> &[Address] {
        &self.stable_candidates
    }

    /// Negative reserve components zeroed since start-up.
    pub fn clamp_count(&self) -> u64 {
        self.clamped_reserves.load(Ordering::Relaxed)
    }

    pub fn progress(&self, pool: &Address) -> Option<FetchProgress> {
        self.progress.read().get(pool).map(ProgressTracker::snapshot)
    }

    pub fn is_fetching(&self, pool: &Address) -> bool {
        self.in_flight.lock().contains(pool)
    }

    /// Token order, decimals and native side of a pair, cached after the
    /// first successful lookup.
    pub async fn resolve_pool(&self, address: Address) -> Result<Pool> {
        self.pools
            .try_get_with(address, self.lookup_pool(address))
            .await
            .map_err(|e| {
                warn!("Pool {}: resolution failed: {:#}", address, e);
                HistoryError::UnknownPool(address)
            })
    }

    async fn lookup_pool(&self, address: Address) -> anyhow::Result<Pool> {
        let source = &self.source;
        let (token0, token1) = with_retry(&self.policy, "token0/token1", None, |_| {
            source.pair_tokens(address)
        })
        .await
        .map_err(|f| f.last_error)?;

        // Both decimals in one round trip
        let (decimals0, decimals1) = tokio::try_join!(
            with_retry(&self.policy, "decimals", None, |_| source.token_decimals(token0)),
            with_retry(&self.policy, "decimals", None, |_| source.token_decimals(token1)),
        )
        .map_err(|f| f.last_error)?;

        let pool = Pool::new(
            address,
            Token::new(token0, decimals0),
            Token::new(token1, decimals1),
            self.native_token,
        );
        debug!(
            "Pool {} resolved: token0 {} ({}), token1 {} ({}), native side {:?}",
            address, token0, decimals0, token1, decimals1, pool.native_side
        );
        Ok(pool)
    }

    /// Build a pool's series from scratch over `range`, or over the
    /// configured window ending at the head. Replaces any existing series.
    ///
    /// The start of the range is floored to a bucket boundary and the end is
    /// capped at the head. Returns the number of observations stored.
    pub async fn load_history(&self, address: Address, range: Option<(u64, u64)>) -> Result<usize> {
        let pool = self.resolve_pool(address).await?;
        let _guard = self.claim(address)?;
        let progress = self.tracker(address);

        let head = self.head().await?;
        let (from_block, to_block) = match range {
            Some((from, to)) => (self.aggregator.bucket_key(from), to.min(head)),
            None => self.initial_window(head),
        };
        if from_block > to_block {
            return Err(HistoryError::InvalidRange {
                from_block,
                to_block,
            });
        }

        info!(
            "Pool {}: loading history for blocks {}-{} ({} blocks)",
            address,
            from_block,
            to_block,
            to_block - from_block + 1
        );
        progress.begin(to_block - from_block + 1);

        let result = async {
            let fetched = self
                .fetcher
                .fetch_events(
                    address,
                    from_block,
                    to_block,
                    Some(self.fetcher.default_chunk_size()),
                    &progress,
                )
                .await?;

            progress.set_status(FetchStatus::Reconstructing);
            let anchor = Anchor::Current(fetched.anchor());
            let reconstruction = self.replay(&pool, &anchor, fetched.into_events(), from_block);
            let observations = self
                .aggregator
                .bucketize(&reconstruction.points, head, Utc::now());
            let count = observations.len();

            self.store
                .replace(address, observations, reconstruction.oldest, to_block)?;
            Ok::<_, HistoryError>(count)
        }
        .await;

        self.settle(address, &progress, "load history", result)
    }

    /// Extend a pool's series backward by one window ending right before its
    /// anchor, replaying from that anchor instead of current reserves.
    ///
    /// Returns the number of observations prepended; `0` once the series
    /// reaches the configured first block.
    pub async fn load_more(&self, address: Address) -> Result<usize> {
        let pool = self.resolve_pool(address).await?;
        let _guard = self.claim(address)?;

        let anchor = self
            .store
            .anchor(&address)
            .ok_or(HistoryError::NoHistory(address))?;
        if anchor.block_number <= self.history.first_block {
            info!(
                "Pool {}: history already reaches block {}",
                address, anchor.block_number
            );
            return Ok(0);
        }

        let to_block = anchor.block_number - 1;
        let from_block = anchor
            .block_number
            .saturating_sub(self.backfill_span())
            .max(self.aggregator.bucket_key(self.history.first_block));

        info!(
            "Pool {}: loading older history for blocks {}-{}",
            address, from_block, to_block
        );
        let progress = self.tracker(address);
        progress.begin(to_block - from_block + 1);

        let result = async {
            let head = self.head().await?;
            let batch = self
                .fetcher
                .fetch_logs(
                    address,
                    from_block,
                    to_block,
                    Some(self.fetcher.default_chunk_size()),
                    &progress,
                )
                .await?;

            progress.set_status(FetchStatus::Reconstructing);
            let reconstruction =
                self.replay(&pool, &Anchor::Boundary(anchor), batch.into_events(), from_block);
            let observations = self
                .aggregator
                .bucketize(&reconstruction.points, head, Utc::now());

            self.store
                .prepend(address, observations, reconstruction.oldest)
        }
        .await;

        self.settle(address, &progress, "load more history", result)
    }

    /// Replay everything between the series' last block and the head.
    pub async fn extend_forward(&self, address: Address) -> Result<usize> {
        let pool = self.resolve_pool(address).await?;
        let _guard = self.claim(address)?;
        let head = self.head().await?;
        self.extend_forward_claimed(&pool, head).await
    }

    async fn extend_forward_claimed(&self, pool: &Pool, head: u64) -> Result<usize> {
        let address = pool.address;
        let series = self
            .store
            .get(&address)
            .ok_or(HistoryError::NoHistory(address))?;
        if head <= series.latest_block {
            return Ok(0);
        }

        let from_block = series.latest_block + 1;
        debug!(
            "Pool {}: extending forward over blocks {}-{}",
            address, from_block, head
        );
        let progress = self.tracker(address);
        progress.begin(head - from_block + 1);

        let result = async {
            let fetched = self
                .fetcher
                .fetch_events(
                    address,
                    from_block,
                    head,
                    Some(self.fetcher.default_chunk_size()),
                    &progress,
                )
                .await?;

            progress.set_status(FetchStatus::Reconstructing);
            let anchor = Anchor::Current(fetched.anchor());
            let reconstruction = self.replay(pool, &anchor, fetched.into_events(), from_block);
            let mut observations = self
                .aggregator
                .bucketize(&reconstruction.points, head, Utc::now());

            // The first new bucket may be the series' current last bucket
            let mut added = 0;
            if observations.first().map(|o| o.bucket_key) == series.last_key() {
                let shared = observations.remove(0);
                if self.store.refresh_last(address, shared)? {
                    added += 1;
                }
            }
            added += self.store.append(address, observations, head)?;
            Ok::<_, HistoryError>(added)
        }
        .await;

        self.settle(address, &progress, "extend history", result)
    }

    /// Cheap periodic update: current reserves into the current bucket.
    ///
    /// Falls back to [`Self::extend_forward`] when the head moved more than a
    /// bucket past the series, since a single reserve read would skip the
    /// buckets in between.
    pub async fn refresh_latest(&self, address: Address) -> Result<RefreshOutcome> {
        let pool = self.resolve_pool(address).await?;
        let Ok(_guard) = self.claim(address) else {
            debug!("Pool {}: fetch in flight, skipping refresh", address);
            return Ok(RefreshOutcome::Skipped);
        };

        let series = self
            .store
            .get(&address)
            .ok_or(HistoryError::NoHistory(address))?;
        let head = self.head().await?;
        if head < series.latest_block {
            debug!(
                "Pool {}: head {} behind series block {}, skipping refresh",
                address, head, series.latest_block
            );
            return Ok(RefreshOutcome::Skipped);
        }

        if head.saturating_sub(series.latest_block) > self.aggregator.blocks_per_bucket {
            let added = self.extend_forward_claimed(&pool, head).await?;
            return Ok(RefreshOutcome::Extended(added));
        }

        let snapshot = self.fetcher.reserves_at(address, head).await?;
        let (decimals0, decimals1) = pool.decimals();
        let point = PricePoint::from_snapshot(snapshot, decimals0, decimals1);
        let observation = self.aggregator.observe(&point, head, Utc::now());

        self.store.refresh_last(address, observation)?;
        Ok(RefreshOutcome::Updated)
    }

    /// Refresh every pool that has a series, concurrently.
    ///
    /// Failures are logged and left for the next cycle. Returns the number of
    /// pools refreshed without error.
    pub async fn refresh_all(&self) -> usize {
        let pools = self.store.pools();
        let results = join_all(pools.iter().map(|pool| self.refresh_latest(*pool))).await;

        let mut ok = 0;
        for (pool, result) in pools.iter().zip(results) {
            match result {
                Ok(outcome) => {
                    debug!("Pool {}: refresh {:?}", pool, outcome);
                    ok += 1;
                },
                Err(e) if e.is_retryable() => {
                    warn!("Pool {}: refresh failed, retrying next cycle: {}", pool, e)
                },
                Err(e) => error!("Pool {}: refresh failed: {}", pool, e),
            }
        }
        ok
    }

    /// Quote every stable candidate and feed the selector. When the anchor
    /// moves, the old reference series is dropped unless the pool is tracked.
    ///
    /// The selected pool's series is loaded whenever it is missing, so a load
    /// that failed on an earlier round is retried here.
    pub async fn refresh_best_stable(&self) -> Result<SelectionChange> {
        let quotes = join_all(
            self.stable_candidates
                .iter()
                .map(|candidate| self.stable_quote(*candidate)),
        )
        .await;

        let quotes: Vec<StableQuote> = self
            .stable_candidates
            .iter()
            .zip(quotes)
            .filter_map(|(candidate, quote)| match quote {
                Ok(quote) => quote,
                Err(e) => {
                    warn!("Stable candidate {}: quote failed: {}", candidate, e);
                    None
                },
            })
            .collect();

        let change = self.selector.observe(&quotes);
        if let SelectionChange::Switched { from, .. } = change {
            if self.tracked.contains(&from) {
                debug!("Stable anchor {}: tracked pool, keeping its series", from);
            } else {
                self.store.reset(&from);
            }
        }

        if let Some(selection) = self.selector.current() {
            let pool = selection.pool;
            if !self.store.contains(&pool) && !self.is_fetching(&pool) {
                if let Err(e) = self.load_history(pool, None).await {
                    error!("Stable anchor {}: history load failed: {}", pool, e);
                }
            }
        }

        Ok(change)
    }

    /// Native price implied by one reference pool, `None` when the pool does
    /// not hold the native token or has no usable price.
    async fn stable_quote(&self, address: Address) -> Result<Option<StableQuote>> {
        let pool = self.resolve_pool(address).await?;
        let source = &self.source;

        let (reserve0, reserve1) =
            with_retry(&self.policy, "getReserves", None, |_| source.reserves(address, None))
                .await
                .map_err(|f| HistoryError::Rpc(format!("{:#}", f.last_error)))?;

        let (decimals0, decimals1) = pool.decimals();
        let snapshot = ReserveSnapshot::new(0, reserve0, reserve1);
        let (price, price_inverted) = snapshot.prices(decimals0, decimals1);

        Ok(pool
            .native_price(price, price_inverted)
            .map(|native_price| StableQuote {
                pool: address,
                native_price,
            }))
    }

    fn replay(
        &self,
        pool: &Pool,
        anchor: &Anchor,
        events: Vec<RawEvent>,
        from_block: u64,
    ) -> Reconstruction {
        let reconstruction =
            ReserveReconstructor::for_pool(pool).reconstruct(anchor, events, from_block);
        if reconstruction.clamped > 0 {
            self.clamped_reserves
                .fetch_add(reconstruction.clamped as u64, Ordering::Relaxed);
            warn!(
                "Pool {}: {} reserve value(s) clamped to zero from block {}",
                pool.address, reconstruction.clamped, from_block
            );
        }
        reconstruction
    }

    fn settle<T>(
        &self,
        address: Address,
        progress: &ProgressTracker,
        what: &str,
        result: Result<T>,
    ) -> Result<T> {
        match &result {
            Ok(_) => progress.finish(),
            Err(e) => {
                error!("Pool {}: {} failed: {}", address, what, e);
                progress.fail(e.to_string());
            },
        }
        result
    }

    fn claim(&self, pool: Address) -> Result<InFlight<'_>> {
        if !self.in_flight.lock().insert(pool) {
            return Err(HistoryError::FetchInProgress(pool));
        }
        Ok(InFlight {
            pools: &self.in_flight,
            pool,
        })
    }

    fn tracker(&self, pool: Address) -> ProgressTracker {
        self.progress.write().entry(pool).or_default().clone()
    }

    async fn head(&self) -> Result<u64> {
        let source = &self.source;
        with_retry(&self.policy, "eth_blockNumber", None, |_| source.block_number())
            .await
            .map_err(|f| HistoryError::Rpc(format!("{:#}", f.last_error)))
    }

    fn initial_window(&self, head: u64) -> (u64, u64) {
        let from = head
            .saturating_sub(self.history.blocks_to_fetch.saturating_sub(1))
            .max(self.history.first_block);
        (self.aggregator.bucket_key(from), head)
    }

    /// Backward window width, rounded up to whole buckets.
    fn backfill_span(&self) -> u64 {
        let width = self.aggregator.blocks_per_bucket;
        self.history.blocks_to_fetch.div_ceil(width).max(1) * width
    }
}

fn parse_address(raw: &str) -> Result<Address> {
    Address::from_str(raw.trim())
        .map_err(|e| HistoryError::Config(format!("invalid address {:?}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ApiSettings, FetchSettings, RefreshSettings, RpcSettings, StableSettings},
        fetcher::mock::MockSource,
        models::{LogKind, Side},
    };
    use alloy::primitives::address;
    use num_bigint::BigUint;

    const PAIR: Address = address!("e56043671df55de5cdf8459710433c10324de0ae");
    const STABLE_A: Address = address!("6753560538eca67617a9ce605178f788be7e524e");
    const STABLE_B: Address = address!("322df7921f28f1146cdf62afdac0d6bc0ab80711");
    const DAI: Address = address!("efd766ccb38eaf1dfd701853bfce31359239f305");
    const USDC: Address = address!("15d38573d2feeb82e7ad5187ab8c1d52810b1f07");
    const WPLS: Address = address!("a1077a294dde1b09bb078844df40758a5d0f9a27");

    fn settings(candidates: Vec<Address>) -> Settings {
        Settings {
            rpc: RpcSettings {
                urls: vec!["http://localhost:8545".to_string()],
                request_timeout_secs: 30,
            },
            fetch: FetchSettings {
                chunk_size: 10_000,
                min_chunk_size: 100,
                max_retries: 3,
                retry_base_delay_ms: 0,
                retry_max_delay_ms: 0,
                request_delay_ms: 0,
            },
            history: HistorySettings {
                blocks_per_bucket: 100,
                seconds_per_block: 10,
                blocks_to_fetch: 1_000,
                first_block: 7_500,
            },
            refresh: RefreshSettings::default(),
            stable: StableSettings {
                native_token: WPLS.to_string(),
                switch_threshold: 0.02,
                candidates: candidates.iter().map(ToString::to_string).collect(),
            },
            pools: vec![],
            api: ApiSettings::default(),
        }
    }

    /// Head 10 000, reserves (1000, 2000). Replayed backward:
    /// - 9950 swap: (1020, 1960)
    /// - 9500 swap: (1010, 1979)
    /// - 9050 mint: (910, 1779)
    /// - 8500 burn: (960, 1879)
    /// - 8010 mint: (900, 1759)
    fn source() -> Arc<MockSource> {
        let events = vec![
            RawEvent::mint(8_010, 60u32, 120u32),
            RawEvent::burn(8_500, 50u32, 100u32),
            RawEvent::mint(9_050, 100u32, 200u32),
            RawEvent::swap(9_500, 10u32, 0u32, 0u32, 19u32),
            RawEvent::swap(9_950, 0u32, 40u32, 20u32, 0u32),
        ];
        Arc::new(MockSource::new(10_000).with_pool(
            PAIR,
            (DAI, 18, WPLS, 18),
            (1_000, 2_000),
            events,
        ))
    }

    fn keys(engine: &HistoryEngine) -> Vec<u64> {
        engine
            .store()
            .read(&PAIR)
            .unwrap()
            .iter()
            .map(|o| o.bucket_key)
            .collect()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-12,
            "{} != {}",
            actual,
            expected
        );
    }

    fn price_at(engine: &HistoryEngine, key: u64) -> f64 {
        engine
            .store()
            .read(&PAIR)
            .unwrap()
            .iter()
            .find(|o| o.bucket_key == key)
            .unwrap()
            .price
    }

    #[tokio::test]
    async fn test_load_history_builds_bucketed_series() {
        let mock = source();
        let engine = HistoryEngine::new(mock.clone(), &settings(vec![])).unwrap();

        let count = engine.load_history(PAIR, None).await.unwrap();

        assert_eq!(count, 4);
        assert_eq!(keys(&engine), vec![9_000, 9_500, 9_900, 10_000]);
        assert_close(price_at(&engine, 9_000), 1_779.0 / 910.0);
        assert_close(price_at(&engine, 9_900), 1_960.0 / 1_020.0);
        assert_close(price_at(&engine, 10_000), 2.0);

        let anchor = engine.store().anchor(&PAIR).unwrap();
        assert_eq!(anchor.block_number, 9_000);
        assert_eq!(anchor.reserve0, BigUint::from(910u32));
        assert_eq!(anchor.reserve1, BigUint::from(1_779u32));

        let progress = engine.progress(&PAIR).unwrap();
        assert_eq!(progress.status, FetchStatus::Done);
        assert_eq!(progress.processed_events, 3);
        assert_eq!(progress.total_expected, 1_001);
        assert!(!engine.is_fetching(&PAIR));

        let pool = engine.resolve_pool(PAIR).await.unwrap();
        assert_eq!(pool.native_side, Some(Side::Token1));
    }

    #[tokio::test]
    async fn test_load_more_prepends_until_first_block() {
        let mock = source();
        let engine = HistoryEngine::new(mock.clone(), &settings(vec![])).unwrap();
        engine.load_history(PAIR, None).await.unwrap();

        // [8000, 8999]: window clipped at bucket_key(first_block) = 7500 later
        assert_eq!(engine.load_more(PAIR).await.unwrap(), 2);
        assert_eq!(keys(&engine), vec![8_000, 8_500, 9_000, 9_500, 9_900, 10_000]);
        assert_close(price_at(&engine, 8_500), 1_879.0 / 960.0);
        let anchor = engine.store().anchor(&PAIR).unwrap();
        assert_eq!(anchor.block_number, 8_000);
        assert_eq!(anchor.reserve0, BigUint::from(900u32));

        // [7500, 7999]: no events, anchor still moves
        assert_eq!(engine.load_more(PAIR).await.unwrap(), 0);
        assert_eq!(engine.store().anchor(&PAIR).unwrap().block_number, 7_500);
        assert_eq!(
            mock.successful_calls(LogKind::Mint).last(),
            Some(&(7_500, 7_999))
        );

        // Nothing older to fetch
        let calls = mock.calls.lock().len();
        assert_eq!(engine.load_more(PAIR).await.unwrap(), 0);
        assert_eq!(mock.calls.lock().len(), calls);
    }

    #[tokio::test]
    async fn test_extend_forward_and_refresh_latest() {
        let mock = source();
        let engine = HistoryEngine::new(mock.clone(), &settings(vec![])).unwrap();
        engine.load_history(PAIR, None).await.unwrap();

        // New swap at 10 120, head 10 250
        mock.events
            .lock()
            .get_mut(&PAIR)
            .unwrap()
            .push(RawEvent::swap(10_120, 5u32, 0u32, 0u32, 10u32));
        mock.reserves
            .lock()
            .insert(PAIR, (BigUint::from(1_005u32), BigUint::from(1_990u32)));
        *mock.head.lock() = 10_250;

        // Gap of 250 blocks exceeds a bucket: replayed
        assert_eq!(
            engine.refresh_latest(PAIR).await.unwrap(),
            RefreshOutcome::Extended(2)
        );
        assert_eq!(keys(&engine), vec![9_000, 9_500, 9_900, 10_000, 10_100, 10_200]);
        assert_close(price_at(&engine, 10_100), 2.0);
        assert_eq!(engine.store().get(&PAIR).unwrap().latest_block, 10_250);

        // Small gap: only the last bucket moves
        mock.reserves
            .lock()
            .insert(PAIR, (BigUint::from(1_010u32), BigUint::from(1_980u32)));
        *mock.head.lock() = 10_260;
        assert_eq!(engine.refresh_latest(PAIR).await.unwrap(), RefreshOutcome::Updated);
        assert_eq!(keys(&engine).len(), 6);
        assert_close(price_at(&engine, 10_200), 1_980.0 / 1_010.0);

        // Crossing into a new bucket appends it
        *mock.head.lock() = 10_310;
        assert_eq!(engine.refresh_latest(PAIR).await.unwrap(), RefreshOutcome::Updated);
        assert_eq!(*keys(&engine).last().unwrap(), 10_300);
    }

    #[tokio::test]
    async fn test_in_flight_guard() {
        let mock = source();
        let engine = HistoryEngine::new(mock.clone(), &settings(vec![])).unwrap();
        engine.load_history(PAIR, None).await.unwrap();

        let guard = engine.claim(PAIR).unwrap();
        assert!(engine.is_fetching(&PAIR));
        assert!(matches!(
            engine.load_history(PAIR, None).await,
            Err(HistoryError::FetchInProgress(_))
        ));
        assert!(matches!(
            engine.load_more(PAIR).await,
            Err(HistoryError::FetchInProgress(_))
        ));
        assert_eq!(engine.refresh_latest(PAIR).await.unwrap(), RefreshOutcome::Skipped);

        drop(guard);
        assert!(!engine.is_fetching(&PAIR));
        assert_eq!(engine.refresh_latest(PAIR).await.unwrap(), RefreshOutcome::Updated);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_series() {
        let mock = source();
        let engine = HistoryEngine::new(mock.clone(), &settings(vec![])).unwrap();
        engine.load_history(PAIR, None).await.unwrap();

        // Every log query fails on every attempt
        mock.fail_next_logs.store(u32::MAX, std::sync::atomic::Ordering::SeqCst);
        let err = engine.load_history(PAIR, None).await.unwrap_err();
        assert!(matches!(err, HistoryError::RetriesExhausted { .. }));

        assert_eq!(keys(&engine), vec![9_000, 9_500, 9_900, 10_000]);
        assert!(matches!(
            engine.progress(&PAIR).unwrap().status,
            FetchStatus::Failed(_)
        ));
        assert!(!engine.is_fetching(&PAIR));
    }

    #[tokio::test]
    async fn test_unknown_pool() {
        let engine = HistoryEngine::new(source(), &settings(vec![])).unwrap();
        let stranger = address!("0000000000000000000000000000000000000bad");
        assert!(matches!(
            engine.load_history(stranger, None).await,
            Err(HistoryError::UnknownPool(_))
        ));
        assert!(matches!(
            engine.load_more(PAIR).await,
            Err(HistoryError::NoHistory(_))
        ));
    }

    #[tokio::test]
    async fn test_best_stable_switch_reloads_reference_series() {
        // USDC/WPLS and WPLS/DAI: native on either side
        let mock = Arc::new(
            MockSource::new(10_000)
                .with_pool(STABLE_A, (USDC, 18, WPLS, 18), (41, 1_000_000), vec![])
                .with_pool(STABLE_B, (WPLS, 18, DAI, 18), (1_000_000, 40), vec![]),
        );
        let engine =
            HistoryEngine::new(mock.clone(), &settings(vec![STABLE_A, STABLE_B])).unwrap();

        assert_eq!(
            engine.refresh_best_stable().await.unwrap(),
            SelectionChange::Selected(STABLE_A)
        );
        assert!(engine.store().contains(&STABLE_A));
        assert_eq!(engine.selector().generation(), 0);

        // Under 1% better: held
        mock.reserves.lock().insert(
            STABLE_B,
            (BigUint::from(1_000_000_000u32), BigUint::from(41_400u32)),
        );
        assert_eq!(
            engine.refresh_best_stable().await.unwrap(),
            SelectionChange::PriceUpdated
        );

        // About 9% better: switched, old series dropped
        mock.reserves
            .lock()
            .insert(STABLE_B, (BigUint::from(1_000_000u32), BigUint::from(45u32)));
        assert_eq!(
            engine.refresh_best_stable().await.unwrap(),
            SelectionChange::Switched {
                from: STABLE_A,
                to: STABLE_B
            }
        );
        assert!(!engine.store().contains(&STABLE_A));
        assert!(engine.store().contains(&STABLE_B));
        assert_eq!(engine.selector().generation(), 1);

        let fiat = engine.selector().to_fiat(1_000_000.0).unwrap();
        assert!((fiat - 45.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_reference_load_is_retried_next_round() {
        let mock = Arc::new(MockSource::new(10_000).with_pool(
            STABLE_A,
            (USDC, 18, WPLS, 18),
            (41, 1_000_000),
            vec![],
        ));
        let engine = HistoryEngine::new(mock.clone(), &settings(vec![STABLE_A])).unwrap();

        // Quotes only read reserves; the series load needs logs
        mock.fail_next_logs.store(u32::MAX, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(
            engine.refresh_best_stable().await.unwrap(),
            SelectionChange::Selected(STABLE_A)
        );
        assert!(!engine.store().contains(&STABLE_A));

        mock.fail_next_logs.store(0, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(
            engine.refresh_best_stable().await.unwrap(),
            SelectionChange::PriceUpdated
        );
        assert!(engine.store().contains(&STABLE_A));
        assert_eq!(engine.selector().generation(), 0);

        // Present now: later rounds do not reload
        let calls = mock.calls.lock().len();
        engine.refresh_best_stable().await.unwrap();
        assert_eq!(mock.calls.lock().len(), calls);
    }

    #[tokio::test]
    async fn test_switch_keeps_tracked_series() {
        let mock = Arc::new(
            MockSource::new(10_000)
                .with_pool(STABLE_A, (USDC, 18, WPLS, 18), (41, 1_000_000), vec![])
                .with_pool(STABLE_B, (WPLS, 18, DAI, 18), (1_000_000, 40), vec![]),
        );
        let mut s = settings(vec![STABLE_A, STABLE_B]);
        s.pools = vec![STABLE_A.to_string()];
        let engine = HistoryEngine::new(mock.clone(), &s).unwrap();

        engine.refresh_best_stable().await.unwrap();
        assert!(engine.store().contains(&STABLE_A));

        mock.reserves
            .lock()
            .insert(STABLE_B, (BigUint::from(1_000_000u32), BigUint::from(45u32)));
        assert_eq!(
            engine.refresh_best_stable().await.unwrap(),
            SelectionChange::Switched {
                from: STABLE_A,
                to: STABLE_B
            }
        );
        assert!(engine.store().contains(&STABLE_A));
        assert!(engine.store().contains(&STABLE_B));
    }

    #[tokio::test]
    async fn test_refresh_skips_lagging_head() {
        let mock = source();
        let engine = HistoryEngine::new(mock.clone(), &settings(vec![])).unwrap();
        engine.load_history(PAIR, None).await.unwrap();

        *mock.head.lock() = 10_050;
        assert_eq!(engine.refresh_latest(PAIR).await.unwrap(), RefreshOutcome::Updated);
        assert_eq!(engine.store().get(&PAIR).unwrap().latest_block, 10_050);

        // A fallback endpoint a few blocks behind, still inside bucket 10 000
        mock.reserves
            .lock()
            .insert(PAIR, (BigUint::from(1_010u32), BigUint::from(1_980u32)));
        *mock.head.lock() = 10_020;

        assert_eq!(engine.refresh_latest(PAIR).await.unwrap(), RefreshOutcome::Skipped);
        assert_close(price_at(&engine, 10_000), 2.0);
        assert_eq!(engine.store().get(&PAIR).unwrap().latest_block, 10_050);
        assert_eq!(keys(&engine), vec![9_000, 9_500, 9_900, 10_000]);
    }

    #[test]
    fn test_rejects_bad_native_token() {
        let mut s = settings(vec![]);
        s.stable.native_token = "wpls".to_string();
        assert!(matches!(
            HistoryEngine::new(source(), &s),
            Err(HistoryError::Config(_))
        ));
    }
}
