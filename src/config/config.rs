use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// JSON-RPC endpoint configuration.
///
/// Endpoints are tried in order; later entries are only used when the
/// earlier ones fail a request.
#[derive(Debug, Deserialize, Clone)]
pub struct RpcSettings {
    pub urls: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Log query chunking, retry and throttling configuration.
///
/// - `chunk_size`: blocks per mint/burn sub-range (swaps use half of it)
/// - `min_chunk_size`: floor for the adaptive chunk shrink on retry
/// - `max_retries`: attempts per query and per whole range
/// - `retry_base_delay_ms` / `retry_max_delay_ms`: exponential backoff bounds
/// - `request_delay_ms`: pause between consecutive log queries
#[derive(Debug, Deserialize, Clone)]
pub struct FetchSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

fn default_chunk_size() -> u64 {
    100_000
}

fn default_min_chunk_size() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    16_000
}

fn default_request_delay_ms() -> u64 {
    250
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

/// Series shape configuration.
///
/// Defaults match a 10 second block time: 360 blocks per hourly bucket and
/// a 7 day initial window.
#[derive(Debug, Deserialize, Clone)]
pub struct HistorySettings {
    #[serde(default = "default_blocks_per_bucket")]
    pub blocks_per_bucket: u64,
    #[serde(default = "default_seconds_per_block")]
    pub seconds_per_block: u64,
    #[serde(default = "default_blocks_to_fetch")]
    pub blocks_to_fetch: u64,
    /// Lowest block worth querying (chain genesis for the pools of interest)
    #[serde(default = "default_first_block")]
    pub first_block: u64,
}

fn default_blocks_per_bucket() -> u64 {
    360
}

fn default_seconds_per_block() -> u64 {
    10
}

fn default_blocks_to_fetch() -> u64 {
    86_400 / 10 * 7
}

fn default_first_block() -> u64 {
    17_233_000
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            blocks_per_bucket: default_blocks_per_bucket(),
            seconds_per_block: default_seconds_per_block(),
            blocks_to_fetch: default_blocks_to_fetch(),
            first_block: default_first_block(),
        }
    }
}

/// Periodic job intervals.
#[derive(Debug, Deserialize, Clone)]
pub struct RefreshSettings {
    #[serde(default = "default_refresh_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub stable_interval_secs: u64,
}

fn default_refresh_interval_secs() -> u64 {
    60
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_refresh_interval_secs(),
            stable_interval_secs: default_refresh_interval_secs(),
        }
    }
}

/// Reference pools used to price the wrapped native token in fiat.
#[derive(Debug, Deserialize, Clone)]
pub struct StableSettings {
    pub native_token: String,
    #[serde(default = "default_switch_threshold")]
    pub switch_threshold: f64,
    #[serde(default)]
    pub candidates: Vec<String>,
}

fn default_switch_threshold() -> f64 {
    0.02
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_bind")]
    pub bind: String,
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            bind: default_api_bind(),
        }
    }
}

/// Root application configuration.
///
/// Loaded from `config.yaml` (optional) and `REWIND__*` environment
/// variables, e.g. `REWIND__FETCH__CHUNK_SIZE=50000`.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub rpc: RpcSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub history: HistorySettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    pub stable: StableSettings,
    #[serde(default)]
    pub pools: Vec<String>,
    #[serde(default)]
    pub api: ApiSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("REWIND")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("rpc.urls")
                    .with_list_parse_key("stable.candidates")
                    .with_list_parse_key("pools")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Reject values that would make chunking or bucketing degenerate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc.urls.is_empty() {
            return Err(ConfigError::Message(
                "rpc.urls must contain at least one endpoint".to_string(),
            ));
        }
        if self.fetch.chunk_size == 0 || self.fetch.min_chunk_size == 0 {
            return Err(ConfigError::Message(
                "fetch.chunk_size and fetch.min_chunk_size must be positive".to_string(),
            ));
        }
        if self.fetch.min_chunk_size > self.fetch.chunk_size {
            return Err(ConfigError::Message(format!(
                "fetch.min_chunk_size ({}) exceeds fetch.chunk_size ({})",
                self.fetch.min_chunk_size, self.fetch.chunk_size
            )));
        }
        if self.fetch.max_retries == 0 {
            return Err(ConfigError::Message(
                "fetch.max_retries must be at least 1".to_string(),
            ));
        }
        if self.history.blocks_per_bucket == 0 || self.history.blocks_to_fetch == 0 {
            return Err(ConfigError::Message(
                "history.blocks_per_bucket and history.blocks_to_fetch must be positive"
                    .to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.stable.switch_threshold) {
            return Err(ConfigError::Message(format!(
                "stable.switch_threshold must be in [0, 1), got {}",
                self.stable.switch_threshold
            )));
        }
        Ok(())
    }
}
