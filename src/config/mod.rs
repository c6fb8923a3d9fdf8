#[allow(clippy::module_inception)]
mod config;

pub use self::config::{
    ApiSettings, FetchSettings, HistorySettings, RefreshSettings, RpcSettings, Settings,
    StableSettings,
};
