use config::{Config, ConfigError, File};
use serde::Deserialize;

/// PostgreSQL database connection configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    16
}

/// Node endpoints and well-known contract addresses.
#[derive(Debug, Deserialize, Clone)]
pub struct ChainSettings {
    /// Tendermint RPC base URL (block / block_results / status).
    pub rpc_url: String,
    /// Cosmos LCD base URL (bank metadata, denom owners, wasm smart queries).
    pub lcd_url: String,
    /// Primary factory contract; pools from other factories resolve through
    /// the dex catalogue.
    #[serde(default)]
    pub factory_addr: Option<String>,
    /// Router contract used for is_router attribution.
    #[serde(default)]
    pub router_addr: Option<String>,
}

/// Block pipeline configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexerSettings {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_pending_tasks")]
    pub max_pending_tasks: usize,
    #[serde(default = "default_trades_batch_max")]
    pub trades_batch_max: usize,
    #[serde(default = "default_trades_batch_wait_ms")]
    pub trades_batch_wait_ms: u64,
    /// How often to poll the node tip when caught up.
    #[serde(default = "default_tip_poll_interval")]
    pub tip_poll_interval_ms: u64,
    /// Optional override for the first height to process on an empty
    /// index_state.
    #[serde(default)]
    pub start_height: Option<i64>,
}

fn default_concurrency() -> usize {
    12
}

fn default_max_pending_tasks() -> usize {
    5000
}

fn default_trades_batch_max() -> usize {
    800
}

fn default_trades_batch_wait_ms() -> u64 {
    120
}

fn default_tip_poll_interval() -> u64 {
    500
}

/// Token metadata refresh configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct MetaSettings {
    #[serde(default = "default_meta_refresh_sec")]
    pub refresh_sec: u64,
    #[serde(default)]
    pub backfill: bool,
    #[serde(default = "default_meta_backfill_batch")]
    pub backfill_batch: i64,
    #[serde(default = "default_meta_backfill_sleep_ms")]
    pub backfill_sleep_ms: u64,
    #[serde(default = "default_meta_concurrency")]
    pub concurrency: usize,
}

impl Default for MetaSettings {
    fn default() -> Self {
        Self {
            refresh_sec: default_meta_refresh_sec(),
            backfill: false,
            backfill_batch: default_meta_backfill_batch(),
            backfill_sleep_ms: default_meta_backfill_sleep_ms(),
            concurrency: default_meta_concurrency(),
        }
    }
}

fn default_meta_refresh_sec() -> u64 {
    60
}

fn default_meta_backfill_batch() -> i64 {
    250
}

fn default_meta_backfill_sleep_ms() -> u64 {
    250
}

fn default_meta_concurrency() -> usize {
    4
}

/// WebSocket broadcaster configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WsSettings {
    #[serde(default = "default_ws_bind")]
    pub bind: String,
}

impl Default for WsSettings {
    fn default() -> Self {
        Self {
            bind: default_ws_bind(),
        }
    }
}

fn default_ws_bind() -> String {
    "0.0.0.0:8081".to_string()
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup; the environment knobs below
/// override file values so deployments can retune without editing the file.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    pub chain: ChainSettings,
    pub indexer: IndexerSettings,
    #[serde(default)]
    pub meta: MetaSettings,
    #[serde(default)]
    pub ws: WsSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .build()?;

        let mut settings: Settings = s.try_deserialize()?;
        settings.apply_env_overrides();

        Ok(settings)
    }

    /// Recognized environment knobs, applied on top of the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<usize>("BLOCK_PROC_CONCURRENCY") {
            self.indexer.concurrency = v;
        }
        if let Some(v) = env_parse::<usize>("BLOCK_PROC_MAX_TASKS") {
            self.indexer.max_pending_tasks = v;
        }
        if let Some(v) = env_parse::<usize>("TRADES_BATCH_MAX") {
            self.indexer.trades_batch_max = v;
        }
        if let Some(v) = env_parse::<u64>("TRADES_BATCH_WAIT_MS") {
            self.indexer.trades_batch_wait_ms = v;
        }
        if let Some(v) = env_parse::<u64>("META_REFRESH_SEC") {
            self.meta.refresh_sec = v;
        }
        if let Some(v) = env_parse::<u8>("META_BACKFILL") {
            self.meta.backfill = v != 0;
        }
        if let Some(v) = env_parse::<i64>("META_BACKFILL_BATCH") {
            self.meta.backfill_batch = v;
        }
        if let Some(v) = env_parse::<u64>("META_BACKFILL_SLEEP_MS") {
            self.meta.backfill_sleep_ms = v;
        }
        if let Some(v) = env_parse::<usize>("META_CONCURRENCY") {
            self.meta.concurrency = v;
        }
        if let Ok(v) = std::env::var("FACTORY_ADDR") {
            if !v.is_empty() {
                self.chain.factory_addr = Some(v);
            }
        }
        if let Ok(v) = std::env::var("ROUTER_ADDR") {
            if !v.is_empty() {
                self.chain.router_addr = Some(v);
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
