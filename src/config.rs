//! Monitor configuration from environment variables
//!
//! Loaded once at startup (after `dotenv`) with defaults for every value except
//! the ones that must be validated.

use solana_pubkey::Pubkey;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
pub const DEFAULT_TARGET_TOKEN: &str = "9BB6NFEcjBCtnNLFko2FqVQBq8HHM13kCyYcdQbgpump";

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// HTTP JSON-RPC endpoint
    pub rpc_url: String,

    /// WebSocket endpoint for account subscriptions
    pub ws_url: String,

    /// Mint address of the tracked token
    pub target_mint: String,

    /// Path to SQLite database file
    pub db_path: String,

    /// Number of holders ranked and persisted per discovery cycle (N)
    pub discovery_target_count: usize,

    /// Number of top holders with live subscriptions (K <= N)
    pub subscription_top_k: usize,

    pub discovery_interval: Duration,
    pub reconcile_interval: Duration,

    /// Signatures inspected when a push notification fires
    pub push_lookback: usize,

    /// Signatures inspected per wallet on each reconciliation pass
    pub reconcile_lookback: usize,

    /// Wallets classified concurrently during reconciliation
    pub reconcile_concurrency: usize,

    /// Transaction fetches in flight per classified wallet
    pub fetch_concurrency: usize,

    /// Per-call timeout for ledger requests
    pub rpc_timeout: Duration,

    pub push_channel_buffer: usize,
    pub dashboard_recent_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            ws_url: derive_ws_url(DEFAULT_RPC_URL),
            target_mint: DEFAULT_TARGET_TOKEN.to_string(),
            db_path: "./data/tokenwise.db".to_string(),
            discovery_target_count: 60,
            subscription_top_k: 20,
            discovery_interval: Duration::from_secs(6 * 60 * 60),
            reconcile_interval: Duration::from_secs(5 * 60),
            push_lookback: 5,
            reconcile_lookback: 5,
            reconcile_concurrency: 4,
            fetch_concurrency: 8,
            rpc_timeout: Duration::from_millis(10_000),
            push_channel_buffer: 1_000,
            dashboard_recent_limit: 50,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `SOLANA_RPC_URL` (default: mainnet-beta)
    /// - `SOLANA_WS_URL` (default: derived from SOLANA_RPC_URL)
    /// - `TARGET_TOKEN_ADDRESS` (default: 9BB6NF...pump)
    /// - `TOKENWISE_DB_PATH` (default: ./data/tokenwise.db)
    /// - `DISCOVERY_TARGET_COUNT` (default: 60)
    /// - `SUBSCRIPTION_TOP_K` (default: 20)
    /// - `DISCOVERY_INTERVAL_SECS` (default: 21600)
    /// - `RECONCILE_INTERVAL_SECS` (default: 300)
    /// - `PUSH_LOOKBACK` / `RECONCILE_LOOKBACK` (default: 5)
    /// - `RECONCILE_CONCURRENCY` (default: 4)
    /// - `FETCH_CONCURRENCY` (default: 8)
    /// - `RPC_TIMEOUT_MS` (default: 10000)
    /// - `PUSH_CHANNEL_BUFFER` (default: 1000)
    /// - `DASHBOARD_RECENT_LIMIT` (default: 50)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let rpc_url = env::var("SOLANA_RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string());
        if !rpc_url.starts_with("http://") && !rpc_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "SOLANA_RPC_URL must start with http:// or https://".to_string(),
            ));
        }

        let ws_url = env::var("SOLANA_WS_URL").unwrap_or_else(|_| derive_ws_url(&rpc_url));
        if !ws_url.starts_with("ws://") && !ws_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "SOLANA_WS_URL must start with ws:// or wss://".to_string(),
            ));
        }

        let target_mint =
            env::var("TARGET_TOKEN_ADDRESS").unwrap_or_else(|_| DEFAULT_TARGET_TOKEN.to_string());
        if Pubkey::from_str(&target_mint).is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "TARGET_TOKEN_ADDRESS is not a valid address: {}",
                target_mint
            )));
        }

        let discovery_target_count =
            parse_var("DISCOVERY_TARGET_COUNT", defaults.discovery_target_count)?;
        if discovery_target_count == 0 {
            return Err(ConfigError::InvalidValue(
                "DISCOVERY_TARGET_COUNT must be greater than zero".to_string(),
            ));
        }

        let subscription_top_k = parse_var("SUBSCRIPTION_TOP_K", defaults.subscription_top_k)?;
        if subscription_top_k > discovery_target_count {
            log::warn!(
                "SUBSCRIPTION_TOP_K ({}) exceeds DISCOVERY_TARGET_COUNT ({}), clamping",
                subscription_top_k,
                discovery_target_count
            );
        }

        Ok(Self {
            rpc_url,
            ws_url,
            target_mint,
            db_path: env::var("TOKENWISE_DB_PATH").unwrap_or(defaults.db_path),
            discovery_target_count,
            subscription_top_k: subscription_top_k.min(discovery_target_count),
            discovery_interval: Duration::from_secs(parse_nonzero(
                "DISCOVERY_INTERVAL_SECS",
                defaults.discovery_interval.as_secs(),
            )?),
            reconcile_interval: Duration::from_secs(parse_nonzero(
                "RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval.as_secs(),
            )?),
            push_lookback: parse_var("PUSH_LOOKBACK", defaults.push_lookback)?,
            reconcile_lookback: parse_var("RECONCILE_LOOKBACK", defaults.reconcile_lookback)?,
            reconcile_concurrency: parse_var(
                "RECONCILE_CONCURRENCY",
                defaults.reconcile_concurrency,
            )?
            .max(1),
            fetch_concurrency: parse_nonzero(
                "FETCH_CONCURRENCY",
                defaults.fetch_concurrency as u64,
            )? as usize,
            rpc_timeout: Duration::from_millis(parse_nonzero(
                "RPC_TIMEOUT_MS",
                defaults.rpc_timeout.as_millis() as u64,
            )?),
            push_channel_buffer: parse_var("PUSH_CHANNEL_BUFFER", defaults.push_channel_buffer)?
                .max(1),
            dashboard_recent_limit: parse_var(
                "DASHBOARD_RECENT_LIMIT",
                defaults.dashboard_recent_limit,
            )?,
        })
    }
}

/// `https://host` -> `wss://host`, `http://host` -> `ws://host`
pub fn derive_ws_url(rpc_url: &str) -> String {
    if let Some(rest) = rpc_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = rpc_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        rpc_url.to_string()
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(format!("{} could not be parsed: {}", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_nonzero(name: &str, default: u64) -> Result<u64, ConfigError> {
    let value = parse_var(name, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!("{} must be greater than zero", name)));
    }
    Ok(value)
}
