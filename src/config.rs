//! Configuration module for the stream client
//!
//! Values are layered: built-in defaults, then an optional
//! `exchange-stream.toml`, then `STREAM_*` environment variables
//! (a `.env` file is loaded first if present).

use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, StreamError};
use crate::request::{MarketDataFilter, MarketFilter, OrderFilter};

const DEFAULT_CONFIG_FILE: &str = "exchange-stream";
const ENV_PREFIX: &str = "STREAM";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stream API host
    pub host: String,
    pub port: u16,

    /// Application key and session token used for authentication
    pub app_key: String,
    pub session_token: String,

    /// Socket read timeout; the read loop fails with a timeout error after this
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,

    /// Initial capacity of the receive buffer
    pub buffer_size: usize,

    /// Latency above which a warning is logged for each update
    pub max_latency_secs: f64,

    /// Emit raw JSON documents instead of typed resources
    pub lightweight: bool,

    /// How long closed markets stay cached (feed time)
    pub max_cache_age_secs: u64,

    /// Subscription tuning
    pub conflate_ms: Option<u64>,
    pub heartbeat_ms: Option<u64>,
    pub segmentation_enabled: bool,

    /// Market filter
    #[serde(deserialize_with = "deserialize_list")]
    pub market_ids: Vec<String>,
    #[serde(deserialize_with = "deserialize_list")]
    pub event_type_ids: Vec<String>,
    #[serde(deserialize_with = "deserialize_list")]
    pub country_codes: Vec<String>,
    #[serde(deserialize_with = "deserialize_list")]
    pub market_types: Vec<String>,

    /// Market data filter
    #[serde(deserialize_with = "deserialize_list")]
    pub data_fields: Vec<String>,
    pub ladder_levels: Option<u32>,

    /// Extra subscriptions started alongside the market subscription
    pub subscribe_orders: bool,
    pub subscribe_races: bool,

    /// Reconnection settings
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,

    /// Health/metrics HTTP port
    pub health_port: u16,

    /// Logging
    pub log_level: String,
    pub log_format: String,
}

impl Config {
    /// Load configuration from the default file (if any) and environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(None)
    }

    /// Load configuration from an explicit file, falling back to the default name
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: Config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(StreamError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(StreamError::Config("port must not be zero".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(StreamError::Config("timeout_secs must not be zero".to_string()));
        }
        if !(self.max_latency_secs >= 0.0) {
            return Err(StreamError::Config(format!(
                "max_latency_secs must be non-negative, got {}",
                self.max_latency_secs
            )));
        }
        if self.reconnect_delay_ms > self.max_reconnect_delay_ms {
            return Err(StreamError::Config(
                "reconnect_delay_ms exceeds max_reconnect_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_secs_f64(self.max_latency_secs)
    }

    /// Retention window for closed caches, in feed milliseconds
    pub fn max_cache_age_ms(&self) -> u64 {
        self.max_cache_age_secs.saturating_mul(1000)
    }

    pub fn market_filter(&self) -> MarketFilter {
        MarketFilter {
            market_ids: self.market_ids.clone(),
            event_type_ids: self.event_type_ids.clone(),
            country_codes: self.country_codes.clone(),
            market_types: self.market_types.clone(),
            ..MarketFilter::default()
        }
    }

    pub fn market_data_filter(&self) -> MarketDataFilter {
        MarketDataFilter {
            fields: self.data_fields.clone(),
            ladder_levels: self.ladder_levels,
        }
    }

    pub fn order_filter(&self) -> OrderFilter {
        OrderFilter::default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "stream-api.betfair.com".to_string(),
            port: 443,
            app_key: String::new(),
            session_token: String::new(),
            timeout_secs: 64,
            connect_timeout_secs: 15,
            buffer_size: 1024,
            max_latency_secs: 0.5,
            lightweight: false,
            max_cache_age_secs: 8 * 60 * 60,
            conflate_ms: None,
            heartbeat_ms: None,
            segmentation_enabled: true,
            market_ids: Vec::new(),
            event_type_ids: Vec::new(),
            country_codes: Vec::new(),
            market_types: Vec::new(),
            data_fields: vec!["EX_BEST_OFFERS".to_string(), "EX_MARKET_DEF".to_string()],
            ladder_levels: None,
            subscribe_orders: false,
            subscribe_races: false,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 20_000,
            health_port: 9090,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

/// Accepts either a comma separated string (environment) or a list (file)
fn deserialize_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrCsv {
        List(Vec<String>),
        Csv(String),
    }

    Ok(match ListOrCsv::deserialize(deserializer)? {
        ListOrCsv::List(items) => items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        ListOrCsv::Csv(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    })
}
