use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::market_data::FetcherConfig;
use crate::ports::okx_candles::DEFAULT_OKX_ENDPOINT;

const DEFAULT_STATISTICS_ENDPOINT: &str = "http://127.0.0.1:8000";
const DEFAULT_SETTINGS_FILE: &str = "settings.yaml";
const DEFAULT_PAIRS_FILE: &str = "data/pairs.json";
const DEFAULT_TRADE_HISTORY_FILE: &str = "data/trade_history.jsonl";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAINTAIN_INTERVAL_SECS: u64 = 300;
const DEFAULT_DISCOVER_INTERVAL_SECS: u64 = 3600;
const DEFAULT_INITIAL_DELAY_SECS: u64 = 5;
const DEFAULT_UPDATE_POOL_SIZE: usize = 5;
const DEFAULT_UPDATE_DEADLINE_SECS: u64 = 7200;
const DEFAULT_FETCH_MIN_INTERVAL_MS: u64 = 120;
const DEFAULT_FETCH_BATCH_SIZE: usize = 50;
const DEFAULT_FETCH_BATCH_PAUSE_MS: u64 = 200;
const DEFAULT_FETCH_POOL_SIZE: usize = 5;
const DEFAULT_PAPER_BALANCE: u64 = 10_000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key}={value:?} is not a valid value")]
    InvalidValue { key: String, value: String },
}

/// Process settings. Unlike the trading `Settings` these are read once.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub dry_run: bool,
    pub agent_name: Option<String>,
    pub okx_endpoint: String,
    /// JSONL dump replayed instead of live market data.
    pub replay_file: Option<String>,
    pub http_timeout_secs: u64,
    pub statistics_endpoint: String,
    pub settings_file: String,
    pub pairs_file: String,
    pub trade_history_file: Option<String>,
    pub update_interval_secs: u64,
    pub maintain_interval_secs: u64,
    pub discover_interval_secs: u64,
    pub initial_delay_secs: u64,
    pub update_pool_size: usize,
    pub update_deadline_secs: u64,
    pub fetch_min_interval_ms: u64,
    pub fetch_batch_size: usize,
    pub fetch_batch_pause_ms: u64,
    pub fetch_pool_size: usize,
    pub paper_balance: Decimal,
    pub notifications_enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
struct OrchestratorYaml {
    dry_run: Option<bool>,
    agent_name: Option<String>,
    okx_endpoint: Option<String>,
    replay_file: Option<String>,
    http_timeout_secs: Option<u64>,
    statistics_endpoint: Option<String>,
    settings_file: Option<String>,
    pairs_file: Option<String>,
    trade_history_file: Option<String>,
    update_interval_secs: Option<u64>,
    maintain_interval_secs: Option<u64>,
    discover_interval_secs: Option<u64>,
    initial_delay_secs: Option<u64>,
    update_pool_size: Option<usize>,
    update_deadline_secs: Option<u64>,
    fetch_min_interval_ms: Option<u64>,
    fetch_batch_size: Option<usize>,
    fetch_batch_pause_ms: Option<u64>,
    fetch_pool_size: Option<usize>,
    paper_balance: Option<Decimal>,
    notifications_enabled: Option<bool>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_yaml(OrchestratorYaml::default())
    }
}

impl OrchestratorConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("STATARB_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty());
        if let Some(path) = config_path {
            return Self::from_yaml_path(path);
        }
        Self::from_env()
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open config {}", path_ref.display()))?;
        let yaml: OrchestratorYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse config {}", path_ref.display()))?;
        let mut cfg = Self::from_yaml(yaml);
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    fn from_yaml(yaml: OrchestratorYaml) -> Self {
        Self {
            dry_run: yaml.dry_run.unwrap_or(true),
            agent_name: yaml.agent_name.filter(|name| !name.trim().is_empty()),
            okx_endpoint: yaml
                .okx_endpoint
                .unwrap_or_else(|| DEFAULT_OKX_ENDPOINT.to_string()),
            replay_file: yaml.replay_file.filter(|file| !file.trim().is_empty()),
            http_timeout_secs: yaml.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            statistics_endpoint: yaml
                .statistics_endpoint
                .unwrap_or_else(|| DEFAULT_STATISTICS_ENDPOINT.to_string()),
            settings_file: yaml
                .settings_file
                .unwrap_or_else(|| DEFAULT_SETTINGS_FILE.to_string()),
            pairs_file: yaml
                .pairs_file
                .unwrap_or_else(|| DEFAULT_PAIRS_FILE.to_string()),
            trade_history_file: Some(
                yaml.trade_history_file
                    .unwrap_or_else(|| DEFAULT_TRADE_HISTORY_FILE.to_string()),
            )
            .filter(|file| !file.trim().is_empty()),
            update_interval_secs: yaml
                .update_interval_secs
                .unwrap_or(DEFAULT_UPDATE_INTERVAL_SECS),
            maintain_interval_secs: yaml
                .maintain_interval_secs
                .unwrap_or(DEFAULT_MAINTAIN_INTERVAL_SECS),
            discover_interval_secs: yaml
                .discover_interval_secs
                .unwrap_or(DEFAULT_DISCOVER_INTERVAL_SECS),
            initial_delay_secs: yaml.initial_delay_secs.unwrap_or(DEFAULT_INITIAL_DELAY_SECS),
            update_pool_size: yaml.update_pool_size.unwrap_or(DEFAULT_UPDATE_POOL_SIZE),
            update_deadline_secs: yaml
                .update_deadline_secs
                .unwrap_or(DEFAULT_UPDATE_DEADLINE_SECS),
            fetch_min_interval_ms: yaml
                .fetch_min_interval_ms
                .unwrap_or(DEFAULT_FETCH_MIN_INTERVAL_MS),
            fetch_batch_size: yaml.fetch_batch_size.unwrap_or(DEFAULT_FETCH_BATCH_SIZE),
            fetch_batch_pause_ms: yaml
                .fetch_batch_pause_ms
                .unwrap_or(DEFAULT_FETCH_BATCH_PAUSE_MS),
            fetch_pool_size: yaml.fetch_pool_size.unwrap_or(DEFAULT_FETCH_POOL_SIZE),
            paper_balance: yaml
                .paper_balance
                .unwrap_or_else(|| Decimal::from(DEFAULT_PAPER_BALANCE)),
            notifications_enabled: yaml.notifications_enabled.unwrap_or(false),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_flag("DRY_RUN")? {
            self.dry_run = value;
        }
        if let Some(value) = env_string("AGENT_NAME") {
            self.agent_name = Some(value);
        }
        if let Some(value) = env_string("OKX_ENDPOINT") {
            self.okx_endpoint = value;
        }
        if let Some(value) = env_string("REPLAY_FILE") {
            self.replay_file = Some(value);
        }
        if let Some(value) = env_parse("HTTP_TIMEOUT_SECS")? {
            self.http_timeout_secs = value;
        }
        if let Some(value) = env_string("STATISTICS_ENDPOINT") {
            self.statistics_endpoint = value;
        }
        if let Some(value) = env_string("SETTINGS_FILE") {
            self.settings_file = value;
        }
        if let Some(value) = env_string("PAIRS_FILE") {
            self.pairs_file = value;
        }
        if let Some(value) = env_string("TRADE_HISTORY_FILE") {
            self.trade_history_file = Some(value);
        }
        if let Some(value) = env_parse("UPDATE_INTERVAL_SECS")? {
            self.update_interval_secs = value;
        }
        if let Some(value) = env_parse("MAINTAIN_INTERVAL_SECS")? {
            self.maintain_interval_secs = value;
        }
        if let Some(value) = env_parse("DISCOVER_INTERVAL_SECS")? {
            self.discover_interval_secs = value;
        }
        if let Some(value) = env_parse("INITIAL_DELAY_SECS")? {
            self.initial_delay_secs = value;
        }
        if let Some(value) = env_parse("UPDATE_POOL_SIZE")? {
            self.update_pool_size = value;
        }
        if let Some(value) = env_parse("UPDATE_DEADLINE_SECS")? {
            self.update_deadline_secs = value;
        }
        if let Some(value) = env_parse("FETCH_MIN_INTERVAL_MS")? {
            self.fetch_min_interval_ms = value;
        }
        if let Some(value) = env_parse("FETCH_BATCH_SIZE")? {
            self.fetch_batch_size = value;
        }
        if let Some(value) = env_parse("FETCH_BATCH_PAUSE_MS")? {
            self.fetch_batch_pause_ms = value;
        }
        if let Some(value) = env_parse("FETCH_POOL_SIZE")? {
            self.fetch_pool_size = value;
        }
        if let Some(value) = env_parse("PAPER_BALANCE")? {
            self.paper_balance = value;
        }
        if let Some(value) = env_flag("NOTIFICATIONS_ENABLED")? {
            self.notifications_enabled = value;
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn update_deadline(&self) -> Duration {
        Duration::from_secs(self.update_deadline_secs)
    }

    /// Spacing between any two requests to the market-data upstream.
    pub fn fetch_min_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_min_interval_ms)
    }

    pub fn fetcher(&self) -> FetcherConfig {
        FetcherConfig {
            batch_size: self.fetch_batch_size.max(1),
            batch_pause: Duration::from_millis(self.fetch_batch_pause_ms),
            pool_size: self.fetch_pool_size.max(1),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Empty or unset variables leave the current value alone.
fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env_string(key) {
        None => Ok(None),
        Some(raw) => parse_value(key, &raw).map(Some),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn env_flag(key: &str) -> Result<Option<bool>, ConfigError> {
    env_string(key).map(|raw| parse_flag(key, &raw)).transpose()
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}
