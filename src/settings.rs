use anyhow::{Context, Result};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum StringOrVec {
    String(String),
    Vec(Vec<String>),
}

impl StringOrVec {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrVec::String(value) => value
                .split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
            StringOrVec::Vec(values) => values
                .into_iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
        }
    }
}

fn ticker_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(StringOrVec::deserialize(deserializer)?.into_vec())
}

/// Exit rules. A rule whose threshold is `None` is disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitSettings {
    pub take_profit_percent: Option<f64>,
    /// Magnitude of the loss (percent of allocated margin) that closes the trade.
    pub stop_loss_percent: Option<f64>,
    pub z_min: Option<f64>,
    /// Absolute widening of the z-score beyond entry.
    pub z_max_buffer: Option<f64>,
    /// Relative widening of the z-score beyond entry, in percent.
    pub z_max_buffer_percent: Option<f64>,
    pub max_holding_hours: Option<f64>,
    pub breakeven_percent: Option<f64>,
    pub negative_z_min_profit_percent: Option<f64>,
}

impl Default for ExitSettings {
    fn default() -> Self {
        Self {
            take_profit_percent: Some(3.0),
            stop_loss_percent: Some(5.0),
            z_min: Some(0.0),
            z_max_buffer: None,
            z_max_buffer_percent: Some(30.0),
            max_holding_hours: Some(48.0),
            breakeven_percent: None,
            negative_z_min_profit_percent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AveragingSettings {
    pub enabled: bool,
    pub drawdown_threshold_percent: f64,
    /// Each subsequent averaging needs a drawdown this many times deeper.
    pub drawdown_multiplier: f64,
    pub volume_multiplier: f64,
    pub max_count: u32,
}

impl Default for AveragingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            drawdown_threshold_percent: 5.0,
            drawdown_multiplier: 1.5,
            volume_multiplier: 1.5,
            max_count: 3,
        }
    }
}

/// Process-wide trading settings, re-read on every processor invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub timeframe: String,
    pub candle_limit: usize,
    pub min_volume: f64,

    pub min_correlation: f64,
    pub max_p_value: f64,
    pub max_adf_p_value: f64,
    pub min_r_squared: f64,
    /// Minimum z-score a candidate must still show when the trade opens.
    pub min_z: f64,
    /// Only open once the z-score has fallen on each of the last
    /// `z_score_decline_candles_count` points.
    pub use_z_score_decline_filter: bool,
    pub z_score_decline_candles_count: usize,

    pub capital_long_usd: Decimal,
    pub capital_short_usd: Decimal,
    pub leverage: Decimal,
    pub fee_percent_per_trade: Decimal,

    pub exit: ExitSettings,

    /// Cap on simultaneously traded pairs.
    pub use_pairs: usize,
    pub auto_trading_enabled: bool,
    pub use_min_intersections: bool,
    pub min_intersections: u32,

    pub averaging: AveragingSettings,

    #[serde(deserialize_with = "ticker_list")]
    pub minimum_lot_blacklist: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeframe: "1H".to_string(),
            candle_limit: 300,
            min_volume: 1.0,
            min_correlation: 0.8,
            max_p_value: 0.05,
            max_adf_p_value: 0.05,
            min_r_squared: 0.7,
            min_z: 2.0,
            use_z_score_decline_filter: false,
            z_score_decline_candles_count: 4,
            capital_long_usd: dec!(50),
            capital_short_usd: dec!(50),
            leverage: dec!(3),
            fee_percent_per_trade: dec!(0.05),
            exit: ExitSettings::default(),
            use_pairs: 3,
            auto_trading_enabled: false,
            use_min_intersections: false,
            min_intersections: 10,
            averaging: AveragingSettings::default(),
            minimum_lot_blacklist: Vec::new(),
        }
    }
}

impl Settings {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).context("failed to parse settings yaml")
    }

    /// Margin both legs need at the configured capital.
    pub fn required_margin(&self) -> Decimal {
        self.capital_long_usd + self.capital_short_usd
    }

    /// Copy used for an averaging add: capital scaled, everything else kept.
    pub fn with_scaled_capital(&self, multiplier: f64) -> Self {
        let factor = Decimal::from_f64(multiplier).unwrap_or(Decimal::ONE);
        let mut scaled = self.clone();
        scaled.capital_long_usd = (self.capital_long_usd * factor).round_dp(8);
        scaled.capital_short_usd = (self.capital_short_usd * factor).round_dp(8);
        scaled
    }
}

/// Source of the current settings.
pub trait SettingsStore: Send + Sync {
    fn current(&self) -> Settings;
}

/// Settings held in memory; `update` swaps them atomically.
#[derive(Debug, Default)]
pub struct StaticSettings {
    inner: RwLock<Settings>,
}

impl StaticSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    pub fn update(&self, settings: Settings) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = settings;
        }
    }
}

impl SettingsStore for StaticSettings {
    fn current(&self) -> Settings {
        self.inner
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

struct Loaded {
    settings: Settings,
    modified: Option<SystemTime>,
}

/// YAML-backed settings, reloaded when the file's modification time changes.
/// A file that fails to parse leaves the last good settings in effect.
pub struct FileSettingsStore {
    path: PathBuf,
    state: RwLock<Loaded>,
}

impl FileSettingsStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (settings, modified) = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings {}", path.display()))?;
            let settings = Settings::from_yaml_str(&raw)
                .with_context(|| format!("invalid settings {}", path.display()))?;
            (settings, modified_at(&path))
        } else {
            log::warn!(
                "[SETTINGS] {} not found, using defaults until it appears",
                path.display()
            );
            (Settings::default(), None)
        };
        Ok(Self {
            path,
            state: RwLock::new(Loaded { settings, modified }),
        })
    }

    fn reload_if_changed(&self) {
        let modified = modified_at(&self.path);
        let unchanged = self
            .state
            .read()
            .map(|state| state.modified == modified)
            .unwrap_or(true);
        if unchanged || modified.is_none() {
            return;
        }

        let parsed = fs::read_to_string(&self.path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| Settings::from_yaml_str(&raw));
        let Ok(mut state) = self.state.write() else {
            return;
        };
        // Record the timestamp either way so a broken file is reported once.
        state.modified = modified;
        match parsed {
            Ok(settings) => {
                log::info!("[SETTINGS] reloaded {}", self.path.display());
                state.settings = settings;
            }
            Err(err) => {
                log::error!(
                    "[SETTINGS] keeping previous settings, {} is invalid: {:?}",
                    self.path.display(),
                    err
                );
            }
        }
    }
}

impl SettingsStore for FileSettingsStore {
    fn current(&self) -> Settings {
        self.reload_if_changed();
        self.state
            .read()
            .map(|state| state.settings.clone())
            .unwrap_or_default()
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
