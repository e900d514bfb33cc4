use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use crate::market_data::candle::Candle;
use crate::ports::CandleApi;

// One line of the JSONL market dump.
#[derive(Debug, Clone, Deserialize)]
struct DumpedTick {
    price: f64,
    #[serde(default)]
    volume: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct DumpedEntry {
    /// Epoch milliseconds.
    timestamp: i64,
    prices: HashMap<String, DumpedTick>,
}

/// Offline market data read from a JSONL dump. Each dump line is one bar for
/// every ticker it names; `tick()` advances the replay clock by one line and
/// only bars up to the cursor are visible.
#[derive(Debug)]
pub struct ReplayCandleApi {
    data: Vec<DumpedEntry>,
    cursor: AtomicUsize,
}

impl ReplayCandleApi {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open replay file {}", path.display()))?;
        let mut data = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.context("failed to read replay line")?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: DumpedEntry = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse replay entry at line {}", index + 1))?;
            data.push(entry);
        }
        Self::from_entries(data)
    }

    fn from_entries(data: Vec<DumpedEntry>) -> Result<Self> {
        if data.is_empty() {
            return Err(anyhow!("replay dump is empty"));
        }
        Ok(Self {
            data,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Starts the replay at `position` bars in, so the first fetch already
    /// sees a full lookback.
    pub fn skip_to(&self, position: usize) {
        let last = self.data.len() - 1;
        self.cursor.store(position.min(last), AtomicOrdering::SeqCst);
    }

    // Advances the replay by one bar. Returns false at the end of the data.
    pub fn tick(&self) -> bool {
        let current = self.cursor.load(AtomicOrdering::SeqCst);
        if current < self.data.len() - 1 {
            self.cursor.fetch_add(1, AtomicOrdering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn current_timestamp_ms(&self) -> Option<i64> {
        let cursor = self.cursor.load(AtomicOrdering::SeqCst);
        self.data.get(cursor).map(|entry| entry.timestamp)
    }

    /// False when the dump carries no volumes at all, in which case every
    /// replayed candle reports zero volume.
    pub fn has_volume(&self) -> bool {
        self.data
            .iter()
            .any(|entry| entry.prices.values().any(|tick| tick.volume > 0.0))
    }

    fn visible(&self) -> &[DumpedEntry] {
        let cursor = self.cursor.load(AtomicOrdering::SeqCst);
        &self.data[..=cursor.min(self.data.len() - 1)]
    }
}

#[async_trait]
impl CandleApi for ReplayCandleApi {
    async fn list_tickers(&self) -> Result<Vec<String>> {
        let current = self
            .visible()
            .last()
            .ok_or_else(|| anyhow!("cursor out of bounds"))?;
        let mut tickers: Vec<String> = current.prices.keys().cloned().collect();
        tickers.sort();
        Ok(tickers)
    }

    async fn fetch_candle_page(
        &self,
        ticker: &str,
        _timeframe: &str,
        limit: usize,
        before: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let candles: Vec<Candle> = self
            .visible()
            .iter()
            .filter(|entry| before.map_or(true, |before| entry.timestamp < before))
            .filter_map(|entry| {
                entry.prices.get(ticker).map(|tick| Candle {
                    timestamp: entry.timestamp,
                    open: tick.price,
                    high: tick.price,
                    low: tick.price,
                    close: tick.price,
                    volume: tick.volume,
                })
            })
            .collect();
        if candles.is_empty() {
            return Err(anyhow!("ticker '{}' not found in replay data", ticker));
        }
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn last_price(&self, ticker: &str) -> Result<Decimal> {
        let cursor = self.cursor.load(AtomicOrdering::SeqCst);
        let tick = self
            .visible()
            .last()
            .and_then(|entry| entry.prices.get(ticker))
            .ok_or_else(|| {
                anyhow!(
                    "ticker '{}' not found in replay entry at cursor {}",
                    ticker,
                    cursor
                )
            })?;
        Decimal::from_f64(tick.price).ok_or_else(|| anyhow!("bad price {}", tick.price))
    }
}
