use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::market_data::batch_fetcher::{BatchFetcher, FetcherConfig};
use crate::market_data::candle::{Candle, CandleSet};
use crate::ports::{CandleApi, CandleSource};
use crate::settings::Settings;

/// Candles averaged for the liquidity filter.
const VOLUME_AVERAGE_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesDefect {
    WrongLength,
    BadClose,
    NonIncreasingTimestamps,
}

/// Checks one series: exact length, finite positive closes, strictly
/// increasing timestamps.
pub fn validate_series(candles: &[Candle], expected_len: usize) -> Result<(), SeriesDefect> {
    if candles.len() != expected_len {
        return Err(SeriesDefect::WrongLength);
    }
    if candles
        .iter()
        .any(|candle| !candle.close.is_finite() || candle.close <= 0.0)
    {
        return Err(SeriesDefect::BadClose);
    }
    if candles
        .windows(2)
        .any(|pair| pair[1].timestamp <= pair[0].timestamp)
    {
        return Err(SeriesDefect::NonIncreasingTimestamps);
    }
    Ok(())
}

/// Average quote volume of the latest candles reaches `min_volume`.
fn liquid_enough(candles: &[Candle], min_volume: f64) -> bool {
    if candles.len() < VOLUME_AVERAGE_COUNT {
        return false;
    }
    let tail = &candles[candles.len() - VOLUME_AVERAGE_COUNT..];
    let average = tail.iter().map(Candle::quote_volume).sum::<f64>() / tail.len() as f64;
    average >= min_volume
}

/// Validated candle supply built on the rate-limited batch fetcher.
pub struct CandleService {
    api: Arc<dyn CandleApi>,
    fetcher: BatchFetcher,
    volume_filter: bool,
}

impl CandleService {
    pub fn new(api: Arc<dyn CandleApi>, cfg: FetcherConfig) -> Self {
        let fetcher = BatchFetcher::new(api.clone(), cfg);
        Self {
            api,
            fetcher,
            volume_filter: true,
        }
    }

    /// For sources without volume data; `min_volume` is then ignored.
    pub fn without_volume_filter(mut self) -> Self {
        self.volume_filter = false;
        self
    }

    fn validated(&self, fetched: CandleSet, settings: &Settings, volume_filter: bool) -> CandleSet {
        let mut valid = CandleSet::new();
        for (ticker, candles) in fetched.iter() {
            if let Err(defect) = validate_series(candles, settings.candle_limit) {
                log::warn!("[CANDLES] {} rejected: {:?}", ticker, defect);
                continue;
            }
            if volume_filter && !liquid_enough(candles, settings.min_volume) {
                log::debug!("[CANDLES] {} below min volume {}", ticker, settings.min_volume);
                continue;
            }
            valid.insert(ticker.to_string(), candles.to_vec());
        }
        valid
    }
}

#[async_trait]
impl CandleSource for CandleService {
    async fn universe_except(
        &self,
        settings: &Settings,
        exclude: &HashSet<String>,
    ) -> Result<CandleSet> {
        let mut tickers = self
            .api
            .list_tickers()
            .await
            .context("failed to list tickers")?;
        tickers.retain(|ticker| !exclude.contains(ticker));
        // Sorted so the ticker order handed to statistics is stable between runs.
        tickers.sort();
        tickers.dedup();

        let fetched = self
            .fetcher
            .fetch_batch(&tickers, &settings.timeframe, settings.candle_limit)
            .await;
        let valid = self.validated(fetched, settings, self.volume_filter);
        log::info!(
            "[CANDLES] {} of {} tickers usable ({} excluded)",
            valid.len(),
            tickers.len(),
            exclude.len()
        );
        Ok(valid)
    }

    async fn series_for(&self, settings: &Settings, tickers: &[String]) -> Result<CandleSet> {
        let fetched = self
            .fetcher
            .fetch_batch(tickers, &settings.timeframe, settings.candle_limit)
            .await;
        Ok(self.validated(fetched, settings, false))
    }
}
