use anyhow::{anyhow, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration, Instant};

use crate::market_data::candle::{Candle, CandleSet};
use crate::ports::CandleApi;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_BATCH_PAUSE_MS: u64 = 200;
pub const DEFAULT_FETCH_POOL_SIZE: usize = 5;

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub pool_size: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: Duration::from_millis(DEFAULT_BATCH_PAUSE_MS),
            pool_size: DEFAULT_FETCH_POOL_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub requested: usize,
    pub batches: usize,
    pub kept: usize,
    /// Series shorter than the candle limit, dropped.
    pub short: usize,
    pub failed: usize,
}

/// Fetches candle series for many tickers against a rate-limited API.
///
/// Tickers are split into fixed-size batches processed one after another
/// with a pause in between. Inside a batch every ticker is requested
/// concurrently on a bounded pool. Request spacing belongs to the API handed
/// in, usually a [`RateLimitedCandleApi`] sharing its limiter with price
/// polling. The result preserves the order of `tickers`.
///
/// [`RateLimitedCandleApi`]: crate::ports::rate_limited_candle_api::RateLimitedCandleApi
pub struct BatchFetcher {
    api: Arc<dyn CandleApi>,
    pool: Arc<Semaphore>,
    cfg: FetcherConfig,
}

impl BatchFetcher {
    pub fn new(api: Arc<dyn CandleApi>, cfg: FetcherConfig) -> Self {
        Self {
            api,
            pool: Arc::new(Semaphore::new(cfg.pool_size.max(1))),
            cfg,
        }
    }

    pub async fn fetch_batch(
        &self,
        tickers: &[String],
        timeframe: &str,
        candle_limit: usize,
    ) -> CandleSet {
        self.fetch_batch_report(tickers, timeframe, candle_limit)
            .await
            .0
    }

    pub async fn fetch_batch_report(
        &self,
        tickers: &[String],
        timeframe: &str,
        candle_limit: usize,
    ) -> (CandleSet, FetchStats) {
        let started = Instant::now();
        let batches: Vec<&[String]> = tickers.chunks(self.cfg.batch_size.max(1)).collect();
        let mut stats = FetchStats {
            requested: tickers.len(),
            ..FetchStats::default()
        };
        let mut result = CandleSet::new();

        log::debug!(
            "[FETCH] {} tickers in {} batches of {} (pool {})",
            tickers.len(),
            batches.len(),
            self.cfg.batch_size,
            self.cfg.pool_size
        );

        for (index, batch) in batches.iter().enumerate() {
            stats.batches += 1;
            let responses = join_all(
                batch
                    .iter()
                    .map(|ticker| self.fetch_one(ticker, timeframe, candle_limit)),
            )
            .await;

            for (ticker, response) in batch.iter().zip(responses) {
                match response {
                    Ok(candles) if candles.len() >= candle_limit => {
                        let skip = candles.len() - candle_limit;
                        result.insert(ticker.clone(), candles.into_iter().skip(skip).collect());
                        stats.kept += 1;
                    }
                    Ok(candles) => {
                        log::debug!(
                            "[FETCH] {} returned {} of {} candles, dropped",
                            ticker,
                            candles.len(),
                            candle_limit
                        );
                        stats.short += 1;
                    }
                    Err(err) => {
                        log::warn!("[FETCH] {} failed: {:#}", ticker, err);
                        stats.failed += 1;
                    }
                }
            }

            if index + 1 < batches.len() {
                sleep(self.cfg.batch_pause).await;
            }
        }

        log::info!(
            "[FETCH] kept {}/{} series (short={} failed={}) in {:.2}s",
            stats.kept,
            stats.requested,
            stats.short,
            stats.failed,
            started.elapsed().as_secs_f64()
        );
        (result, stats)
    }

    async fn fetch_one(&self, ticker: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>> {
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| anyhow!("fetch pool closed"))?;
        self.api.fetch_candles(ticker, timeframe, limit).await
    }
}
