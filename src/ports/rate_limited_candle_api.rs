use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::market_data::candle::Candle;
use crate::market_data::rate_limiter::RateLimiter;
use crate::ports::CandleApi;

/// Passes every upstream request through one shared [`RateLimiter`].
///
/// Candle pages, ticker listings and price polls all take a slot, so the
/// batch fetcher and the paper provider never crowd the same host together.
pub struct RateLimitedCandleApi {
    inner: Arc<dyn CandleApi>,
    limiter: Arc<RateLimiter>,
}

impl RateLimitedCandleApi {
    pub fn new(inner: Arc<dyn CandleApi>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl CandleApi for RateLimitedCandleApi {
    async fn list_tickers(&self) -> Result<Vec<String>> {
        self.limiter.acquire().await;
        self.inner.list_tickers().await
    }

    async fn fetch_candle_page(
        &self,
        ticker: &str,
        timeframe: &str,
        limit: usize,
        before: Option<i64>,
    ) -> Result<Vec<Candle>> {
        self.limiter.acquire().await;
        self.inner
            .fetch_candle_page(ticker, timeframe, limit, before)
            .await
    }

    async fn last_price(&self, ticker: &str) -> Result<Decimal> {
        self.limiter.acquire().await;
        self.inner.last_price(ticker).await
    }

    fn max_page_size(&self) -> usize {
        self.inner.max_page_size()
    }
}
