use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::market_data::candle::Candle;
use crate::ports::CandleApi;
use crate::rate_limit_notifier::notify_rate_limit;

/// Wraps a market-data API and raises a rate-limit notice whenever the
/// upstream answers HTTP 429.
pub struct ReportingCandleApi {
    inner: Arc<dyn CandleApi>,
}

impl ReportingCandleApi {
    pub fn new(inner: Arc<dyn CandleApi>) -> Self {
        Self { inner }
    }

    fn report_rate_limit(&self, operation: &str, detail: &str, err: &anyhow::Error) {
        let err_text = format!("{:#}", err);
        if is_rate_limited(&err_text) {
            let context = format!("{} ({})", operation, detail);
            notify_rate_limit(&context, &err_text);
        }
    }
}

pub fn is_rate_limited(err_text: &str) -> bool {
    err_text.contains("429") || err_text.contains("Too Many Requests")
}

#[async_trait]
impl CandleApi for ReportingCandleApi {
    async fn list_tickers(&self) -> Result<Vec<String>> {
        let result = self.inner.list_tickers().await;
        if let Err(ref err) = result {
            self.report_rate_limit("list_tickers", "instruments", err);
        }
        result
    }

    async fn fetch_candle_page(
        &self,
        ticker: &str,
        timeframe: &str,
        limit: usize,
        before: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let result = self
            .inner
            .fetch_candle_page(ticker, timeframe, limit, before)
            .await;
        if let Err(ref err) = result {
            self.report_rate_limit(
                "fetch_candles",
                &format!("{} | bar={} | limit={}", ticker, timeframe, limit),
                err,
            );
        }
        result
    }

    async fn last_price(&self, ticker: &str) -> Result<Decimal> {
        let result = self.inner.last_price(ticker).await;
        if let Err(ref err) = result {
            self.report_rate_limit("last_price", ticker, err);
        }
        result
    }

    fn max_page_size(&self) -> usize {
        self.inner.max_page_size()
    }
}
