//! Collaborator interfaces consumed by the processors, plus the concrete
//! adapters the binary wires in.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::market_data::candle::{Candle, CandleSet};
use crate::pair::{Pair, PairKind, TradeStatus};
use crate::position::{LegClose, LegFill};
use crate::settings::Settings;
use crate::statistics::ScoreResult;

pub mod http_statistics;
pub mod json_repository;
pub mod okx_candles;
pub mod rate_limited_candle_api;
pub mod replay_candles;
pub mod reporting_candle_api;

/// Raw market-data endpoint. Every call counts against the upstream rate budget.
#[async_trait]
pub trait CandleApi: Send + Sync {
    async fn list_tickers(&self) -> Result<Vec<String>>;
    /// Up to `limit` candles strictly older than `before` (epoch ms), or the
    /// latest ones when `before` is `None`. Oldest candle first.
    async fn fetch_candle_page(
        &self,
        ticker: &str,
        timeframe: &str,
        limit: usize,
        before: Option<i64>,
    ) -> Result<Vec<Candle>>;
    async fn last_price(&self, ticker: &str) -> Result<Decimal>;

    /// Most candles the upstream serves in one request.
    fn max_page_size(&self) -> usize {
        usize::MAX
    }

    /// The latest `limit` candles, oldest first, paging back through history
    /// when `limit` exceeds one page. Stops early once the upstream runs dry.
    async fn fetch_candles(&self, ticker: &str, timeframe: &str, limit: usize)
        -> Result<Vec<Candle>> {
        let page_size = self.max_page_size().max(1);
        let mut candles: Vec<Candle> = Vec::new();
        let mut before = None;
        while candles.len() < limit {
            let wanted = (limit - candles.len()).min(page_size);
            let mut page = self
                .fetch_candle_page(ticker, timeframe, wanted, before)
                .await?;
            if let Some(oldest) = before {
                page.retain(|candle| candle.timestamp < oldest);
            }
            let Some(first) = page.first() else {
                break;
            };
            let received = page.len();
            before = Some(first.timestamp);
            page.append(&mut candles);
            candles = page;
            if received < wanted {
                break;
            }
        }
        Ok(candles)
    }
}

/// Validated candle series for the processors.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Every eligible ticker except `exclude`.
    async fn universe_except(
        &self,
        settings: &Settings,
        exclude: &HashSet<String>,
    ) -> Result<CandleSet>;
    /// The given tickers, in the given order.
    async fn series_for(&self, settings: &Settings, tickers: &[String]) -> Result<CandleSet>;
}

#[async_trait]
pub trait StatisticsClient: Send + Sync {
    /// Ranked score records for the whole candle set, at most `count`.
    async fn score_all(
        &self,
        candles: &CandleSet,
        settings: &Settings,
        count: usize,
    ) -> Result<Vec<ScoreResult>>;
    /// Score for a two-ticker candle set; `None` when the engine has no verdict.
    async fn score_pair(&self, candles: &CandleSet, settings: &Settings)
        -> Result<Option<ScoreResult>>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenResult {
    pub success: bool,
    pub long: Option<LegFill>,
    pub short: Option<LegFill>,
    pub portfolio_before: Option<Decimal>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloseResult {
    pub success: bool,
    pub long: Option<LegClose>,
    pub short: Option<LegClose>,
    pub portfolio_after: Option<Decimal>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClosureCheck {
    pub closed: bool,
    pub pnl_quote: Decimal,
    pub pnl_percent: Decimal,
}

/// Exchange-side execution. The provider owns the atomicity of a two-leg open
/// or close.
#[async_trait]
pub trait TradingProvider: Send + Sync {
    /// Opens both legs, or adds to them when the pair already holds positions.
    async fn open(&self, pair: &Pair, settings: &Settings) -> Result<OpenResult>;
    async fn close(&self, pair: &Pair) -> Result<CloseResult>;
    async fn refresh_prices(&self, tickers: &[String]) -> Result<HashMap<String, Decimal>>;
    async fn is_positions_closed(&self, pair: &Pair) -> Result<bool>;
    async fn verify_closed(&self, pair: &Pair) -> Result<ClosureCheck>;
    async fn free_margin(&self) -> Result<Decimal>;
}

#[async_trait]
pub trait PairRepository: Send + Sync {
    async fn save(&self, pair: &Pair) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Pair>>;
    async fn find_by_status_in(&self, statuses: &[TradeStatus]) -> Result<Vec<Pair>>;
    async fn delete_by_status(&self, kind: PairKind, status: TradeStatus) -> Result<usize>;
    /// Returns false when no pair has this id.
    async fn update_status(&self, id: Uuid, status: TradeStatus, at: DateTime<Utc>)
        -> Result<bool>;
}

/// Tickers committed to open trades, queried fresh on every call.
pub async fn used_tickers(repository: &dyn PairRepository) -> Result<HashSet<String>> {
    let trading = repository
        .find_by_status_in(&[TradeStatus::Trading])
        .await?;
    Ok(trading
        .into_iter()
        .flat_map(|pair| [pair.long_ticker, pair.short_ticker])
        .collect())
}
