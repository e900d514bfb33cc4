//! In-crate fakes for the collaborator traits.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration, Instant};
use uuid::Uuid;

use crate::market_data::{Candle, CandleSet};
use crate::pair::{ExitReason, Pair, PairKind, TradeStatus};
use crate::ports::{
    CandleApi, CandleSource, CloseResult, ClosureCheck, OpenResult, PairRepository,
    StatisticsClient, TradingProvider,
};
use crate::position::{LegClose, LegFill};
use crate::settings::{ExitSettings, Settings, StaticSettings};
use crate::statistics::{ScoreResult, StatSnapshot};
use crate::trade::averaging::DrawdownAveraging;
use crate::trade::changes::apply_open;
use crate::trade::exit_strategy::ExitPolicy;
use crate::trade::history::TradeHistory;
use crate::trade::notify::TradeNotifier;
use crate::trade::processors::Collaborators;

const HOUR_MS: i64 = 3_600_000;

/// `n` hourly candles, all closing at `close`.
pub fn candles(n: usize, close: f64) -> Vec<Candle> {
    (0..n)
        .map(|i| Candle {
            timestamp: 1_700_000_000_000 + i as i64 * HOUR_MS,
            open: close,
            high: close,
            low: close,
            close,
            volume: 10.0,
        })
        .collect()
}

pub fn candle_set(closes: &[(&str, f64)]) -> CandleSet {
    closes
        .iter()
        .map(|(ticker, close)| (ticker.to_string(), candles(5, *close)))
        .collect()
}

/// A cointegrated score record.
pub fn score(long: &str, short: &str, z: f64) -> ScoreResult {
    ScoreResult {
        long_ticker: long.to_string(),
        short_ticker: short.to_string(),
        stats: StatSnapshot {
            z_score: z,
            correlation: 0.9,
            coint_p_value: 0.01,
            adf_p_value: 0.01,
            r_squared: 0.85,
            is_cointegrated: true,
            stable_periods: 120,
        },
        z_crossings: None,
        z_history: Vec::new(),
    }
}

/// SELECTED candidate priced at 10 (long) and 20 (short).
pub fn selected_pair(long: &str, short: &str, z: f64) -> Pair {
    let mut pair = Pair::from_score(
        &score(long, short, z),
        PairKind::Trading,
        TradeStatus::Selected,
        Utc::now(),
    )
    .unwrap();
    pair.long_entry_price = Some(dec!(10));
    pair.long_current_price = Some(dec!(10));
    pair.short_entry_price = Some(dec!(20));
    pair.short_current_price = Some(dec!(20));
    pair
}

fn fill(ticker: &str, price: Decimal) -> LegFill {
    LegFill {
        position_id: format!("{}-pos", ticker),
        ticker: ticker.to_string(),
        price,
        size: dec!(10),
        leverage: dec!(3),
        margin: dec!(50),
        fee: dec!(0.5),
    }
}

/// TRADING pair opened an hour ago: 10 units long at 10, 10 units short at 20.
pub fn trading_pair(long: &str, short: &str) -> Pair {
    let opened_at = Utc::now() - ChronoDuration::hours(1);
    let mut pair = selected_pair(long, short, 2.5);
    let result = OpenResult {
        success: true,
        long: Some(fill(long, dec!(10))),
        short: Some(fill(short, dec!(20))),
        portfolio_before: Some(dec!(10000)),
        message: None,
    };
    assert!(apply_open(&mut pair, &result, opened_at));
    pair.transition(TradeStatus::Trading, opened_at).unwrap();
    pair
}

#[derive(Default)]
struct ApiScript {
    universe: Vec<String>,
    lengths: HashMap<String, usize>,
    volumes: HashMap<String, f64>,
    failing: HashSet<String>,
}

/// Candle endpoint with scripted series and a call log.
pub struct FakeCandleApi {
    default_len: usize,
    page_cap: usize,
    delay: Duration,
    script: ApiScript,
    calls: Mutex<Vec<(String, Instant)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeCandleApi {
    pub fn new(default_len: usize) -> Self {
        Self {
            default_len,
            page_cap: usize::MAX,
            delay: Duration::ZERO,
            script: ApiScript::default(),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_page_cap(mut self, cap: usize) -> Self {
        self.page_cap = cap;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_universe(mut self, tickers: &[&str]) -> Self {
        self.script.universe = tickers.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_series_len(mut self, ticker: &str, len: usize) -> Self {
        self.script.lengths.insert(ticker.to_string(), len);
        self
    }

    pub fn with_volume(mut self, ticker: &str, volume: f64) -> Self {
        self.script.volumes.insert(ticker.to_string(), volume);
        self
    }

    pub fn failing(mut self, ticker: &str) -> Self {
        self.script.failing.insert(ticker.to_string());
        self
    }

    /// Request start times, ascending.
    pub fn call_times(&self) -> Vec<Instant> {
        let mut times: Vec<Instant> = self.calls.lock().unwrap().iter().map(|c| c.1).collect();
        times.sort();
        times
    }

    pub fn requested_tickers(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.0.clone()).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandleApi for FakeCandleApi {
    async fn list_tickers(&self) -> Result<Vec<String>> {
        Ok(self.script.universe.clone())
    }

    async fn fetch_candle_page(
        &self,
        ticker: &str,
        _timeframe: &str,
        limit: usize,
        before: Option<i64>,
    ) -> Result<Vec<Candle>> {
        self.calls
            .lock()
            .unwrap()
            .push((ticker.to_string(), Instant::now()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.script.failing.contains(ticker) {
            return Err(anyhow!("429 Too Many Requests for {}", ticker));
        }
        let len = self
            .script
            .lengths
            .get(ticker)
            .copied()
            .unwrap_or(self.default_len);
        let mut series = candles(len, 10.0);
        if let Some(volume) = self.script.volumes.get(ticker) {
            series.iter_mut().for_each(|c| c.volume = *volume);
        }
        if let Some(before) = before {
            series.retain(|c| c.timestamp < before);
        }
        let take = limit.min(self.page_cap);
        let skip = series.len().saturating_sub(take);
        Ok(series.split_off(skip))
    }

    fn max_page_size(&self) -> usize {
        self.page_cap
    }

    async fn last_price(&self, ticker: &str) -> Result<Decimal> {
        self.calls
            .lock()
            .unwrap()
            .push((ticker.to_string(), Instant::now()));
        if self.script.failing.contains(ticker) {
            return Err(anyhow!("no ticker {}", ticker));
        }
        Ok(dec!(10))
    }
}

/// Candle source serving a fixed universe.
#[derive(Default)]
pub struct FakeCandleSource {
    universe: Mutex<CandleSet>,
    exclusions: Mutex<HashSet<String>>,
}

impl FakeCandleSource {
    pub fn set_universe(&self, set: CandleSet) {
        *self.universe.lock().unwrap() = set;
    }

    pub fn last_exclusion(&self) -> HashSet<String> {
        self.exclusions.lock().unwrap().clone()
    }
}

#[async_trait]
impl CandleSource for FakeCandleSource {
    async fn universe_except(
        &self,
        _settings: &Settings,
        exclude: &HashSet<String>,
    ) -> Result<CandleSet> {
        *self.exclusions.lock().unwrap() = exclude.clone();
        let universe = self.universe.lock().unwrap();
        Ok(universe
            .iter()
            .filter(|(ticker, _)| !exclude.contains(*ticker))
            .map(|(ticker, series)| (ticker.to_string(), series.to_vec()))
            .collect())
    }

    async fn series_for(&self, _settings: &Settings, tickers: &[String]) -> Result<CandleSet> {
        let wanted: Vec<&str> = tickers.iter().map(String::as_str).collect();
        Ok(self.universe.lock().unwrap().select(&wanted))
    }
}

/// Statistics engine returning scripted scores.
#[derive(Default)]
pub struct FakeStatistics {
    scores: Mutex<Vec<ScoreResult>>,
    pair_score: Mutex<Option<ScoreResult>>,
    failure: Mutex<Option<String>>,
    score_all_calls: AtomicUsize,
    score_pair_calls: AtomicUsize,
}

impl FakeStatistics {
    pub fn set_scores(&self, scores: Vec<ScoreResult>) {
        *self.scores.lock().unwrap() = scores;
    }

    pub fn set_pair_score(&self, score: Option<ScoreResult>) {
        *self.pair_score.lock().unwrap() = score;
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn score_all_calls(&self) -> usize {
        self.score_all_calls.load(Ordering::SeqCst)
    }

    pub fn score_pair_calls(&self) -> usize {
        self.score_pair_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        match self.failure.lock().unwrap().as_ref() {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StatisticsClient for FakeStatistics {
    async fn score_all(
        &self,
        _candles: &CandleSet,
        _settings: &Settings,
        _count: usize,
    ) -> Result<Vec<ScoreResult>> {
        self.score_all_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        // Ignores `count` so callers must cap the list themselves.
        Ok(self.scores.lock().unwrap().clone())
    }

    async fn score_pair(
        &self,
        _candles: &CandleSet,
        _settings: &Settings,
    ) -> Result<Option<ScoreResult>> {
        self.score_pair_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.pair_score.lock().unwrap().clone())
    }
}

/// Trading provider that fills at the scripted prices and records every call.
pub struct FakeTrading {
    prices: Mutex<HashMap<String, Decimal>>,
    free_margin: Mutex<Decimal>,
    open_result: Mutex<Option<OpenResult>>,
    positions_closed: AtomicBool,
    closure: Mutex<ClosureCheck>,
    close_failure: Mutex<Option<String>>,
    price_failure: Mutex<Option<String>>,
    failing_tickers: Mutex<HashSet<String>>,
    price_delay: Mutex<Duration>,
    calls: Mutex<Vec<&'static str>>,
}

impl Default for FakeTrading {
    fn default() -> Self {
        Self {
            prices: Mutex::new(HashMap::new()),
            free_margin: Mutex::new(dec!(10000)),
            open_result: Mutex::new(None),
            positions_closed: AtomicBool::new(false),
            closure: Mutex::new(ClosureCheck::default()),
            close_failure: Mutex::new(None),
            price_failure: Mutex::new(None),
            failing_tickers: Mutex::new(HashSet::new()),
            price_delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTrading {
    pub fn set_prices(&self, prices: HashMap<String, Decimal>) {
        *self.prices.lock().unwrap() = prices;
    }

    pub fn set_free_margin(&self, margin: Decimal) {
        *self.free_margin.lock().unwrap() = margin;
    }

    pub fn set_open_result(&self, result: OpenResult) {
        *self.open_result.lock().unwrap() = Some(result);
    }

    pub fn set_positions_closed(&self, closed: bool) {
        self.positions_closed.store(closed, Ordering::SeqCst);
    }

    pub fn set_closure(&self, check: ClosureCheck) {
        *self.closure.lock().unwrap() = check;
    }

    pub fn fail_close(&self, message: &str) {
        *self.close_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_prices(&self, message: &str) {
        *self.price_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Price refreshes that include `ticker` fail.
    pub fn fail_prices_for(&self, ticker: &str) {
        self.failing_tickers
            .lock()
            .unwrap()
            .insert(ticker.to_string());
    }

    pub fn set_price_delay(&self, delay: Duration) {
        *self.price_delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn open_calls(&self) -> usize {
        self.count("open")
    }

    pub fn close_calls(&self) -> usize {
        self.count("close")
    }

    fn count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == name).count()
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }

    fn price_of(&self, ticker: &str, fallback: Option<Decimal>) -> Decimal {
        self.prices
            .lock()
            .unwrap()
            .get(ticker)
            .copied()
            .or(fallback)
            .unwrap_or(Decimal::ONE)
    }
}

#[async_trait]
impl TradingProvider for FakeTrading {
    async fn open(&self, pair: &Pair, settings: &Settings) -> Result<OpenResult> {
        self.record("open");
        if let Some(result) = self.open_result.lock().unwrap().clone() {
            return Ok(result);
        }
        let leg = |ticker: &str, capital: Decimal, fallback: Option<Decimal>| {
            let price = self.price_of(ticker, fallback);
            let notional = capital * settings.leverage;
            LegFill {
                position_id: format!("{}-{}", ticker, pair.averaging_count),
                ticker: ticker.to_string(),
                price,
                size: (notional / price).round_dp(8),
                leverage: settings.leverage,
                margin: capital,
                fee: notional * settings.fee_percent_per_trade / Decimal::ONE_HUNDRED,
            }
        };
        Ok(OpenResult {
            success: true,
            long: Some(leg(
                &pair.long_ticker,
                settings.capital_long_usd,
                pair.long_current_price,
            )),
            short: Some(leg(
                &pair.short_ticker,
                settings.capital_short_usd,
                pair.short_current_price,
            )),
            portfolio_before: Some(*self.free_margin.lock().unwrap()),
            message: None,
        })
    }

    async fn close(&self, pair: &Pair) -> Result<CloseResult> {
        self.record("close");
        if let Some(message) = self.close_failure.lock().unwrap().clone() {
            return Ok(CloseResult {
                success: false,
                message: Some(message),
                ..CloseResult::default()
            });
        }
        let close = |position: &crate::position::Position| {
            let price = self.price_of(&position.ticker, Some(position.current_price));
            LegClose {
                closing_price: price,
                gross_pnl: position.gross_pnl_at(price),
                closing_fee: dec!(0.5),
                funding_fee: Decimal::ZERO,
            }
        };
        Ok(CloseResult {
            success: true,
            long: pair.long_position.as_ref().map(&close),
            short: pair.short_position.as_ref().map(&close),
            portfolio_after: Some(*self.free_margin.lock().unwrap()),
            message: None,
        })
    }

    async fn refresh_prices(&self, tickers: &[String]) -> Result<HashMap<String, Decimal>> {
        self.record("refresh_prices");
        let delay = *self.price_delay.lock().unwrap();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        if let Some(message) = self.price_failure.lock().unwrap().clone() {
            return Err(anyhow!("{}", message));
        }
        let failing = self.failing_tickers.lock().unwrap().clone();
        if let Some(ticker) = tickers.iter().find(|t| failing.contains(*t)) {
            return Err(anyhow!("no price for {}", ticker));
        }
        let prices = self.prices.lock().unwrap();
        Ok(tickers
            .iter()
            .filter_map(|t| prices.get(t).map(|p| (t.clone(), *p)))
            .collect())
    }

    async fn is_positions_closed(&self, _pair: &Pair) -> Result<bool> {
        self.record("is_positions_closed");
        Ok(self.positions_closed.load(Ordering::SeqCst))
    }

    async fn verify_closed(&self, _pair: &Pair) -> Result<ClosureCheck> {
        self.record("verify_closed");
        Ok(self.closure.lock().unwrap().clone())
    }

    async fn free_margin(&self) -> Result<Decimal> {
        self.record("free_margin");
        Ok(*self.free_margin.lock().unwrap())
    }
}

/// In-memory repository counting writes made through the trait.
#[derive(Default)]
pub struct MemoryRepository {
    pairs: Mutex<HashMap<Uuid, Pair>>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryRepository {
    /// Seeds a pair without counting it as a save.
    pub fn insert(&self, pair: Pair) {
        self.pairs.lock().unwrap().insert(pair.id, pair);
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn all(&self) -> Vec<Pair> {
        let mut pairs: Vec<Pair> = self.pairs.lock().unwrap().values().cloned().collect();
        pairs.sort_by_key(|p| p.created_at);
        pairs
    }

    pub fn fail_writes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("database is read-only"));
        }
        Ok(())
    }
}

#[async_trait]
impl PairRepository for MemoryRepository {
    async fn save(&self, pair: &Pair) -> Result<()> {
        self.check()?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.insert(pair.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Pair>> {
        Ok(self.pairs.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_status_in(&self, statuses: &[TradeStatus]) -> Result<Vec<Pair>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|p| statuses.contains(&p.status))
            .collect())
    }

    async fn delete_by_status(&self, kind: PairKind, status: TradeStatus) -> Result<usize> {
        self.check()?;
        let mut pairs = self.pairs.lock().unwrap();
        let before = pairs.len();
        pairs.retain(|_, p| !(p.kind == kind && p.status == status));
        Ok(before - pairs.len())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TradeStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.check()?;
        let mut pairs = self.pairs.lock().unwrap();
        let Some(pair) = pairs.get_mut(&id) else {
            return Ok(false);
        };
        pair.status = status;
        pair.updated_at = at;
        Ok(true)
    }
}

/// Exit policy returning a scripted reason.
#[derive(Default)]
pub struct FixedExit {
    reason: Mutex<Option<ExitReason>>,
}

impl FixedExit {
    pub fn set(&self, reason: Option<ExitReason>) {
        *self.reason.lock().unwrap() = reason;
    }
}

impl ExitPolicy for FixedExit {
    fn exit_reason(
        &self,
        _pair: &Pair,
        _exit: &ExitSettings,
        _now: DateTime<Utc>,
    ) -> Option<ExitReason> {
        *self.reason.lock().unwrap()
    }
}

/// Every fake, wired into one set of collaborators.
pub struct Harness {
    pub settings: Arc<StaticSettings>,
    pub candles: Arc<FakeCandleSource>,
    pub statistics: Arc<FakeStatistics>,
    pub trading: Arc<FakeTrading>,
    pub repository: Arc<MemoryRepository>,
    pub exit: Arc<FixedExit>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            settings: Arc::new(StaticSettings::new(Settings::default())),
            candles: Arc::new(FakeCandleSource::default()),
            statistics: Arc::new(FakeStatistics::default()),
            trading: Arc::new(FakeTrading::default()),
            repository: Arc::new(MemoryRepository::default()),
            exit: Arc::new(FixedExit::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            settings: self.settings.clone(),
            candles: self.candles.clone(),
            statistics: self.statistics.clone(),
            trading: self.trading.clone(),
            repository: self.repository.clone(),
            exit_policy: self.exit.clone(),
            averaging: Arc::new(DrawdownAveraging),
            history: Arc::new(TradeHistory::disabled()),
            notifier: Arc::new(TradeNotifier::log_only()),
        }
    }
}
