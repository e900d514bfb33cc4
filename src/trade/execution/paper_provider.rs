use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use lazy_static::lazy_static;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::pair::Pair;
use crate::ports::{CandleApi, CloseResult, ClosureCheck, OpenResult, TradingProvider};
use crate::position::{percent_of, LegClose, LegFill, LegType};
use crate::settings::Settings;

lazy_static! {
    static ref FILLED_PROBABILITY_IN_EMULATION: f64 = {
        match env::var("FILLED_PROBABILITY_IN_EMULATION") {
            Ok(val) => val.parse::<f64>().unwrap_or(1.0).clamp(0.0, 1.0),
            Err(_) => 1.0,
        }
    };
}

#[derive(Debug, Clone)]
struct PaperLeg {
    ticker: String,
    side: LegType,
    entry_price: Decimal,
    size: Decimal,
    margin: Decimal,
    fee_rate: Decimal,
    fees: Decimal,
}

impl PaperLeg {
    fn gross_at(&self, price: Decimal) -> Decimal {
        match self.side {
            LegType::Long => (price - self.entry_price) * self.size,
            LegType::Short => (self.entry_price - price) * self.size,
        }
    }

    fn add(&mut self, fill: &LegFill) {
        let total = self.size + fill.size;
        if total > Decimal::ZERO {
            self.entry_price = (self.entry_price * self.size + fill.price * fill.size) / total;
        }
        self.size = total;
        self.margin += fill.margin;
        self.fees += fill.fee;
    }
}

#[derive(Debug, Default)]
struct PaperBook {
    balance: Decimal,
    open: HashMap<Uuid, [PaperLeg; 2]>,
    closed: HashMap<Uuid, ClosureCheck>,
}

/// Dry-run execution: fills at the market-data last price, keeps positions
/// and margin in memory.
pub struct PaperTradingProvider {
    prices: Arc<dyn CandleApi>,
    book: Mutex<PaperBook>,
    fill_probability: f64,
}

impl PaperTradingProvider {
    pub fn new(prices: Arc<dyn CandleApi>, starting_balance: Decimal) -> Self {
        Self {
            prices,
            book: Mutex::new(PaperBook {
                balance: starting_balance,
                ..PaperBook::default()
            }),
            fill_probability: *FILLED_PROBABILITY_IN_EMULATION,
        }
    }

    pub fn with_fill_probability(mut self, probability: f64) -> Self {
        self.fill_probability = probability.clamp(0.0, 1.0);
        self
    }

    async fn price(&self, ticker: &str) -> Result<Decimal> {
        self.prices
            .last_price(ticker)
            .await
            .with_context(|| format!("no paper price for {}", ticker))
    }

    fn filled(&self) -> bool {
        self.fill_probability >= 1.0 || rand::random::<f64>() < self.fill_probability
    }
}

fn fill_for(
    pair: &Pair,
    ticker: &str,
    price: Decimal,
    capital: Decimal,
    settings: &Settings,
) -> LegFill {
    let notional = capital * settings.leverage;
    let size = if price.is_zero() {
        Decimal::ZERO
    } else {
        (notional / price).round_dp(8)
    };
    LegFill {
        position_id: format!("paper-{}-{}-{}", pair.id.simple(), ticker, pair.averaging_count),
        ticker: ticker.to_string(),
        price,
        size,
        leverage: settings.leverage,
        margin: capital,
        fee: notional * settings.fee_percent_per_trade / Decimal::ONE_HUNDRED,
    }
}

#[async_trait]
impl TradingProvider for PaperTradingProvider {
    async fn open(&self, pair: &Pair, settings: &Settings) -> Result<OpenResult> {
        let long_price = self.price(&pair.long_ticker).await?;
        let short_price = self.price(&pair.short_ticker).await?;

        if !self.filled() {
            log::info!("[PAPER] {} order not filled in emulation", pair.name());
            return Ok(OpenResult {
                message: Some("order not filled".to_string()),
                ..OpenResult::default()
            });
        }

        let long = fill_for(pair, &pair.long_ticker, long_price, settings.capital_long_usd, settings);
        let short = fill_for(
            pair,
            &pair.short_ticker,
            short_price,
            settings.capital_short_usd,
            settings,
        );
        let cost = long.margin + long.fee + short.margin + short.fee;
        let fee_rate = settings.fee_percent_per_trade / Decimal::ONE_HUNDRED;

        let mut book = self.book.lock().await;
        let before = book.balance;
        if cost > before {
            return Ok(OpenResult {
                portfolio_before: Some(before),
                message: Some(format!("paper balance {} < cost {}", before, cost)),
                ..OpenResult::default()
            });
        }
        book.balance -= cost;
        match book.open.get_mut(&pair.id) {
            Some([long_leg, short_leg]) => {
                long_leg.add(&long);
                short_leg.add(&short);
            }
            None => {
                let leg = |fill: &LegFill, side: LegType| PaperLeg {
                    ticker: fill.ticker.clone(),
                    side,
                    entry_price: fill.price,
                    size: fill.size,
                    margin: fill.margin,
                    fee_rate,
                    fees: fill.fee,
                };
                let legs = [leg(&long, LegType::Long), leg(&short, LegType::Short)];
                book.open.insert(pair.id, legs);
                book.closed.remove(&pair.id);
            }
        }
        log::info!(
            "[PAPER] {} opened long {}@{} short {}@{} balance {} -> {}",
            pair.name(),
            long.size,
            long.price,
            short.size,
            short.price,
            before,
            book.balance
        );
        Ok(OpenResult {
            success: true,
            long: Some(long),
            short: Some(short),
            portfolio_before: Some(before),
            message: None,
        })
    }

    async fn close(&self, pair: &Pair) -> Result<CloseResult> {
        let tickers = [pair.long_ticker.as_str(), pair.short_ticker.as_str()];
        let prices = try_join_all(tickers.iter().map(|ticker| self.price(ticker))).await?;

        let mut book = self.book.lock().await;
        let Some(legs) = book.open.remove(&pair.id) else {
            return Ok(CloseResult {
                message: Some(format!("no paper positions for {}", pair.name())),
                ..CloseResult::default()
            });
        };

        let mut closes = Vec::with_capacity(2);
        let mut net = Decimal::ZERO;
        let mut margin = Decimal::ZERO;
        for (leg, price) in legs.iter().zip(prices) {
            let gross = leg.gross_at(price);
            let closing_fee = price * leg.size * leg.fee_rate;
            book.balance += leg.margin + gross - closing_fee;
            net += gross - leg.fees - closing_fee;
            margin += leg.margin;
            closes.push(LegClose {
                closing_price: price,
                gross_pnl: gross,
                closing_fee,
                funding_fee: Decimal::ZERO,
            });
        }
        book.closed.insert(
            pair.id,
            ClosureCheck {
                closed: true,
                pnl_quote: net,
                pnl_percent: percent_of(net, margin),
            },
        );
        log::info!(
            "[PAPER] {} closed net {} balance {}",
            pair.name(),
            net,
            book.balance
        );

        let mut closes = closes.into_iter();
        Ok(CloseResult {
            success: true,
            long: closes.next(),
            short: closes.next(),
            portfolio_after: Some(book.balance),
            message: None,
        })
    }

    async fn refresh_prices(&self, tickers: &[String]) -> Result<HashMap<String, Decimal>> {
        let prices = try_join_all(tickers.iter().map(|ticker| self.price(ticker))).await?;
        Ok(tickers.iter().cloned().zip(prices).collect())
    }

    async fn is_positions_closed(&self, pair: &Pair) -> Result<bool> {
        Ok(!self.book.lock().await.open.contains_key(&pair.id))
    }

    async fn verify_closed(&self, pair: &Pair) -> Result<ClosureCheck> {
        let book = self.book.lock().await;
        Ok(book.closed.get(&pair.id).cloned().unwrap_or_default())
    }

    async fn free_margin(&self) -> Result<Decimal> {
        Ok(self.book.lock().await.balance)
    }
}
