use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::market_data::candle::Candle;
use crate::ports::CandleApi;

pub const DEFAULT_OKX_ENDPOINT: &str = "https://www.okx.com";
const SWAP_SUFFIX: &str = "-USDT-SWAP";
/// `/api/v5/market/candles` serves at most this many rows per request.
pub const OKX_MAX_CANDLES_PER_REQUEST: usize = 300;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<Vec<T>> {
        if self.code != "0" {
            return Err(anyhow!("okx error code {}: {}", self.code, self.msg));
        }
        Ok(self.data)
    }
}

#[derive(Debug, Deserialize)]
struct Instrument {
    #[serde(rename = "instId")]
    inst_id: String,
}

#[derive(Debug, Deserialize)]
struct Ticker {
    last: String,
}

/// Public OKX REST market data for USDT-margined perpetual swaps.
pub struct OkxCandleApi {
    client: reqwest::Client,
    base_url: String,
}

impl OkxCandleApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<T>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("request to {} failed", path))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("HTTP {} from {}: {}", status.as_u16(), path, body));
        }
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read body from {}", path))?;
        parse_envelope(&body).with_context(|| format!("unexpected payload from {}", path))
    }
}

fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<Vec<T>> {
    let envelope: Envelope<T> = serde_json::from_str(body)?;
    envelope.into_data()
}

fn swap_tickers(instruments: Vec<Instrument>) -> Vec<String> {
    instruments
        .into_iter()
        .map(|instrument| instrument.inst_id)
        .filter(|id| id.ends_with(SWAP_SUFFIX))
        .collect()
}

fn field(row: &[String], index: usize, name: &str) -> Result<f64> {
    row.get(index)
        .ok_or_else(|| anyhow!("candle row missing {}", name))?
        .parse::<f64>()
        .with_context(|| format!("candle {} is not a number", name))
}

/// OKX rows are `[ts, o, h, l, c, vol, ...]` as strings.
fn candle_from_row(row: &[String]) -> Result<Candle> {
    let timestamp = row
        .first()
        .ok_or_else(|| anyhow!("empty candle row"))?
        .parse::<i64>()
        .context("candle timestamp is not an integer")?;
    Ok(Candle {
        timestamp,
        open: field(row, 1, "open")?,
        high: field(row, 2, "high")?,
        low: field(row, 3, "low")?,
        close: field(row, 4, "close")?,
        volume: field(row, 5, "volume")?,
    })
}

/// OKX lists the newest candle first; the result is oldest first.
fn candles_from_rows(rows: Vec<Vec<String>>) -> Result<Vec<Candle>> {
    let mut candles = rows
        .iter()
        .map(|row| candle_from_row(row))
        .collect::<Result<Vec<_>>>()?;
    candles.reverse();
    Ok(candles)
}

/// OKX `after` pages backwards: rows strictly older than the timestamp.
fn candle_query(
    ticker: &str,
    timeframe: &str,
    limit: usize,
    before: Option<i64>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("instId", ticker.to_string()),
        ("bar", timeframe.to_string()),
        (
            "limit",
            limit.min(OKX_MAX_CANDLES_PER_REQUEST).to_string(),
        ),
    ];
    if let Some(before) = before {
        query.push(("after", before.to_string()));
    }
    query
}

#[async_trait]
impl CandleApi for OkxCandleApi {
    fn max_page_size(&self) -> usize {
        OKX_MAX_CANDLES_PER_REQUEST
    }

    async fn list_tickers(&self) -> Result<Vec<String>> {
        let instruments: Vec<Instrument> = self
            .get(
                "/api/v5/public/instruments",
                &[("instType", "SWAP".to_string())],
            )
            .await?;
        let tickers = swap_tickers(instruments);
        log::debug!("[OKX] {} USDT swaps listed", tickers.len());
        Ok(tickers)
    }

    async fn fetch_candle_page(
        &self,
        ticker: &str,
        timeframe: &str,
        limit: usize,
        before: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let rows: Vec<Vec<String>> = self
            .get("/api/v5/market/candles", &candle_query(ticker, timeframe, limit, before))
            .await
            .with_context(|| format!("candles for {}", ticker))?;
        candles_from_rows(rows).with_context(|| format!("candles for {}", ticker))
    }

    async fn last_price(&self, ticker: &str) -> Result<Decimal> {
        let tickers: Vec<Ticker> = self
            .get("/api/v5/market/ticker", &[("instId", ticker.to_string())])
            .await
            .with_context(|| format!("ticker for {}", ticker))?;
        let last = tickers
            .first()
            .ok_or_else(|| anyhow!("no ticker data for {}", ticker))?;
        Decimal::from_str(&last.last).with_context(|| format!("bad last price for {}", ticker))
    }
}
