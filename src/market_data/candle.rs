use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, epoch milliseconds.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn quote_volume(&self) -> f64 {
        self.volume * self.close
    }
}

/// Ticker-to-series mapping whose order is part of the contract: the
/// statistics engine derives the sign of the spread from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandleSet {
    entries: Vec<(String, Vec<Candle>)>,
}

impl CandleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a series. A replaced series keeps its position.
    pub fn insert(&mut self, ticker: String, candles: Vec<Candle>) {
        if let Some(slot) = self.entries.iter_mut().find(|(name, _)| *name == ticker) {
            slot.1 = candles;
        } else {
            self.entries.push((ticker, candles));
        }
    }

    pub fn get(&self, ticker: &str) -> Option<&[Candle]> {
        self.entries
            .iter()
            .find(|(name, _)| name == ticker)
            .map(|(_, candles)| candles.as_slice())
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.get(ticker).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Candle])> {
        self.entries
            .iter()
            .map(|(name, candles)| (name.as_str(), candles.as_slice()))
    }

    /// Subset in the order given by `tickers`; absent tickers are skipped.
    pub fn select(&self, tickers: &[&str]) -> CandleSet {
        let mut subset = CandleSet::new();
        for ticker in tickers {
            if let Some(candles) = self.get(ticker) {
                subset.insert((*ticker).to_string(), candles.to_vec());
            }
        }
        subset
    }

    pub fn last_close(&self, ticker: &str) -> Option<Decimal> {
        self.get(ticker)
            .and_then(|candles| candles.last())
            .and_then(|candle| Decimal::from_f64(candle.close))
    }
}

impl FromIterator<(String, Vec<Candle>)> for CandleSet {
    fn from_iter<I: IntoIterator<Item = (String, Vec<Candle>)>>(iter: I) -> Self {
        let mut set = CandleSet::new();
        for (ticker, candles) in iter {
            set.insert(ticker, candles);
        }
        set
    }
}

// Serialized as a JSON object whose keys keep insertion order.
impl Serialize for CandleSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (ticker, candles) in &self.entries {
            map.serialize_entry(ticker, candles)?;
        }
        map.end()
    }
}
