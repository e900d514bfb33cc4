use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::position::Position;
use crate::settings::Settings;
use crate::statistics::{ScoreResult, StatSnapshot};

/// Discovery pipeline stage. Independent of the lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PairKind {
    Stable,
    Cointegrated,
    Trading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Found,
    Selected,
    Trading,
    Observed,
    Closing,
    Closed,
    Error,
}

impl TradeStatus {
    pub fn can_transition_to(self, next: TradeStatus) -> bool {
        use TradeStatus::*;
        matches!(
            (self, next),
            (Found, Selected)
                | (Selected, Trading)
                | (Selected, Error)
                | (Trading, Observed)
                | (Trading | Observed, Closing)
                | (Trading | Observed, Closed)
                | (Trading | Observed, Error)
                | (Closing, Closed)
                | (Closing, Error)
        )
    }

    /// Two live exchange legs are expected in these states.
    pub fn holds_positions(self) -> bool {
        matches!(self, TradeStatus::Trading | TradeStatus::Observed)
    }

    /// Automation never touches a pair again once it reaches one of these.
    pub fn is_final(self) -> bool {
        matches!(self, TradeStatus::Closed | TradeStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradeStatus::Found => "FOUND",
            TradeStatus::Selected => "SELECTED",
            TradeStatus::Trading => "TRADING",
            TradeStatus::Observed => "OBSERVED",
            TradeStatus::Closing => "CLOSING",
            TradeStatus::Closed => "CLOSED",
            TradeStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    ZScoreMin,
    ZScoreMax,
    MaxHoldingTime,
    Breakeven,
    NegativeZMinProfit,
    #[serde(rename = "EXIT_REASON_MANUALLY")]
    Manually,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::ZScoreMin => "Z_SCORE_MIN",
            ExitReason::ZScoreMax => "Z_SCORE_MAX",
            ExitReason::MaxHoldingTime => "MAX_HOLDING_TIME",
            ExitReason::Breakeven => "BREAKEVEN",
            ExitReason::NegativeZMinProfit => "NEGATIVE_Z_MIN_PROFIT",
            ExitReason::Manually => "EXIT_REASON_MANUALLY",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PairError {
    #[error("long and short legs must differ, both are {0}")]
    SameTickers(String),
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: TradeStatus, to: TradeStatus },
}

/// Economic state of an open or finished trade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PnlSnapshot {
    pub realized_quote: Decimal,
    pub realized_percent: Decimal,
    pub unrealized_quote: Decimal,
    pub unrealized_percent: Decimal,
    pub min_profit_percent: Option<Decimal>,
    pub max_profit_percent: Option<Decimal>,
    pub minutes_to_min: Option<i64>,
    pub minutes_to_max: Option<i64>,
    /// Current z-score minus the entry z-score.
    pub z_drift: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub id: Uuid,
    pub long_ticker: String,
    pub short_ticker: String,
    pub kind: PairKind,
    pub status: TradeStatus,

    pub stats_entry: Option<StatSnapshot>,
    pub stats_current: Option<StatSnapshot>,
    #[serde(default)]
    pub z_crossings: Option<u32>,

    pub long_entry_price: Option<Decimal>,
    pub long_current_price: Option<Decimal>,
    pub short_entry_price: Option<Decimal>,
    pub short_current_price: Option<Decimal>,
    #[serde(default)]
    pub pnl: PnlSnapshot,

    /// Settings in force when the trade opened.
    pub settings_snapshot: Option<Settings>,
    pub portfolio_before: Option<Decimal>,
    pub portfolio_after: Option<Decimal>,

    #[serde(default)]
    pub averaging_count: u32,
    pub last_averaging_at: Option<DateTime<Utc>>,
    /// Arms the breakeven exit once set by an operator.
    #[serde(default)]
    pub breakeven_armed: bool,

    pub created_at: DateTime<Utc>,
    pub entry_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub exit_reason: Option<ExitReason>,
    pub error_description: Option<String>,

    pub long_position: Option<Position>,
    pub short_position: Option<Position>,
}

impl Pair {
    pub fn new(
        long_ticker: &str,
        short_ticker: &str,
        kind: PairKind,
        status: TradeStatus,
        now: DateTime<Utc>,
    ) -> Result<Self, PairError> {
        if long_ticker == short_ticker {
            return Err(PairError::SameTickers(long_ticker.to_string()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            long_ticker: long_ticker.to_string(),
            short_ticker: short_ticker.to_string(),
            kind,
            status,
            stats_entry: None,
            stats_current: None,
            z_crossings: None,
            long_entry_price: None,
            long_current_price: None,
            short_entry_price: None,
            short_current_price: None,
            pnl: PnlSnapshot::default(),
            settings_snapshot: None,
            portfolio_before: None,
            portfolio_after: None,
            averaging_count: 0,
            last_averaging_at: None,
            breakeven_armed: false,
            created_at: now,
            entry_at: None,
            updated_at: now,
            exit_reason: None,
            error_description: None,
            long_position: None,
            short_position: None,
        })
    }

    /// Builds a candidate from a score record. Both the entry and the current
    /// statistics start out as the scored values.
    pub fn from_score(
        score: &ScoreResult,
        kind: PairKind,
        status: TradeStatus,
        now: DateTime<Utc>,
    ) -> Result<Self, PairError> {
        let mut pair = Self::new(&score.long_ticker, &score.short_ticker, kind, status, now)?;
        pair.stats_entry = Some(score.stats);
        pair.stats_current = Some(score.stats);
        pair.z_crossings = score.z_crossings;
        Ok(pair)
    }

    pub fn name(&self) -> String {
        format!("{}/{}", self.long_ticker, self.short_ticker)
    }

    pub fn tickers(&self) -> [String; 2] {
        [self.long_ticker.clone(), self.short_ticker.clone()]
    }

    pub fn transition(&mut self, next: TradeStatus, now: DateTime<Utc>) -> Result<(), PairError> {
        if !self.status.can_transition_to(next) {
            return Err(PairError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Moves the pair to ERROR keeping every other field as last observed.
    pub fn fail(&mut self, description: String, now: DateTime<Utc>) {
        if self.status != TradeStatus::Error && !self.status.can_transition_to(TradeStatus::Error)
        {
            log::warn!(
                "[PAIR] {} forced to ERROR from {}",
                self.name(),
                self.status
            );
        }
        self.status = TradeStatus::Error;
        self.error_description = Some(description);
        self.updated_at = now;
    }

    pub fn current_z(&self) -> Option<f64> {
        self.stats_current.map(|stats| stats.z_score)
    }

    pub fn entry_z(&self) -> Option<f64> {
        self.stats_entry.map(|stats| stats.z_score)
    }

    /// Profit of the open trade in percent of the margin committed to it.
    pub fn profit_percent(&self) -> Decimal {
        self.pnl.unrealized_percent
    }

    pub fn holding_minutes(&self, now: DateTime<Utc>) -> Option<i64> {
        self.entry_at
            .map(|entry| (now - entry).num_minutes().max(0))
    }

    pub fn allocated_margin(&self) -> Decimal {
        self.positions()
            .map(|position| position.allocated_margin)
            .sum()
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.long_position.iter().chain(self.short_position.iter())
    }

    pub fn positions_mut(&mut self) -> impl Iterator<Item = &mut Position> {
        self.long_position
            .iter_mut()
            .chain(self.short_position.iter_mut())
    }

    pub fn uses_ticker(&self, ticker: &str) -> bool {
        self.long_ticker == ticker || self.short_ticker == ticker
    }
}
