use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegType {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Pending,
    Open,
    Closing,
    Closed,
    Failed,
}

/// What the exchange reported after opening (or adding to) one leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegFill {
    pub position_id: String,
    pub ticker: String,
    pub price: Decimal,
    pub size: Decimal,
    pub leverage: Decimal,
    pub margin: Decimal,
    pub fee: Decimal,
}

/// What the exchange reported after closing one leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegClose {
    pub closing_price: Decimal,
    /// Realized P&L before fees.
    pub gross_pnl: Decimal,
    pub closing_fee: Decimal,
    pub funding_fee: Decimal,
}

/// One exchange-side leg of a pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub pair_id: Uuid,
    pub ticker: String,
    pub leg: LegType,
    pub status: PositionStatus,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub closing_price: Option<Decimal>,
    pub size: Decimal,
    pub leverage: Decimal,
    pub allocated_margin: Decimal,
    pub opening_fees: Decimal,
    pub funding_fees: Decimal,
    pub closing_fees: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_percent: Decimal,
    pub realized_pnl: Decimal,
    pub realized_pnl_percent: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
}

impl Position {
    pub fn open(pair_id: Uuid, leg: LegType, fill: &LegFill, now: DateTime<Utc>) -> Self {
        Self {
            position_id: fill.position_id.clone(),
            pair_id,
            ticker: fill.ticker.clone(),
            leg,
            status: PositionStatus::Open,
            entry_price: fill.price,
            current_price: fill.price,
            closing_price: None,
            size: fill.size,
            leverage: fill.leverage,
            allocated_margin: fill.margin,
            opening_fees: fill.fee,
            funding_fees: Decimal::ZERO,
            closing_fees: Decimal::ZERO,
            unrealized_pnl: -fill.fee,
            unrealized_pnl_percent: percent_of(-fill.fee, fill.margin),
            realized_pnl: Decimal::ZERO,
            realized_pnl_percent: Decimal::ZERO,
            opened_at: now,
            closed_at: None,
            deleted: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open && !self.deleted
    }

    /// Merges an averaging fill into the leg, moving the entry price to the
    /// size-weighted average.
    pub fn add_fill(&mut self, fill: &LegFill) {
        if !self.is_open() {
            return;
        }
        let total_size = self.size + fill.size;
        if total_size > Decimal::ZERO {
            self.entry_price = (self.entry_price * self.size + fill.price * fill.size) / total_size;
        }
        self.size = total_size;
        self.allocated_margin += fill.margin;
        self.opening_fees += fill.fee;
    }

    /// Recomputes unrealized P&L at `price`, net of opening and funding fees.
    /// Ignored unless the leg is open.
    pub fn mark_price(&mut self, price: Decimal) {
        if !self.is_open() {
            return;
        }
        self.current_price = price;
        let gross = self.gross_pnl_at(price);
        self.unrealized_pnl = gross - self.opening_fees - self.funding_fees;
        self.unrealized_pnl_percent = percent_of(self.unrealized_pnl, self.allocated_margin);
    }

    /// Finalizes the leg. Realized fields become authoritative and the
    /// unrealized ones are zeroed; a closed leg is never touched again.
    pub fn mark_closed(&mut self, close: &LegClose, now: DateTime<Utc>) -> bool {
        if matches!(self.status, PositionStatus::Closed | PositionStatus::Failed) {
            return false;
        }
        self.status = PositionStatus::Closed;
        self.closing_price = Some(close.closing_price);
        self.current_price = close.closing_price;
        self.closing_fees = close.closing_fee;
        self.funding_fees += close.funding_fee;
        self.realized_pnl =
            close.gross_pnl - self.opening_fees - self.funding_fees - self.closing_fees;
        self.realized_pnl_percent = percent_of(self.realized_pnl, self.allocated_margin);
        self.unrealized_pnl = Decimal::ZERO;
        self.unrealized_pnl_percent = Decimal::ZERO;
        self.closed_at = Some(now);
        true
    }

    pub fn gross_pnl_at(&self, price: Decimal) -> Decimal {
        match self.leg {
            LegType::Long => (price - self.entry_price) * self.size,
            LegType::Short => (self.entry_price - price) * self.size,
        }
    }
}

pub(crate) fn percent_of(value: Decimal, base: Decimal) -> Decimal {
    if base.is_zero() {
        return Decimal::ZERO;
    }
    (value / base * Decimal::ONE_HUNDRED).round_dp(4)
}
