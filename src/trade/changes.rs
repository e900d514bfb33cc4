use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::pair::Pair;
use crate::ports::{CloseResult, OpenResult};
use crate::position::{percent_of, LegType, Position};

/// Applies live prices to an open pair: leg prices, unrealized P&L net of
/// fees, profit excursion and z drift.
pub fn apply_changes(pair: &mut Pair, prices: &HashMap<String, Decimal>, now: DateTime<Utc>) {
    if let Some(price) = prices.get(&pair.long_ticker) {
        pair.long_current_price = Some(*price);
        if let Some(position) = pair.long_position.as_mut() {
            position.mark_price(*price);
        }
    }
    if let Some(price) = prices.get(&pair.short_ticker) {
        pair.short_current_price = Some(*price);
        if let Some(position) = pair.short_position.as_mut() {
            position.mark_price(*price);
        }
    }

    let unrealized: Decimal = pair.positions().map(|p| p.unrealized_pnl).sum();
    let margin = pair.allocated_margin();
    pair.pnl.unrealized_quote = unrealized;
    pair.pnl.unrealized_percent = percent_of(unrealized, margin);

    let profit = pair.pnl.unrealized_percent;
    let minutes = pair.holding_minutes(now);
    if pair.pnl.min_profit_percent.map_or(true, |min| profit < min) {
        pair.pnl.min_profit_percent = Some(profit);
        pair.pnl.minutes_to_min = minutes;
    }
    if pair.pnl.max_profit_percent.map_or(true, |max| profit > max) {
        pair.pnl.max_profit_percent = Some(profit);
        pair.pnl.minutes_to_max = minutes;
    }
    pair.pnl.z_drift = match (pair.current_z(), pair.entry_z()) {
        (Some(current), Some(entry)) => Some(current - entry),
        _ => None,
    };
    pair.updated_at = now;
}

/// Records a successful two-leg open on the pair.
pub fn apply_open(pair: &mut Pair, result: &OpenResult, now: DateTime<Utc>) -> bool {
    let (Some(long), Some(short)) = (&result.long, &result.short) else {
        return false;
    };
    pair.long_position = Some(Position::open(pair.id, LegType::Long, long, now));
    pair.short_position = Some(Position::open(pair.id, LegType::Short, short, now));
    pair.long_entry_price = Some(long.price);
    pair.long_current_price = Some(long.price);
    pair.short_entry_price = Some(short.price);
    pair.short_current_price = Some(short.price);
    pair.portfolio_before = result.portfolio_before;
    pair.entry_at = Some(now);
    pair.pnl = Default::default();
    pair.pnl.unrealized_quote = pair.positions().map(|p| p.unrealized_pnl).sum();
    pair.pnl.unrealized_percent = percent_of(pair.pnl.unrealized_quote, pair.allocated_margin());
    true
}

/// Moves confirmed close data into the legs and the pair's realized P&L.
/// Unrealized figures end at zero.
pub fn apply_close(pair: &mut Pair, result: &CloseResult, now: DateTime<Utc>) {
    if let (Some(position), Some(close)) = (pair.long_position.as_mut(), &result.long) {
        position.mark_closed(close, now);
    }
    if let (Some(position), Some(close)) = (pair.short_position.as_mut(), &result.short) {
        position.mark_closed(close, now);
    }
    if let Some(close) = &result.long {
        pair.long_current_price = Some(close.closing_price);
    }
    if let Some(close) = &result.short {
        pair.short_current_price = Some(close.closing_price);
    }

    let realized: Decimal = pair.positions().map(|p| p.realized_pnl).sum();
    pair.pnl.realized_quote = realized;
    pair.pnl.realized_percent = percent_of(realized, pair.allocated_margin());
    pair.pnl.unrealized_quote = Decimal::ZERO;
    pair.pnl.unrealized_percent = Decimal::ZERO;
    pair.portfolio_after = result.portfolio_after;
    pair.updated_at = now;
}
