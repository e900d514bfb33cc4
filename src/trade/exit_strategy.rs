use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;

use crate::pair::{ExitReason, Pair};
use crate::settings::ExitSettings;

/// Decides whether an open pair should be closed.
pub trait ExitPolicy: Send + Sync {
    fn exit_reason(&self, pair: &Pair, exit: &ExitSettings, now: DateTime<Utc>)
        -> Option<ExitReason>;
}

/// Threshold rules checked in a fixed order; the first that fires wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedExitStrategy;

impl RuleBasedExitStrategy {
    /// Either configured buffer is enough to fire.
    fn z_max_reached(z: f64, entry_z: f64, exit: &ExitSettings) -> bool {
        let by_buffer = exit
            .z_max_buffer
            .map_or(false, |buffer| z >= entry_z + buffer);
        let by_percent = exit
            .z_max_buffer_percent
            .map_or(false, |percent| z >= entry_z * (1.0 + percent / 100.0));
        by_buffer || by_percent
    }
}

impl ExitPolicy for RuleBasedExitStrategy {
    fn exit_reason(
        &self,
        pair: &Pair,
        exit: &ExitSettings,
        now: DateTime<Utc>,
    ) -> Option<ExitReason> {
        let profit = pair.profit_percent().to_f64().unwrap_or(0.0);

        if let Some(stop) = exit.stop_loss_percent {
            if profit <= -stop.abs() {
                return Some(ExitReason::StopLoss);
            }
        }
        if let Some(take) = exit.take_profit_percent {
            if profit >= take {
                return Some(ExitReason::TakeProfit);
            }
        }

        if let Some(z) = pair.current_z() {
            if let Some(z_min) = exit.z_min {
                if z <= z_min {
                    return Some(ExitReason::ZScoreMin);
                }
            }
            if let Some(entry_z) = pair.entry_z() {
                if Self::z_max_reached(z, entry_z, exit) {
                    return Some(ExitReason::ZScoreMax);
                }
            }
        }

        if let (Some(max_hours), Some(minutes)) = (exit.max_holding_hours, pair.holding_minutes(now))
        {
            if minutes as f64 / 60.0 >= max_hours {
                return Some(ExitReason::MaxHoldingTime);
            }
        }

        if pair.breakeven_armed {
            if let Some(breakeven) = exit.breakeven_percent {
                if profit >= breakeven {
                    return Some(ExitReason::Breakeven);
                }
            }
        }

        if let (Some(min_profit), Some(z)) = (exit.negative_z_min_profit_percent, pair.current_z()) {
            if z < 0.0 && profit >= min_profit {
                return Some(ExitReason::NegativeZMinProfit);
            }
        }

        None
    }
}
