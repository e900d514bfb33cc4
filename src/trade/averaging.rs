use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;

use crate::pair::{Pair, TradeStatus};
use crate::ports::TradingProvider;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AveragingDecision {
    /// Capital of the add relative to the configured per-leg capital.
    pub volume_multiplier: f64,
}

/// Go/no-go for adding to an open pair.
pub trait AveragingPolicy: Send + Sync {
    fn decide(&self, pair: &Pair, settings: &Settings) -> Option<AveragingDecision>;
}

/// Averages down once the drawdown crosses a threshold that deepens with
/// every add already made.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrawdownAveraging;

impl DrawdownAveraging {
    pub fn trigger_percent(settings: &Settings, averaging_count: u32) -> f64 {
        let averaging = &settings.averaging;
        -averaging.drawdown_threshold_percent.abs()
            * averaging
                .drawdown_multiplier
                .max(1.0)
                .powi(averaging_count as i32)
    }
}

impl AveragingPolicy for DrawdownAveraging {
    fn decide(&self, pair: &Pair, settings: &Settings) -> Option<AveragingDecision> {
        let averaging = &settings.averaging;
        if !averaging.enabled || pair.status != TradeStatus::Trading {
            return None;
        }
        if pair.averaging_count >= averaging.max_count {
            return None;
        }
        let still_valid = pair
            .stats_current
            .map(|stats| stats.still_cointegrated(settings.max_p_value, settings.max_adf_p_value))
            .unwrap_or(false);
        if !still_valid {
            return None;
        }
        let profit = pair.profit_percent().to_f64()?;
        if profit > Self::trigger_percent(settings, pair.averaging_count) {
            return None;
        }
        Some(AveragingDecision {
            volume_multiplier: averaging.volume_multiplier,
        })
    }
}

/// Opens the add through the provider and merges the fills into the legs.
pub async fn execute_averaging(
    trading: &dyn TradingProvider,
    pair: &mut Pair,
    settings: &Settings,
    decision: AveragingDecision,
    now: DateTime<Utc>,
) -> Result<()> {
    let scaled = settings.with_scaled_capital(decision.volume_multiplier);
    let result = trading.open(pair, &scaled).await?;
    if !result.success {
        return Err(anyhow!(
            "provider refused averaging: {}",
            result.message.unwrap_or_default()
        ));
    }
    let (Some(long_fill), Some(short_fill)) = (result.long, result.short) else {
        return Err(anyhow!("averaging returned without both fills"));
    };
    if let Some(position) = pair.long_position.as_mut() {
        position.add_fill(&long_fill);
    }
    if let Some(position) = pair.short_position.as_mut() {
        position.add_fill(&short_fill);
    }
    pair.averaging_count += 1;
    pair.last_averaging_at = Some(now);
    pair.updated_at = now;
    Ok(())
}
