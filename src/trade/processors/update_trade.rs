use chrono::{DateTime, Utc};

use crate::outcome::{Outcome, OrchestratorError, SkipCause, UpdateTradeError};
use crate::pair::{ExitReason, Pair, TradeStatus};
use crate::ports::CloseResult;
use crate::settings::Settings;
use crate::trade::averaging::execute_averaging;
use crate::trade::changes::{apply_changes, apply_close};
use crate::trade::processors::Collaborators;

#[derive(Debug, Clone)]
pub struct UpdateTradeRequest {
    pub pair: Pair,
    pub close_manually: bool,
}

enum CloseKind {
    Manual,
    Automatic(ExitReason),
}

/// One refresh of a TRADING or OBSERVED pair.
pub struct UpdateTradeProcessor {
    c: Collaborators,
}

impl UpdateTradeProcessor {
    pub fn new(c: Collaborators) -> Self {
        Self { c }
    }

    pub async fn process(&self, request: UpdateTradeRequest) -> Result<Outcome, OrchestratorError> {
        let UpdateTradeRequest {
            pair: requested,
            close_manually,
        } = request;

        let mut pair = match self.load_fresh(&requested).await? {
            Ok(pair) => pair,
            Err(skipped) => return Ok(skipped),
        };
        let settings = self.c.settings.current();
        let name = pair.name();

        let prices = match self.c.trading.refresh_prices(&pair.tickers()).await {
            Ok(prices) => prices,
            Err(err) => return Ok(transient(pair, "price refresh", err)),
        };

        match self.c.trading.is_positions_closed(&pair).await {
            Ok(false) => {}
            Ok(true) => return self.reconcile_missing_positions(pair).await,
            Err(err) => return Ok(transient(pair, "position check", err)),
        }

        match self.c.rescore(&pair, &settings).await {
            Ok(Some(score)) if score.names_same_legs(&pair.long_ticker, &pair.short_ticker) => {
                pair.stats_current = Some(score.stats);
                if score.z_crossings.is_some() {
                    pair.z_crossings = score.z_crossings;
                }
            }
            Ok(Some(score)) => {
                log::warn!(
                    "[UPDATE] {} scored with flipped legs ({}), keeping previous statistics",
                    name,
                    score.pair_name()
                );
            }
            Ok(None) => log::warn!("[UPDATE] {} no statistics, keeping previous", name),
            Err(err) => log::warn!("[UPDATE] {} rescore failed: {:#}", name, err),
        }

        let now = Utc::now();
        apply_changes(&mut pair, &prices, now);

        if !close_manually {
            if let Some(decision) = self.c.averaging.decide(&pair, &settings) {
                match execute_averaging(self.c.trading.as_ref(), &mut pair, &settings, decision, now)
                    .await
                {
                    Ok(()) => {
                        log::info!(
                            "[UPDATE] {} averaged #{} x{}",
                            name,
                            pair.averaging_count,
                            decision.volume_multiplier
                        );
                        apply_changes(&mut pair, &prices, now);
                    }
                    Err(err) => log::warn!("[UPDATE] {} averaging failed: {:#}", name, err),
                }
            }
        }

        if close_manually {
            return self.close(pair, CloseKind::Manual).await;
        }

        let exit_settings = effective_settings(&pair, &settings).exit.clone();
        if let Some(reason) = self.c.exit_policy.exit_reason(&pair, &exit_settings, now) {
            log::info!("[UPDATE] {} exit triggered: {}", name, reason);
            return self.close(pair, CloseKind::Automatic(reason)).await;
        }

        self.c.save(&pair).await?;
        self.c.history.record("refresh", &pair);
        Ok(Outcome::Done(pair))
    }

    /// Statistics-only refresh of an OBSERVED pair.
    pub async fn refresh_observed(&self, pair: &Pair) -> Result<Outcome, OrchestratorError> {
        let mut pair = match self.load_fresh(pair).await? {
            Ok(pair) => pair,
            Err(skipped) => return Ok(skipped),
        };
        if pair.status != TradeStatus::Observed {
            return Ok(Outcome::Skipped {
                cause: SkipCause::Inactive(pair.status),
                pair: Some(pair),
            });
        }
        let settings = self.c.settings.current();
        match self.c.rescore(&pair, &settings).await {
            Ok(Some(score)) if score.names_same_legs(&pair.long_ticker, &pair.short_ticker) => {
                let now = Utc::now();
                pair.stats_current = Some(score.stats);
                pair.pnl.z_drift = pair.entry_z().map(|entry| score.stats.z_score - entry);
                pair.updated_at = now;
                self.c.save(&pair).await?;
                Ok(Outcome::Done(pair))
            }
            Ok(_) => Ok(Outcome::Skipped {
                pair: Some(pair),
                cause: SkipCause::Transient("no usable statistics".to_string()),
            }),
            Err(err) => Ok(transient(pair, "observed rescore", err)),
        }
    }

    /// Reloads the pair; the outer error is a repository failure, the inner
    /// one a no-op outcome for pairs that must not be touched.
    async fn load_fresh(&self, requested: &Pair) -> Result<Result<Pair, Outcome>, OrchestratorError> {
        let fresh = self
            .c
            .repository
            .find_by_id(requested.id)
            .await
            .map_err(|err| OrchestratorError::repository(Some(requested.id), err))?;
        let Some(fresh) = fresh else {
            log::debug!("[UPDATE] {} no longer stored", requested.name());
            return Ok(Err(Outcome::Skipped {
                pair: None,
                cause: SkipCause::NotFound,
            }));
        };
        if fresh.status == TradeStatus::Closed {
            return Ok(Err(Outcome::Skipped {
                pair: Some(fresh),
                cause: SkipCause::AlreadyClosed,
            }));
        }
        if !fresh.status.holds_positions() {
            return Ok(Err(Outcome::Skipped {
                cause: SkipCause::Inactive(fresh.status),
                pair: Some(fresh),
            }));
        }
        Ok(Ok(fresh))
    }

    async fn reconcile_missing_positions(&self, pair: Pair) -> Result<Outcome, OrchestratorError> {
        let check = match self.c.trading.verify_closed(&pair).await {
            Ok(check) => check,
            Err(err) => return Ok(transient(pair, "closure verification", err)),
        };
        let reason = if check.closed {
            UpdateTradeError::ManuallyClosedNoPositions {
                pnl_quote: check.pnl_quote,
                pnl_percent: check.pnl_percent,
            }
        } else {
            UpdateTradeError::PositionsNotFound
        };
        self.c.reject(pair, reason.into()).await
    }

    async fn close(&self, mut pair: Pair, kind: CloseKind) -> Result<Outcome, OrchestratorError> {
        let failure = |message: String| match kind {
            CloseKind::Manual => UpdateTradeError::ManualCloseFailed(message),
            CloseKind::Automatic(_) => UpdateTradeError::AutoCloseFailed(message),
        };
        let result = match self.c.trading.close(&pair).await {
            Ok(result) => result,
            Err(err) => return self.c.reject(pair, failure(format!("{:#}", err)).into()).await,
        };
        if let Err(message) = confirmed(&result) {
            return self.c.reject(pair, failure(message).into()).await;
        }

        let reason = match kind {
            CloseKind::Manual => ExitReason::Manually,
            CloseKind::Automatic(reason) => reason,
        };
        self.finalize(&mut pair, &result, reason, Utc::now())?;
        self.c.save(&pair).await?;
        self.c.history.record("close", &pair);
        self.c.notifier.trade_closed(&pair);
        Ok(Outcome::Done(pair))
    }

    fn finalize(
        &self,
        pair: &mut Pair,
        result: &CloseResult,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        apply_close(pair, result, now);
        pair.exit_reason = Some(reason);
        pair.transition(TradeStatus::Closed, now)?;
        log::info!(
            "[UPDATE] {} CLOSED ({}) realized {} ({}%)",
            pair.name(),
            reason,
            pair.pnl.realized_quote,
            pair.pnl.realized_percent
        );
        Ok(())
    }
}

/// Both legs must come back closed before a pair may be marked CLOSED.
fn confirmed(result: &CloseResult) -> Result<(), String> {
    if !result.success {
        return Err(result
            .message
            .clone()
            .unwrap_or_else(|| "provider reported failure".to_string()));
    }
    if result.long.is_none() || result.short.is_none() {
        return Err("provider did not confirm both legs".to_string());
    }
    Ok(())
}

/// Exit thresholds come from the settings the trade was opened with.
fn effective_settings<'a>(pair: &'a Pair, current: &'a Settings) -> &'a Settings {
    pair.settings_snapshot.as_ref().unwrap_or(current)
}

fn transient(pair: Pair, step: &str, err: anyhow::Error) -> Outcome {
    log::warn!("[UPDATE] {} {} failed: {:#}", pair.name(), step, err);
    Outcome::Skipped {
        pair: Some(pair),
        cause: SkipCause::Transient(format!("{}: {:#}", step, err)),
    }
}
