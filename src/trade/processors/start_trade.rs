use chrono::Utc;

use crate::outcome::{Outcome, OrchestratorError, StartTradeError};
use crate::pair::{Pair, PairKind, TradeStatus};
use crate::trade::changes::apply_open;
use crate::trade::processors::Collaborators;

#[derive(Debug, Clone)]
pub struct StartTradeRequest {
    pub pair: Pair,
    pub check_auto_trading: bool,
}

/// SELECTED -> TRADING, or SELECTED -> ERROR with the first failed check.
pub struct StartTradeProcessor {
    c: Collaborators,
}

impl StartTradeProcessor {
    pub fn new(c: Collaborators) -> Self {
        Self { c }
    }

    pub async fn process(&self, request: StartTradeRequest) -> Result<Outcome, OrchestratorError> {
        let StartTradeRequest {
            mut pair,
            check_auto_trading,
        } = request;

        match pair.status {
            TradeStatus::Selected => {}
            TradeStatus::Found => {
                pair.transition(TradeStatus::Selected, Utc::now())?;
                log::info!("[START] {} promoted FOUND -> SELECTED", pair.name());
            }
            other => {
                return Err(OrchestratorError::InvalidRequest(format!(
                    "{} is {}, only SELECTED pairs can be started",
                    pair.name(),
                    other
                )));
            }
        }

        let settings = self.c.settings.current();
        let name = pair.name();

        let Some(current_z) = pair.current_z() else {
            return self.reject(pair, StartTradeError::ZScoreDataEmpty(name)).await;
        };
        if current_z < settings.min_z {
            let reason = StartTradeError::ZScoreBelowMinimum {
                current: current_z,
                min: settings.min_z,
            };
            return self.reject(pair, reason).await;
        }

        let score = match self.c.rescore(&pair, &settings).await {
            Ok(Some(score)) => score,
            Ok(None) => {
                return self.reject(pair, StartTradeError::ZScoreDataEmpty(name)).await;
            }
            Err(err) => {
                log::warn!("[START] {} rescore failed: {:#}", name, err);
                return self.reject(pair, StartTradeError::ZScoreDataEmpty(name)).await;
            }
        };

        if !score.names_same_legs(&pair.long_ticker, &pair.short_ticker) {
            let reason = StartTradeError::TickersSwitched {
                long: score.long_ticker.clone(),
                short: score.short_ticker.clone(),
            };
            return self.reject(pair, reason).await;
        }

        if check_auto_trading && !settings.auto_trading_enabled {
            return self.reject(pair, StartTradeError::AutoTradingDisabled).await;
        }

        if settings.use_z_score_decline_filter {
            let points = settings.z_score_decline_candles_count;
            let failure = match score.z_declining(points) {
                Some(true) => None,
                Some(false) => Some(format!("z-score not declining over last {} points", points)),
                None => Some(format!(
                    "{} z-score points available, {} required",
                    score.z_history.len(),
                    points
                )),
            };
            if let Some(detail) = failure {
                log::info!("[START] {} decline filter: {:?}", name, score.z_history);
                return self
                    .reject(pair, StartTradeError::ZScoreDeclineFilterFailed(detail))
                    .await;
            }
        }

        let required = settings.required_margin();
        match self.c.trading.free_margin().await {
            Ok(free) if free >= required => {}
            Ok(free) => {
                let reason = StartTradeError::InsufficientFunds(format!(
                    "free margin {} < required {}",
                    free, required
                ));
                return self.reject(pair, reason).await;
            }
            Err(err) => {
                let reason =
                    StartTradeError::InsufficientFunds(format!("balance unavailable: {:#}", err));
                return self.reject(pair, reason).await;
            }
        }

        let opened = match self.c.trading.open(&pair, &settings).await {
            Ok(result) if result.success => result,
            Ok(result) => {
                let message = result
                    .message
                    .unwrap_or_else(|| "provider reported failure".to_string());
                return self
                    .reject(pair, StartTradeError::TradeOpenFailed(message))
                    .await;
            }
            Err(err) => {
                return self
                    .reject(pair, StartTradeError::TradeOpenFailed(format!("{:#}", err)))
                    .await;
            }
        };

        let now = Utc::now();
        if !apply_open(&mut pair, &opened, now) {
            let reason =
                StartTradeError::TradeOpenFailed("provider returned without both legs".to_string());
            return self.reject(pair, reason).await;
        }
        pair.stats_entry = Some(score.stats);
        pair.stats_current = Some(score.stats);
        pair.z_crossings = score.z_crossings.or(pair.z_crossings);
        pair.settings_snapshot = Some(settings);
        pair.kind = PairKind::Trading;
        pair.transition(TradeStatus::Trading, now)?;

        self.c.save(&pair).await?;
        self.c.history.record("open", &pair);
        log::info!(
            "[START] {} TRADING z={:.2} long@{:?} short@{:?} balance before={:?}",
            pair.name(),
            score.stats.z_score,
            pair.long_entry_price,
            pair.short_entry_price,
            pair.portfolio_before
        );
        Ok(Outcome::Done(pair))
    }

    async fn reject(
        &self,
        pair: Pair,
        reason: StartTradeError,
    ) -> Result<Outcome, OrchestratorError> {
        self.c.reject(pair, reason.into()).await
    }
}
