use anyhow::Result;
use std::sync::Arc;

use crate::outcome::{Outcome, OrchestratorError, RejectReason};
use crate::pair::Pair;
use crate::ports::{CandleSource, PairRepository, StatisticsClient, TradingProvider};
use crate::settings::{Settings, SettingsStore};
use crate::statistics::ScoreResult;
use crate::trade::averaging::AveragingPolicy;
use crate::trade::exit_strategy::ExitPolicy;
use crate::trade::history::TradeHistory;
use crate::trade::notify::TradeNotifier;

pub mod fetch_candidates;
pub mod start_trade;
pub mod update_trade;

pub use fetch_candidates::{CandidateContext, FetchCandidatesProcessor, FetchCandidatesRequest};
pub use start_trade::{StartTradeProcessor, StartTradeRequest};
pub use update_trade::{UpdateTradeProcessor, UpdateTradeRequest};

/// Everything a processor talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn SettingsStore>,
    pub candles: Arc<dyn CandleSource>,
    pub statistics: Arc<dyn StatisticsClient>,
    pub trading: Arc<dyn TradingProvider>,
    pub repository: Arc<dyn PairRepository>,
    pub exit_policy: Arc<dyn ExitPolicy>,
    pub averaging: Arc<dyn AveragingPolicy>,
    pub history: Arc<TradeHistory>,
    pub notifier: Arc<TradeNotifier>,
}

impl Collaborators {
    /// Re-fetches the pair's two series (long first) and scores them.
    pub(crate) async fn rescore(
        &self,
        pair: &Pair,
        settings: &Settings,
    ) -> Result<Option<ScoreResult>> {
        let tickers = pair.tickers();
        let candles = self.candles.series_for(settings, &tickers).await?;
        if tickers.iter().any(|ticker| !candles.contains(ticker)) {
            log::warn!(
                "[SCORE] {} missing candles ({} of 2 series)",
                pair.name(),
                candles.len()
            );
            return Ok(None);
        }
        self.statistics.score_pair(&candles, settings).await
    }

    pub(crate) async fn save(&self, pair: &Pair) -> Result<(), OrchestratorError> {
        self.repository
            .save(pair)
            .await
            .map_err(|err| OrchestratorError::repository(Some(pair.id), err))
    }

    /// ERROR transition shared by every rejection path: only status and
    /// description change before the pair is persisted.
    pub(crate) async fn reject(
        &self,
        mut pair: Pair,
        reason: RejectReason,
    ) -> Result<Outcome, OrchestratorError> {
        log::warn!("[REJECT] {} -> ERROR: {}", pair.name(), reason.description());
        pair.fail(reason.description(), chrono::Utc::now());
        self.save(&pair).await?;
        self.history.record("error", &pair);
        Ok(Outcome::Rejected { pair, reason })
    }
}
