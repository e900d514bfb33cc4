use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::outcome::{Outcome, OrchestratorError};
use crate::pair::{Pair, TradeStatus};
use crate::ports::PairRepository;
use crate::settings::Settings;
use crate::trade::processors::{
    Collaborators, FetchCandidatesProcessor, FetchCandidatesRequest, StartTradeProcessor,
    StartTradeRequest, UpdateTradeProcessor, UpdateTradeRequest,
};

/// Entry points used by the schedulers and by manual triggers.
pub struct Orchestrator {
    c: Collaborators,
    fetch: FetchCandidatesProcessor,
    start: StartTradeProcessor,
    update: UpdateTradeProcessor,
}

impl Orchestrator {
    pub fn new(c: Collaborators) -> Self {
        Self {
            fetch: FetchCandidatesProcessor::new(c.clone()),
            start: StartTradeProcessor::new(c.clone()),
            update: UpdateTradeProcessor::new(c.clone()),
            c,
        }
    }

    pub fn settings(&self) -> Settings {
        self.c.settings.current()
    }

    pub fn repository(&self) -> &Arc<dyn PairRepository> {
        &self.c.repository
    }

    pub async fn fetch_candidates(&self, request: FetchCandidatesRequest) -> Vec<Pair> {
        self.fetch.process(request).await
    }

    pub async fn start_trade(&self, request: StartTradeRequest) -> Result<Outcome, OrchestratorError> {
        self.start.process(request).await
    }

    pub async fn update_trade(
        &self,
        request: UpdateTradeRequest,
    ) -> Result<Outcome, OrchestratorError> {
        self.update.process(request).await
    }

    /// Statistics-only refresh of an OBSERVED pair.
    pub async fn update_observed_pair(&self, pair: &Pair) -> Result<Outcome, OrchestratorError> {
        self.update.refresh_observed(pair).await
    }

    /// Parks a TRADING pair as OBSERVED. Returns false when the id is unknown.
    pub async fn demote_to_observed(&self, id: Uuid) -> Result<bool, OrchestratorError> {
        let pair = self
            .c
            .repository
            .find_by_id(id)
            .await
            .map_err(|err| OrchestratorError::repository(Some(id), err))?;
        let Some(pair) = pair else {
            return Ok(false);
        };
        if pair.status == TradeStatus::Observed {
            return Ok(true);
        }
        if !pair.status.can_transition_to(TradeStatus::Observed) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "{} is {}, only TRADING pairs can be observed",
                pair.name(),
                pair.status
            )));
        }
        let updated = self
            .c
            .repository
            .update_status(id, TradeStatus::Observed, Utc::now())
            .await
            .map_err(|err| OrchestratorError::repository(Some(id), err))?;
        if updated {
            log::info!("[ORCH] {} demoted to OBSERVED", pair.name());
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pair::ExitReason;
    use crate::testing::{candle_set, score, selected_pair, trading_pair, Harness};
    use crate::trade::processors::CandidateContext;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    #[tokio::test]
    async fn candidate_opens_and_closes_at_take_profit() {
        let harness = Harness::new();
        let mut settings = Settings::default();
        settings.auto_trading_enabled = true;
        harness.settings.update(settings);
        harness
            .candles
            .set_universe(candle_set(&[("AAA", 10.0), ("BBB", 20.0)]));
        harness.statistics.set_scores(vec![score("AAA", "BBB", 2.6)]);
        harness
            .statistics
            .set_pair_score(Some(score("AAA", "BBB", 2.6)));
        harness.trading.set_prices(HashMap::from([
            ("AAA".to_string(), dec!(10)),
            ("BBB".to_string(), dec!(20)),
        ]));
        let orchestrator = Orchestrator::new(harness.collaborators());

        let candidates = orchestrator
            .fetch_candidates(FetchCandidatesRequest {
                count: Some(1),
                context: CandidateContext::PreTrade,
            })
            .await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].status, TradeStatus::Selected);

        let started = orchestrator
            .start_trade(StartTradeRequest {
                pair: candidates[0].clone(),
                check_auto_trading: true,
            })
            .await
            .unwrap();
        assert_eq!(started.status(), Some(TradeStatus::Trading));

        harness.exit.set(Some(ExitReason::TakeProfit));
        let closed = orchestrator
            .update_trade(UpdateTradeRequest {
                pair: started.into_pair().unwrap(),
                close_manually: false,
            })
            .await
            .unwrap();
        let closed = closed.into_pair().unwrap();
        assert_eq!(closed.status, TradeStatus::Closed);
        assert_eq!(closed.exit_reason, Some(ExitReason::TakeProfit));
        assert_eq!(harness.trading.open_calls(), 1);
        assert_eq!(harness.trading.close_calls(), 1);
    }

    #[tokio::test]
    async fn trading_pair_can_be_demoted_once_known() {
        let harness = Harness::new();
        let pair = trading_pair("AAA", "BBB");
        harness.repository.insert(pair.clone());
        let orchestrator = Orchestrator::new(harness.collaborators());

        assert!(orchestrator.demote_to_observed(pair.id).await.unwrap());
        let stored = harness.repository.all();
        assert_eq!(stored[0].status, TradeStatus::Observed);
        assert!(orchestrator.demote_to_observed(pair.id).await.unwrap());
        assert!(!orchestrator.demote_to_observed(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn only_trading_pairs_are_demoted() {
        let harness = Harness::new();
        let pair = selected_pair("AAA", "BBB", 2.5);
        harness.repository.insert(pair.clone());
        let orchestrator = Orchestrator::new(harness.collaborators());

        let err = orchestrator.demote_to_observed(pair.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));
        assert_eq!(harness.repository.all()[0].status, TradeStatus::Selected);
    }

    #[tokio::test]
    async fn repository_failure_is_a_hard_error() {
        let harness = Harness::new();
        let pair = trading_pair("AAA", "BBB");
        harness.repository.insert(pair.clone());
        harness.repository.fail_writes();
        let orchestrator = Orchestrator::new(harness.collaborators());

        let err = orchestrator.demote_to_observed(pair.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Repository { .. }));
    }
}
