use anyhow::{Context, Result};
use std::sync::Arc;

use crate::orchestrator::Orchestrator;
use crate::pair::{PairKind, TradeStatus};
use crate::scheduler::run_guard::{try_enter, RunGuard};
use crate::trade::processors::{CandidateContext, FetchCandidatesRequest};

/// Refreshes the FOUND list. Previous rows are kept when a scan finds nothing.
pub struct DiscoverPairsJob {
    orchestrator: Arc<Orchestrator>,
    guard: Arc<dyn RunGuard>,
}

impl DiscoverPairsJob {
    pub fn new(orchestrator: Arc<Orchestrator>, guard: Arc<dyn RunGuard>) -> Self {
        Self {
            orchestrator,
            guard,
        }
    }

    /// Number of FOUND pairs stored, `None` when skipped.
    pub async fn run_once(&self) -> Result<Option<usize>> {
        let Some(_permit) = try_enter(&self.guard, &[]) else {
            return Ok(None);
        };

        let found = self
            .orchestrator
            .fetch_candidates(FetchCandidatesRequest {
                count: None,
                context: CandidateContext::Discovery,
            })
            .await;
        if found.is_empty() {
            log::info!("[SCHED] {}: nothing found, list kept", self.guard.name());
            return Ok(Some(0));
        }

        let repository = self.orchestrator.repository();
        let replaced = repository
            .delete_by_status(PairKind::Cointegrated, TradeStatus::Found)
            .await
            .context("failed to clear previous discoveries")?;
        let mut stored = 0;
        for pair in &found {
            match repository.save(pair).await {
                Ok(()) => stored += 1,
                Err(err) => log::warn!("[SCHED] cannot store {}: {:#}", pair.name(), err),
            }
        }
        log::info!(
            "[SCHED] {}: {} pairs stored, {} replaced",
            self.guard.name(),
            stored,
            replaced
        );
        Ok(Some(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pair::Pair;
    use crate::scheduler::run_guard::AtomicRunGuard;
    use crate::testing::{candle_set, score, Harness};
    use chrono::Utc;

    fn job(harness: &Harness) -> DiscoverPairsJob {
        DiscoverPairsJob::new(
            Arc::new(Orchestrator::new(harness.collaborators())),
            Arc::new(AtomicRunGuard::new("discover-pairs")),
        )
    }

    fn found(long: &str, short: &str) -> Pair {
        Pair::from_score(
            &score(long, short, 2.2),
            PairKind::Cointegrated,
            TradeStatus::Found,
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn new_scan_replaces_found_rows() {
        let harness = Harness::new();
        let old = found("OLD1", "OLD2");
        harness.repository.insert(old.clone());
        harness.candles.set_universe(candle_set(&[
            ("AAA", 10.0),
            ("BBB", 20.0),
            ("CCC", 5.0),
            ("DDD", 8.0),
        ]));
        harness.statistics.set_scores(vec![
            score("AAA", "BBB", 2.6),
            score("CCC", "DDD", 2.1),
        ]);

        assert_eq!(job(&harness).run_once().await.unwrap(), Some(2));
        let stored = harness.repository.all();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|pair| pair.id != old.id));
        assert!(stored
            .iter()
            .all(|pair| pair.status == TradeStatus::Found && pair.kind == PairKind::Cointegrated));
    }

    #[tokio::test]
    async fn empty_scan_keeps_previous_rows() {
        let harness = Harness::new();
        let old = found("OLD1", "OLD2");
        harness.repository.insert(old.clone());

        assert_eq!(job(&harness).run_once().await.unwrap(), Some(0));
        assert_eq!(harness.repository.all(), vec![old]);
    }
}
