use anyhow::{Context, Result};
use std::sync::Arc;

use crate::orchestrator::Orchestrator;
use crate::outcome::Outcome;
use crate::pair::{PairKind, TradeStatus};
use crate::scheduler::run_guard::{try_enter, RunGuard};
use crate::trade::processors::{CandidateContext, FetchCandidatesRequest, StartTradeRequest};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintainReport {
    pub missing: usize,
    pub candidates: usize,
    pub opened: usize,
    pub rejected: usize,
}

/// Tops the number of TRADING pairs back up to the configured cap.
pub struct MaintainPairsJob {
    orchestrator: Arc<Orchestrator>,
    guard: Arc<dyn RunGuard>,
    peers: Vec<Arc<dyn RunGuard>>,
}

impl MaintainPairsJob {
    pub fn new(orchestrator: Arc<Orchestrator>, guard: Arc<dyn RunGuard>) -> Self {
        Self {
            orchestrator,
            guard,
            peers: Vec::new(),
        }
    }

    pub fn with_peers(mut self, peers: Vec<Arc<dyn RunGuard>>) -> Self {
        self.peers = peers;
        self
    }

    pub async fn run_once(&self) -> Result<Option<MaintainReport>> {
        let Some(_permit) = try_enter(&self.guard, &self.peers) else {
            return Ok(None);
        };

        let settings = self.orchestrator.settings();
        let mut report = MaintainReport::default();
        if !settings.auto_trading_enabled {
            log::debug!("[SCHED] {}: auto-trading off", self.guard.name());
            return Ok(Some(report));
        }

        let repository = self.orchestrator.repository();
        let trading = repository
            .find_by_status_in(&[TradeStatus::Trading])
            .await
            .context("failed to count trading pairs")?
            .len();
        report.missing = settings.use_pairs.saturating_sub(trading);
        if report.missing == 0 {
            log::debug!(
                "[SCHED] {}: {} of {} slots in use",
                self.guard.name(),
                trading,
                settings.use_pairs
            );
            return Ok(Some(report));
        }

        let stale = repository
            .delete_by_status(PairKind::Trading, TradeStatus::Selected)
            .await
            .context("failed to clear stale selections")?;
        if stale > 0 {
            log::debug!("[SCHED] {} stale SELECTED pairs removed", stale);
        }

        let candidates = self
            .orchestrator
            .fetch_candidates(FetchCandidatesRequest {
                count: Some(report.missing),
                context: CandidateContext::PreTrade,
            })
            .await;
        report.candidates = candidates.len();

        // One at a time: every start draws on the same free margin.
        for pair in candidates {
            if let Err(err) = repository.save(&pair).await {
                log::warn!("[SCHED] cannot persist candidate {}: {:#}", pair.name(), err);
                continue;
            }
            let name = pair.name();
            match self
                .orchestrator
                .start_trade(StartTradeRequest {
                    pair,
                    check_auto_trading: true,
                })
                .await
            {
                Ok(Outcome::Done(pair)) if pair.status == TradeStatus::Trading => {
                    report.opened += 1
                }
                Ok(_) => report.rejected += 1,
                Err(err) => {
                    log::error!("[SCHED] start of {} failed: {}", name, err);
                    report.rejected += 1;
                }
            }
        }

        log::info!(
            "[SCHED] {}: {} missing, {} candidates, {} opened, {} rejected",
            self.guard.name(),
            report.missing,
            report.candidates,
            report.opened,
            report.rejected
        );
        Ok(Some(report))
    }
}
