use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

use crate::orchestrator::Orchestrator;
use crate::outcome::{Outcome, SkipCause};
use crate::pair::TradeStatus;
use crate::scheduler::run_guard::{try_enter, RunGuard};
use crate::scheduler::worker_pool::{BatchReport, WorkerPool};
use crate::trade::processors::UpdateTradeRequest;

/// Periodic refresh of every open pair, one pool task per pair.
pub struct UpdateTradesJob {
    orchestrator: Arc<Orchestrator>,
    guard: Arc<dyn RunGuard>,
    peers: Vec<Arc<dyn RunGuard>>,
    pool: Arc<WorkerPool>,
    deadline: Duration,
}

impl UpdateTradesJob {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        guard: Arc<dyn RunGuard>,
        pool: Arc<WorkerPool>,
        deadline: Duration,
    ) -> Self {
        Self {
            orchestrator,
            guard,
            peers: Vec::new(),
            pool,
            deadline,
        }
    }

    /// Jobs this one must never overlap with.
    pub fn with_peers(mut self, peers: Vec<Arc<dyn RunGuard>>) -> Self {
        self.peers = peers;
        self
    }

    /// `None` when the tick was skipped.
    pub async fn run_once(&self) -> Result<Option<BatchReport>> {
        let Some(_permit) = try_enter(&self.guard, &self.peers) else {
            return Ok(None);
        };

        let pairs = self
            .orchestrator
            .repository()
            .find_by_status_in(&[TradeStatus::Trading, TradeStatus::Observed])
            .await
            .context("failed to load open pairs")?;

        let mut batch = self.pool.batch();
        for pair in pairs {
            let orchestrator = self.orchestrator.clone();
            let label = pair.name();
            batch.submit(label, async move {
                let outcome = orchestrator
                    .update_trade(UpdateTradeRequest {
                        pair,
                        close_manually: false,
                    })
                    .await?;
                match failure_of(&outcome) {
                    Some(failure) => Err(anyhow!(failure)),
                    None => Ok(()),
                }
            });
        }

        let report = batch.drain(Instant::now() + self.deadline).await;
        log::info!(
            "[SCHED] {}: {} pairs, {} ok, {} failed, {} cancelled",
            self.guard.name(),
            report.total,
            report.succeeded,
            report.failed,
            report.cancelled
        );
        Ok(Some(report))
    }
}

fn failure_of(outcome: &Outcome) -> Option<String> {
    match outcome {
        Outcome::Rejected { reason, .. } => Some(reason.description()),
        Outcome::Skipped {
            cause: SkipCause::Transient(cause),
            ..
        } => Some(cause.clone()),
        _ => None,
    }
}
