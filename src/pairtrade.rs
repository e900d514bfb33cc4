use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

use crate::config::OrchestratorConfig;
use crate::email_client::EmailClient;
use crate::market_data::{CandleService, RateLimiter};
use crate::orchestrator::Orchestrator;
use crate::ports::http_statistics::HttpStatisticsClient;
use crate::ports::json_repository::JsonPairRepository;
use crate::ports::okx_candles::OkxCandleApi;
use crate::ports::rate_limited_candle_api::RateLimitedCandleApi;
use crate::ports::replay_candles::ReplayCandleApi;
use crate::ports::reporting_candle_api::ReportingCandleApi;
use crate::ports::CandleApi;
use crate::rate_limit_notifier::set_rate_limit_mail_enabled;
use crate::scheduler::{
    AtomicRunGuard, DiscoverPairsJob, MaintainPairsJob, RunGuard, UpdateTradesJob, WorkerPool,
};
use crate::settings::{FileSettingsStore, SettingsStore};
use crate::trade::averaging::DrawdownAveraging;
use crate::trade::execution::PaperTradingProvider;
use crate::trade::exit_strategy::RuleBasedExitStrategy;
use crate::trade::history::TradeHistory;
use crate::trade::notify::TradeNotifier;
use crate::trade::processors::Collaborators;

/// Wires the collaborators and drives the periodic jobs.
pub struct PairTradeEngine {
    cfg: OrchestratorConfig,
    replay: Option<Arc<ReplayCandleApi>>,
    pool: Arc<WorkerPool>,
    update_job: Arc<UpdateTradesJob>,
    maintain_job: Arc<MaintainPairsJob>,
    discover_job: Arc<DiscoverPairsJob>,
}

impl PairTradeEngine {
    pub async fn new(cfg: OrchestratorConfig) -> Result<Self> {
        if !cfg.dry_run {
            bail!("only paper execution is available, set DRY_RUN=true");
        }

        let settings = Arc::new(
            FileSettingsStore::open(&cfg.settings_file).context("failed to load settings")?,
        );

        let (raw_api, replay): (Arc<dyn CandleApi>, Option<Arc<ReplayCandleApi>>) =
            match cfg.replay_file.as_deref() {
                Some(file) => {
                    let replay = Arc::new(ReplayCandleApi::open(file)?);
                    // Start with a full lookback already visible.
                    replay.skip_to(settings.current().candle_limit.saturating_sub(1));
                    (replay.clone(), Some(replay))
                }
                None => {
                    let okx = OkxCandleApi::new(&cfg.okx_endpoint, cfg.http_timeout())
                        .context("failed to initialize OKX client")?;
                    (Arc::new(okx), None)
                }
            };
        // One limiter for candle fetches and paper price polls alike.
        let limiter = Arc::new(RateLimiter::new(cfg.fetch_min_interval()));
        let limited: Arc<dyn CandleApi> = Arc::new(RateLimitedCandleApi::new(raw_api, limiter));
        let api: Arc<dyn CandleApi> = Arc::new(ReportingCandleApi::new(limited));
        set_rate_limit_mail_enabled(cfg.notifications_enabled);

        let mut candles = CandleService::new(api.clone(), cfg.fetcher());
        if replay.as_ref().is_some_and(|replay| !replay.has_volume()) {
            log::info!("[BACKTEST] replay dump has no volumes, volume filter off");
            candles = candles.without_volume_filter();
        }

        let statistics = HttpStatisticsClient::new(&cfg.statistics_endpoint, cfg.http_timeout())
            .context("failed to initialize statistics client")?;
        let repository =
            JsonPairRepository::open(&cfg.pairs_file).context("failed to open pair store")?;
        let history = match cfg.trade_history_file.as_deref() {
            Some(path) => TradeHistory::new(path),
            None => TradeHistory::disabled(),
        };

        let collaborators = Collaborators {
            settings,
            candles: Arc::new(candles),
            statistics: Arc::new(statistics),
            trading: Arc::new(PaperTradingProvider::new(api, cfg.paper_balance)),
            repository: Arc::new(repository),
            exit_policy: Arc::new(RuleBasedExitStrategy),
            averaging: Arc::new(DrawdownAveraging),
            history: Arc::new(history),
            notifier: Arc::new(notifier(&cfg)),
        };
        let orchestrator = Arc::new(Orchestrator::new(collaborators));

        let update_guard: Arc<dyn RunGuard> = Arc::new(AtomicRunGuard::new("update-trades"));
        let maintain_guard: Arc<dyn RunGuard> = Arc::new(AtomicRunGuard::new("maintain-pairs"));
        let discover_guard: Arc<dyn RunGuard> = Arc::new(AtomicRunGuard::new("discover-pairs"));
        let pool = Arc::new(WorkerPool::new("update-trades", cfg.update_pool_size));

        let update_job = UpdateTradesJob::new(
            orchestrator.clone(),
            update_guard.clone(),
            pool.clone(),
            cfg.update_deadline(),
        )
        .with_peers(vec![maintain_guard.clone()]);
        let maintain_job = MaintainPairsJob::new(orchestrator.clone(), maintain_guard)
            .with_peers(vec![update_guard]);
        let discover_job = DiscoverPairsJob::new(orchestrator, discover_guard);

        Ok(Self {
            cfg,
            replay,
            pool,
            update_job: Arc::new(update_job),
            maintain_job: Arc::new(maintain_job),
            discover_job: Arc::new(discover_job),
        })
    }

    pub async fn run(&self) -> Result<()> {
        log::info!(
            "[CONFIG] dry_run={} source={} statistics={} pairs={}",
            self.cfg.dry_run,
            self.cfg
                .replay_file
                .as_deref()
                .unwrap_or(self.cfg.okx_endpoint.as_str()),
            self.cfg.statistics_endpoint,
            self.cfg.pairs_file
        );
        log::info!(
            "[CONFIG] update every {}s (pool {}, deadline {}s), maintain every {}s, discover every {}s",
            self.cfg.update_interval_secs,
            self.pool.size(),
            self.cfg.update_deadline_secs,
            self.cfg.maintain_interval_secs,
            self.cfg.discover_interval_secs
        );

        if let Some(replay) = &self.replay {
            log::info!("[BACKTEST] Running against replayed market data.");
            loop {
                self.run_all_once().await;
                if !replay.tick() {
                    log::info!("[BACKTEST] End of data file reached. Backtest finished.");
                    break;
                }
            }
            self.pool.close();
            return Ok(());
        }

        log::info!("[LIVE] Running in live mode.");
        sleep(Duration::from_secs(self.cfg.initial_delay_secs)).await;
        let mut update_tick = every(self.cfg.update_interval_secs);
        let mut maintain_tick = every(self.cfg.maintain_interval_secs);
        let mut discover_tick = every(self.cfg.discover_interval_secs);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = update_tick.tick() => {
                    let job = self.update_job.clone();
                    tokio::spawn(async move {
                        if let Err(err) = job.run_once().await {
                            log::error!("[SCHED] update-trades tick failed: {:?}", err);
                        }
                    });
                }
                _ = maintain_tick.tick() => {
                    let job = self.maintain_job.clone();
                    tokio::spawn(async move {
                        if let Err(err) = job.run_once().await {
                            log::error!("[SCHED] maintain-pairs tick failed: {:?}", err);
                        }
                    });
                }
                _ = discover_tick.tick() => {
                    let job = self.discover_job.clone();
                    tokio::spawn(async move {
                        if let Err(err) = job.run_once().await {
                            log::error!("[SCHED] discover-pairs tick failed: {:?}", err);
                        }
                    });
                }
                _ = &mut shutdown => {
                    log::info!("[LIVE] shutdown requested");
                    self.pool.close();
                    break;
                }
            }
        }
        Ok(())
    }

    /// One pass of every job, in order, for replayed data.
    async fn run_all_once(&self) {
        if let Err(err) = self.discover_job.run_once().await {
            log::error!("[BACKTEST] discover-pairs failed: {:?}", err);
        }
        if let Err(err) = self.maintain_job.run_once().await {
            log::error!("[BACKTEST] maintain-pairs failed: {:?}", err);
        }
        if let Err(err) = self.update_job.run_once().await {
            log::error!("[BACKTEST] update-trades failed: {:?}", err);
        }
    }
}

fn every(secs: u64) -> tokio::time::Interval {
    let mut ticker = interval(Duration::from_secs(secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

fn notifier(cfg: &OrchestratorConfig) -> TradeNotifier {
    if !cfg.notifications_enabled {
        return TradeNotifier::new(None, cfg.agent_name.clone());
    }
    let email = EmailClient::new();
    if !email.is_configured() {
        log::warn!("[NOTIFY] notifications enabled but SMTP is not configured");
        return TradeNotifier::new(None, cfg.agent_name.clone());
    }
    TradeNotifier::new(Some(email), cfg.agent_name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pair::{Pair, TradeStatus};
    use std::io::Write;

    #[tokio::test]
    async fn live_execution_is_refused() {
        let cfg = OrchestratorConfig {
            dry_run: false,
            ..OrchestratorConfig::default()
        };
        let err = PairTradeEngine::new(cfg).await.err().unwrap();
        assert!(err.to_string().contains("DRY_RUN"));
    }

    #[tokio::test]
    async fn replay_without_statistics_finishes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let replay_path = dir.path().join("replay.jsonl");
        let mut replay = std::fs::File::create(&replay_path).unwrap();
        for i in 0..3 {
            writeln!(
                replay,
                r#"{{"timestamp":{},"prices":{{"AAA-USDT-SWAP":{{"price":1.0}},"BBB-USDT-SWAP":{{"price":2.0}}}}}}"#,
                1_700_000_000_000i64 + i * 3_600_000
            )
            .unwrap();
        }
        let settings_path = dir.path().join("settings.yaml");
        std::fs::write(&settings_path, "candle_limit: 2\n").unwrap();
        let pairs_path = dir.path().join("pairs.json");

        let cfg = OrchestratorConfig {
            replay_file: Some(replay_path.display().to_string()),
            settings_file: settings_path.display().to_string(),
            pairs_file: pairs_path.display().to_string(),
            trade_history_file: None,
            // Nothing listens here; discovery degrades to an empty result.
            statistics_endpoint: "http://127.0.0.1:9".to_string(),
            http_timeout_secs: 1,
            fetch_min_interval_ms: 0,
            fetch_batch_pause_ms: 0,
            ..OrchestratorConfig::default()
        };
        let engine = PairTradeEngine::new(cfg).await.unwrap();
        engine.run().await.unwrap();

        assert!(engine.pool.is_closed());
        let stored: Vec<Pair> = match std::fs::read_to_string(&pairs_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap(),
            Err(_) => Vec::new(),
        };
        assert!(stored.iter().all(|pair| pair.status != TradeStatus::Trading));
    }
}
