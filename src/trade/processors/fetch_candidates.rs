use chrono::Utc;
use std::collections::HashSet;

use crate::pair::{Pair, PairKind, TradeStatus};
use crate::ports::used_tickers;
use crate::trade::processors::Collaborators;

/// Which pipeline the candidates are for; decides their kind and status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateContext {
    /// Periodic discovery: rows are listed as FOUND.
    Discovery,
    /// Feeding StartTrade: rows are SELECTED and must not share tickers.
    PreTrade,
}

impl CandidateContext {
    fn kind_and_status(self) -> (PairKind, TradeStatus) {
        match self {
            CandidateContext::Discovery => (PairKind::Cointegrated, TradeStatus::Found),
            CandidateContext::PreTrade => (PairKind::Trading, TradeStatus::Selected),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchCandidatesRequest {
    /// Defaults to the configured pair cap.
    pub count: Option<usize>,
    pub context: CandidateContext,
}

pub struct FetchCandidatesProcessor {
    c: Collaborators,
}

impl FetchCandidatesProcessor {
    pub fn new(c: Collaborators) -> Self {
        Self { c }
    }

    /// Ranked candidate pairs, not persisted. Every failure on the way is
    /// logged and ends in an empty (or shorter) list.
    pub async fn process(&self, request: FetchCandidatesRequest) -> Vec<Pair> {
        let settings = self.c.settings.current();
        let count = request.count.unwrap_or(settings.use_pairs);
        if count == 0 {
            return Vec::new();
        }

        let used = match used_tickers(self.c.repository.as_ref()).await {
            Ok(used) => used,
            Err(err) => {
                log::warn!("[FETCH] cannot load used tickers: {:#}", err);
                return Vec::new();
            }
        };
        let mut exclude: HashSet<String> = used;
        exclude.extend(settings.minimum_lot_blacklist.iter().cloned());

        let candles = match self.c.candles.universe_except(&settings, &exclude).await {
            Ok(candles) => candles,
            Err(err) => {
                log::warn!("[FETCH] candle fetch failed: {:#}", err);
                return Vec::new();
            }
        };
        if candles.is_empty() {
            log::info!("[FETCH] no candles available, nothing to score");
            return Vec::new();
        }

        let scores = match self.c.statistics.score_all(&candles, &settings, count).await {
            Ok(scores) => scores,
            Err(err) => {
                log::warn!("[FETCH] scoring failed: {:#}", err);
                return Vec::new();
            }
        };
        if scores.is_empty() {
            log::info!("[FETCH] statistics returned no candidates");
            return Vec::new();
        }

        let (kind, status) = request.context.kind_and_status();
        let now = Utc::now();
        let mut taken: HashSet<String> = HashSet::new();
        let mut pairs = Vec::new();
        for score in scores {
            if pairs.len() >= count {
                break;
            }
            let (Some(long_close), Some(short_close)) = (
                candles.last_close(&score.long_ticker),
                candles.last_close(&score.short_ticker),
            ) else {
                log::warn!("[FETCH] {} has no candles, skipped", score.pair_name());
                continue;
            };
            if settings.use_min_intersections {
                if let Some(crossings) = score.z_crossings {
                    if crossings < settings.min_intersections {
                        log::debug!(
                            "[FETCH] {} crossed {} times (< {}), skipped",
                            score.pair_name(),
                            crossings,
                            settings.min_intersections
                        );
                        continue;
                    }
                }
            }
            if request.context == CandidateContext::PreTrade
                && (taken.contains(&score.long_ticker) || taken.contains(&score.short_ticker))
            {
                continue;
            }

            let mut pair = match Pair::from_score(&score, kind, status, now) {
                Ok(pair) => pair,
                Err(err) => {
                    log::warn!("[FETCH] {} rejected: {}", score.pair_name(), err);
                    continue;
                }
            };
            pair.long_entry_price = Some(long_close);
            pair.long_current_price = Some(long_close);
            pair.short_entry_price = Some(short_close);
            pair.short_current_price = Some(short_close);
            taken.insert(pair.long_ticker.clone());
            taken.insert(pair.short_ticker.clone());
            pairs.push(pair);
        }

        log::info!(
            "[FETCH] {} candidates ({:?}, requested {})",
            pairs.len(),
            request.context,
            count
        );
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::CandleSet;
    use crate::ports::PairRepository;
    use crate::settings::SettingsStore;
    use crate::testing::{candle_set, score, trading_pair, Harness};
    use rust_decimal_macros::dec;

    fn request(context: CandidateContext) -> FetchCandidatesRequest {
        FetchCandidatesRequest {
            count: None,
            context,
        }
    }

    #[tokio::test]
    async fn empty_candles_yield_no_candidates() {
        let harness = Harness::new();
        harness.candles.set_universe(CandleSet::new());
        let processor = FetchCandidatesProcessor::new(harness.collaborators());

        let pairs = processor.process(request(CandidateContext::Discovery)).await;
        assert!(pairs.is_empty());
        assert_eq!(harness.statistics.score_all_calls(), 0);
        assert_eq!(harness.repository.saves(), 0);
    }

    #[tokio::test]
    async fn builds_candidates_with_last_close_prices() {
        let harness = Harness::new();
        harness.candles.set_universe(candle_set(&[("AAA", 10.0), ("BBB", 20.0), ("CCC", 5.0)]));
        harness.statistics.set_scores(vec![
            score("AAA", "BBB", 2.4),
            score("CCC", "AAA", 2.2),
        ]);
        let processor = FetchCandidatesProcessor::new(harness.collaborators());

        let pairs = processor.process(request(CandidateContext::Discovery)).await;
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].status, TradeStatus::Found);
        assert_eq!(pairs[0].kind, PairKind::Cointegrated);
        assert_eq!(pairs[0].long_entry_price, Some(dec!(10)));
        assert_eq!(pairs[0].short_current_price, Some(dec!(20)));
        assert_eq!(pairs[0].current_z(), Some(2.4));
        assert_eq!(pairs[0].entry_z(), Some(2.4));
        assert_eq!(harness.repository.saves(), 0);
    }

    #[tokio::test]
    async fn excludes_used_and_blacklisted_tickers() {
        let harness = Harness::new();
        let mut settings = harness.settings.current();
        settings.minimum_lot_blacklist = vec!["BAD".to_string()];
        harness.settings.update(settings);
        let open = trading_pair("AAA", "BBB");
        harness.repository.save(&open).await.unwrap();
        harness.candles.set_universe(candle_set(&[("CCC", 1.0), ("DDD", 2.0)]));
        harness.statistics.set_scores(vec![score("CCC", "DDD", 2.1)]);

        let processor = FetchCandidatesProcessor::new(harness.collaborators());
        processor.process(request(CandidateContext::PreTrade)).await;

        let excluded = harness.candles.last_exclusion();
        assert!(excluded.contains("AAA"));
        assert!(excluded.contains("BBB"));
        assert!(excluded.contains("BAD"));
    }

    #[tokio::test]
    async fn pre_trade_candidates_do_not_share_tickers() {
        let harness = Harness::new();
        harness.candles.set_universe(candle_set(&[
            ("AAA", 1.0),
            ("BBB", 2.0),
            ("CCC", 3.0),
            ("DDD", 4.0),
        ]));
        harness.statistics.set_scores(vec![
            score("AAA", "BBB", 3.0),
            score("AAA", "CCC", 2.9),
            score("CCC", "DDD", 2.8),
        ]);
        let processor = FetchCandidatesProcessor::new(harness.collaborators());

        let pairs = processor
            .process(FetchCandidatesRequest {
                count: Some(5),
                context: CandidateContext::PreTrade,
            })
            .await;
        let names: Vec<String> = pairs.iter().map(Pair::name).collect();
        assert_eq!(names, vec!["AAA/BBB", "CCC/DDD"]);
        assert!(pairs.iter().all(|p| p.status == TradeStatus::Selected));
    }

    #[tokio::test]
    async fn missing_series_and_few_crossings_are_skipped() {
        let harness = Harness::new();
        let mut settings = harness.settings.current();
        settings.use_min_intersections = true;
        settings.min_intersections = 10;
        harness.settings.update(settings);
        harness.candles.set_universe(candle_set(&[("AAA", 1.0), ("BBB", 2.0), ("CCC", 3.0)]));
        let mut rare = score("BBB", "CCC", 2.5);
        rare.z_crossings = Some(3);
        harness.statistics.set_scores(vec![
            score("AAA", "ZZZ", 3.0),
            rare,
            score("AAA", "CCC", 2.1),
        ]);
        let processor = FetchCandidatesProcessor::new(harness.collaborators());

        let pairs = processor.process(request(CandidateContext::Discovery)).await;
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].name(), "AAA/CCC");
    }

    #[tokio::test]
    async fn scoring_failure_is_soft() {
        let harness = Harness::new();
        harness.candles.set_universe(candle_set(&[("AAA", 1.0), ("BBB", 2.0)]));
        harness.statistics.fail_with("engine down");
        let processor = FetchCandidatesProcessor::new(harness.collaborators());
        assert!(processor
            .process(request(CandidateContext::Discovery))
            .await
            .is_empty());
    }
}
