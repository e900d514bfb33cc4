use serde::{Deserialize, Serialize};

/// Statistical view of a pair at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct StatSnapshot {
    pub z_score: f64,
    pub correlation: f64,
    pub coint_p_value: f64,
    pub adf_p_value: f64,
    pub r_squared: f64,
    #[serde(default)]
    pub is_cointegrated: bool,
    #[serde(default)]
    pub stable_periods: u32,
}

impl StatSnapshot {
    /// Cointegration still holds against the configured ceilings.
    pub fn still_cointegrated(&self, max_p_value: f64, max_adf_p_value: f64) -> bool {
        self.is_cointegrated
            && self.coint_p_value <= max_p_value
            && self.adf_p_value <= max_adf_p_value
    }
}

/// One ranked record returned by the statistics engine.
///
/// `long_ticker` is the statistically undervalued leg, `short_ticker` the
/// overvalued one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub long_ticker: String,
    pub short_ticker: String,
    #[serde(flatten)]
    pub stats: StatSnapshot,
    /// How many times the z-score crossed the entry band in the lookback.
    #[serde(default)]
    pub z_crossings: Option<u32>,
    /// Recent z-score values, oldest first.
    #[serde(default)]
    pub z_history: Vec<f64>,
}

impl ScoreResult {
    pub fn pair_name(&self) -> String {
        format!("{}/{}", self.long_ticker, self.short_ticker)
    }

    pub fn names_same_legs(&self, long_ticker: &str, short_ticker: &str) -> bool {
        self.long_ticker == long_ticker && self.short_ticker == short_ticker
    }

    /// The last `points` z-scores, each strictly below the one before.
    /// `None` when the history is shorter than `points`.
    pub fn z_declining(&self, points: usize) -> Option<bool> {
        let points = points.max(1);
        if self.z_history.len() < points {
            return None;
        }
        let recent = &self.z_history[self.z_history.len() - points..];
        Some(recent.windows(2).all(|pair| pair[1] < pair[0]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cointegration_requires_flag_and_both_p_values() {
        let stats = StatSnapshot {
            z_score: 2.5,
            correlation: 0.9,
            coint_p_value: 0.01,
            adf_p_value: 0.04,
            r_squared: 0.8,
            is_cointegrated: true,
            stable_periods: 3,
        };
        assert!(stats.still_cointegrated(0.05, 0.05));
        assert!(!stats.still_cointegrated(0.05, 0.01));
        let lost = StatSnapshot {
            is_cointegrated: false,
            ..stats
        };
        assert!(!lost.still_cointegrated(0.05, 0.05));
    }

    #[test]
    fn score_result_parses_flat_statistics() {
        let raw = r#"{
            "long_ticker": "ADA-USDT-SWAP",
            "short_ticker": "XRP-USDT-SWAP",
            "z_score": 2.7,
            "correlation": 0.91,
            "coint_p_value": 0.003,
            "adf_p_value": 0.02,
            "r_squared": 0.84,
            "is_cointegrated": true
        }"#;
        let parsed: ScoreResult = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.pair_name(), "ADA-USDT-SWAP/XRP-USDT-SWAP");
        assert!(parsed.stats.is_cointegrated);
        assert_eq!(parsed.z_crossings, None);
        assert!(parsed.z_history.is_empty());
        assert!(parsed.names_same_legs("ADA-USDT-SWAP", "XRP-USDT-SWAP"));
        assert!(!parsed.names_same_legs("XRP-USDT-SWAP", "ADA-USDT-SWAP"));
    }

    #[test]
    fn decline_looks_only_at_the_latest_points() {
        let score = |history: Vec<f64>| ScoreResult {
            long_ticker: "A".to_string(),
            short_ticker: "B".to_string(),
            stats: StatSnapshot::default(),
            z_crossings: None,
            z_history: history,
        };
        let turning = score(vec![1.0, 3.1, 2.9, 2.6, 2.4]);
        assert_eq!(turning.z_declining(4), Some(true));
        assert_eq!(turning.z_declining(5), Some(false));
        assert_eq!(turning.z_declining(6), None);

        let flat = score(vec![2.5, 2.5, 2.4]);
        assert_eq!(flat.z_declining(3), Some(false));
    }
}
