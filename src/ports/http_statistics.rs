use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::market_data::candle::CandleSet;
use crate::ports::StatisticsClient;
use crate::settings::Settings;
use crate::statistics::ScoreResult;

/// Thresholds the engine filters on.
#[derive(Debug, Serialize)]
struct ScoreCriteria {
    min_correlation: f64,
    max_p_value: f64,
    max_adf_p_value: f64,
    min_r_squared: f64,
    min_z: f64,
}

impl From<&Settings> for ScoreCriteria {
    fn from(settings: &Settings) -> Self {
        Self {
            min_correlation: settings.min_correlation,
            max_p_value: settings.max_p_value,
            max_adf_p_value: settings.max_adf_p_value,
            min_r_squared: settings.min_r_squared,
            min_z: settings.min_z,
        }
    }
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    /// Ticker order is significant: it fixes the sign of the spread.
    candles: &'a CandleSet,
    criteria: ScoreCriteria,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
}

/// Client for the statistics service speaking JSON over HTTP.
pub struct HttpStatisticsClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatisticsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, request: &ScoreRequest<'_>) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("statistics request {} failed", path))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("statistics HTTP {} from {}: {}", status.as_u16(), path, body));
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("invalid statistics response from {}", path))
    }
}

#[async_trait]
impl StatisticsClient for HttpStatisticsClient {
    async fn score_all(
        &self,
        candles: &CandleSet,
        settings: &Settings,
        count: usize,
    ) -> Result<Vec<ScoreResult>> {
        let request = ScoreRequest {
            candles,
            criteria: settings.into(),
            count: Some(count),
        };
        let scores: Vec<ScoreResult> = self.post("/score", &request).await?;
        log::debug!(
            "[STATS] {} scores for {} tickers",
            scores.len(),
            candles.len()
        );
        Ok(scores)
    }

    async fn score_pair(
        &self,
        candles: &CandleSet,
        settings: &Settings,
    ) -> Result<Option<ScoreResult>> {
        let request = ScoreRequest {
            candles,
            criteria: settings.into(),
            count: None,
        };
        self.post("/score-pair", &request).await
    }
}
