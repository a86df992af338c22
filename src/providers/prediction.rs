use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::SensorVector;

pub const DEFAULT_PREDICTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Label returned by a remote model. Advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
}

#[async_trait]
pub trait PredictionService: Send + Sync {
    async fn predict(&self, sample: &SensorVector) -> Result<Prediction>;
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    prediction: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpPredictionService {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpPredictionService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: format!("{}/predict/", base_url.trim_end_matches('/')),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PredictionService for HttpPredictionService {
    async fn predict(&self, sample: &SensorVector) -> Result<Prediction> {
        let response = self.client.post(&self.endpoint).json(sample).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            bail!("Prediction service error {}: {}", status, body);
        }

        let body: PredictResponse = response.json().await?;
        if let Some(error) = body.error {
            bail!("Prediction service rejected sample: {}", error);
        }
        body.prediction
            .map(|label| Prediction { label })
            .ok_or_else(|| anyhow!("Prediction service returned no prediction"))
    }
}
