// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Client seam to the remote latency predictor.
//!
//! `Predict` sits on the hot path of response observation; callers impose
//! their own deadline via the ambient cancellation token and must treat every
//! failure as recoverable. `AddTrainingDataBulk` is fire-and-forget from the
//! request's perspective: errors are logged and dropped, never surfaced to
//! the gateway.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Feature vector for one prediction call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub kv_cache_percentage: f64,
    pub input_token_length: usize,
    pub num_request_waiting: usize,
    pub num_request_running: usize,
    /// 0 when predicting TTFT; the current generated count for TPOT.
    pub num_tokens_generated: usize,
}

/// Predicted latencies in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub ttft_ms: f64,
    pub tpot_ms: f64,
}

/// One observed latency sample. For TTFT samples `actual_tpot_ms` and
/// `num_tokens_generated` are 0; for TPOT samples `actual_ttft_ms` is 0 and
/// `num_tokens_generated` is the count *before* the observed token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingEntry {
    pub kv_cache_percentage: f64,
    pub input_token_length: usize,
    pub actual_ttft_ms: f64,
    pub actual_tpot_ms: f64,
    pub num_request_waiting: usize,
    pub num_request_running: usize,
    pub num_tokens_generated: usize,
    /// Wall-clock sample time, epoch milliseconds.
    pub timestamp_ms: u64,
}

/// Epoch milliseconds for stamping training entries.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Remote latency predictor. Implementations must be safe for concurrent
/// calls from many request tasks.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, request: PredictionRequest) -> anyhow::Result<Prediction>;

    async fn add_training_data_bulk(&self, entries: Vec<TrainingEntry>) -> anyhow::Result<()>;
}

#[derive(Serialize, Deserialize, Builder, Debug, Clone)]
pub struct HttpPredictorConfig {
    /// Base URL of the predictor service, e.g. `http://latency-predictor:8001`.
    pub base_url: String,

    /// Per-call timeout. This bounds the prediction RPC itself; request
    /// cancellation additionally aborts in-flight calls.
    #[serde(default = "default_timeout", with = "serde_millis")]
    #[builder(default = "default_timeout()")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_millis(500)
}

/// Serialize the timeout as integer milliseconds.
mod serde_millis {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

impl HttpPredictorConfig {
    pub fn builder() -> HttpPredictorConfigBuilder {
        HttpPredictorConfigBuilder::default()
    }
}

/// JSON-over-HTTP predictor client.
pub struct HttpPredictor {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct BulkTrainingRequest<'a> {
    entries: &'a [TrainingEntry],
}

impl HttpPredictor {
    pub fn new(config: HttpPredictorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(&self, request: PredictionRequest) -> anyhow::Result<Prediction> {
        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<Prediction>().await?)
    }

    async fn add_training_data_bulk(&self, entries: Vec<TrainingEntry>) -> anyhow::Result<()> {
        self.client
            .post(format!("{}/add_training_data_bulk", self.base_url))
            .json(&BulkTrainingRequest { entries: &entries })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_entry_serializes_all_features() {
        let entry = TrainingEntry {
            kv_cache_percentage: 0.5,
            input_token_length: 12,
            actual_ttft_ms: 120.0,
            actual_tpot_ms: 0.0,
            num_request_waiting: 2,
            num_request_running: 3,
            num_tokens_generated: 0,
            timestamp_ms: 1,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["kv_cache_percentage"], 0.5);
        assert_eq!(value["actual_ttft_ms"], 120.0);
        assert_eq!(value["num_tokens_generated"], 0);
    }

    #[test]
    fn test_http_config_defaults() {
        let config = HttpPredictorConfig::builder()
            .base_url("http://predictor:8001".to_string())
            .build()
            .unwrap();
        assert_eq!(config.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let predictor = HttpPredictor::new(HttpPredictorConfig {
            base_url: "http://predictor:8001/".to_string(),
            timeout: Duration::from_millis(100),
        })
        .unwrap();
        assert_eq!(predictor.base_url, "http://predictor:8001");
    }
}
