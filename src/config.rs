// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tunables shared across the director and stream handlers.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Mean interval (in tokens) between prediction samples.
pub const DEFAULT_SAMPLING_MEAN: f64 = 50.0;

/// Maximum number of prediction samples per request.
pub const DEFAULT_MAX_SAMPLED_TOKENS: usize = 50;

/// Upper bound on the size of a single body chunk sent back to the gateway.
pub const DEFAULT_BODY_BYTE_LIMIT: usize = 64 * 1024;

/// Default KV cache utilization (0.0 to 1.0) threshold for saturation.
pub const DEFAULT_KV_CACHE_THRESHOLD: f64 = 0.8;

/// Default backend waiting queue size threshold for saturation.
pub const DEFAULT_QUEUE_THRESHOLD_CRITICAL: usize = 5;

/// Weight used for scorers configured without an explicit weight.
pub const DEFAULT_SCORER_WEIGHT: f64 = 1.0;

/// Configuration for the request director and its stream handlers.
#[derive(Serialize, Deserialize, Builder, Validate, Debug, Clone)]
pub struct DirectorConfig {
    /// Poisson mean interval, in output tokens, between sampled TPOT
    /// predictions. Training submissions are unconditional and unaffected.
    #[serde(default = "default_sampling_mean")]
    #[builder(default = "DEFAULT_SAMPLING_MEAN")]
    #[validate(range(min = 1.0))]
    pub sampling_mean: f64,

    /// Cap on sampled predictions per request. The forced first-token TPOT
    /// prediction is not counted against this cap.
    #[serde(default = "default_max_sampled_tokens")]
    #[builder(default = "DEFAULT_MAX_SAMPLED_TOKENS")]
    pub max_sampled_tokens: usize,

    /// Per-chunk byte limit for body frames re-emitted to the gateway.
    #[serde(default = "default_body_byte_limit")]
    #[builder(default = "DEFAULT_BODY_BYTE_LIMIT")]
    #[validate(range(min = 1))]
    pub body_byte_limit: usize,

    /// KV cache utilization above which a pod counts toward saturation.
    #[serde(default = "default_kv_cache_threshold")]
    #[builder(default = "DEFAULT_KV_CACHE_THRESHOLD")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub kv_cache_threshold: f64,

    /// Waiting queue depth above which a pod counts toward saturation.
    #[serde(default = "default_queue_threshold_critical")]
    #[builder(default = "DEFAULT_QUEUE_THRESHOLD_CRITICAL")]
    pub queue_threshold_critical: usize,

    /// Weight applied to the waiting-queue term of the default scheduler.
    #[serde(default = "default_scorer_weight")]
    #[builder(default = "DEFAULT_SCORER_WEIGHT")]
    pub scorer_weight: f64,
}

fn default_sampling_mean() -> f64 {
    DEFAULT_SAMPLING_MEAN
}

fn default_max_sampled_tokens() -> usize {
    DEFAULT_MAX_SAMPLED_TOKENS
}

fn default_body_byte_limit() -> usize {
    DEFAULT_BODY_BYTE_LIMIT
}

fn default_kv_cache_threshold() -> f64 {
    DEFAULT_KV_CACHE_THRESHOLD
}

fn default_queue_threshold_critical() -> usize {
    DEFAULT_QUEUE_THRESHOLD_CRITICAL
}

fn default_scorer_weight() -> f64 {
    DEFAULT_SCORER_WEIGHT
}

impl DirectorConfig {
    pub fn builder() -> DirectorConfigBuilder {
        DirectorConfigBuilder::default()
    }
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("builder defaults are complete")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DirectorConfig::default();
        assert_eq!(config.sampling_mean, 50.0);
        assert_eq!(config.max_sampled_tokens, 50);
        assert_eq!(config.body_byte_limit, 64 * 1024);
        assert_eq!(config.kv_cache_threshold, 0.8);
        assert_eq!(config.queue_threshold_critical, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = DirectorConfig::builder()
            .sampling_mean(10.0)
            .max_sampled_tokens(5)
            .body_byte_limit(1024)
            .build()
            .unwrap();
        assert_eq!(config.sampling_mean, 10.0);
        assert_eq!(config.max_sampled_tokens, 5);
        assert_eq!(config.body_byte_limit, 1024);
    }

    #[test]
    fn test_validation_rejects_bad_threshold() {
        let config = DirectorConfig::builder()
            .kv_cache_threshold(1.5)
            .build()
            .unwrap();
        assert!(config.validate().is_err());
    }
}
