// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics for the request director.
//!
//! Eagerly created via `LazyLock` so they gather as zeros before any request
//! arrives; callers opt in to exposure with [`register_director_metrics`].

use std::sync::LazyLock;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts};

/// Log-spaced buckets from `min` to `max` inclusive.
fn log_buckets(min: f64, max: f64, count: usize) -> Vec<f64> {
    let factor = (max / min).powf(1.0 / (count as f64 - 1.0));
    prometheus::exponential_buckets(min, factor, count)
        .expect("exponential buckets should not fail")
}

/// Per-request aggregate metrics observed at the director level.
pub struct DirectorMetrics {
    pub requests_total: IntCounter,
    /// Surfaced failures, labelled by immediate-response status code.
    pub request_errors_total: IntCounterVec,
    pub time_to_first_token_seconds: Histogram,
    pub inter_token_latency_seconds: Histogram,
    pub input_sequence_tokens: Histogram,
    pub output_sequence_tokens: Histogram,
}

pub static DIRECTOR_METRICS: LazyLock<DirectorMetrics> = LazyLock::new(|| DirectorMetrics {
    requests_total: IntCounter::new(
        "dynamo_epp_requests_total",
        "Total number of requests processed by the director",
    )
    .expect("failed to create dynamo_epp_requests_total"),
    request_errors_total: IntCounterVec::new(
        Opts::new(
            "dynamo_epp_request_errors_total",
            "Requests rejected with an immediate response, by status code",
        ),
        &["status"],
    )
    .expect("failed to create dynamo_epp_request_errors_total"),
    time_to_first_token_seconds: Histogram::with_opts(
        HistogramOpts::new(
            "dynamo_epp_time_to_first_token_seconds",
            "Time to first token observed at the director",
        )
        .buckets(log_buckets(0.001, 480.0, 18)),
    )
    .expect("failed to create dynamo_epp_time_to_first_token_seconds"),
    inter_token_latency_seconds: Histogram::with_opts(
        HistogramOpts::new(
            "dynamo_epp_inter_token_latency_seconds",
            "Inter-token latency observed at the director",
        )
        .buckets(log_buckets(0.001, 2.0, 13)),
    )
    .expect("failed to create dynamo_epp_inter_token_latency_seconds"),
    input_sequence_tokens: Histogram::with_opts(
        HistogramOpts::new(
            "dynamo_epp_input_sequence_tokens",
            "Prompt tokens reported by the backend usage object",
        )
        .buckets(log_buckets(50.0, 128000.0, 12)),
    )
    .expect("failed to create dynamo_epp_input_sequence_tokens"),
    output_sequence_tokens: Histogram::with_opts(
        HistogramOpts::new(
            "dynamo_epp_output_sequence_tokens",
            "Completion tokens reported by the backend usage object",
        )
        .buckets(log_buckets(50.0, 32000.0, 10)),
    )
    .expect("failed to create dynamo_epp_output_sequence_tokens"),
});

/// Register the director metrics with the given Prometheus registry.
pub fn register_director_metrics(
    registry: &prometheus::Registry,
) -> Result<(), prometheus::Error> {
    let m = &*DIRECTOR_METRICS;
    registry.register(Box::new(m.requests_total.clone()))?;
    registry.register(Box::new(m.request_errors_total.clone()))?;
    registry.register(Box::new(m.time_to_first_token_seconds.clone()))?;
    registry.register(Box::new(m.inter_token_latency_seconds.clone()))?;
    registry.register(Box::new(m.input_sequence_tokens.clone()))?;
    registry.register(Box::new(m.output_sequence_tokens.clone()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_log_buckets_monotonic() {
        let buckets = log_buckets(0.001, 480.0, 18);
        assert_eq!(buckets.len(), 18);
        assert!(buckets.windows(2).all(|w| w[0] < w[1]));
        assert!((buckets[0] - 0.001).abs() < 1e-9);
        assert!((buckets[17] - 480.0).abs() < 1.0);
    }

    #[test]
    fn test_register_and_gather() {
        let registry = prometheus::Registry::new();
        register_director_metrics(&registry).unwrap();

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&registry.gather(), &mut buffer).unwrap();
        let output = String::from_utf8(buffer).unwrap();
        assert!(output.contains("# TYPE dynamo_epp_requests_total counter"));
        assert!(output.contains("# TYPE dynamo_epp_time_to_first_token_seconds histogram"));
    }
}
