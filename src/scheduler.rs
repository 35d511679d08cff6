// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scheduling seam and the default queue-aware pod selector.
//!
//! The director hands the scheduler a candidate pod set (already subset
//! filtered, metrics cloned) and expects a profile map back. Only the
//! primary profile is used for destination selection; secondary profiles are
//! carried through untouched for plugins.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::backend::PodMetrics;

/// Profile name used by schedulers that produce a single result.
pub const DEFAULT_PROFILE_NAME: &str = "default";

/// The request as seen by the scheduling layer.
#[derive(Debug, Clone)]
pub struct SchedulingRequest {
    pub request_id: String,
    pub target_model: String,
    pub prompt: String,
    pub headers: HashMap<String, String>,
}

/// Outcome of one scheduling profile.
#[derive(Debug, Clone)]
pub struct ProfileResult {
    pub target_pod: Option<PodMetrics>,
}

/// Scheduler output: per-profile results plus the profile that drives
/// destination selection.
#[derive(Debug, Clone)]
pub struct SchedulingResult {
    pub profile_results: HashMap<String, ProfileResult>,
    pub primary_profile_name: String,
}

impl SchedulingResult {
    /// Single-profile result under [`DEFAULT_PROFILE_NAME`].
    pub fn single(target_pod: PodMetrics) -> Self {
        Self {
            profile_results: HashMap::from([(
                DEFAULT_PROFILE_NAME.to_string(),
                ProfileResult {
                    target_pod: Some(target_pod),
                },
            )]),
            primary_profile_name: DEFAULT_PROFILE_NAME.to_string(),
        }
    }

    /// The primary profile's target pod, if the result is well formed.
    pub fn primary_pod(&self) -> Option<&PodMetrics> {
        self.profile_results
            .get(&self.primary_profile_name)
            .and_then(|profile| profile.target_pod.as_ref())
    }
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Pick a target among `candidates`. Errors mean no pod can take the
    /// request right now; the director maps them to resource exhaustion.
    async fn schedule(
        &self,
        request: &SchedulingRequest,
        candidates: Vec<PodMetrics>,
    ) -> anyhow::Result<SchedulingResult>;
}

/// Default selector scoring pods by queue depth and KV cache occupancy.
///
/// `logit = scorer_weight * waiting_queue + kv_cache_usage`, lower is better;
/// ties break on the running queue.
pub struct QueueAwareScheduler {
    scorer_weight: f64,
}

impl QueueAwareScheduler {
    pub fn new(scorer_weight: f64) -> Self {
        Self { scorer_weight }
    }

    fn logit(&self, pod: &PodMetrics) -> f64 {
        self.scorer_weight * pod.metrics.waiting_queue_size as f64
            + pod.metrics.kv_cache_usage_percent
    }
}

#[async_trait]
impl Scheduler for QueueAwareScheduler {
    async fn schedule(
        &self,
        request: &SchedulingRequest,
        candidates: Vec<PodMetrics>,
    ) -> anyhow::Result<SchedulingResult> {
        let best = candidates
            .into_iter()
            .min_by(|a, b| {
                self.logit(a)
                    .total_cmp(&self.logit(b))
                    .then(a.metrics.running_queue_size.cmp(&b.metrics.running_queue_size))
            })
            .ok_or_else(|| anyhow::anyhow!("no candidate pods"))?;

        tracing::debug!(
            request_id = %request.request_id,
            pod = %best.pod.name,
            waiting = best.metrics.waiting_queue_size,
            kv_cache = best.metrics.kv_cache_usage_percent,
            "selected target pod"
        );
        Ok(SchedulingResult::single(best))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Metrics;

    fn pod(name: &str, waiting: usize, kv: f64, running: usize) -> PodMetrics {
        PodMetrics::new(
            name,
            format!("10.0.0.{}", name.len()),
            Metrics {
                kv_cache_usage_percent: kv,
                waiting_queue_size: waiting,
                running_queue_size: running,
            },
        )
    }

    fn request() -> SchedulingRequest {
        SchedulingRequest {
            request_id: "r1".to_string(),
            target_model: "m".to_string(),
            prompt: "p".to_string(),
            headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_prefers_shortest_queue() {
        let scheduler = QueueAwareScheduler::new(1.0);
        let result = scheduler
            .schedule(
                &request(),
                vec![pod("a", 4, 0.1, 0), pod("bb", 0, 0.2, 0), pod("ccc", 2, 0.0, 0)],
            )
            .await
            .unwrap();
        assert_eq!(result.primary_pod().unwrap().pod.name, "bb");
    }

    #[tokio::test]
    async fn test_ties_break_on_running_queue() {
        let scheduler = QueueAwareScheduler::new(1.0);
        let result = scheduler
            .schedule(
                &request(),
                vec![pod("a", 1, 0.5, 7), pod("bb", 1, 0.5, 2)],
            )
            .await
            .unwrap();
        assert_eq!(result.primary_pod().unwrap().pod.name, "bb");
    }

    #[tokio::test]
    async fn test_empty_candidates_errors() {
        let scheduler = QueueAwareScheduler::new(1.0);
        assert!(scheduler.schedule(&request(), Vec::new()).await.is_err());
    }

    #[test]
    fn test_primary_pod_missing_profile() {
        let result = SchedulingResult {
            profile_results: HashMap::new(),
            primary_profile_name: "absent".to_string(),
        };
        assert!(result.primary_pod().is_none());
    }
}
