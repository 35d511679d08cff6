// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Admission control: saturation shedding gated by request criticality.

use std::sync::Arc;

use crate::datastore::{Criticality, Datastore};
use crate::error::Error;

/// Signal indicating whether the backends are considered saturated.
pub trait SaturationDetector: Send + Sync {
    fn is_saturated(&self) -> bool;
}

/// Decide whether to accept the request. Critical requests always pass;
/// everything else is shed while the pool is saturated. Shedding is never
/// retried here.
pub fn admit_request(
    detector: &dyn SaturationDetector,
    criticality: Criticality,
) -> Result<(), Error> {
    if criticality == Criticality::Critical {
        tracing::debug!("critical request bypassing saturation check");
        return Ok(());
    }

    if detector.is_saturated() {
        return Err(Error::InferencePoolResourceExhausted(
            "system saturated, non-critical request dropped".to_string(),
        ));
    }
    Ok(())
}

/// Saturation from datastore snapshots: the pool is saturated when every pod
/// is past its waiting-queue or KV cache threshold. An empty pod list also
/// counts as saturated.
pub struct QueueDepthSaturationDetector {
    datastore: Arc<dyn Datastore>,
    kv_cache_threshold: f64,
    queue_threshold: usize,
}

impl QueueDepthSaturationDetector {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        kv_cache_threshold: f64,
        queue_threshold: usize,
    ) -> Self {
        Self {
            datastore,
            kv_cache_threshold,
            queue_threshold,
        }
    }
}

impl SaturationDetector for QueueDepthSaturationDetector {
    fn is_saturated(&self) -> bool {
        let pods = self.datastore.pod_get_all();
        if pods.is_empty() {
            return true;
        }
        pods.iter().all(|pod| {
            pod.metrics.waiting_queue_size > self.queue_threshold
                || pod.metrics.kv_cache_usage_percent > self.kv_cache_threshold
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Metrics, PodMetrics};
    use crate::config::{DEFAULT_KV_CACHE_THRESHOLD, DEFAULT_QUEUE_THRESHOLD_CRITICAL};
    use crate::datastore::{InMemoryDatastore, InferencePool};

    struct FixedDetector(bool);

    impl SaturationDetector for FixedDetector {
        fn is_saturated(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_critical_bypasses_saturation() {
        assert!(admit_request(&FixedDetector(true), Criticality::Critical).is_ok());
    }

    #[test]
    fn test_standard_shed_when_saturated() {
        let err = admit_request(&FixedDetector(true), Criticality::Standard).unwrap_err();
        assert!(matches!(err, Error::InferencePoolResourceExhausted(_)));
    }

    #[test]
    fn test_sheddable_admitted_when_not_saturated() {
        assert!(admit_request(&FixedDetector(false), Criticality::Sheddable).is_ok());
    }

    fn detector_with(metrics: Vec<Metrics>) -> QueueDepthSaturationDetector {
        let store = InMemoryDatastore::new(InferencePool {
            name: "pool".to_string(),
            target_port: 8000,
        });
        for (i, m) in metrics.into_iter().enumerate() {
            store.pod_set(PodMetrics::new(format!("pod-{i}"), format!("10.0.0.{i}"), m));
        }
        QueueDepthSaturationDetector::new(
            store.into_shared(),
            DEFAULT_KV_CACHE_THRESHOLD,
            DEFAULT_QUEUE_THRESHOLD_CRITICAL,
        )
    }

    #[test]
    fn test_detector_empty_pool_is_saturated() {
        assert!(detector_with(vec![]).is_saturated());
    }

    #[test]
    fn test_detector_one_free_pod_unsaturates() {
        let detector = detector_with(vec![
            Metrics {
                kv_cache_usage_percent: 0.95,
                waiting_queue_size: 20,
                running_queue_size: 8,
            },
            Metrics {
                kv_cache_usage_percent: 0.2,
                waiting_queue_size: 1,
                running_queue_size: 3,
            },
        ]);
        assert!(!detector.is_saturated());
    }

    #[test]
    fn test_detector_all_pods_over_threshold() {
        let detector = detector_with(vec![
            Metrics {
                kv_cache_usage_percent: 0.85,
                waiting_queue_size: 0,
                running_queue_size: 0,
            },
            Metrics {
                kv_cache_usage_percent: 0.1,
                waiting_queue_size: 6,
                running_queue_size: 0,
            },
        ]);
        assert!(detector.is_saturated());
    }
}
