// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Read-only view over the pool, registered inference models and pod metrics,
//! plus the endpoint-subset filter applied from request metadata.
//!
//! The datastore is fed elsewhere (resource watchers are out of scope here);
//! request tasks only ever read it, and every read hands out cloned metric
//! snapshots so a scheduling decision sees a stable view.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::backend::PodMetrics;

/// Metadata namespace carrying load-balancer subset hints.
pub const SUBSET_HINT_NAMESPACE: &str = "envoy.lb.subset_hint";
/// Key under [`SUBSET_HINT_NAMESPACE`] listing `"host:port"` candidates.
pub const SUBSET_HINT_KEY: &str = "x-gateway-destination-endpoint-subset";

/// Request priority band. `Standard` and `Sheddable` requests are subject to
/// saturation shedding; `Critical` requests bypass it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criticality {
    Critical,
    Standard,
    Sheddable,
}

/// One physical target of a logical model, with an optional routing weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetModel {
    pub name: String,
    pub weight: Option<u32>,
}

/// A registered logical model and how to resolve it to a physical one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceModel {
    pub model_name: String,
    pub criticality: Option<Criticality>,
    #[serde(default)]
    pub target_models: Vec<TargetModel>,
}

impl InferenceModel {
    /// Synthetic registration for models that arrive without one. Unknown
    /// models are treated as sheddable.
    pub fn sheddable_default(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            criticality: Some(Criticality::Sheddable),
            target_models: Vec::new(),
        }
    }
}

/// The inference pool the EPP fronts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferencePool {
    pub name: String,
    pub target_port: u16,
}

/// Read surface of the pod/model/pool store.
pub trait Datastore: Send + Sync {
    /// All pods, each with a cloned metrics snapshot.
    fn pod_get_all(&self) -> Vec<PodMetrics>;

    /// Pods matching `predicate`, each with a cloned metrics snapshot.
    fn pod_list(&self, predicate: &dyn Fn(&PodMetrics) -> bool) -> Vec<PodMetrics>;

    fn model_get(&self, model_name: &str) -> Option<InferenceModel>;

    fn pool_get(&self) -> anyhow::Result<InferencePool>;
}

/// In-memory datastore. Writers (watchers, tests) replace whole entries;
/// readers get clones.
pub struct InMemoryDatastore {
    pool: RwLock<Option<InferencePool>>,
    models: RwLock<HashMap<String, InferenceModel>>,
    pods: RwLock<HashMap<String, PodMetrics>>,
}

impl InMemoryDatastore {
    pub fn new(pool: InferencePool) -> Self {
        Self {
            pool: RwLock::new(Some(pool)),
            models: RwLock::new(HashMap::new()),
            pods: RwLock::new(HashMap::new()),
        }
    }

    pub fn model_set(&self, model: InferenceModel) {
        self.models
            .write()
            .insert(model.model_name.clone(), model);
    }

    pub fn pod_set(&self, pod: PodMetrics) {
        self.pods.write().insert(pod.pod.name.clone(), pod);
    }

    pub fn pod_delete(&self, name: &str) {
        self.pods.write().remove(name);
    }

    pub fn into_shared(self) -> Arc<dyn Datastore> {
        Arc::new(self)
    }
}

impl Datastore for InMemoryDatastore {
    fn pod_get_all(&self) -> Vec<PodMetrics> {
        self.pods.read().values().cloned().collect()
    }

    fn pod_list(&self, predicate: &dyn Fn(&PodMetrics) -> bool) -> Vec<PodMetrics> {
        self.pods
            .read()
            .values()
            .filter(|p| predicate(p))
            .cloned()
            .collect()
    }

    fn model_get(&self, model_name: &str) -> Option<InferenceModel> {
        self.models.read().get(model_name).cloned()
    }

    fn pool_get(&self) -> anyhow::Result<InferencePool> {
        self.pool
            .read()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("inference pool not synced yet"))
    }
}

/// Candidate pods for a request, honoring the endpoint-subset hint.
///
/// - Namespace or key absent: all pods.
/// - Key present with a non-empty list of `"host:port"` strings: pods whose
///   address matches the host part.
/// - Key present with an empty list: **no** pods. Fail closed; the caller
///   turns this into a service-unavailable error rather than routing to an
///   endpoint the gateway excluded.
pub fn subset_pods(datastore: &dyn Datastore, metadata: &serde_json::Value) -> Vec<PodMetrics> {
    let Some(subset) = metadata
        .get(SUBSET_HINT_NAMESPACE)
        .and_then(|ns| ns.get(SUBSET_HINT_KEY))
        .and_then(|v| v.as_array())
    else {
        return datastore.pod_get_all();
    };

    let addresses: HashSet<&str> = subset
        .iter()
        .filter_map(|v| v.as_str())
        .map(|endpoint| endpoint.rsplit_once(':').map_or(endpoint, |(host, _)| host))
        .collect();

    if addresses.is_empty() {
        tracing::debug!("subset hint present but empty, returning no candidate pods");
        return Vec::new();
    }

    datastore.pod_list(&|pod: &PodMetrics| addresses.contains(pod.pod.address.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Metrics;
    use serde_json::json;

    fn store_with_pods(addresses: &[&str]) -> InMemoryDatastore {
        let store = InMemoryDatastore::new(InferencePool {
            name: "pool".to_string(),
            target_port: 8000,
        });
        for (i, addr) in addresses.iter().enumerate() {
            store.pod_set(PodMetrics::new(
                format!("pod-{i}"),
                *addr,
                Metrics::default(),
            ));
        }
        store
    }

    #[test]
    fn test_subset_absent_returns_all() {
        let store = store_with_pods(&["10.0.0.1", "10.0.0.2"]);
        let pods = subset_pods(&store, &json!({}));
        assert_eq!(pods.len(), 2);
    }

    #[test]
    fn test_subset_filters_by_address() {
        let store = store_with_pods(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        let metadata = json!({
            SUBSET_HINT_NAMESPACE: {
                SUBSET_HINT_KEY: ["10.0.0.1:8000", "10.0.0.3:8000"],
            }
        });
        let mut addresses: Vec<String> = subset_pods(&store, &metadata)
            .into_iter()
            .map(|p| p.pod.address)
            .collect();
        addresses.sort();
        assert_eq!(addresses, vec!["10.0.0.1", "10.0.0.3"]);
    }

    #[test]
    fn test_subset_empty_list_fails_closed() {
        let store = store_with_pods(&["10.0.0.1", "10.0.0.2"]);
        let metadata = json!({
            SUBSET_HINT_NAMESPACE: { SUBSET_HINT_KEY: [] }
        });
        assert!(subset_pods(&store, &metadata).is_empty());
    }

    #[test]
    fn test_subset_unmatched_addresses() {
        let store = store_with_pods(&["10.0.0.1"]);
        let metadata = json!({
            SUBSET_HINT_NAMESPACE: { SUBSET_HINT_KEY: ["10.9.9.9:8000"] }
        });
        assert!(subset_pods(&store, &metadata).is_empty());
    }

    #[test]
    fn test_snapshots_are_clones() {
        let store = store_with_pods(&[]);
        store.pod_set(PodMetrics::new(
            "pod-0",
            "10.0.0.1",
            Metrics {
                kv_cache_usage_percent: 0.1,
                waiting_queue_size: 1,
                running_queue_size: 1,
            },
        ));
        let snapshot = store.pod_get_all().remove(0);
        // Overwrite after the snapshot was taken; the snapshot must not move.
        store.pod_set(PodMetrics::new(
            "pod-0",
            "10.0.0.1",
            Metrics {
                kv_cache_usage_percent: 0.9,
                waiting_queue_size: 9,
                running_queue_size: 9,
            },
        ));
        assert_eq!(snapshot.metrics.waiting_queue_size, 1);
    }
}
