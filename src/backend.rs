// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Backend pod and metrics snapshot types.
//!
//! `Metrics` values handed out by the datastore are clones: once a snapshot is
//! taken, scheduler and director see a stable view for the rest of the
//! decision, regardless of concurrent scrapes.

use serde::{Deserialize, Serialize};

/// A backend inference server pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    /// Pod IP, without port. The serving port comes from the pool spec.
    pub address: String,
}

impl Pod {
    /// `host:port` endpoint for the pool's target port.
    pub fn endpoint(&self, target_port: u16) -> String {
        format!("{}:{}", self.address, target_port)
    }
}

/// Queue and cache occupancy scraped from a model server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// KV cache utilization in `[0, 1]`.
    pub kv_cache_usage_percent: f64,
    pub waiting_queue_size: usize,
    pub running_queue_size: usize,
}

/// A pod together with a cloned metrics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodMetrics {
    pub pod: Pod,
    pub metrics: Metrics,
}

impl PodMetrics {
    pub fn new(name: impl Into<String>, address: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            pod: Pod {
                name: name.into(),
                address: address.into(),
            },
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        let pod = Pod {
            name: "vllm-0".to_string(),
            address: "10.0.0.1".to_string(),
        };
        assert_eq!(pod.endpoint(8000), "10.0.0.1:8000");
    }
}
