// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-request Poisson-interval sampler deciding which output tokens trigger
//! a latency prediction call.
//!
//! Training submissions are unconditional; this sampler gates only the
//! prediction path. The RNG is seeded from the request id so replays of the
//! same request sample the same tokens.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct TokenSampler {
    rng: StdRng,
    mean: f64,
    max_samples: usize,
    next_sample_token: usize,
    sample_count: usize,
}

impl TokenSampler {
    /// `mean` is the expected gap between sampled tokens; `max_samples` caps
    /// how many predictions a single request may trigger.
    pub fn new(request_id: &str, mean: f64, max_samples: usize) -> Self {
        let mut hasher = DefaultHasher::new();
        request_id.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());
        let first_interval = exponential_interval(&mut rng, mean);
        Self {
            rng,
            mean,
            max_samples,
            next_sample_token: 1 + first_interval,
            sample_count: 0,
        }
    }

    /// Whether `token_count` is a sampled token. Pure check, does not advance
    /// the sampler; callers that go on to predict must call
    /// [`record_prediction`](Self::record_prediction).
    pub fn should_predict(&self, token_count: usize) -> bool {
        token_count == self.next_sample_token && self.sample_count < self.max_samples
    }

    /// Count the prediction made at `token_count` and draw the next sample
    /// point from the exponential distribution.
    pub fn record_prediction(&mut self, token_count: usize) {
        self.sample_count += 1;
        let interval = exponential_interval(&mut self.rng, self.mean);
        self.next_sample_token = token_count + interval;
    }

    pub fn next_sample_token(&self) -> usize {
        self.next_sample_token
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }
}

/// Draw from Exp(1/mean) by inverse transform, rounded up and clamped to >= 1
/// so consecutive tokens are never both sampled by a degenerate draw.
fn exponential_interval(rng: &mut StdRng, mean: f64) -> usize {
    let u: f64 = rng.random();
    let exp = -mean * (1.0 - u).ln();
    (exp.ceil() as usize).max(1)
}
