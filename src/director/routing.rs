// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Weighted resolution of a logical model to a concrete target model.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::datastore::InferenceModel;

/// Draw one target model name for `model`.
///
/// A `seed` of 0 seeds from OS entropy; any other value gives a
/// deterministic draw for replay tests. If any target carries no weight the
/// draw is uniform over all targets; otherwise each target is selected with
/// probability `weight / Σ weights`. Returns `None` on a misconfigured
/// target list (empty, or all weights zero).
pub fn random_weighted_draw(model: &InferenceModel, seed: u64) -> Option<String> {
    let targets = &model.target_models;
    if targets.is_empty() {
        return None;
    }

    let mut rng = if seed > 0 {
        StdRng::seed_from_u64(seed)
    } else {
        StdRng::from_os_rng()
    };

    if targets.iter().any(|t| t.weight.is_none()) {
        let index = rng.random_range(0..targets.len());
        return Some(targets[index].name.clone());
    }

    let total: u64 = targets
        .iter()
        .map(|t| u64::from(t.weight.unwrap_or(0)))
        .sum();
    if total == 0 {
        return None;
    }

    let mut remaining = rng.random_range(0..total);
    for target in targets {
        let weight = u64::from(target.weight.unwrap_or(0));
        if remaining < weight {
            return Some(target.name.clone());
        }
        remaining -= weight;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::TargetModel;

    fn model(targets: Vec<TargetModel>) -> InferenceModel {
        InferenceModel {
            model_name: "foo".to_string(),
            criticality: None,
            target_models: targets,
        }
    }

    fn target(name: &str, weight: Option<u32>) -> TargetModel {
        TargetModel {
            name: name.to_string(),
            weight,
        }
    }

    #[test]
    fn test_empty_targets_is_none() {
        assert!(random_weighted_draw(&model(vec![]), 42).is_none());
    }

    #[test]
    fn test_single_target_always_selected() {
        let m = model(vec![target("only", Some(3))]);
        for seed in 1..50 {
            assert_eq!(random_weighted_draw(&m, seed).as_deref(), Some("only"));
        }
    }

    #[test]
    fn test_zero_total_weight_is_none() {
        let m = model(vec![target("a", Some(0)), target("b", Some(0))]);
        assert!(random_weighted_draw(&m, 42).is_none());
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let m = model(vec![target("a", Some(1)), target("b", Some(3))]);
        let first = random_weighted_draw(&m, 42);
        for _ in 0..20 {
            assert_eq!(random_weighted_draw(&m, 42), first);
        }
    }

    #[test]
    fn test_nil_weight_uses_uniform_draw() {
        let m = model(vec![
            target("a", Some(1_000_000)),
            target("b", None),
            target("c", Some(1)),
        ]);
        let mut counts = [0usize; 3];
        for seed in 1..=6_000u64 {
            match random_weighted_draw(&m, seed).unwrap().as_str() {
                "a" => counts[0] += 1,
                "b" => counts[1] += 1,
                "c" => counts[2] += 1,
                other => panic!("unexpected target {other}"),
            }
        }
        // Uniform over three targets despite the lopsided weights.
        for count in counts {
            let fraction = count as f64 / 6_000.0;
            assert!(
                (fraction - 1.0 / 3.0).abs() < 0.05,
                "fraction {fraction} not uniform"
            );
        }
    }

    #[test]
    fn test_weighted_proportions() {
        // Weights 1 and 3: the second target should win ~75% of draws.
        let m = model(vec![target("first", Some(1)), target("second", Some(3))]);
        let draws = 10_000u64;
        let mut second = 0usize;
        for i in 0..draws {
            if random_weighted_draw(&m, 42 + i).as_deref() == Some("second") {
                second += 1;
            }
        }
        let fraction = second as f64 / draws as f64;
        assert!(
            (0.73..=0.77).contains(&fraction),
            "second-target fraction {fraction} outside [0.73, 0.77]"
        );
    }
}
