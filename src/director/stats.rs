// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Incremental average over observation streams.

/// Running mean after appending the `count`-th value.
///
/// `count` is the length of the observation sequence *after* the append.
/// `count == 0` returns 0 and is only meaningful as a guard.
pub fn running_average(current_avg: f64, new_value: f64, count: usize) -> f64 {
    match count {
        0 => 0.0,
        1 => new_value,
        _ => current_avg + (new_value - current_avg) / count as f64,
    }
}
