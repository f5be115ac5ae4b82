/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

/// Scores how hard a balance vector presses against its per-resource
/// imbalance limits: the sum over resources of the squared fractional
/// imbalance, with the fraction amplified 16x once it passes 0.8 so that
/// near-violations dominate the score.
pub fn imbalance_power(balance: &[i64], max_weight_imbalance: &[i64]) -> f64 {
    let mut power = 0.0;
    for (i, &b) in balance.iter().enumerate() {
        let imb = if max_weight_imbalance[i] == 0 {
            1
        } else {
            max_weight_imbalance[i]
        };
        let mut res_imbalance = (b as f64 / imb as f64).abs();
        if res_imbalance > 0.80 {
            res_imbalance *= 16.0;
        }
        power += res_imbalance * res_imbalance;
    }
    power
}

/// Like `imbalance_power`, but only resources whose fractional imbalance
/// exceeds 0.8 contribute (without the 16x amplification).
pub fn near_violator_imbalance_power(balance: &[i64], max_weight_imbalance: &[i64]) -> f64 {
    let mut power = 0.0;
    for (i, &b) in balance.iter().enumerate() {
        let imb = if max_weight_imbalance[i] == 0 {
            1
        } else {
            max_weight_imbalance[i]
        };
        let res_imbalance = (b as f64 / imb as f64).abs();
        if res_imbalance > 0.80 {
            power += res_imbalance * res_imbalance;
        }
    }
    power
}

/// Scores how far the per-resource totals deviate from the target ratio
/// weights, scaled to the current total: sum of squared fractional
/// deviations, damped by a significance adjustment.
pub fn ratio_power(res_ratios: &[i64], total_weight: &[i64]) -> f64 {
    const SIGNIFICANCE_ADJUSTMENT: f64 = 10.0;
    let sum_total_weight: i64 = total_weight.iter().sum();
    let sum_ratio_weight: i64 = res_ratios.iter().sum();
    if sum_ratio_weight == 0 || sum_total_weight == 0 {
        return 0.0;
    }
    let scaler = sum_total_weight as f64 / sum_ratio_weight as f64;
    let mut power = 0.0;
    for (i, &ratio) in res_ratios.iter().enumerate() {
        let target_total_weight = ratio as f64 * scaler;
        if target_total_weight == 0.0 {
            continue;
        }
        let imb = (total_weight[i] as f64 - target_total_weight).abs() / target_total_weight;
        power += imb * imb;
    }
    power / SIGNIFICANCE_ADJUSTMENT
}

/// `ratio_power` of the hypothetical total weight after swapping one node's
/// implementation from `old_impl` to `new_impl`.
pub fn ratio_power_if_changed(
    old_impl: &[i64],
    new_impl: &[i64],
    res_ratios: &[i64],
    total_weight: &[i64],
) -> f64 {
    let new_total_weight: Vec<i64> = total_weight
        .iter()
        .enumerate()
        .map(|(i, &tw)| tw + new_impl[i] - old_impl[i])
        .collect();
    ratio_power(res_ratios, &new_total_weight)
}
