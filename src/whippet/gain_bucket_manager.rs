/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
use crate::whippet::error::KlfmResult;
use crate::whippet::gain_bucket_entry::GainBucketEntry;
use crate::whippet::gain_bucket_manager_multi_resource_exclusive::GainBucketManagerMultiResourceExclusive;
use crate::whippet::gain_bucket_manager_multi_resource_mixed::GainBucketManagerMultiResourceMixed;
use crate::whippet::gain_bucket_manager_single_resource::GainBucketManagerSingleResource;
use crate::whippet::id_types::NodeId;
use crate::whippet::node::Node;
use crate::whippet::partitioner_config::{GainBucketType, PartitionerConfig};

/// Common capability set of the gain bucket manager family. A manager owns
/// the per-partition (and possibly per-resource) buckets of unlocked nodes
/// and implements a resource-aware selection policy over them.
pub trait GainBucketManager {
    /// Selects the next node to move by returning the entry with the
    /// highest gain that does not violate balance constraints, within the
    /// bounded-search limits of the configured policy.
    fn get_next_entry(
        &mut self,
        current_balance: &[i64],
        total_weight: &[i64],
    ) -> KlfmResult<GainBucketEntry>;

    /// The number of unlocked nodes across all buckets the manager controls.
    fn num_unlocked_nodes(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.num_unlocked_nodes() == 0
    }

    /// Adds a node to the appropriate bucket(s).
    fn add_node(
        &mut self,
        gain: i64,
        node: &Node,
        in_part_a: bool,
        total_weight: &[i64],
    ) -> KlfmResult<()>;

    /// Raises the gains of `nodes_to_increase_gain` on the side the move
    /// came from and lowers those of `nodes_to_decrease_gain` on the side it
    /// went to. Ids appearing multiple times are adjusted once per
    /// appearance.
    fn update_gains(
        &mut self,
        gain_modifier: i64,
        nodes_to_increase_gain: &[NodeId],
        nodes_to_decrease_gain: &[NodeId],
        moved_from_part_a: bool,
    );

    /// Called when a node's selected weight vector changes outside the
    /// manager (rebalance, mutation) so stored entries can be brought back
    /// in sync. Does nothing if the node is not currently bucketed. Fails if
    /// the new implementation violates an invariant the manager enforces,
    /// such as resource exclusivity.
    fn update_node_implementation(&mut self, node: &Node) -> KlfmResult<()>;
}

/// Computes per-resource maximum imbalances from fractions of the current
/// total weight, clamped to at least 1.
pub fn max_imbalance_from_fractions(fractions: &[f64], total_weight: &[i64]) -> Vec<i64> {
    fractions
        .iter()
        .zip(total_weight.iter())
        .map(|(&frac, &total)| {
            let imb = (frac * total as f64).ceil() as i64;
            if imb > 0 {
                imb
            } else {
                1
            }
        })
        .collect()
}

/// Builds the gain bucket manager the configuration calls for.
pub fn create_gain_bucket_manager(config: &PartitionerConfig) -> Box<dyn GainBucketManager> {
    match config.gain_bucket_type {
        GainBucketType::SingleResource => Box::new(GainBucketManagerSingleResource::new(
            0,
            config.device_resource_max_imbalances[0],
        )),
        GainBucketType::MultiResourceExclusive => {
            Box::new(GainBucketManagerMultiResourceExclusive::new(
                config.device_resource_max_imbalances.clone(),
                config.gain_bucket_selection_policy,
                false,
                config.random_seed,
            ))
        }
        GainBucketType::MultiResourceExclusiveAdaptive => {
            Box::new(GainBucketManagerMultiResourceExclusive::new(
                config.device_resource_max_imbalances.clone(),
                config.gain_bucket_selection_policy,
                true,
                config.random_seed,
            ))
        }
        GainBucketType::MultiResourceMixed => Box::new(GainBucketManagerMultiResourceMixed::new(
            config.device_resource_max_imbalances.clone(),
            config.gain_bucket_selection_policy,
            false,
            config.use_ratio_in_imbalance_score,
            config.device_resource_ratio_weights.clone(),
            config.random_seed,
        )),
        GainBucketType::MultiResourceMixedAdaptive => {
            Box::new(GainBucketManagerMultiResourceMixed::new(
                config.device_resource_max_imbalances.clone(),
                config.gain_bucket_selection_policy,
                true,
                config.use_ratio_in_imbalance_score,
                config.device_resource_ratio_weights.clone(),
                config.random_seed,
            ))
        }
    }
}
