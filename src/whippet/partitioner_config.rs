/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
use std::collections::BTreeSet;

use crate::whippet::error::{KlfmError, KlfmResult};
use crate::whippet::id_types::NodeId;
use crate::whippet::output::Output;

/// Number of entries from a constrained gain bucket examined per KLFM move.
/// Raising it can improve partitions of graphs with non-unitary node weights
/// at the price of selection time; it makes no difference on unit-weight
/// graphs.
pub const MAX_CONSTRAINED_ENTRY_CHECKS: usize = 4;

/// Number of sweeps over the node set a rebalance performs.
pub const REBALANCE_PASSES: usize = 5;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GainBucketType {
    SingleResource,
    MultiResourceExclusive,
    MultiResourceExclusiveAdaptive,
    MultiResourceMixed,
    MultiResourceMixedAdaptive,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GainBucketSelectionPolicy {
    // Multi-resource exclusive policies.
    RandomResource,
    LargestResourceImbalance,
    LargestUnconstrainedGain,
    LargestGain,
    // Multi-resource mixed policies.
    MostUnbalancedResource,
    BestGainImbalanceScoreClassic,
    BestGainImbalanceScoreWithAffinities,
}

/// Determines the mechanism for obtaining the initial partition of each run.
/// With `UserSpecified`, `initial_a_nodes` / `initial_b_nodes` must hold the
/// ids of every node in the graph handed to the engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeedMode {
    Random,
    UserSpecified,
}

/// Clustering strategy for the coarse phase.
///
/// Hierarchical clustering lets every node set make one merge decision per
/// scan and keeps scanning until nothing can be consolidated, which coarsens
/// further. Neighborhood growth is greedy from high-degree seeds; it forms a
/// few good clusters quickly but tends to leave many nodes unclustered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoarseningPolicy {
    HierarchicalInterconnection,
    NeighborhoodInterconnection,
}

/// Full configuration surface of the KLFM partitioning engine.
#[derive(Clone, Debug)]
pub struct PartitionerConfig {
    pub num_resources: usize,
    /// Per-resource total device capacity; used as a sanity bound.
    pub device_resource_capacities: Vec<i64>,
    /// Per-resource cap on |balance| as a fraction of the total weight.
    pub device_resource_max_imbalances: Vec<f64>,
    /// Target ratio of per-resource totals.
    pub device_resource_ratio_weights: Vec<i64>,
    /// Resources with `false` here are excluded from balance constraints.
    pub constrain_balance_by_resource: Vec<bool>,

    pub gain_bucket_type: GainBucketType,
    pub gain_bucket_selection_policy: GainBucketSelectionPolicy,
    /// Allows gain buckets to select between node implementations. Note
    /// that implementations may still be changed by rebalancing or mutation
    /// when this is off.
    pub use_adaptive_node_implementations: bool,
    pub use_ratio_in_imbalance_score: bool,
    pub use_ratio_in_partition_quality: bool,

    /// Relaxes balance constraints on resources other than resource 0
    /// during coarse partitioning and re-tightens them for fine
    /// partitioning.
    pub use_multilevel_constraint_relaxation: bool,
    /// Restricts supernodes to the single weight vector formed from their
    /// children's current selections.
    pub restrict_supernodes_to_default_implementation: bool,
    /// Cap on the number of weight vectors generated per supernode.
    pub supernode_implementations_cap: usize,
    /// If true and `num_runs > 1`, later runs start from the implementations
    /// the previous run ended with instead of the originals.
    pub reuse_previous_run_implementations: bool,

    /// Percent chance (0-100) that a multi-implementation node is randomly
    /// re-implemented before a run.
    pub mutation_rate: u32,
    pub rebalance_on_start_of_pass: bool,
    pub rebalance_on_end_of_run: bool,
    pub rebalance_on_demand: bool,
    /// Caps on on-demand rebalances. Unlimited in-pass rebalancing raises
    /// the pass complexity to O(N^2).
    pub rebalance_on_demand_cap_per_run: usize,
    pub rebalance_on_demand_cap_per_pass: usize,

    pub num_runs: usize,
    pub cap_passes: bool,
    pub max_passes: usize,

    pub multilevel: bool,
    pub coarsening_policy: CoarseningPolicy,
    pub max_nodes_per_supernode: usize,
    /// Caps the number of neighboring supernodes considered per coarsening
    /// decision. Zero disables the limit.
    pub coarsening_neighbor_limit: usize,

    pub seed_mode: SeedMode,
    pub initial_a_nodes: BTreeSet<NodeId>,
    pub initial_b_nodes: BTreeSet<NodeId>,

    /// Seed for all of the engine's random streams; identical configurations
    /// and seeds produce identical runs.
    pub random_seed: u64,
    /// If false, cut edge ids and names are left out of summaries to save
    /// memory on large batch runs.
    pub save_cutset: bool,
}

impl PartitionerConfig {
    pub fn new(num_resources: usize) -> Self {
        Self {
            num_resources,
            device_resource_capacities: vec![0; num_resources],
            device_resource_max_imbalances: vec![0.05; num_resources],
            device_resource_ratio_weights: vec![1; num_resources],
            constrain_balance_by_resource: vec![true; num_resources],
            gain_bucket_type: if num_resources == 1 {
                GainBucketType::SingleResource
            } else {
                GainBucketType::MultiResourceExclusive
            },
            gain_bucket_selection_policy: GainBucketSelectionPolicy::LargestGain,
            use_adaptive_node_implementations: false,
            use_ratio_in_imbalance_score: false,
            use_ratio_in_partition_quality: false,
            use_multilevel_constraint_relaxation: false,
            restrict_supernodes_to_default_implementation: false,
            supernode_implementations_cap: 16,
            reuse_previous_run_implementations: true,
            mutation_rate: 0,
            rebalance_on_start_of_pass: false,
            rebalance_on_end_of_run: false,
            rebalance_on_demand: false,
            rebalance_on_demand_cap_per_run: 1,
            rebalance_on_demand_cap_per_pass: 1,
            num_runs: 1,
            cap_passes: true,
            max_passes: 30,
            multilevel: true,
            coarsening_policy: CoarseningPolicy::HierarchicalInterconnection,
            max_nodes_per_supernode: 16,
            coarsening_neighbor_limit: 100,
            seed_mode: SeedMode::Random,
            initial_a_nodes: BTreeSet::new(),
            initial_b_nodes: BTreeSet::new(),
            random_seed: 0,
            save_cutset: true,
        }
    }

    /// Derives the per-resource constraint flags the way device
    /// configurations are usually written: single-resource setups constrain
    /// only resource 0, and a max-imbalance fraction of 0.99 or more marks a
    /// resource as unconstrained.
    pub fn derive_constraint_flags(&mut self) {
        self.constrain_balance_by_resource = match self.gain_bucket_type {
            GainBucketType::SingleResource => {
                let mut flags = vec![false; self.num_resources];
                flags[0] = true;
                flags
            }
            _ => self
                .device_resource_max_imbalances
                .iter()
                .map(|&frac| frac < 0.99)
                .collect(),
        };
    }

    /// Ensures the configuration is internally consistent before execution.
    pub fn validate(&self) -> KlfmResult<()> {
        if self.num_resources == 0 {
            return Err(KlfmError::Config(
                "Configuration must specify at least one resource.".to_owned(),
            ));
        }
        for (name, len) in &[
            ("capacities", self.device_resource_capacities.len()),
            ("max imbalances", self.device_resource_max_imbalances.len()),
            ("ratio weights", self.device_resource_ratio_weights.len()),
            (
                "constraint flags",
                self.constrain_balance_by_resource.len(),
            ),
        ] {
            if *len != self.num_resources {
                return Err(KlfmError::Config(format!(
                    "Expected {} resource {} but found {}.",
                    self.num_resources, name, len
                )));
            }
        }
        for (i, &frac) in self.device_resource_max_imbalances.iter().enumerate() {
            if !(0.0..=1.0).contains(&frac) {
                return Err(KlfmError::Config(format!(
                    "Max imbalance fraction {} for resource {} is outside [0, 1].",
                    frac, i
                )));
            }
        }
        if self.mutation_rate > 100 {
            return Err(KlfmError::Config(format!(
                "Mutation rate {} is outside 0-100.",
                self.mutation_rate
            )));
        }
        if self.num_runs == 0 {
            return Err(KlfmError::Config("num_runs must be at least 1.".to_owned()));
        }
        if self.cap_passes && self.max_passes == 0 {
            return Err(KlfmError::Config(
                "max_passes must be at least 1 when passes are capped.".to_owned(),
            ));
        }
        if self.multilevel && self.max_nodes_per_supernode < 2 {
            return Err(KlfmError::Config(
                "max_nodes_per_supernode must be at least 2 for multilevel runs.".to_owned(),
            ));
        }
        match self.gain_bucket_type {
            GainBucketType::SingleResource => {}
            GainBucketType::MultiResourceExclusive
            | GainBucketType::MultiResourceExclusiveAdaptive => {
                match self.gain_bucket_selection_policy {
                    GainBucketSelectionPolicy::RandomResource
                    | GainBucketSelectionPolicy::LargestResourceImbalance
                    | GainBucketSelectionPolicy::LargestUnconstrainedGain
                    | GainBucketSelectionPolicy::LargestGain => {}
                    policy => {
                        return Err(KlfmError::Config(format!(
                            "Selection policy {:?} is not supported by exclusive gain buckets.",
                            policy
                        )));
                    }
                }
            }
            GainBucketType::MultiResourceMixed | GainBucketType::MultiResourceMixedAdaptive => {
                match self.gain_bucket_selection_policy {
                    GainBucketSelectionPolicy::RandomResource
                    | GainBucketSelectionPolicy::MostUnbalancedResource
                    | GainBucketSelectionPolicy::BestGainImbalanceScoreClassic
                    | GainBucketSelectionPolicy::BestGainImbalanceScoreWithAffinities => {}
                    policy => {
                        return Err(KlfmError::Config(format!(
                            "Selection policy {:?} is not supported by mixed gain buckets.",
                            policy
                        )));
                    }
                }
            }
        }
        if self.seed_mode == SeedMode::UserSpecified
            && (self.initial_a_nodes.is_empty() || self.initial_b_nodes.is_empty())
        {
            return Err(KlfmError::Config(
                "User-specified seed mode requires both initial partitions to be non-empty."
                    .to_owned(),
            ));
        }
        Ok(())
    }

    /// Writes the active configuration, for run logs.
    pub fn write(&self, output: &mut Output) -> KlfmResult<()> {
        output.print("KLFM Options:")?;
        output.print(&format!("Num Runs: {}", self.num_runs))?;
        output.print(&format!("Cap Passes: {}", self.cap_passes))?;
        if self.cap_passes {
            output.print(&format!("Max Passes: {}", self.max_passes))?;
        }
        output.print(&format!("Number of Resources: {}", self.num_resources))?;
        output.print(&format!(
            "Maximum Imbalance: {:?}",
            self.device_resource_max_imbalances
        ))?;
        output.print(&format!(
            "Target Ratio: {:?}",
            self.device_resource_ratio_weights
        ))?;
        output.print(&format!(
            "Use Ratio in Partition Quality: {}",
            self.use_ratio_in_partition_quality
        ))?;
        output.print(&format!(
            "Use Ratio in Imbalance Score: {}",
            self.use_ratio_in_imbalance_score
        ))?;
        output.print(&format!(
            "Enable Adaptive Node Implementations: {}",
            self.use_adaptive_node_implementations
        ))?;
        output.print(&format!(
            "Use Multilevel Constraint Relaxation: {}",
            self.use_multilevel_constraint_relaxation
        ))?;
        output.print(&format!("Gain Bucket Type: {:?}", self.gain_bucket_type))?;
        output.print(&format!(
            "Gain Bucket Selection Policy: {:?}",
            self.gain_bucket_selection_policy
        ))?;
        output.print(&format!(
            "Restrict Supernodes to Default Implementation: {}",
            self.restrict_supernodes_to_default_implementation
        ))?;
        output.print(&format!(
            "Supernode Implementations Cap: {}",
            self.supernode_implementations_cap
        ))?;
        output.print(&format!(
            "Reuse Previous Run Implementations: {}",
            self.reuse_previous_run_implementations
        ))?;
        output.print(&format!("Mutation Rate: {}", self.mutation_rate))?;
        output.print(&format!(
            "Rebalance on Start of Pass: {}",
            self.rebalance_on_start_of_pass
        ))?;
        output.print(&format!(
            "Rebalance on End of Run: {}",
            self.rebalance_on_end_of_run
        ))?;
        output.print(&format!("Rebalance on Demand: {}", self.rebalance_on_demand))?;
        if self.rebalance_on_demand {
            output.print(&format!(
                "Rebalance on Demand Cap per Run: {}",
                self.rebalance_on_demand_cap_per_run
            ))?;
            output.print(&format!(
                "Rebalance on Demand Cap per Pass: {}",
                self.rebalance_on_demand_cap_per_pass
            ))?;
        }
        Ok(())
    }
}
