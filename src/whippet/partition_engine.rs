/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
extern crate serde_json;

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

use crate::whippet::error::KlfmResult;
use crate::whippet::id_types::{EdgeId, NodeId};

pub type NodeIdSet = BTreeSet<NodeId>;

/// Common interface for partitioning engines.
pub trait PartitionEngine {
    /// May be called multiple times for a given engine, but never
    /// concurrently.
    fn execute(&mut self) -> KlfmResult<Vec<PartitionSummary>>;
}

/// The result of one partitioning run (or post-run rebalance variant).
#[derive(Clone, Debug, Default)]
pub struct PartitionSummary {
    /// The node ids of each partition. Two sets for bipartitioning.
    pub partition_node_ids: Vec<NodeIdSet>,
    pub partition_edge_ids: BTreeSet<EdgeId>,
    pub partition_edge_names: BTreeSet<String>,
    pub total_cost: i64,
    /// Per-resource |balance| as a fraction of the resource's total weight.
    pub balance: Vec<f64>,
    pub total_weight: Vec<i64>,
    /// Each resource's share of the whole graph's weight.
    pub total_resource_ratio: Vec<f64>,
    /// Per-partition resource shares, one vector per partition.
    pub partition_resource_ratios: Vec<Vec<f64>>,
    /// RMS over resources of the fractional deviation from the target
    /// ratio, averaged over the two partitions.
    pub rms_resource_deviation: f64,
    pub num_passes_used: usize,
    /// Selected implementation index of every node, for solution writers.
    pub node_implementations: BTreeMap<NodeId, usize>,
}

impl PartitionSummary {
    /// Flattens the summary into a machine-readable row.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "partitions": self
                .partition_node_ids
                .iter()
                .map(|set| set.iter().map(|id| id.value()).collect::<Vec<i64>>())
                .collect::<Vec<Vec<i64>>>(),
            "cut_edge_ids": self
                .partition_edge_ids
                .iter()
                .map(|id| id.value())
                .collect::<Vec<i64>>(),
            "cut_edge_names": self.partition_edge_names.iter().collect::<Vec<&String>>(),
            "total_cost": self.total_cost,
            "balance": self.balance,
            "total_weight": self.total_weight,
            "total_resource_ratio": self.total_resource_ratio,
            "partition_resource_ratios": self.partition_resource_ratios,
            "rms_resource_deviation": self.rms_resource_deviation,
            "num_passes_used": self.num_passes_used,
            "node_implementations": self
                .node_implementations
                .iter()
                .map(|(id, idx)| (id.value().to_string(), *idx))
                .collect::<BTreeMap<String, usize>>(),
        })
    }
}
