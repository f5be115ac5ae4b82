/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
extern crate lib_whippet;

use std::collections::BTreeSet;

use lib_whippet::whippet::gain_bucket_manager::GainBucketManager;
use lib_whippet::whippet::gain_bucket_manager_multi_resource_exclusive::GainBucketManagerMultiResourceExclusive;
use lib_whippet::whippet::graph_builder::GraphBuilder;
use lib_whippet::whippet::id_manager::IdManager;
use lib_whippet::whippet::id_types::NodeId;
use lib_whippet::whippet::node::Node;
use lib_whippet::whippet::partition_engine::PartitionEngine;
use lib_whippet::whippet::partition_engine_klfm::PartitionEngineKlfm;
use lib_whippet::whippet::partitioner_config::{
    GainBucketSelectionPolicy, GainBucketType, PartitionerConfig,
};

/// Deterministic pseudo-random edge endpoints for test graphs.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound
    }
}

/// 100 nodes, each purely in one of three resources (LUT=10, DSP=200,
/// BRAM=400), connected by 300 pseudo-random unit-weight edges.
fn resource_pure_graph() -> (Node, Vec<NodeId>, Vec<(usize, usize)>) {
    let mut builder = GraphBuilder::new();
    let ids: Vec<NodeId> = (0..100)
        .map(|i| {
            let wv = match i % 3 {
                0 => vec![10, 0, 0],
                1 => vec![0, 200, 0],
                _ => vec![0, 0, 400],
            };
            builder.add_node(&format!("n{}", i), vec![wv]).unwrap()
        })
        .collect();
    let mut rng = Lcg(17);
    let mut pairs = Vec::new();
    while pairs.len() < 300 {
        let a = rng.next(100);
        let b = rng.next(100);
        if a == b {
            continue;
        }
        builder
            .add_edge(&format!("e{}", pairs.len()), 1, &[ids[a], ids[b]])
            .unwrap();
        pairs.push((a, b));
    }
    (builder.build().unwrap(), ids, pairs)
}

fn cut_cost(pairs: &[(usize, usize)], in_part_a: &dyn Fn(usize) -> bool) -> i64 {
    pairs
        .iter()
        .filter(|(a, b)| in_part_a(*a) != in_part_a(*b))
        .count() as i64
}

#[test]
fn exclusive_largest_gain_respects_every_resource_limit() {
    let (graph, _ids, pairs) = resource_pure_graph();
    let mut config = PartitionerConfig::new(3);
    config.device_resource_capacities = vec![1000, 10000, 20000];
    config.device_resource_max_imbalances = vec![0.05, 0.05, 0.05];
    config.gain_bucket_type = GainBucketType::MultiResourceExclusive;
    config.gain_bucket_selection_policy = GainBucketSelectionPolicy::LargestGain;
    config.multilevel = false;

    let mut engine = PartitionEngineKlfm::new(&graph, config).unwrap();
    let summaries = engine.execute().unwrap();
    let summary = &summaries[0];

    for res in 0..3 {
        let total = summary.total_weight[res];
        let balance = (summary.balance[res] * total as f64).round() as i64;
        let max_imbalance = ((0.05 * total as f64).ceil() as i64).max(1);
        assert!(
            balance <= max_imbalance,
            "resource {} balance {} exceeds {}",
            res,
            balance,
            max_imbalance
        );
    }

    // The refined cut must beat a naive alternating split by a clear
    // margin.
    let baseline = cut_cost(&pairs, &|i| i % 2 == 0);
    assert!(
        (summary.total_cost as f64) < 0.85 * baseline as f64,
        "cost {} vs baseline {}",
        summary.total_cost,
        baseline
    );
}

#[test]
fn exclusive_manager_rejects_mixed_weight_nodes() {
    let mut builder = GraphBuilder::new();
    let n1 = builder.add_node("n1", vec![vec![1, 1]]).unwrap();
    let n2 = builder.add_node("n2", vec![vec![1, 0]]).unwrap();
    builder.add_edge("e", 1, &[n1, n2]).unwrap();
    let graph = builder.build().unwrap();

    let mut config = PartitionerConfig::new(2);
    config.device_resource_capacities = vec![10, 10];
    config.gain_bucket_type = GainBucketType::MultiResourceExclusive;
    config.multilevel = false;

    let mut engine = PartitionEngineKlfm::new(&graph, config).unwrap();
    assert!(engine.execute().is_err());
}

#[test]
fn exclusive_manager_rejects_reimplementation_that_spans_resources() {
    let mut node = Node::new(IdManager::acquire_node_id(), "n");
    node.add_weight_vector(vec![5, 0]);
    node.add_weight_vector(vec![3, 3]);
    let mut manager = GainBucketManagerMultiResourceExclusive::new(
        vec![0.05, 0.05],
        GainBucketSelectionPolicy::LargestGain,
        false,
        0,
    );
    manager.add_node(0, &node, true, &[5, 0]).unwrap();
    // A rebalance elsewhere switches the node onto its mixed-resource
    // implementation; the manager must surface the exclusivity violation
    // rather than silently dropping the node from its buckets.
    node.set_selected_weight_vector(1);
    assert!(manager.update_node_implementation(&node).is_err());
}

#[test]
fn exclusive_policies_all_complete() {
    for policy in &[
        GainBucketSelectionPolicy::RandomResource,
        GainBucketSelectionPolicy::LargestResourceImbalance,
        GainBucketSelectionPolicy::LargestUnconstrainedGain,
        GainBucketSelectionPolicy::LargestGain,
    ] {
        let (graph, _ids, _pairs) = resource_pure_graph();
        let mut config = PartitionerConfig::new(3);
        config.device_resource_capacities = vec![1000, 10000, 20000];
        config.device_resource_max_imbalances = vec![0.2, 0.2, 0.2];
        config.gain_bucket_type = GainBucketType::MultiResourceExclusive;
        config.gain_bucket_selection_policy = *policy;
        config.multilevel = false;
        let mut engine = PartitionEngineKlfm::new(&graph, config).unwrap();
        let summaries = engine.execute().unwrap();
        assert!(!summaries.is_empty(), "policy {:?} produced no runs", policy);
        assert_eq!(summaries[0].total_weight, vec![340, 6600, 13200]);
    }
}

#[test]
fn unconstrained_resource_never_triggers_violation_checks() {
    let mut builder = GraphBuilder::new();
    let ids: Vec<NodeId> = (0..4)
        .map(|i| {
            // All of the second resource's weight sits on two nodes, far
            // beyond any balanced split.
            let wv = if i < 2 { vec![1, 100] } else { vec![1, 0] };
            builder.add_node(&format!("n{}", i), vec![wv]).unwrap()
        })
        .collect();
    for i in 0..4 {
        builder
            .add_edge(&format!("e{}", i), 1, &[ids[i], ids[(i + 1) % 4]])
            .unwrap();
    }
    let graph = builder.build().unwrap();

    let mut config = PartitionerConfig::new(2);
    config.device_resource_capacities = vec![8, 400];
    config.device_resource_max_imbalances = vec![0.5, 0.05];
    config.gain_bucket_type = GainBucketType::SingleResource;
    config.derive_constraint_flags();
    config.multilevel = false;
    assert!(!config.constrain_balance_by_resource[1]);

    let mut engine = PartitionEngineKlfm::new(&graph, config).unwrap();
    let summaries = engine.execute().unwrap();
    // No violator-fix variant is emitted: the lopsided resource is exempt
    // from balance checks.
    assert_eq!(summaries.len(), 2);
    assert!(summaries[0].balance[0] <= 0.5);
}

#[test]
fn zero_weight_resource_contributes_nothing_and_divides_nothing() {
    let mut builder = GraphBuilder::new();
    let ids: Vec<NodeId> = (0..4)
        .map(|i| builder.add_node(&format!("n{}", i), vec![vec![1, 0]]).unwrap())
        .collect();
    for i in 0..4 {
        builder
            .add_edge(&format!("e{}", i), 1, &[ids[i], ids[(i + 1) % 4]])
            .unwrap();
    }
    let graph = builder.build().unwrap();

    let mut config = PartitionerConfig::new(2);
    config.device_resource_capacities = vec![8, 8];
    config.device_resource_max_imbalances = vec![0.5, 0.5];
    config.gain_bucket_type = GainBucketType::MultiResourceMixed;
    config.gain_bucket_selection_policy =
        GainBucketSelectionPolicy::BestGainImbalanceScoreWithAffinities;
    config.multilevel = false;

    let mut engine = PartitionEngineKlfm::new(&graph, config).unwrap();
    let summaries = engine.execute().unwrap();
    let summary = &summaries[0];
    assert_eq!(summary.total_weight[1], 0);
    assert_eq!(summary.total_resource_ratio[1], 0.0);
    assert_eq!(summary.balance[1], 0.0);
    assert_eq!(summary.total_cost, 2);
}

#[test]
fn mixed_adaptive_conserves_total_weight() {
    let mut builder = GraphBuilder::new();
    let ids: Vec<NodeId> = (0..6)
        .map(|i| {
            builder
                .add_node(&format!("n{}", i), vec![vec![10, 0], vec![0, 10]])
                .unwrap()
        })
        .collect();
    for i in 0..5 {
        builder
            .add_edge(&format!("e{}", i), 1, &[ids[i], ids[i + 1]])
            .unwrap();
    }
    let graph = builder.build().unwrap();

    let mut config = PartitionerConfig::new(2);
    config.device_resource_capacities = vec![100, 100];
    config.device_resource_max_imbalances = vec![0.5, 0.5];
    config.gain_bucket_type = GainBucketType::MultiResourceMixedAdaptive;
    config.gain_bucket_selection_policy =
        GainBucketSelectionPolicy::BestGainImbalanceScoreClassic;
    config.use_adaptive_node_implementations = true;
    config.multilevel = false;

    let mut engine = PartitionEngineKlfm::new(&graph, config).unwrap();
    let summaries = engine.execute().unwrap();
    let summary = &summaries[0];

    // Every node has the same two implementations, so the summary's totals
    // must equal the sum of the recorded selections.
    let mut expected = vec![0i64; 2];
    for id in &ids {
        let index = summary.node_implementations[id];
        let wv = if index == 0 {
            vec![10, 0]
        } else {
            vec![0, 10]
        };
        for (res, w) in wv.iter().enumerate() {
            expected[res] += w;
        }
    }
    assert_eq!(summary.total_weight, expected);
    assert_eq!(
        summary.partition_node_ids[0].len() + summary.partition_node_ids[1].len(),
        6
    );
}

#[test]
fn mixed_policies_all_complete() {
    for policy in &[
        GainBucketSelectionPolicy::RandomResource,
        GainBucketSelectionPolicy::MostUnbalancedResource,
        GainBucketSelectionPolicy::BestGainImbalanceScoreClassic,
        GainBucketSelectionPolicy::BestGainImbalanceScoreWithAffinities,
    ] {
        let mut builder = GraphBuilder::new();
        let ids: Vec<NodeId> = (0..8)
            .map(|i| {
                builder
                    .add_node(&format!("n{}", i), vec![vec![3, 1], vec![1, 3]])
                    .unwrap()
            })
            .collect();
        for i in 0..8 {
            builder
                .add_edge(&format!("e{}", i), 1, &[ids[i], ids[(i + 1) % 8]])
                .unwrap();
        }
        let graph = builder.build().unwrap();

        let mut config = PartitionerConfig::new(2);
        config.device_resource_capacities = vec![64, 64];
        config.device_resource_max_imbalances = vec![0.5, 0.5];
        config.gain_bucket_type = GainBucketType::MultiResourceMixed;
        config.gain_bucket_selection_policy = *policy;
        config.multilevel = false;
        let mut engine = PartitionEngineKlfm::new(&graph, config).unwrap();
        let summaries = engine.execute().unwrap();
        assert!(!summaries.is_empty(), "policy {:?} produced no runs", policy);
        let summary = &summaries[0];
        assert_eq!(
            summary.partition_node_ids[0].len() + summary.partition_node_ids[1].len(),
            8
        );
    }
}

#[test]
fn coarsening_groups_tightly_connected_nodes() {
    // Five cliques of four nodes, joined by single bridge edges: the
    // clusterer should fold each clique into one supernode.
    let mut builder = GraphBuilder::new();
    let mut ids: Vec<NodeId> = Vec::new();
    for c in 0..5 {
        for i in 0..4 {
            ids.push(
                builder
                    .add_node(&format!("c{}n{}", c, i), vec![vec![1]])
                    .unwrap(),
            );
        }
    }
    let mut edge_num = 0;
    for c in 0..5 {
        let base = c * 4;
        for i in 0..4 {
            for j in (i + 1)..4 {
                builder
                    .add_edge(
                        &format!("e{}", edge_num),
                        1,
                        &[ids[base + i], ids[base + j]],
                    )
                    .unwrap();
                edge_num += 1;
            }
        }
        if c > 0 {
            builder
                .add_edge(
                    &format!("bridge{}", c),
                    1,
                    &[ids[(c - 1) * 4], ids[c * 4]],
                )
                .unwrap();
        }
    }
    let graph = builder.build().unwrap();

    let mut config = PartitionerConfig::new(1);
    config.device_resource_capacities = vec![32];
    config.device_resource_max_imbalances = vec![0.5];
    config.gain_bucket_type = GainBucketType::SingleResource;
    config.multilevel = false;
    let mut engine = PartitionEngineKlfm::new(&graph, config).unwrap();

    engine.coarsen_hierarchical_interconnection(4, 0).unwrap();
    let coarse_ids = engine.node_ids();
    assert_eq!(coarse_ids.len(), 5);
    for id in &coarse_ids {
        let node = engine.node(*id).unwrap();
        assert!(node.is_supernode());
        assert_eq!(node.internal_nodes().len(), 4);
        assert_eq!(node.selected_weight_vector(), vec![4]);
    }
    // Clique-internal edges went inside the supernodes; only the four
    // bridges remain at the top level.
    assert_eq!(engine.edge_ids().len(), 4);

    // Expanding everything restores the original node count.
    let members: BTreeSet<NodeId> = coarse_ids.iter().cloned().collect();
    for id in members {
        engine.expand_supernode(id).unwrap();
    }
    assert_eq!(engine.node_ids().len(), 20);
    assert_eq!(engine.edge_ids().len(), 34);
}

#[test]
fn neighborhood_coarsening_respects_supernode_size_cap() {
    let mut builder = GraphBuilder::new();
    let ids: Vec<NodeId> = (0..24)
        .map(|i| builder.add_node(&format!("n{}", i), vec![vec![1]]).unwrap())
        .collect();
    for i in 0..24 {
        builder
            .add_edge(&format!("e{}", i), 1, &[ids[i], ids[(i + 1) % 24]])
            .unwrap();
    }
    let graph = builder.build().unwrap();

    let mut config = PartitionerConfig::new(1);
    config.device_resource_capacities = vec![32];
    config.device_resource_max_imbalances = vec![0.5];
    config.gain_bucket_type = GainBucketType::SingleResource;
    config.multilevel = false;
    let mut engine = PartitionEngineKlfm::new(&graph, config).unwrap();

    engine.coarsen_neighborhood_interconnection(4, 0).unwrap();
    let coarse_ids = engine.node_ids();
    // Some clustering must happen on a connected graph.
    assert!(coarse_ids.len() < 24);
    let mut total_base_nodes = 0;
    for id in &coarse_ids {
        let node = engine.node(*id).unwrap();
        if node.is_supernode() {
            assert!(node.internal_nodes().len() <= 4);
            assert!(node.internal_nodes().len() >= 2);
            total_base_nodes += node.internal_nodes().len();
        } else {
            total_base_nodes += 1;
        }
    }
    assert_eq!(total_base_nodes, 24);
    // Total weight is conserved through coarsening.
    assert_eq!(engine.total_weight(), &[24]);
}
