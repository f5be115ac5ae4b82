/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
extern crate lib_whippet;

use std::collections::BTreeSet;

use lib_whippet::whippet::graph_builder::GraphBuilder;
use lib_whippet::whippet::id_manager::IdManager;
use lib_whippet::whippet::id_types::NodeId;
use lib_whippet::whippet::node::Node;
use lib_whippet::whippet::partition_engine_klfm::{NodePartitions, PartitionEngineKlfm};
use lib_whippet::whippet::partitioner_config::PartitionerConfig;

fn base_node(weight_vectors: Vec<Vec<i64>>) -> Node {
    let mut node = Node::new(IdManager::acquire_node_id(), "");
    for wv in weight_vectors {
        node.add_weight_vector(wv);
    }
    node
}

#[test]
fn weight_vector_selection_rolls_back_one_change() {
    let mut node = base_node(vec![vec![1], vec![5], vec![9]]);
    assert_eq!(node.selected_weight_vector_index(), 0);
    node.set_selected_weight_vector_with_rollback(2);
    assert_eq!(node.selected_weight_vector(), vec![9]);
    node.revert_selected_weight_vector();
    assert_eq!(node.selected_weight_vector_index(), 0);
    // A second revert without an intervening change has no further effect.
    node.revert_selected_weight_vector();
    assert_eq!(node.selected_weight_vector_index(), 0);
}

#[test]
fn supernode_enumerates_all_child_combinations_when_small() {
    let mut supernode = Node::new(IdManager::acquire_node_id(), "");
    supernode
        .add_internal_node(base_node(vec![vec![3, 0], vec![0, 3]]))
        .unwrap();
    supernode
        .add_internal_node(base_node(vec![vec![2, 0], vec![0, 5]]))
        .unwrap();
    supernode.populate_supernode_weight_vectors(false, 16);
    // The default plus all four combinations.
    assert_eq!(supernode.num_personalities(), 5);
    assert_eq!(supernode.selected_weight_vector(), vec![5, 0]);
    for index in 0..supernode.num_personalities() {
        supernode.set_selected_weight_vector(index);
        supernode.check_supernode_weight_vector().unwrap();
    }
}

#[test]
fn supernode_restricted_to_default_has_one_implementation() {
    let mut supernode = Node::new(IdManager::acquire_node_id(), "");
    supernode
        .add_internal_node(base_node(vec![vec![3], vec![7]]))
        .unwrap();
    supernode
        .add_internal_node(base_node(vec![vec![1], vec![2]]))
        .unwrap();
    supernode.populate_supernode_weight_vectors(true, 16);
    assert_eq!(supernode.num_personalities(), 1);
    assert_eq!(supernode.selected_weight_vector(), vec![4]);
}

#[test]
fn supernode_bounded_construction_respects_cap() {
    let mut supernode = Node::new(IdManager::acquire_node_id(), "");
    for _ in 0..3 {
        supernode
            .add_internal_node(base_node(vec![
                vec![4, 0],
                vec![0, 4],
                vec![2, 2],
            ]))
            .unwrap();
    }
    // 27 possible combinations exceed the cap of 8, so the bounded
    // construction runs: two resource-heavy vectors, two sweeps, and random
    // fills up to the cap, plus the default.
    supernode.populate_supernode_weight_vectors(false, 8);
    assert_eq!(supernode.num_personalities(), 9);
    for index in 0..supernode.num_personalities() {
        supernode.set_selected_weight_vector(index);
        supernode.check_supernode_weight_vector().unwrap();
    }
    // The resource-heavy implementations concentrate all children in one
    // resource.
    assert_eq!(supernode.weight_vector(1), &[12, 0]);
    assert_eq!(supernode.weight_vector(2), &[0, 12]);
}

#[test]
fn rebalance_switches_to_the_implementation_minimizing_violation() {
    let mut node = base_node(vec![vec![10], vec![2]]);
    let mut balance = vec![8i64];
    node.set_weight_vector_to_minimize_imbalance(
        &mut balance,
        &[2],
        true,
        true,
        false,
        &[1],
        &[12],
    );
    assert_eq!(node.selected_weight_vector_index(), 1);
    assert_eq!(balance, vec![0]);
}

#[test]
fn single_implementation_node_is_never_changed_by_rebalance() {
    let mut node = base_node(vec![vec![10]]);
    let mut balance = vec![100i64];
    node.set_weight_vector_to_minimize_imbalance(
        &mut balance,
        &[1],
        true,
        true,
        true,
        &[1],
        &[10],
    );
    assert_eq!(node.selected_weight_vector_index(), 0);
    assert_eq!(balance, vec![100]);
}

#[test]
fn builder_rejects_invalid_edges() {
    let mut builder = GraphBuilder::new();
    let n1 = builder.add_node("n1", vec![vec![1]]).unwrap();
    assert!(builder.add_edge("dangling", 1, &[n1]).is_err());
    assert!(builder
        .add_edge("unknown", 1, &[n1, NodeId::from(-42i64)])
        .is_err());
    let n2 = builder.add_node("n2", vec![vec![1]]).unwrap();
    assert!(builder.add_edge("weightless", 0, &[n1, n2]).is_err());
    assert!(builder.add_edge("ok", 1, &[n1, n2]).is_ok());
}

#[test]
fn removing_a_connection_drops_degenerate_edges() {
    let mut builder = GraphBuilder::new();
    let n1 = builder.add_node("n1", vec![vec![1]]).unwrap();
    let n2 = builder.add_node("n2", vec![vec![1]]).unwrap();
    let n3 = builder.add_node("n3", vec![vec![1]]).unwrap();
    let pair = builder.add_edge("pair", 1, &[n1, n2]).unwrap();
    let triple = builder.add_edge("triple", 1, &[n1, n2, n3]).unwrap();
    let mut graph = builder.build().unwrap();

    // A hyperedge shrinks but survives with two endpoints left.
    graph.remove_internal_connection(n3, triple).unwrap();
    assert_eq!(graph.internal_edges()[&triple].degree(), 2);
    assert!(!graph.internal_nodes()[&n3].edge_ids().contains(&triple));

    // A two-point edge losing an endpoint is no longer an edge at all.
    graph.remove_internal_connection(n1, pair).unwrap();
    assert!(!graph.internal_edges().contains_key(&pair));
    assert!(!graph.internal_nodes()[&n2].edge_ids().contains(&pair));
    assert!(graph.check_internal_graph().is_ok());

    assert!(graph.remove_internal_connection(n1, pair).is_err());
}

#[test]
fn builder_rejects_mismatched_resource_counts() {
    let mut builder = GraphBuilder::new();
    let n1 = builder.add_node("n1", vec![vec![1]]).unwrap();
    let n2 = builder.add_node("n2", vec![vec![1, 2]]).unwrap();
    builder.add_edge("e", 1, &[n1, n2]).unwrap();
    assert!(builder.build().is_err());
}

fn chain_graph(len: usize) -> (Node, Vec<NodeId>) {
    let mut builder = GraphBuilder::new();
    let ids: Vec<NodeId> = (0..len)
        .map(|i| builder.add_node(&format!("n{}", i), vec![vec![1]]).unwrap())
        .collect();
    for i in 0..len - 1 {
        builder
            .add_edge(&format!("e{}", i), 1, &[ids[i], ids[i + 1]])
            .unwrap();
    }
    (builder.build().unwrap(), ids)
}

fn single_resource_config() -> PartitionerConfig {
    let mut config = PartitionerConfig::new(1);
    config.device_resource_capacities = vec![64];
    config.device_resource_max_imbalances = vec![0.5];
    config.multilevel = false;
    config
}

#[test]
fn supernode_round_trip_restores_nodes_edges_and_cut() {
    let (graph, ids) = chain_graph(6);
    let mut engine = PartitionEngineKlfm::new(&graph, single_resource_config()).unwrap();

    let pre_nodes = engine.node_ids();
    let pre_edges = engine.edge_ids();
    let partition = NodePartitions {
        part_a: ids[0..3].iter().cloned().collect(),
        part_b: ids[3..6].iter().cloned().collect(),
    };
    let pre_cut = engine.get_cut_set(&partition);
    assert_eq!(pre_cut.len(), 1);

    let members: BTreeSet<NodeId> = ids[1..4].iter().cloned().collect();
    let supernode_id = engine.make_supernode(&members).unwrap();
    let supernode = engine.node(supernode_id).unwrap();
    assert!(supernode.is_supernode());
    assert_eq!(supernode.internal_nodes().len(), 3);
    // Both boundary edges were split, so the supernode carries two ports.
    assert_eq!(supernode.ports().len(), 2);
    assert!(!engine.node_ids().contains(&ids[1]));

    assert!(engine.expand_supernode(supernode_id).unwrap());
    assert_eq!(engine.node_ids(), pre_nodes);
    assert_eq!(engine.edge_ids(), pre_edges);
    assert_eq!(engine.get_cut_set(&partition), pre_cut);
}

#[test]
fn supernode_weight_vectors_compose_from_children() {
    let (graph, ids) = chain_graph(4);
    let mut engine = PartitionEngineKlfm::new(&graph, single_resource_config()).unwrap();
    let members: BTreeSet<NodeId> = ids[0..2].iter().cloned().collect();
    let supernode_id = engine.make_supernode(&members).unwrap();
    assert_eq!(
        engine.node(supernode_id).unwrap().selected_weight_vector(),
        vec![2]
    );
    assert_eq!(engine.total_weight(), &[4]);
    engine.expand_supernode(supernode_id).unwrap();
    assert_eq!(engine.total_weight(), &[4]);
}

#[test]
fn adjacent_supernodes_sharing_a_boundary_edge_merge_cleanly() {
    let (graph, ids) = chain_graph(4);
    let mut engine = PartitionEngineKlfm::new(&graph, single_resource_config()).unwrap();
    let pre_nodes = engine.node_ids();

    let left: BTreeSet<NodeId> = ids[0..2].iter().cloned().collect();
    let right: BTreeSet<NodeId> = ids[2..4].iter().cloned().collect();
    let x = engine.make_supernode(&left).unwrap();
    let y = engine.make_supernode(&right).unwrap();
    // The middle edge is now shared between the two supernodes.
    assert!(engine.expand_supernode(x).unwrap());
    assert!(engine.expand_supernode(y).unwrap());

    assert_eq!(engine.node_ids(), pre_nodes);
    assert_eq!(engine.edge_ids().len(), 3);
    // The middle connectivity survives with exactly one edge between the
    // two inner nodes.
    let middle: Vec<_> = engine
        .edge_ids()
        .iter()
        .filter(|edge_id| {
            let edge = engine.edge(**edge_id).unwrap();
            edge.edge.connection_ids() == &[ids[1], ids[2]][..]
        })
        .cloned()
        .collect();
    assert_eq!(middle.len(), 1);
}
