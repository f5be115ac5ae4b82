/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
extern crate itertools;
extern crate rand;

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use rand::prelude::*;

use crate::whippet::edge::Edge;
use crate::whippet::error::{KlfmError, KlfmResult};
use crate::whippet::id_types::{EdgeId, NodeId};
use crate::whippet::port::Port;
use crate::whippet::weight_score::{near_violator_imbalance_power, ratio_power_if_changed};

pub type NodeMap = BTreeMap<NodeId, Node>;
pub type EdgeMap = BTreeMap<EdgeId, Edge>;
pub type PortMap = BTreeMap<NodeId, Port>;
pub type EdgeIdSet = BTreeSet<EdgeId>;

/// A graph node. Base nodes carry one or more alternative *implementations*
/// (fixed-length per-resource weight vectors), of which exactly one is
/// selected at any time. Supernodes additionally own an internal graph of
/// child nodes and edges; their weight vectors are composed from child
/// implementations, with a per-vector map recording which child
/// implementation produced each component sum.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    // Used by the KLFM algorithm.
    pub is_locked: bool,
    edge_ids: EdgeIdSet,
    ports: PortMap,
    internal_nodes: NodeMap,
    internal_edges: EdgeMap,
    weight_vectors: Vec<Vec<i64>>,
    // For every entry in 'weight_vectors' there is an entry here with a
    // matching index, holding a (child id, child weight vector index) pair
    // for each internal node. These are the selections assumed by the
    // corresponding supernode weight vector, and are required to push the
    // supernode's choice down when it is expanded.
    internal_node_weight_vector_indices: Vec<Vec<(NodeId, usize)>>,
    selected_weight_vector_index: usize,
    prev_selected_weight_vector_index: usize,
}

impl Node {
    pub fn new(node_id: NodeId, node_name: &str) -> Self {
        Self {
            id: node_id,
            name: node_name.to_owned(),
            is_locked: false,
            edge_ids: BTreeSet::new(),
            ports: BTreeMap::new(),
            internal_nodes: BTreeMap::new(),
            internal_edges: BTreeMap::new(),
            weight_vectors: Vec::new(),
            internal_node_weight_vector_indices: Vec::new(),
            selected_weight_vector_index: 0,
            prev_selected_weight_vector_index: 0,
        }
    }

    /// Indicates that the node is a composite of other nodes.
    pub fn is_supernode(&self) -> bool {
        !self.internal_nodes.is_empty() || !self.internal_edges.is_empty()
    }

    pub fn add_weight_vector(&mut self, wv: Vec<i64>) {
        assert!(!self.is_supernode());
        self.weight_vectors.push(wv);
    }

    // ---- Edge connectivity ---- //

    pub fn connect_edge(&mut self, edge_id: EdgeId) {
        self.edge_ids.insert(edge_id);
    }

    /// Returns true if a connection was removed.
    pub fn disconnect_edge(&mut self, edge_id: EdgeId) -> bool {
        self.edge_ids.remove(&edge_id)
    }

    pub fn edge_ids(&self) -> &EdgeIdSet {
        &self.edge_ids
    }

    /// Locate the reference to edge `old_id` and change it to `new_id`. For
    /// supernodes this also rewrites the matching port's external edge id.
    pub fn swap_edge_connection(&mut self, old_id: EdgeId, new_id: EdgeId) -> KlfmResult<()> {
        if !self.edge_ids.remove(&old_id) {
            return Err(KlfmError::Graph(format!(
                "Failed to locate edge {} while swapping connections on node {}.",
                old_id, self.id
            )));
        }
        self.edge_ids.insert(new_id);
        for port in self.ports.values_mut() {
            if port.external_edge_id == old_id {
                port.external_edge_id = new_id;
            }
        }
        Ok(())
    }

    // ---- Supernode internals ---- //

    pub fn ports(&self) -> &PortMap {
        &self.ports
    }
    pub fn ports_mut(&mut self) -> &mut PortMap {
        &mut self.ports
    }
    pub fn internal_nodes(&self) -> &NodeMap {
        &self.internal_nodes
    }
    pub fn internal_nodes_mut(&mut self) -> &mut NodeMap {
        &mut self.internal_nodes
    }
    pub fn internal_edges(&self) -> &EdgeMap {
        &self.internal_edges
    }
    pub fn internal_edges_mut(&mut self) -> &mut EdgeMap {
        &mut self.internal_edges
    }

    pub fn add_port(&mut self, port: Port) -> KlfmResult<()> {
        if self.ports.contains_key(&port.id) {
            return Err(KlfmError::Graph(format!(
                "Duplicate port id {} on node {}.",
                port.id, self.id
            )));
        }
        self.ports.insert(port.id, port);
        Ok(())
    }

    pub fn add_internal_node(&mut self, node: Node) -> KlfmResult<()> {
        if self.internal_nodes.contains_key(&node.id) {
            return Err(KlfmError::Graph(format!(
                "Duplicate internal node id {}.",
                node.id
            )));
        }
        self.internal_nodes.insert(node.id, node);
        Ok(())
    }

    pub fn add_internal_edge(&mut self, edge: Edge) -> KlfmResult<()> {
        if self.internal_edges.contains_key(&edge.id) {
            return Err(KlfmError::Graph(format!(
                "Duplicate internal edge id {}.",
                edge.id
            )));
        }
        self.internal_edges.insert(edge.id, edge);
        Ok(())
    }

    pub fn get_internal_node(&self, id: NodeId) -> Option<&Node> {
        self.internal_nodes.get(&id)
    }

    /// Severs the link between an internal node and an internal edge in both
    /// directions. An edge left with fewer than two connections is no longer
    /// a valid hyperedge and is dropped, disconnecting its remaining
    /// endpoints.
    pub fn remove_internal_connection(
        &mut self,
        node_id: NodeId,
        edge_id: EdgeId,
    ) -> KlfmResult<()> {
        let node = self.internal_nodes.get_mut(&node_id).ok_or_else(|| {
            KlfmError::Graph(format!("Cannot disconnect missing node {}.", node_id))
        })?;
        if !node.disconnect_edge(edge_id) {
            return Err(KlfmError::Graph(format!(
                "Node {} is not connected to edge {}.",
                node_id, edge_id
            )));
        }
        let edge = self.internal_edges.get_mut(&edge_id).ok_or_else(|| {
            KlfmError::Graph(format!("Cannot disconnect missing edge {}.", edge_id))
        })?;
        edge.remove_connection(node_id);
        if edge.degree() < 2 {
            let remaining: Vec<NodeId> = edge.connection_ids().to_vec();
            self.internal_edges.remove(&edge_id);
            for id in remaining {
                if let Some(node) = self.internal_nodes.get_mut(&id) {
                    node.disconnect_edge(edge_id);
                }
            }
        }
        Ok(())
    }

    pub fn get_internal_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.internal_nodes.get_mut(&id)
    }

    // ---- Weight vectors ---- //

    /// The currently selected weight vector. A supernode whose vectors have
    /// not yet been populated falls back to the sum of its children's
    /// selected vectors.
    pub fn selected_weight_vector(&self) -> Vec<i64> {
        if self.weight_vectors.is_empty() && self.is_supernode() {
            self.total_internal_selected_weight(None)
        } else {
            assert!(self.selected_weight_vector_index < self.weight_vectors.len());
            self.weight_vectors[self.selected_weight_vector_index].clone()
        }
    }

    pub fn selected_weight_vector_index(&self) -> usize {
        self.selected_weight_vector_index
    }

    pub fn weight_vector(&self, index: usize) -> &[i64] {
        assert!(index < self.weight_vectors.len());
        &self.weight_vectors[index]
    }

    pub fn weight_vectors(&self) -> &Vec<Vec<i64>> {
        &self.weight_vectors
    }

    pub fn num_resources(&self) -> usize {
        self.selected_weight_vector().len()
    }

    pub fn num_personalities(&self) -> usize {
        self.weight_vectors.len()
    }

    /// Only changes the selected weight vector; the previous index is left
    /// untouched.
    pub fn set_selected_weight_vector(&mut self, index: usize) {
        assert!(index < self.weight_vectors.len());
        self.selected_weight_vector_index = index;
    }

    /// Changes the selected weight vector and records the outgoing one for
    /// `revert_selected_weight_vector`.
    pub fn set_selected_weight_vector_with_rollback(&mut self, index: usize) {
        self.prev_selected_weight_vector_index = self.selected_weight_vector_index;
        self.set_selected_weight_vector(index);
    }

    /// Reverts the most recent change only. Calling more than once between
    /// changes has no further effect.
    pub fn revert_selected_weight_vector(&mut self) {
        self.set_selected_weight_vector(self.prev_selected_weight_vector_index);
    }

    /// Componentwise sum of the children's selected weight vectors. If
    /// `indices` is provided, records the (child id, selected index) pairs
    /// that produced the total.
    pub fn total_internal_selected_weight(
        &self,
        indices: Option<&mut Vec<(NodeId, usize)>>,
    ) -> Vec<i64> {
        assert!(self.is_supernode());
        let num_res = self
            .internal_nodes
            .values()
            .next()
            .unwrap()
            .selected_weight_vector()
            .len();
        let mut total_weights = vec![0; num_res];
        let mut recorded = Vec::new();
        for (id, node) in &self.internal_nodes {
            let dwv = node.selected_weight_vector();
            for (i, w) in dwv.iter().enumerate() {
                total_weights[i] += w;
            }
            recorded.push((*id, node.selected_weight_vector_index()));
        }
        if let Some(indices) = indices {
            *indices = recorded;
        }
        total_weights
    }

    fn add_supernode_weight_vector(&mut self, wv: Vec<i64>, internal_indices: Vec<(NodeId, usize)>) {
        assert!(self.is_supernode());
        self.weight_vectors.push(wv);
        self.internal_node_weight_vector_indices.push(internal_indices);
    }

    /// Populates a supernode's weight vectors from its component nodes.
    ///
    /// The vector composed of the children's currently selected
    /// implementations (the default) is always stored first and selected. If
    /// the children admit few enough combinations, all of them are
    /// enumerated; otherwise a bounded set is constructed: one
    /// implementation maximally weighted toward each resource, two greedy
    /// sweeps (forward and reverse over the children) that keep the running
    /// component sums close to zero, and deterministic random fills up to
    /// `max_implementations_per_supernode`.
    pub fn populate_supernode_weight_vectors(
        &mut self,
        restrict_to_default_implementation: bool,
        max_implementations_per_supernode: usize,
    ) {
        assert!(!self.internal_nodes.is_empty());
        self.weight_vectors.clear();
        self.internal_node_weight_vector_indices.clear();
        let num_resources = self
            .internal_nodes
            .values()
            .next()
            .unwrap()
            .selected_weight_vector()
            .len();
        let mut max_possible_vectors: usize = 1;
        for node in self.internal_nodes.values() {
            max_possible_vectors =
                max_possible_vectors.saturating_mul(node.weight_vectors().len());
        }

        // Always set the weight vector constructed from the default
        // selections.
        let mut default_indices = Vec::new();
        let default_weight_vector =
            self.total_internal_selected_weight(Some(&mut default_indices));
        self.add_supernode_weight_vector(default_weight_vector, default_indices);
        self.set_selected_weight_vector(0);
        if max_possible_vectors == 1 || restrict_to_default_implementation {
            return;
        }

        if max_possible_vectors <= max_implementations_per_supernode {
            // Easy case: include all possible implementations.
            let child_choices: Vec<Vec<(NodeId, usize)>> = self
                .internal_nodes
                .iter()
                .map(|(id, node)| (0..node.num_personalities()).map(|i| (*id, i)).collect())
                .collect();
            let combinations: Vec<Vec<(NodeId, usize)>> = child_choices
                .iter()
                .map(|choices| choices.iter().cloned())
                .multi_cartesian_product()
                .collect();
            assert_eq!(combinations.len(), max_possible_vectors);
            for combination in combinations {
                let mut wv = vec![0; num_resources];
                for &(child_id, wv_index) in &combination {
                    let child_wv = self.internal_nodes[&child_id].weight_vector(wv_index);
                    for (i, w) in child_wv.iter().enumerate() {
                        wv[i] += w;
                    }
                }
                self.add_supernode_weight_vector(wv, combination);
            }
            return;
        }

        // Tough (common) case: have to choose between implementations.
        let mut implementations: Vec<(Vec<i64>, Vec<(NodeId, usize)>)> = Vec::new();

        // One implementation maximally weighted toward each resource.
        for res in 0..num_resources {
            let mut implementation = vec![0; num_resources];
            let mut implementation_indices = Vec::new();
            for (id, node) in &self.internal_nodes {
                let mut max_index = 0;
                let mut max_weight = 0;
                for (wv_index, wv) in node.weight_vectors().iter().enumerate() {
                    if wv[res] > max_weight {
                        max_weight = wv[res];
                        max_index = wv_index;
                    }
                }
                for (i, w) in node.weight_vector(max_index).iter().enumerate() {
                    implementation[i] += w;
                }
                implementation_indices.push((*id, max_index));
            }
            implementations.push((implementation, implementation_indices));
        }

        // Two balance-matched implementations: greedy sweeps over the
        // children, keeping the running component sums as close to zero as
        // possible. One forward, one reverse, since the greedy outcome
        // depends on visit order.
        let forward: Vec<NodeId> = self.internal_nodes.keys().cloned().collect();
        let reverse: Vec<NodeId> = forward.iter().rev().cloned().collect();
        for order in &[forward, reverse] {
            let mut implementation: Vec<i64> = vec![0; num_resources];
            let mut implementation_indices = Vec::new();
            for node_id in order {
                let node = &self.internal_nodes[node_id];
                let mut best_index = 0;
                let mut best_diff = f64::MAX;
                for (wv_index, wv) in node.weight_vectors().iter().enumerate() {
                    let total_diff: f64 = implementation
                        .iter()
                        .zip(wv.iter())
                        .map(|(cur, w)| ((cur + w).abs()) as f64)
                        .sum();
                    if total_diff < best_diff {
                        best_index = wv_index;
                        best_diff = total_diff;
                    }
                }
                for (i, w) in node.weight_vector(best_index).iter().enumerate() {
                    implementation[i] += w;
                }
                implementation_indices.push((*node_id, best_index));
            }
            implementations.push((implementation, implementation_indices));
        }

        // Fill the remainder with random selections. Seeded so supernode
        // formation is reproducible.
        // TODO: Dedupe duplicate implementations produced by the random
        // fill; they waste cap slots.
        let mut rng = StdRng::seed_from_u64(0);
        while implementations.len() < max_implementations_per_supernode {
            let mut implementation = vec![0; num_resources];
            let mut implementation_indices = Vec::new();
            for (id, node) in &self.internal_nodes {
                let selected = rng.gen_range(0, node.num_personalities());
                for (i, w) in node.weight_vector(selected).iter().enumerate() {
                    implementation[i] += w;
                }
                implementation_indices.push((*id, selected));
            }
            implementations.push((implementation, implementation_indices));
        }

        for (wv, indices) in implementations {
            self.add_supernode_weight_vector(wv, indices);
        }
    }

    /// Sets the children's selected weight vectors to match the selections
    /// recorded for the supernode's current weight vector. Internal state is
    /// allowed to be inconsistent with the supernode vector between calls,
    /// so this runs on demand rather than on every selection change.
    pub fn push_selected_to_children(&mut self) {
        if !self.is_supernode() {
            return;
        }
        assert_eq!(
            self.weight_vectors.len(),
            self.internal_node_weight_vector_indices.len()
        );
        let index = self.selected_weight_vector_index;
        let assignments = self.internal_node_weight_vector_indices[index].clone();
        for (node_id, wv_index) in assignments {
            self.internal_nodes
                .get_mut(&node_id)
                .expect("Supernode weight vector references a missing child.")
                .set_selected_weight_vector(wv_index);
        }
    }

    /// Debug check: after pushing selections down, the supernode's selected
    /// weight vector must equal the componentwise sum of its children's.
    pub fn check_supernode_weight_vector(&mut self) -> KlfmResult<()> {
        if !self.is_supernode() {
            return Ok(());
        }
        self.push_selected_to_children();
        let supernode_wv = self.selected_weight_vector();
        let mut computed = vec![0; supernode_wv.len()];
        let child_ids: Vec<NodeId> = self.internal_nodes.keys().cloned().collect();
        for id in child_ids {
            self.internal_nodes
                .get_mut(&id)
                .unwrap()
                .check_supernode_weight_vector()?;
            let child_wv = self.internal_nodes[&id].selected_weight_vector();
            for (i, w) in child_wv.iter().enumerate() {
                computed[i] += w;
            }
        }
        if supernode_wv != computed {
            return Err(KlfmError::Graph(format!(
                "Supernode {} weight vector {:?} does not match sum of child selections {:?}.",
                self.id, supernode_wv, computed
            )));
        }
        Ok(())
    }

    /// Switches to the implementation minimizing the rebalance score and
    /// adjusts `balance` accordingly. A node with a single implementation is
    /// never changed.
    pub fn set_weight_vector_to_minimize_imbalance(
        &mut self,
        balance: &mut [i64],
        max_weight_imbalance: &[i64],
        is_positive: bool,
        use_imbalance: bool,
        use_ratio: bool,
        res_ratios: &[i64],
        total_weight: &[i64],
    ) {
        if self.weight_vectors.len() <= 1 {
            return;
        }
        let selected = self.selected_weight_vector();
        let mut best_index = self.selected_weight_vector_index;
        let mut best_score = f64::MAX;
        let mut best_balance: Vec<i64> = balance.to_vec();
        for (i, wv) in self.weight_vectors.iter().enumerate() {
            let mut modified_balance: Vec<i64> = balance.to_vec();
            for (j, w) in wv.iter().enumerate() {
                if is_positive {
                    modified_balance[j] += w - selected[j];
                } else {
                    modified_balance[j] -= w - selected[j];
                }
            }
            let mut score = 0.0;
            if use_imbalance {
                score += near_violator_imbalance_power(&modified_balance, max_weight_imbalance);
            }
            if use_ratio {
                score += ratio_power_if_changed(&selected, wv, res_ratios, total_weight);
            }
            if score < best_score {
                best_index = i;
                best_score = score;
                best_balance = modified_balance;
            }
        }
        if best_index != self.selected_weight_vector_index {
            self.set_selected_weight_vector(best_index);
            balance.copy_from_slice(&best_balance);
        }
    }

    /// Validates the structure of the internal graph: edge endpoints must
    /// reference internal nodes, node/edge references must be symmetric, and
    /// every weight vector of every node must have the same length.
    pub fn check_internal_graph(&self) -> KlfmResult<()> {
        let num_resources = match self.internal_nodes.values().next() {
            Some(node) => node.selected_weight_vector().len(),
            None => return Ok(()),
        };
        for node in self.internal_nodes.values() {
            for wv in node.weight_vectors() {
                if wv.len() != num_resources {
                    return Err(KlfmError::Graph(format!(
                        "Node {} has a weight vector with {} resources; expected {}.",
                        node.id,
                        wv.len(),
                        num_resources
                    )));
                }
            }
            for edge_id in node.edge_ids() {
                let edge = self.internal_edges.get(edge_id).ok_or_else(|| {
                    KlfmError::Graph(format!(
                        "Node {} references missing edge {}.",
                        node.id, edge_id
                    ))
                })?;
                if !edge.has_connection(node.id) {
                    return Err(KlfmError::Graph(format!(
                        "Edge {} does not list node {} as a connection.",
                        edge_id, node.id
                    )));
                }
            }
        }
        for edge in self.internal_edges.values() {
            if edge.degree() < 2 {
                return Err(KlfmError::Graph(format!(
                    "Edge {} has fewer than two connections.",
                    edge.id
                )));
            }
            for cnx_id in edge.connection_ids() {
                if !self.internal_nodes.contains_key(cnx_id) {
                    return Err(KlfmError::Graph(format!(
                        "Edge {} references missing node {}.",
                        edge.id, cnx_id
                    )));
                }
            }
        }
        Ok(())
    }
}
