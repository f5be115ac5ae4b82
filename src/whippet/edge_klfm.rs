/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
use std::collections::BTreeSet;

use crate::whippet::edge::Edge;
use crate::whippet::id_types::NodeId;

pub type NodeIdSet = BTreeSet<NodeId>;
pub type NodeIdVector = Vec<NodeId>;

/// An `Edge` extended with the per-pass state the KLFM algorithm needs:
/// which of its connected nodes sit on each side of the partition, split by
/// locked status, plus the edge's criticality.
#[derive(Clone, Debug)]
pub struct EdgeKlfm {
    pub edge: Edge,
    /// An edge is critical iff at least one partition has 0 locked nodes and
    /// 0-2 unlocked nodes from the edge's connected nodes.
    pub is_critical: bool,
    /// An edge is locked non-critical iff both partitions have at least one
    /// locked node from the edge's connected nodes. Once set it stays set
    /// for the remainder of the pass.
    pub locked_noncritical: bool,
    pub part_a_unlocked_nodes: NodeIdVector,
    pub part_b_unlocked_nodes: NodeIdVector,
    pub part_a_locked_nodes: NodeIdVector,
    pub part_b_locked_nodes: NodeIdVector,
}

impl EdgeKlfm {
    pub fn new(edge: Edge) -> Self {
        Self {
            edge,
            is_critical: false,
            locked_noncritical: false,
            part_a_unlocked_nodes: Vec::new(),
            part_b_unlocked_nodes: Vec::new(),
            part_a_locked_nodes: Vec::new(),
            part_b_locked_nodes: Vec::new(),
        }
    }

    /// Classifies the edge's connections against the current partition.
    /// Connection ids that belong to neither set (supernode ports) are
    /// ignored. All nodes start a pass unlocked.
    pub fn populate_partition_connections(&mut self, part_a: &NodeIdSet, part_b: &NodeIdSet) {
        self.part_a_unlocked_nodes.clear();
        self.part_b_unlocked_nodes.clear();
        self.part_a_locked_nodes.clear();
        self.part_b_locked_nodes.clear();
        for cnx_id in self.edge.connection_ids() {
            if part_a.contains(cnx_id) {
                self.part_a_unlocked_nodes.push(*cnx_id);
            } else if part_b.contains(cnx_id) {
                self.part_b_unlocked_nodes.push(*cnx_id);
            }
        }
    }

    /// Reset KLFM-specific data for a new pass and set the edge's initial
    /// critical status from the partition connections.
    pub fn klfm_reset(&mut self, part_a: &NodeIdSet, part_b: &NodeIdSet) {
        self.populate_partition_connections(part_a, part_b);
        self.locked_noncritical = false;
        // No nodes are locked at the start of a pass, so this can be done
        // simply.
        self.is_critical =
            self.part_a_unlocked_nodes.len() <= 2 || self.part_b_unlocked_nodes.len() <= 2;
    }

    /// Called for every edge connected to a node the KLFM algorithm has
    /// selected for movement. Appends the ids of connected nodes whose gains
    /// must be increased/reduced to the corresponding vectors and updates
    /// the edge's critical status.
    ///
    /// The same node id may appear in both vectors and/or multiple times in
    /// one vector; the gain must be adjusted once per appearance.
    pub fn move_node(
        &mut self,
        node_id: NodeId,
        nodes_to_increase_gain: &mut NodeIdVector,
        nodes_to_reduce_gain: &mut NodeIdVector,
    ) {
        /* There is a certain case where this algorithm incorrectly leaves an
           edge marked critical: when all of its nodes are locked in a single
           partition. Once that happens, criticality is never consulted again
           for the edge this pass, since it is only checked when moving a
           connected node, so the case does not need to be detected. */
        let from_part_a = Self::in_group(&self.part_a_unlocked_nodes, node_id);
        let (from_unlocked, from_locked, to_unlocked, to_locked) = if from_part_a {
            (
                &mut self.part_a_unlocked_nodes,
                &mut self.part_a_locked_nodes,
                &mut self.part_b_unlocked_nodes,
                &mut self.part_b_locked_nodes,
            )
        } else {
            (
                &mut self.part_b_unlocked_nodes,
                &mut self.part_b_locked_nodes,
                &mut self.part_a_unlocked_nodes,
                &mut self.part_a_locked_nodes,
            )
        };

        // Perform the move.
        let erase_pos = from_unlocked
            .iter()
            .position(|&id| id == node_id)
            .expect("Moved a node that is not unlocked on this edge.");
        from_unlocked.remove(erase_pos);
        to_locked.push(node_id);

        // If the edge was not previously critical, no gain updates are
        // needed.
        if self.is_critical {
            if to_locked.len() == 1 {
                if to_unlocked.is_empty() {
                    // TO PART is no longer empty, so increase the gain of all
                    // unlocked nodes on FROM PART (negative to zero).
                    for &id in from_unlocked.iter() {
                        nodes_to_increase_gain.push(id);
                    }
                } else if to_unlocked.len() == 1 {
                    // TO PART used to have a solo unlocked node, but now has
                    // a locked partner, so that node's gain drops from
                    // positive to zero.
                    nodes_to_reduce_gain.push(to_unlocked[0]);
                }
            }
            if from_locked.is_empty() {
                if from_unlocked.is_empty() {
                    // FROM PART is now empty, so the gain of every unlocked
                    // node on TO PART drops from zero to negative.
                    for &id in to_unlocked.iter() {
                        nodes_to_reduce_gain.push(id);
                    }
                } else if from_unlocked.len() == 1 {
                    // FROM PART has a lone unlocked node left behind;
                    // increase its gain.
                    nodes_to_increase_gain.push(from_unlocked[0]);
                }
            }
        }

        // Update critical status of the edge.
        self.is_critical = false;
        if !self.locked_noncritical {
            if !from_locked.is_empty() {
                // The edge now has locked nodes in both partitions, making
                // it permanently non-critical for the rest of the pass.
                self.locked_noncritical = true;
            } else if from_unlocked.len() < 3 {
                self.is_critical = true;
            }
        }
    }

    pub fn crosses_partitions(&self) -> bool {
        self.touches_part_a() && self.touches_part_b()
    }

    pub fn touches_part_a(&self) -> bool {
        !self.part_a_unlocked_nodes.is_empty() || !self.part_a_locked_nodes.is_empty()
    }

    pub fn touches_part_b(&self) -> bool {
        !self.part_b_unlocked_nodes.is_empty() || !self.part_b_locked_nodes.is_empty()
    }

    fn in_group(group: &[NodeId], node_id: NodeId) -> bool {
        group.iter().any(|&id| id == node_id)
    }
}
