/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
use crate::whippet::edge::Edge;
use crate::whippet::error::{KlfmError, KlfmResult};
use crate::whippet::id_manager::IdManager;
use crate::whippet::id_types::{EdgeId, NodeId};
use crate::whippet::node::Node;

/// Builds the top-level graph node a partitioning engine consumes. Parsers
/// for on-disk netlist formats drive this same interface: create nodes with
/// their implementation weight vectors, then connect them with weighted
/// hyperedges.
pub struct GraphBuilder {
    graph: Node,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: Node::new(IdManager::acquire_node_id(), "graph"),
        }
    }

    /// Adds a node with the given implementations. The first weight vector
    /// starts out selected.
    pub fn add_node(&mut self, name: &str, weight_vectors: Vec<Vec<i64>>) -> KlfmResult<NodeId> {
        if weight_vectors.is_empty() {
            return Err(KlfmError::Graph(format!(
                "Node '{}' must have at least one weight vector.",
                name
            )));
        }
        let node_id = IdManager::acquire_node_id();
        let mut node = Node::new(node_id, name);
        for wv in weight_vectors {
            node.add_weight_vector(wv);
        }
        self.graph.add_internal_node(node)?;
        Ok(node_id)
    }

    /// Adds a hyperedge over the given nodes, which must already exist.
    pub fn add_edge(
        &mut self,
        name: &str,
        weight: i64,
        connections: &[NodeId],
    ) -> KlfmResult<EdgeId> {
        if connections.len() < 2 {
            return Err(KlfmError::Graph(format!(
                "Edge '{}' must connect at least two nodes.",
                name
            )));
        }
        if weight < 1 {
            return Err(KlfmError::Graph(format!(
                "Edge '{}' must have a weight of at least 1.",
                name
            )));
        }
        let edge_id = IdManager::acquire_edge_id();
        let mut edge = Edge::new(edge_id, weight, name);
        for node_id in connections {
            let node = self.graph.get_internal_node_mut(*node_id).ok_or_else(|| {
                KlfmError::Graph(format!(
                    "Edge '{}' references unknown node {}.",
                    name, node_id
                ))
            })?;
            node.connect_edge(edge_id);
            edge.add_connection(*node_id);
        }
        self.graph.add_internal_edge(edge)?;
        Ok(edge_id)
    }

    /// Validates the assembled graph and hands it over.
    pub fn build(self) -> KlfmResult<Node> {
        self.graph.check_internal_graph()?;
        Ok(self.graph)
    }
}
