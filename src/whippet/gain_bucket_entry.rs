/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
use crate::whippet::id_types::NodeId;
use crate::whippet::node::Node;

/// A (node, gain) record queued in a gain bucket. The entry carries the
/// node's full weight vector table so that adaptive selection policies can
/// switch the candidate implementation without touching the graph.
#[derive(Clone, Debug)]
pub struct GainBucketEntry {
    pub gain: i64,
    pub id: NodeId,
    pub current_weight_vector_index: usize,
    pub all_weight_vectors: Vec<Vec<i64>>,
}

impl GainBucketEntry {
    pub fn from_node(gain: i64, node: &Node) -> Self {
        assert!(!node.weight_vectors().is_empty());
        Self {
            gain,
            id: node.id,
            current_weight_vector_index: node.selected_weight_vector_index(),
            all_weight_vectors: node.weight_vectors().clone(),
        }
    }

    pub fn current_weight_vector(&self) -> &[i64] {
        assert!(self.current_weight_vector_index < self.all_weight_vectors.len());
        &self.all_weight_vectors[self.current_weight_vector_index]
    }

    pub fn set_current_weight_vector_index(&mut self, index: usize) {
        assert!(index < self.all_weight_vectors.len());
        self.current_weight_vector_index = index;
    }
}
