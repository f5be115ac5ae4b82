/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
use crate::whippet::id_types::{EdgeId, NodeId};

/// A weighted hyperedge. `connection_ids` is kept sorted for fast searching
/// and may reference nodes or supernode ports.
#[derive(Clone, Debug)]
pub struct Edge {
    pub id: EdgeId,
    pub name: String,
    pub weight: i64,
    // Alternative weighting scalar, populated by external signal analyses.
    // The partitioning cost function does not consume it.
    pub entropy: Option<f64>,
    connection_ids: Vec<NodeId>,
}

impl Edge {
    pub fn new(edge_id: EdgeId, weight: i64, edge_name: &str) -> Self {
        let name = if edge_name.is_empty() {
            format!("Edge{}", edge_id.value())
        } else {
            edge_name.to_owned()
        };
        Self {
            id: edge_id,
            name,
            weight,
            entropy: None,
            connection_ids: Vec::new(),
        }
    }

    pub fn connection_ids(&self) -> &[NodeId] {
        &self.connection_ids
    }

    pub fn degree(&self) -> usize {
        self.connection_ids.len()
    }

    pub fn add_connection(&mut self, cnx_id: NodeId) {
        if self.connection_ids.is_empty() || *self.connection_ids.last().unwrap() <= cnx_id {
            self.connection_ids.push(cnx_id);
        } else {
            let pos = self
                .connection_ids
                .binary_search(&cnx_id)
                .unwrap_or_else(|p| p);
            self.connection_ids.insert(pos, cnx_id);
        }
    }

    pub fn remove_connection(&mut self, cnx_id: NodeId) {
        let pos = self
            .connection_ids
            .binary_search(&cnx_id)
            .expect("Removed a connection that is not on the edge.");
        self.connection_ids.remove(pos);
    }

    pub fn has_connection(&self, cnx_id: NodeId) -> bool {
        self.connection_ids.binary_search(&cnx_id).is_ok()
    }

    /// Name for the external fragment of a split boundary edge:
    /// `ORIGINALNAME_split_NEWID`. A pre-existing `_split_ID` suffix is
    /// stripped first so repeated splits do not grow the name unboundedly.
    pub fn generate_split_edge_name(&self, new_id: EdgeId) -> String {
        let mut base = self.name.clone();
        if let Some(pos) = base.find("_split_") {
            base.truncate(pos);
        }
        format!("{}_split_{}", base, new_id.value())
    }
}
