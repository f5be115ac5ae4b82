/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
use crate::whippet::id_types::{EdgeId, NodeId};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
    DontCare,
}

/// A port stitches the two halves of a split boundary edge together on a
/// supernode: the original edge id survives inside the supernode, the
/// external fragment carries a fresh id.
#[derive(Clone, Debug)]
pub struct Port {
    pub id: NodeId,
    pub internal_edge_id: EdgeId,
    pub external_edge_id: EdgeId,
    pub direction: PortDirection,
    pub name: String,
}

impl Port {
    pub fn new(
        id: NodeId,
        internal_edge_id: EdgeId,
        external_edge_id: EdgeId,
        direction: PortDirection,
        name: String,
    ) -> Self {
        Self {
            id,
            internal_edge_id,
            external_edge_id,
            direction,
            name,
        }
    }
}
