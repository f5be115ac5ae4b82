/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
use std::sync::atomic::{AtomicI64, Ordering};

use crate::whippet::id_types::{EdgeId, NodeId};

/// Id reserved to mean "no external connection". The allocator never
/// issues it.
pub const RESERVED_TERMINAL_ID: i64 = 0;

static NEXT_ID: AtomicI64 = AtomicI64::new(RESERVED_TERMINAL_ID + 1);

/// Process-wide monotonic allocator for node, port, and edge ids. Nodes and
/// ports share the same id space as edges; ids are never recycled within a
/// run, so release is a no-op.
pub struct IdManager {}

impl IdManager {
    pub fn acquire_node_id() -> NodeId {
        NodeId::from(Self::acquire_raw())
    }
    pub fn acquire_edge_id() -> EdgeId {
        EdgeId::from(Self::acquire_raw())
    }
    pub fn release_node_id(_id: NodeId) {}
    pub fn release_edge_id(_id: EdgeId) {}

    /// Restarts the id sequence. Only safe during graph construction, before
    /// any engine owns ids.
    pub fn reset(val: i64) {
        NEXT_ID.store(val, Ordering::SeqCst);
    }

    fn acquire_raw() -> i64 {
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        assert!(id < i64::max_value() - 1, "Id space exhausted.");
        id
    }
}
