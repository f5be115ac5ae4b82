/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
use std::fmt;

/// Uniquely identifies a `Node` (or a supernode port, which draws from the
/// same id space) within a run.
#[derive(Hash, Copy, Clone, Debug, PartialOrd, Ord, PartialEq, Eq)]
pub struct NodeId {
    id: i64,
}
impl NodeId {
    pub fn value(&self) -> i64 {
        self.id
    }
}
impl<T> From<T> for NodeId
where
    T: Into<i64>,
{
    fn from(n: T) -> Self {
        Self { id: n.into() }
    }
}
impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Node:{}", self.id)
    }
}

/// Uniquely identifies an `Edge` within a run.
#[derive(Hash, Copy, Clone, Debug, PartialOrd, Ord, PartialEq, Eq)]
pub struct EdgeId {
    id: i64,
}
impl EdgeId {
    pub fn value(&self) -> i64 {
        self.id
    }
}
impl<T> From<T> for EdgeId
where
    T: Into<i64>,
{
    fn from(n: T) -> Self {
        Self { id: n.into() }
    }
}
impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Edge:{}", self.id)
    }
}
