/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

extern crate fxhash;
extern crate itertools;
extern crate ordered_float;
extern crate rand;
extern crate serde_json;
extern crate thiserror;

pub mod whippet;

pub use whippet::edge::Edge;
pub use whippet::edge_klfm::EdgeKlfm;
pub use whippet::error::{KlfmError, KlfmResult};
pub use whippet::gain_bucket::GainBucketStandard;
pub use whippet::gain_bucket_entry::GainBucketEntry;
pub use whippet::gain_bucket_manager::{create_gain_bucket_manager, GainBucketManager};
pub use whippet::graph_builder::GraphBuilder;
pub use whippet::id_manager::IdManager;
pub use whippet::id_types::{EdgeId, NodeId};
pub use whippet::node::Node;
pub use whippet::output::Output;
pub use whippet::partition_engine::{PartitionEngine, PartitionSummary};
pub use whippet::partition_engine_klfm::{NodePartitions, PartitionEngineKlfm};
pub use whippet::partitioner_config::{
    CoarseningPolicy, GainBucketSelectionPolicy, GainBucketType, PartitionerConfig, SeedMode,
};
pub use whippet::port::Port;
