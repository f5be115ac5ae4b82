/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
extern crate lib_whippet;

use lib_whippet::whippet::gain_bucket::GainBucketStandard;
use lib_whippet::whippet::gain_bucket_entry::GainBucketEntry;
use lib_whippet::whippet::id_types::NodeId;

fn entry(id: i64, gain: i64) -> GainBucketEntry {
    GainBucketEntry {
        gain,
        id: NodeId::from(id),
        current_weight_vector_index: 0,
        all_weight_vectors: vec![vec![1]],
    }
}

#[test]
fn top_returns_highest_gain_entry() {
    let mut bucket = GainBucketStandard::new();
    bucket.add(entry(1, -3));
    bucket.add(entry(2, 7));
    bucket.add(entry(3, 0));
    assert_eq!(bucket.num_entries(), 3);
    assert_eq!(bucket.top().id, NodeId::from(2i64));
    assert_eq!(bucket.top().gain, 7);
}

#[test]
fn pop_drains_in_descending_gain_order() {
    let mut bucket = GainBucketStandard::new();
    bucket.add(entry(1, 5));
    bucket.add(entry(2, -2));
    bucket.add(entry(3, 9));
    bucket.add(entry(4, 0));
    let gains: Vec<i64> = (0..4).map(|_| bucket.pop().gain).collect();
    assert_eq!(gains, vec![9, 5, 0, -2]);
    assert!(bucket.is_empty());
}

#[test]
fn equal_gains_serve_most_recently_added_first() {
    let mut bucket = GainBucketStandard::new();
    bucket.add(entry(1, 4));
    bucket.add(entry(2, 4));
    bucket.add(entry(3, 4));
    assert_eq!(bucket.pop().id, NodeId::from(3i64));
    assert_eq!(bucket.pop().id, NodeId::from(2i64));
    assert_eq!(bucket.pop().id, NodeId::from(1i64));
}

#[test]
fn touch_moves_entry_to_front_of_its_gain_chain() {
    let mut bucket = GainBucketStandard::new();
    bucket.add(entry(1, 4));
    bucket.add(entry(2, 4));
    assert_eq!(bucket.top().id, NodeId::from(2i64));
    bucket.touch(NodeId::from(1i64));
    assert_eq!(bucket.top().id, NodeId::from(1i64));
    // Touching the entry already at the front changes nothing.
    bucket.touch(NodeId::from(1i64));
    assert_eq!(bucket.top().id, NodeId::from(1i64));
}

#[test]
fn remove_by_node_id_unlinks_from_the_middle() {
    let mut bucket = GainBucketStandard::new();
    bucket.add(entry(1, 4));
    bucket.add(entry(2, 4));
    bucket.add(entry(3, 4));
    let removed = bucket.remove_by_node_id(NodeId::from(2i64));
    assert_eq!(removed.id, NodeId::from(2i64));
    assert_eq!(removed.gain, 4);
    assert!(!bucket.has_node(NodeId::from(2i64)));
    assert_eq!(bucket.num_entries(), 2);
    assert_eq!(bucket.pop().id, NodeId::from(3i64));
    assert_eq!(bucket.pop().id, NodeId::from(1i64));
}

#[test]
fn peek_walks_entries_in_gain_order() {
    let mut bucket = GainBucketStandard::new();
    bucket.add(entry(1, 2));
    bucket.add(entry(2, 8));
    bucket.add(entry(3, 5));
    assert_eq!(bucket.peek(0).unwrap().gain, 8);
    assert_eq!(bucket.peek(1).unwrap().gain, 5);
    assert_eq!(bucket.peek(2).unwrap().gain, 2);
    assert!(bucket.peek(3).is_none());
}

#[test]
fn update_gains_rewrites_ordering() {
    let mut bucket = GainBucketStandard::new();
    bucket.add(entry(1, 1));
    bucket.add(entry(2, 2));
    bucket.update_gains(5, &[NodeId::from(1i64)]);
    assert_eq!(bucket.top().id, NodeId::from(1i64));
    assert_eq!(bucket.top().gain, 6);
    bucket.update_gains(-10, &[NodeId::from(1i64)]);
    assert_eq!(bucket.top().id, NodeId::from(2i64));
    // The side index follows the entry across re-insertions.
    assert_eq!(
        bucket.entry_by_node_id(NodeId::from(1i64)).unwrap().gain,
        -4
    );
}

#[test]
fn side_index_always_points_at_the_live_entry() {
    let mut bucket = GainBucketStandard::new();
    for id in 0..20 {
        bucket.add(entry(id, id % 5));
    }
    bucket.touch(NodeId::from(7i64));
    bucket.remove_by_node_id(NodeId::from(12i64));
    bucket.update_gains(3, &[NodeId::from(7i64), NodeId::from(3i64)]);
    for id in 0..20 {
        if id == 12 {
            assert!(bucket.entry_by_node_id(NodeId::from(id)).is_none());
            continue;
        }
        let gbe = bucket.entry_by_node_id(NodeId::from(id)).unwrap();
        assert_eq!(gbe.id, NodeId::from(id));
        let expected = id % 5 + if id == 7 || id == 3 { 3 } else { 0 };
        assert_eq!(gbe.gain, expected);
    }
}
