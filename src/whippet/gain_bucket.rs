/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
extern crate fxhash;

use std::collections::BTreeSet;

use fxhash::FxHashMap;

use crate::whippet::gain_bucket_entry::GainBucketEntry;
use crate::whippet::id_types::NodeId;

/// Bound on the absolute value of any gain an entry can take. Gains are
/// offset by this constant to index the chain table.
pub const MAX_GAIN: i64 = 40_000;

const NIL: u32 = u32::max_value();

struct Slot {
    entry: GainBucketEntry,
    prev: u32,
    next: u32,
}

#[derive(Copy, Clone)]
struct Chain {
    head: u32,
    tail: u32,
}

/// An ordered multiset of (node, gain) entries with amortized O(1) add,
/// max-gain access, removal by node id, and move-to-front ("touch"), plus
/// O(k) access to the k-th highest entry.
///
/// Entries live in a slab with a free list; each gain value owns an
/// intrusive doubly-linked chain through the slab, new entries are linked at
/// the chain head, and a descending ordered set tracks which chains are
/// non-empty. A per-node side index maps node ids to their slab slot.
pub struct GainBucketStandard {
    slots: Vec<Option<Slot>>,
    free_slots: Vec<u32>,
    chains: Vec<Chain>,
    occupied_chain_indices: BTreeSet<usize>,
    node_id_to_slot: FxHashMap<NodeId, u32>,
    num_entries: usize,
}

impl Default for GainBucketStandard {
    fn default() -> Self {
        Self::new()
    }
}

impl GainBucketStandard {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            chains: vec![
                Chain {
                    head: NIL,
                    tail: NIL
                };
                (2 * MAX_GAIN + 1) as usize
            ],
            occupied_chain_indices: BTreeSet::new(),
            node_id_to_slot: FxHashMap::default(),
            num_entries: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    pub fn has_node(&self, node_id: NodeId) -> bool {
        self.node_id_to_slot.contains_key(&node_id)
    }

    fn chain_index(gain: i64) -> usize {
        let index = gain + MAX_GAIN;
        assert!(
            index >= 0 && index <= 2 * MAX_GAIN,
            "Gain {} exceeds the bucket's gain range; MAX_GAIN may need to be increased.",
            gain
        );
        index as usize
    }

    pub fn add(&mut self, entry: GainBucketEntry) {
        debug_assert!(!self.has_node(entry.id));
        let chain_index = Self::chain_index(entry.gain);
        let node_id = entry.id;
        let slot_id = match self.free_slots.pop() {
            Some(id) => id,
            None => {
                self.slots.push(None);
                (self.slots.len() - 1) as u32
            }
        };
        let old_head = self.chains[chain_index].head;
        self.slots[slot_id as usize] = Some(Slot {
            entry,
            prev: NIL,
            next: old_head,
        });
        if old_head == NIL {
            self.chains[chain_index].tail = slot_id;
            self.occupied_chain_indices.insert(chain_index);
        } else {
            self.slots[old_head as usize].as_mut().unwrap().prev = slot_id;
        }
        self.chains[chain_index].head = slot_id;
        self.node_id_to_slot.insert(node_id, slot_id);
        self.num_entries += 1;
    }

    /// The entry of the highest-gain element (most recently added or touched
    /// among ties).
    pub fn top(&self) -> &GainBucketEntry {
        let chain_index = *self
            .occupied_chain_indices
            .iter()
            .next_back()
            .expect("Top called on an empty gain bucket.");
        let head = self.chains[chain_index].head;
        &self.slots[head as usize].as_ref().unwrap().entry
    }

    /// Removes and returns the top entry.
    pub fn pop(&mut self) -> GainBucketEntry {
        let top_id = self.top().id;
        self.remove_by_node_id(top_id)
    }

    /// The entry `offset` places below the top; `peek(0)` is `top()`. O(k).
    pub fn peek(&self, offset: usize) -> Option<&GainBucketEntry> {
        if offset >= self.num_entries {
            return None;
        }
        let mut cur_offset = 0;
        for &chain_index in self.occupied_chain_indices.iter().rev() {
            let mut slot_id = self.chains[chain_index].head;
            while slot_id != NIL {
                let slot = self.slots[slot_id as usize].as_ref().unwrap();
                if cur_offset == offset {
                    return Some(&slot.entry);
                }
                cur_offset += 1;
                slot_id = slot.next;
            }
        }
        None
    }

    pub fn entry_by_node_id(&self, node_id: NodeId) -> Option<&GainBucketEntry> {
        let slot_id = *self.node_id_to_slot.get(&node_id)?;
        Some(&self.slots[slot_id as usize].as_ref().unwrap().entry)
    }

    pub fn entry_by_node_id_mut(&mut self, node_id: NodeId) -> Option<&mut GainBucketEntry> {
        let slot_id = *self.node_id_to_slot.get(&node_id)?;
        Some(&mut self.slots[slot_id as usize].as_mut().unwrap().entry)
    }

    /// Removes the entry for `node_id` and returns it.
    pub fn remove_by_node_id(&mut self, node_id: NodeId) -> GainBucketEntry {
        let slot_id = self
            .node_id_to_slot
            .remove(&node_id)
            .expect("Removed a node that is not in the gain bucket.");
        let slot = self.slots[slot_id as usize].take().unwrap();
        assert!(slot.entry.id == node_id);
        let chain_index = Self::chain_index(slot.entry.gain);
        self.unlink(chain_index, slot_id, slot.prev, slot.next);
        self.free_slots.push(slot_id);
        self.num_entries -= 1;
        slot.entry
    }

    /// Moves the entry for `node_id` to the front of its gain chain.
    pub fn touch(&mut self, node_id: NodeId) {
        let slot_id = *self
            .node_id_to_slot
            .get(&node_id)
            .expect("Touched a node that is not in the gain bucket.");
        let (gain, prev, next) = {
            let slot = self.slots[slot_id as usize].as_ref().unwrap();
            (slot.entry.gain, slot.prev, slot.next)
        };
        let chain_index = Self::chain_index(gain);
        if self.chains[chain_index].head == slot_id {
            return;
        }
        self.unlink(chain_index, slot_id, prev, next);
        let old_head = self.chains[chain_index].head;
        {
            let slot = self.slots[slot_id as usize].as_mut().unwrap();
            slot.prev = NIL;
            slot.next = old_head;
        }
        if old_head == NIL {
            self.chains[chain_index].tail = slot_id;
            self.occupied_chain_indices.insert(chain_index);
        } else {
            self.slots[old_head as usize].as_mut().unwrap().prev = slot_id;
        }
        self.chains[chain_index].head = slot_id;
    }

    /// Adds `gain_modifier` to the gain of each listed node. Each id must be
    /// present; ids appearing multiple times are adjusted once per
    /// appearance.
    pub fn update_gains(&mut self, gain_modifier: i64, nodes_to_update: &[NodeId]) {
        for &node_id in nodes_to_update {
            let mut entry = self.remove_by_node_id(node_id);
            entry.gain += gain_modifier;
            self.add(entry);
        }
    }

    fn unlink(&mut self, chain_index: usize, _slot_id: u32, prev: u32, next: u32) {
        if prev == NIL {
            self.chains[chain_index].head = next;
        } else {
            self.slots[prev as usize].as_mut().unwrap().next = next;
        }
        if next == NIL {
            self.chains[chain_index].tail = prev;
        } else {
            self.slots[next as usize].as_mut().unwrap().prev = prev;
        }
        if self.chains[chain_index].head == NIL {
            self.occupied_chain_indices.remove(&chain_index);
        }
    }
}
