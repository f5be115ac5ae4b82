/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
extern crate fxhash;
extern crate rand;

use fxhash::FxHashMap;
use rand::prelude::*;

use crate::whippet::error::{KlfmError, KlfmResult};
use crate::whippet::gain_bucket::GainBucketStandard;
use crate::whippet::gain_bucket_entry::GainBucketEntry;
use crate::whippet::gain_bucket_manager::{max_imbalance_from_fractions, GainBucketManager};
use crate::whippet::id_types::NodeId;
use crate::whippet::node::Node;
use crate::whippet::partitioner_config::{
    GainBucketSelectionPolicy, MAX_CONSTRAINED_ENTRY_CHECKS,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Side {
    A,
    B,
}

/// Gain bucket manager for graphs whose weight vectors are non-zero in
/// exactly one resource. Maintains one bucket pair per resource; the
/// configured policy decides which resource's pair is consulted for each
/// move. In adaptive mode a node contributes one entry per resource it has
/// an implementation for.
pub struct GainBucketManagerMultiResourceExclusive {
    num_resources: usize,
    gain_buckets_a: Vec<GainBucketStandard>,
    gain_buckets_b: Vec<GainBucketStandard>,
    max_imbalance_fraction: Vec<f64>,
    selection_policy: GainBucketSelectionPolicy,
    node_id_to_resource_index: FxHashMap<NodeId, Vec<usize>>,
    use_adaptive: bool,
    num_nodes: usize,
    rng: StdRng,
}

impl GainBucketManagerMultiResourceExclusive {
    pub fn new(
        max_imbalance_fraction: Vec<f64>,
        selection_policy: GainBucketSelectionPolicy,
        adaptive: bool,
        seed: u64,
    ) -> Self {
        let num_resources = max_imbalance_fraction.len();
        Self {
            num_resources,
            gain_buckets_a: (0..num_resources).map(|_| GainBucketStandard::new()).collect(),
            gain_buckets_b: (0..num_resources).map(|_| GainBucketStandard::new()).collect(),
            max_imbalance_fraction,
            selection_policy,
            node_id_to_resource_index: FxHashMap::default(),
            use_adaptive: adaptive,
            num_nodes: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn bucket(&self, side: Side, res: usize) -> &GainBucketStandard {
        match side {
            Side::A => &self.gain_buckets_a[res],
            Side::B => &self.gain_buckets_b[res],
        }
    }

    fn bucket_mut(&mut self, side: Side, res: usize) -> &mut GainBucketStandard {
        match side {
            Side::A => &mut self.gain_buckets_a[res],
            Side::B => &mut self.gain_buckets_b[res],
        }
    }

    /// Purges every entry for `node_id`. Safe to call when the node is not
    /// present.
    fn remove_node(&mut self, node_id: NodeId) {
        if self.node_id_to_resource_index.remove(&node_id).is_some() {
            for bucket in self
                .gain_buckets_a
                .iter_mut()
                .chain(self.gain_buckets_b.iter_mut())
            {
                if bucket.has_node(node_id) {
                    bucket.remove_by_node_id(node_id);
                }
            }
            self.num_nodes -= 1;
        }
    }

    fn add_entry(&mut self, entry: GainBucketEntry, in_part_a: bool) -> KlfmResult<()> {
        assert_eq!(entry.current_weight_vector().len(), self.num_resources);
        let mut pos: Option<usize> = None;
        for (i, &w) in entry.current_weight_vector().iter().enumerate() {
            if w != 0 {
                if pos.is_some() {
                    return Err(KlfmError::Graph(format!(
                        "Node {} has weight in more than one resource, which a \
                         resource-exclusive gain bucket cannot represent.",
                        entry.id
                    )));
                }
                pos = Some(i);
            }
        }
        let pos = pos.ok_or_else(|| {
            KlfmError::Graph(format!("Node {} has an empty weight vector.", entry.id))
        })?;
        let node_id = entry.id;
        if in_part_a {
            self.gain_buckets_a[pos].add(entry);
        } else {
            self.gain_buckets_b[pos].add(entry);
        }
        self.node_id_to_resource_index
            .entry(node_id)
            .or_insert_with(Vec::new)
            .push(pos);
        Ok(())
    }

    fn max_constrained_node_weights(
        &self,
        current_balance: &[i64],
        total_weight: &[i64],
    ) -> Vec<i64> {
        let max_weight_imbalance =
            max_imbalance_from_fractions(&self.max_imbalance_fraction, total_weight);
        (0..self.num_resources)
            // Round down: the truncating division is intentional.
            .map(|i| ((max_weight_imbalance[i] - current_balance[i].abs()) / 2).max(0))
            .collect()
    }

    /// The side whose movement would push the balance further past the
    /// limit.
    fn constrained_side(current_balance: &[i64], res: usize) -> Side {
        if current_balance[res] < 0 {
            Side::A
        } else {
            Side::B
        }
    }

    fn select_between_buckets(
        &mut self,
        res: usize,
        constrained_side: Side,
        max_constrained_node_weight: i64,
    ) -> GainBucketEntry {
        let unconstrained_side = match constrained_side {
            Side::A => Side::B,
            Side::B => Side::A,
        };
        if self.bucket(constrained_side, res).is_empty() {
            return self.bucket_mut(unconstrained_side, res).pop();
        } else if self.bucket(unconstrained_side, res).is_empty() {
            return self.bucket_mut(constrained_side, res).pop();
        }

        /* Finding the highest-gain node that fits has unacceptable O(n)
           worst-case complexity. Only the unconstrained top and a statically
           capped number of constrained entries are considered. */
        let unconstrained_gain = self.bucket(unconstrained_side, res).top().gain;
        let constrained_entries = self.bucket(constrained_side, res).num_entries();
        let max_checks = if constrained_entries > MAX_CONSTRAINED_ENTRY_CHECKS {
            MAX_CONSTRAINED_ENTRY_CHECKS
        } else {
            constrained_entries - 1
        };
        let mut passed: Vec<GainBucketEntry> = Vec::new();
        let mut constrained_entry = self.bucket_mut(constrained_side, res).pop();
        let mut checked = 1;
        while constrained_entry.gain > unconstrained_gain
            && constrained_entry.current_weight_vector()[res] > max_constrained_node_weight
            && checked <= max_checks
        {
            passed.push(constrained_entry);
            constrained_entry = self.bucket_mut(constrained_side, res).pop();
            checked += 1;
        }
        let use_constrained = constrained_entry.gain > unconstrained_gain
            && constrained_entry.current_weight_vector()[res] <= max_constrained_node_weight;
        let selected = if use_constrained {
            constrained_entry
        } else {
            self.bucket_mut(constrained_side, res).add(constrained_entry);
            self.bucket_mut(unconstrained_side, res).pop()
        };
        for entry in passed {
            self.bucket_mut(constrained_side, res).add(entry);
        }
        selected
    }

    fn next_entry_random_resource(
        &mut self,
        current_balance: &[i64],
        total_weight: &[i64],
    ) -> KlfmResult<GainBucketEntry> {
        let mcnw = self.max_constrained_node_weights(current_balance, total_weight);
        // Only resources that are not exhausted participate; an individual
        // bucket may still be empty, but not both of a pair.
        let viable: Vec<usize> = (0..self.num_resources)
            .filter(|&i| {
                !(self.gain_buckets_a[i].is_empty() && self.gain_buckets_b[i].is_empty())
            })
            .collect();
        if viable.is_empty() {
            return Err(KlfmError::new(
                "Requested an entry from an empty gain bucket manager.",
            ));
        }
        let res = viable[self.rng.gen_range(0, viable.len())];
        let constrained = Self::constrained_side(current_balance, res);
        Ok(self.select_between_buckets(res, constrained, mcnw[res]))
    }

    fn next_entry_largest_imbalance_resource(
        &mut self,
        current_balance: &[i64],
        total_weight: &[i64],
    ) -> KlfmResult<GainBucketEntry> {
        let mcnw = self.max_constrained_node_weights(current_balance, total_weight);
        let max_weight_imbalance =
            max_imbalance_from_fractions(&self.max_imbalance_fraction, total_weight);
        let mut largest_frac = -1.0;
        let mut resource = None;
        for i in 0..self.num_resources {
            if self.gain_buckets_a[i].is_empty() && self.gain_buckets_b[i].is_empty() {
                continue;
            }
            let frac = (current_balance[i] as f64 / max_weight_imbalance[i] as f64).abs();
            if frac >= largest_frac {
                resource = Some(i);
                largest_frac = frac;
            }
        }
        let res = resource.ok_or_else(|| {
            KlfmError::new("Requested an entry from an empty gain bucket manager.")
        })?;
        let constrained = Self::constrained_side(current_balance, res);
        Ok(self.select_between_buckets(res, constrained, mcnw[res]))
    }

    fn next_entry_largest_unconstrained_gain(
        &mut self,
        current_balance: &[i64],
        total_weight: &[i64],
    ) -> KlfmResult<GainBucketEntry> {
        let mut best: Option<(i64, usize, Side)> = None;
        for res in 0..self.num_resources {
            let side = match Self::constrained_side(current_balance, res) {
                Side::A => Side::B,
                Side::B => Side::A,
            };
            if self.bucket(side, res).is_empty() {
                continue;
            }
            let gain = self.bucket(side, res).top().gain;
            if best.map_or(true, |(best_gain, _, _)| gain > best_gain) {
                best = Some((gain, res, side));
            }
        }
        match best {
            Some((_, res, side)) => Ok(self.bucket_mut(side, res).pop()),
            // Only unlocked nodes in constrained buckets; this occurs near
            // the end of partitioning, so the fallback policy is unimportant.
            None => self.next_entry_random_resource(current_balance, total_weight),
        }
    }

    fn next_entry_largest_gain(
        &mut self,
        current_balance: &[i64],
        total_weight: &[i64],
    ) -> KlfmResult<GainBucketEntry> {
        let mcnw = self.max_constrained_node_weights(current_balance, total_weight);
        let mut buckets: Vec<(usize, Side, bool)> = Vec::new();
        for res in 0..self.num_resources {
            let part_a_constrained = current_balance[res] < 0;
            if !self.gain_buckets_a[res].is_empty() {
                buckets.push((res, Side::A, part_a_constrained));
            }
            if !self.gain_buckets_b[res].is_empty() {
                buckets.push((res, Side::B, !part_a_constrained));
            }
        }
        if buckets.is_empty() {
            return Err(KlfmError::new(
                "Requested an entry from an empty gain bucket manager.",
            ));
        }

        // For each bucket, search until an entry fits or the depth cap is
        // hit; the highest-gain find wins overall.
        let mut top_entries: Vec<((usize, Side), GainBucketEntry)> = Vec::new();
        for &(res, side, constrained) in &buckets {
            let mut passed: Vec<GainBucketEntry> = Vec::new();
            let mut found: Option<GainBucketEntry> = None;
            for _ in 0..MAX_CONSTRAINED_ENTRY_CHECKS {
                if self.bucket(side, res).is_empty() {
                    break;
                }
                let entry = self.bucket_mut(side, res).pop();
                let fits =
                    !constrained || entry.current_weight_vector()[res].abs() <= mcnw[res];
                if fits {
                    found = Some(entry);
                    break;
                }
                passed.push(entry);
            }
            if let Some(entry) = found {
                top_entries.push(((res, side), entry));
            }
            for entry in passed {
                self.bucket_mut(side, res).add(entry);
            }
        }

        if top_entries.is_empty() {
            // With adaptive node implementations, earlier implementation
            // choices can make every remaining move exceed the imbalance
            // limit. This only happens when the buckets are nearly empty, so
            // any entry will do.
            let &(res, side, _) = &buckets[0];
            return Ok(self.bucket_mut(side, res).pop());
        }

        // Shuffle to avoid favoring buckets by their resource order.
        top_entries.shuffle(&mut self.rng);
        let mut max_index = 0;
        for i in 1..top_entries.len() {
            if top_entries[i].1.gain > top_entries[max_index].1.gain {
                max_index = i;
            }
        }
        let mut selected = None;
        for (i, ((res, side), entry)) in top_entries.into_iter().enumerate() {
            if i == max_index {
                selected = Some(entry);
            } else {
                self.bucket_mut(side, res).add(entry);
            }
        }
        Ok(selected.unwrap())
    }
}

impl GainBucketManager for GainBucketManagerMultiResourceExclusive {
    fn get_next_entry(
        &mut self,
        current_balance: &[i64],
        total_weight: &[i64],
    ) -> KlfmResult<GainBucketEntry> {
        let entry = match self.selection_policy {
            GainBucketSelectionPolicy::RandomResource => {
                self.next_entry_random_resource(current_balance, total_weight)?
            }
            GainBucketSelectionPolicy::LargestResourceImbalance => {
                self.next_entry_largest_imbalance_resource(current_balance, total_weight)?
            }
            GainBucketSelectionPolicy::LargestUnconstrainedGain => {
                self.next_entry_largest_unconstrained_gain(current_balance, total_weight)?
            }
            GainBucketSelectionPolicy::LargestGain => {
                self.next_entry_largest_gain(current_balance, total_weight)?
            }
            policy => {
                return Err(KlfmError::Config(format!(
                    "Selection policy {:?} is not supported by the resource-exclusive \
                     gain bucket manager.",
                    policy
                )));
            }
        };
        // Remove any duplicate entries for the node from the other buckets.
        self.remove_node(entry.id);
        Ok(entry)
    }

    fn num_unlocked_nodes(&self) -> usize {
        self.num_nodes
    }

    fn add_node(
        &mut self,
        gain: i64,
        node: &Node,
        in_part_a: bool,
        _total_weight: &[i64],
    ) -> KlfmResult<()> {
        let mut entry = GainBucketEntry::from_node(gain, node);
        if self.use_adaptive {
            // At most one entry per resource: for each resource, the weight
            // vector with the largest weight in it.
            let mut res_max_index: Vec<Option<(usize, i64)>> = vec![None; self.num_resources];
            for (i, wv) in node.weight_vectors().iter().enumerate() {
                for (res, &w) in wv.iter().enumerate() {
                    if w != 0 {
                        match res_max_index[res] {
                            None => res_max_index[res] = Some((i, w)),
                            Some((_, prev_w)) if w > prev_w => res_max_index[res] = Some((i, w)),
                            Some(_) => {}
                        }
                        break;
                    }
                }
            }
            let mut entries_added = 0;
            for slot in res_max_index {
                if let Some((wv_index, _)) = slot {
                    entry.set_current_weight_vector_index(wv_index);
                    self.add_entry(entry.clone(), in_part_a)?;
                    entries_added += 1;
                }
            }
            if entries_added == 0 {
                return Err(KlfmError::Graph(format!(
                    "Node {} has no weight vector with non-zero weight in any resource.",
                    node.id
                )));
            }
        } else {
            self.add_entry(entry, in_part_a)?;
        }
        self.num_nodes += 1;
        Ok(())
    }

    fn update_gains(
        &mut self,
        gain_modifier: i64,
        nodes_to_increase_gain: &[NodeId],
        nodes_to_decrease_gain: &[NodeId],
        moved_from_part_a: bool,
    ) {
        let mut inc: Vec<Vec<NodeId>> = vec![Vec::new(); self.num_resources];
        let mut dec: Vec<Vec<NodeId>> = vec![Vec::new(); self.num_resources];
        for id in nodes_to_increase_gain {
            let resources = self
                .node_id_to_resource_index
                .get(id)
                .expect("Gain update names a node that is not in the buckets.");
            for &res in resources {
                inc[res].push(*id);
            }
        }
        for id in nodes_to_decrease_gain {
            let resources = self
                .node_id_to_resource_index
                .get(id)
                .expect("Gain update names a node that is not in the buckets.");
            for &res in resources {
                dec[res].push(*id);
            }
        }
        for res in 0..self.num_resources {
            if !inc[res].is_empty() {
                if moved_from_part_a {
                    self.gain_buckets_a[res].update_gains(gain_modifier, &inc[res]);
                } else {
                    self.gain_buckets_b[res].update_gains(gain_modifier, &inc[res]);
                }
            }
            if !dec[res].is_empty() {
                if moved_from_part_a {
                    self.gain_buckets_b[res].update_gains(-gain_modifier, &dec[res]);
                } else {
                    self.gain_buckets_a[res].update_gains(-gain_modifier, &dec[res]);
                }
            }
        }
    }

    fn update_node_implementation(&mut self, node: &Node) -> KlfmResult<()> {
        if self.use_adaptive {
            // The selected implementation is already represented by one of
            // the pre-seeded per-resource entries.
            return Ok(());
        }
        let res_index = match self.node_id_to_resource_index.get(&node.id) {
            Some(resources) => resources[0],
            None => return Ok(()),
        };
        let in_part_a = self.gain_buckets_a[res_index].has_node(node.id);
        let gain = if in_part_a {
            self.gain_buckets_a[res_index].remove_by_node_id(node.id).gain
        } else {
            self.gain_buckets_b[res_index].remove_by_node_id(node.id).gain
        };
        // The new implementation may have moved the node to a different
        // resource's bucket pair. A re-implementation that is no longer
        // resource-exclusive is fatal, just as it would be on first add.
        self.node_id_to_resource_index.remove(&node.id);
        self.add_entry(GainBucketEntry::from_node(gain, node), in_part_a)?;
        Ok(())
    }
}
