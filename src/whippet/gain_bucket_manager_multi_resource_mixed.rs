/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
extern crate fxhash;
extern crate ordered_float;
extern crate rand;

use fxhash::FxHashMap;
use ordered_float::OrderedFloat;
use rand::prelude::*;

use crate::whippet::error::{KlfmError, KlfmResult};
use crate::whippet::gain_bucket::GainBucketStandard;
use crate::whippet::gain_bucket_entry::GainBucketEntry;
use crate::whippet::gain_bucket_manager::{max_imbalance_from_fractions, GainBucketManager};
use crate::whippet::id_types::NodeId;
use crate::whippet::node::Node;
use crate::whippet::partitioner_config::GainBucketSelectionPolicy;
use crate::whippet::weight_score::{imbalance_power, ratio_power_if_changed};

/// Entries inspected per affinity bucket by the bounded-search policies.
const MAX_BUCKET_SEARCH_DEPTH: usize = 3;

/// Gain bucket manager for graphs whose implementations may span multiple
/// resources. Two master buckets order every node purely by gain; 2R
/// affinity buckets group nodes under the resource that dominates their
/// weight vector, so selection policies can trade gain against the balance
/// pressure a move would create. In adaptive mode a node seeds one affinity
/// entry per resource using the implementation that maximizes it.
pub struct GainBucketManagerMultiResourceMixed {
    num_resources: usize,
    gain_buckets_a: Vec<GainBucketStandard>,
    gain_buckets_b: Vec<GainBucketStandard>,
    gain_bucket_a_master: GainBucketStandard,
    gain_bucket_b_master: GainBucketStandard,
    max_imbalance_fraction: Vec<f64>,
    selection_policy: GainBucketSelectionPolicy,
    use_adaptive: bool,
    use_ratio: bool,
    resource_ratio_weights: Vec<i64>,
    node_id_to_resource_index: FxHashMap<NodeId, Vec<usize>>,
    rng: StdRng,
}

impl GainBucketManagerMultiResourceMixed {
    pub fn new(
        max_imbalance_fraction: Vec<f64>,
        selection_policy: GainBucketSelectionPolicy,
        adaptive: bool,
        use_ratio: bool,
        resource_ratio_weights: Vec<i64>,
        seed: u64,
    ) -> Self {
        let num_resources = max_imbalance_fraction.len();
        Self {
            num_resources,
            gain_buckets_a: (0..num_resources).map(|_| GainBucketStandard::new()).collect(),
            gain_buckets_b: (0..num_resources).map(|_| GainBucketStandard::new()).collect(),
            gain_bucket_a_master: GainBucketStandard::new(),
            gain_bucket_b_master: GainBucketStandard::new(),
            max_imbalance_fraction,
            selection_policy,
            use_adaptive: adaptive,
            use_ratio,
            resource_ratio_weights,
            node_id_to_resource_index: FxHashMap::default(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn add_entry(&mut self, entry: GainBucketEntry, associated_resource: usize, in_part_a: bool) {
        assert_eq!(entry.current_weight_vector().len(), self.num_resources);
        let node_id = entry.id;
        if in_part_a {
            self.gain_buckets_a[associated_resource].add(entry);
        } else {
            self.gain_buckets_b[associated_resource].add(entry);
        }
        self.node_id_to_resource_index
            .entry(node_id)
            .or_insert_with(Vec::new)
            .push(associated_resource);
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
            if self.gain_bucket_a_master.has_node(node_id) {
                self.gain_bucket_a_master.remove_by_node_id(node_id);
            } else if self.gain_bucket_b_master.has_node(node_id) {
                self.gain_bucket_b_master.remove_by_node_id(node_id);
            }
        }
    }

    /// The resource that dominates `weight_vector`, measured as the largest
    /// fraction of the resource's maximum allowed imbalance.
    fn determine_resource_affinity(&self, weight_vector: &[i64], total_weight: &[i64]) -> usize {
        let max_weight_imbalance =
            max_imbalance_from_fractions(&self.max_imbalance_fraction, total_weight);
        let mut max_res_frac_idx = 0;
        let mut max_res_frac = 0.0;
        for (res, &w) in weight_vector.iter().enumerate() {
            let res_frac = w as f64 / max_weight_imbalance[res] as f64;
            if res_frac > max_res_frac {
                max_res_frac_idx = res;
                max_res_frac = res_frac;
            }
        }
        max_res_frac_idx
    }

    /// Balance score of the hypothetical state after moving a node of weight
    /// `node_weight`. The violator variant scores zero unless the move would
    /// break a constraint.
    fn imbalance_power_if_moved(
        &self,
        node_weight: &[i64],
        balance: &[i64],
        total_weight: &[i64],
        from_part_a: bool,
        use_violator: bool,
    ) -> f64 {
        let mut adjusted_balance = Vec::with_capacity(node_weight.len());
        let mut adjusted_total = Vec::with_capacity(node_weight.len());
        for (i, &w) in node_weight.iter().enumerate() {
            let change = 2 * w;
            if from_part_a {
                adjusted_balance.push(balance[i] - change);
                adjusted_total.push(total_weight[i] - change);
            } else {
                adjusted_balance.push(balance[i] + change);
                adjusted_total.push(total_weight[i] + change);
            }
        }
        if use_violator {
            self.violator_imbalance_power(&adjusted_balance, &adjusted_total)
        } else {
            let max_weight_imbalance =
                max_imbalance_from_fractions(&self.max_imbalance_fraction, total_weight);
            imbalance_power(&adjusted_balance, &max_weight_imbalance)
        }
    }

    fn violator_imbalance_power(&self, balance: &[i64], total_weight: &[i64]) -> f64 {
        let max_weight_imbalance =
            max_imbalance_from_fractions(&self.max_imbalance_fraction, total_weight);
        let violated = balance
            .iter()
            .zip(max_weight_imbalance.iter())
            .any(|(&b, &max)| b > max);
        if violated {
            imbalance_power(balance, &max_weight_imbalance)
        } else {
            0.0
        }
    }

    /// Ratio score of adopting `entry`'s candidate implementation in place
    /// of the implementation its master entry currently records.
    fn ratio_power_if_changed_by_entry(
        &self,
        entry: &GainBucketEntry,
        total_weight: &[i64],
    ) -> f64 {
        let master = if self.gain_bucket_a_master.has_node(entry.id) {
            self.gain_bucket_a_master.entry_by_node_id(entry.id)
        } else {
            self.gain_bucket_b_master.entry_by_node_id(entry.id)
        };
        match master {
            Some(gbe) => ratio_power_if_changed(
                gbe.current_weight_vector(),
                entry.current_weight_vector(),
                &self.resource_ratio_weights,
                total_weight,
            ),
            None => 0.0,
        }
    }

    /// Re-selects `entry`'s weight vector to the one with the lowest
    /// imbalance power and returns that power.
    fn set_best_weight_vector_by_imbalance_power(
        &self,
        entry: &mut GainBucketEntry,
        balance: &[i64],
        total_weight: &[i64],
        from_part_a: bool,
        use_violator: bool,
    ) -> f64 {
        let current_wv = entry.current_weight_vector().to_vec();
        let mut best_index = 0;
        let mut best_power = f64::MAX;
        for (i, wv) in entry.all_weight_vectors.iter().enumerate() {
            let mut power =
                self.imbalance_power_if_moved(wv, balance, total_weight, from_part_a, use_violator);
            if self.use_ratio {
                power += ratio_power_if_changed(
                    &current_wv,
                    wv,
                    &self.resource_ratio_weights,
                    total_weight,
                );
            }
            if power < best_power {
                best_power = power;
                best_index = i;
            }
        }
        entry.set_current_weight_vector_index(best_index);
        best_power
    }

    // Lower is better.
    fn gain_imbalance_score(gain: i64, imbalance_power: f64) -> f64 {
        imbalance_power - gain as f64
    }

    /// Pops up to `MAX_BUCKET_SEARCH_DEPTH` entries from each side of the
    /// chosen affinity pair, scores the hypothetical moves, keeps the entry
    /// with the lowest violator imbalance power (gain breaks ties, which
    /// favors entries that fit over entries that do not), and returns the
    /// rest.
    fn select_between_buckets_by_imbalance_power(
        &mut self,
        res: usize,
        current_balance: &[i64],
        total_weight: &[i64],
    ) -> GainBucketEntry {
        if self.gain_buckets_a[res].is_empty() {
            return self.gain_buckets_b[res].pop();
        } else if self.gain_buckets_b[res].is_empty() {
            return self.gain_buckets_a[res].pop();
        }

        let mut a_entries: Vec<(f64, GainBucketEntry)> = Vec::new();
        let mut b_entries: Vec<(f64, GainBucketEntry)> = Vec::new();
        for _ in 0..MAX_BUCKET_SEARCH_DEPTH {
            if self.gain_buckets_a[res].is_empty() {
                break;
            }
            let entry = self.gain_buckets_a[res].pop();
            let mut power = self.imbalance_power_if_moved(
                entry.current_weight_vector(),
                current_balance,
                total_weight,
                true,
                true,
            );
            if self.use_ratio && self.use_adaptive {
                power += self.ratio_power_if_changed_by_entry(&entry, total_weight);
            }
            let stop = power == 0.0;
            a_entries.push((power, entry));
            if stop {
                break;
            }
        }
        for _ in 0..MAX_BUCKET_SEARCH_DEPTH {
            if self.gain_buckets_b[res].is_empty() {
                break;
            }
            let entry = self.gain_buckets_b[res].pop();
            let mut power = self.imbalance_power_if_moved(
                entry.current_weight_vector(),
                current_balance,
                total_weight,
                false,
                true,
            );
            if self.use_ratio && self.use_adaptive {
                power += self.ratio_power_if_changed_by_entry(&entry, total_weight);
            }
            let stop = power == 0.0;
            b_entries.push((power, entry));
            if stop {
                break;
            }
        }

        // Entries were popped in descending gain order, so a strictly-lower
        // comparison keeps the highest-gain entry among power ties within
        // each side.
        let best_index = |entries: &[(f64, GainBucketEntry)]| {
            let mut best = 0;
            for i in 1..entries.len() {
                if entries[i].0 < entries[best].0 {
                    best = i;
                }
            }
            best
        };
        let a_best = best_index(&a_entries);
        let b_best = best_index(&b_entries);

        let use_a = if a_entries.is_empty() {
            false
        } else if b_entries.is_empty() {
            true
        } else if a_entries[a_best].0 == b_entries[b_best].0 {
            a_entries[a_best].1.gain > b_entries[b_best].1.gain
        } else {
            a_entries[a_best].0 < b_entries[b_best].0
        };

        let mut selected: Option<GainBucketEntry> = None;
        for (i, (_, entry)) in a_entries.into_iter().enumerate() {
            if use_a && i == a_best {
                selected = Some(entry);
            } else {
                self.gain_buckets_a[res].add(entry);
            }
        }
        for (i, (_, entry)) in b_entries.into_iter().enumerate() {
            if !use_a && i == b_best {
                selected = Some(entry);
            } else {
                self.gain_buckets_b[res].add(entry);
            }
        }
        selected.expect("Affinity bucket selection failed to produce an entry.")
    }

    fn next_entry_random_resource(
        &mut self,
        current_balance: &[i64],
        total_weight: &[i64],
    ) -> KlfmResult<GainBucketEntry> {
        let non_empty: Vec<usize> = (0..self.num_resources)
            .filter(|&i| {
                !(self.gain_buckets_a[i].is_empty() && self.gain_buckets_b[i].is_empty())
            })
            .collect();
        if non_empty.is_empty() {
            return Err(KlfmError::new(
                "Requested an entry from an empty gain bucket manager.",
            ));
        }
        let res = non_empty[self.rng.gen_range(0, non_empty.len())];
        Ok(self.select_between_buckets_by_imbalance_power(res, current_balance, total_weight))
    }

    fn next_entry_most_unbalanced_resource(
        &mut self,
        current_balance: &[i64],
        total_weight: &[i64],
    ) -> KlfmResult<GainBucketEntry> {
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
        Ok(self.select_between_buckets_by_imbalance_power(res, current_balance, total_weight))
    }

    fn next_entry_best_gain_imbalance_score_classic(
        &mut self,
        current_balance: &[i64],
        total_weight: &[i64],
    ) -> KlfmResult<GainBucketEntry> {
        if self.gain_bucket_a_master.is_empty() && self.gain_bucket_b_master.is_empty() {
            return Err(KlfmError::new(
                "Requested an entry from an empty gain bucket manager.",
            ));
        }
        let mut entry_a: Option<(GainBucketEntry, f64)> = None;
        let mut entry_b: Option<(GainBucketEntry, f64)> = None;
        if !self.gain_bucket_a_master.is_empty() {
            let mut entry = self.gain_bucket_a_master.top().clone();
            let power = if self.use_adaptive {
                self.set_best_weight_vector_by_imbalance_power(
                    &mut entry,
                    current_balance,
                    total_weight,
                    true,
                    false,
                )
            } else {
                // The violator variant is used in the non-adaptive case
                // because it is easier to get stuck in violation without
                // implementation flexibility.
                self.imbalance_power_if_moved(
                    entry.current_weight_vector(),
                    current_balance,
                    total_weight,
                    true,
                    true,
                )
            };
            entry_a = Some((entry, power));
        }
        if !self.gain_bucket_b_master.is_empty() {
            let mut entry = self.gain_bucket_b_master.top().clone();
            let power = if self.use_adaptive {
                self.set_best_weight_vector_by_imbalance_power(
                    &mut entry,
                    current_balance,
                    total_weight,
                    false,
                    false,
                )
            } else {
                self.imbalance_power_if_moved(
                    entry.current_weight_vector(),
                    current_balance,
                    total_weight,
                    false,
                    true,
                )
            };
            entry_b = Some((entry, power));
        }
        let use_entry_a = match (&entry_a, &entry_b) {
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some((a, a_power)), Some((b, b_power))) => {
                let score_a = Self::gain_imbalance_score(a.gain, *a_power);
                let score_b = Self::gain_imbalance_score(b.gain, *b_power);
                if score_a == score_b {
                    // Tie: prefer the side with more nodes waiting to move.
                    self.gain_bucket_a_master.num_entries()
                        > self.gain_bucket_b_master.num_entries()
                } else {
                    score_a < score_b
                }
            }
            (None, None) => unreachable!(),
        };
        let entry = if use_entry_a {
            entry_a.unwrap().0
        } else {
            entry_b.unwrap().0
        };
        Ok(entry)
    }

    fn next_entry_best_gain_imbalance_score_with_affinities(
        &mut self,
        current_balance: &[i64],
        total_weight: &[i64],
    ) -> KlfmResult<GainBucketEntry> {
        struct Candidate {
            from_part_a: bool,
            resource_index: usize,
            score: f64,
            entry: GainBucketEntry,
        }
        let mut candidates: Vec<Candidate> = Vec::new();
        for res in 0..self.num_resources {
            for &from_part_a in &[true, false] {
                let bucket = if from_part_a {
                    &self.gain_buckets_a[res]
                } else {
                    &self.gain_buckets_b[res]
                };
                for depth in 0..MAX_BUCKET_SEARCH_DEPTH {
                    let entry = match bucket.peek(depth) {
                        Some(entry) => entry.clone(),
                        None => break,
                    };
                    let mut power = self.imbalance_power_if_moved(
                        entry.current_weight_vector(),
                        current_balance,
                        total_weight,
                        from_part_a,
                        false,
                    );
                    if self.use_ratio && self.use_adaptive {
                        power += self.ratio_power_if_changed_by_entry(&entry, total_weight);
                    }
                    let score = Self::gain_imbalance_score(entry.gain, power);
                    candidates.push(Candidate {
                        from_part_a,
                        resource_index: res,
                        score,
                        entry,
                    });
                }
            }
        }
        if candidates.is_empty() {
            return Err(KlfmError::new(
                "Requested an entry from an empty gain bucket manager.",
            ));
        }

        let mut best_index = 0;
        for i in 1..candidates.len() {
            let better = OrderedFloat(candidates[i].score)
                < OrderedFloat(candidates[best_index].score)
                || (candidates[i].score == candidates[best_index].score
                    // Both scores can be zero when the partition is perfectly
                    // balanced; fall back to raw gain.
                    && candidates[best_index].entry.gain < candidates[i].entry.gain);
            if better {
                best_index = i;
            }
        }

        let selected = candidates[best_index].entry.clone();
        for (i, candidate) in candidates.iter().enumerate() {
            if i == best_index {
                continue;
            }
            if candidate.entry.id == selected.id {
                continue;
            }
            // Restore inspection order for entries that stay behind.
            let bucket = if candidate.from_part_a {
                &mut self.gain_buckets_a[candidate.resource_index]
            } else {
                &mut self.gain_buckets_b[candidate.resource_index]
            };
            if bucket.has_node(candidate.entry.id) {
                bucket.touch(candidate.entry.id);
            }
        }
        Ok(selected)
    }
}

impl GainBucketManager for GainBucketManagerMultiResourceMixed {
    fn get_next_entry(
        &mut self,
        current_balance: &[i64],
        total_weight: &[i64],
    ) -> KlfmResult<GainBucketEntry> {
        let entry = match self.selection_policy {
            GainBucketSelectionPolicy::RandomResource => {
                self.next_entry_random_resource(current_balance, total_weight)?
            }
            GainBucketSelectionPolicy::MostUnbalancedResource => {
                self.next_entry_most_unbalanced_resource(current_balance, total_weight)?
            }
            GainBucketSelectionPolicy::BestGainImbalanceScoreClassic => {
                self.next_entry_best_gain_imbalance_score_classic(current_balance, total_weight)?
            }
            GainBucketSelectionPolicy::BestGainImbalanceScoreWithAffinities => self
                .next_entry_best_gain_imbalance_score_with_affinities(
                    current_balance,
                    total_weight,
                )?,
            policy => {
                return Err(KlfmError::Config(format!(
                    "Selection policy {:?} is not supported by the mixed gain bucket manager.",
                    policy
                )));
            }
        };
        // Remove the node's remaining entries from all buckets.
        self.remove_node(entry.id);
        Ok(entry)
    }

    fn num_unlocked_nodes(&self) -> usize {
        self.gain_bucket_a_master.num_entries() + self.gain_bucket_b_master.num_entries()
    }

    fn add_node(
        &mut self,
        gain: i64,
        node: &Node,
        in_part_a: bool,
        total_weight: &[i64],
    ) -> KlfmResult<()> {
        let mut entry = GainBucketEntry::from_node(gain, node);
        if in_part_a {
            self.gain_bucket_a_master.add(entry.clone());
        } else {
            self.gain_bucket_b_master.add(entry.clone());
        }
        if self.use_adaptive {
            // At most one entry per resource: the weight vector that has
            // affinity with the resource and the highest weight in it.
            let mut res_to_wv_index: Vec<Option<usize>> = vec![None; self.num_resources];
            for (i, wv) in node.weight_vectors().iter().enumerate() {
                let affinity = self.determine_resource_affinity(wv, total_weight);
                match res_to_wv_index[affinity] {
                    None => res_to_wv_index[affinity] = Some(i),
                    Some(prev) => {
                        if wv[affinity] > node.weight_vector(prev)[affinity] {
                            res_to_wv_index[affinity] = Some(i);
                        }
                    }
                }
            }
            for (res, slot) in res_to_wv_index.iter().enumerate() {
                if let Some(wv_index) = slot {
                    entry.set_current_weight_vector_index(*wv_index);
                    self.add_entry(entry.clone(), res, in_part_a);
                }
            }
        } else {
            let affinity =
                self.determine_resource_affinity(entry.current_weight_vector(), total_weight);
            self.add_entry(entry, affinity, in_part_a);
        }
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
            if let Some(resources) = self.node_id_to_resource_index.get(id) {
                for &res in resources {
                    inc[res].push(*id);
                }
            }
        }
        for id in nodes_to_decrease_gain {
            if let Some(resources) = self.node_id_to_resource_index.get(id) {
                for &res in resources {
                    dec[res].push(*id);
                }
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
        if moved_from_part_a {
            self.gain_bucket_a_master
                .update_gains(gain_modifier, nodes_to_increase_gain);
            self.gain_bucket_b_master
                .update_gains(-gain_modifier, nodes_to_decrease_gain);
        } else {
            self.gain_bucket_b_master
                .update_gains(gain_modifier, nodes_to_increase_gain);
            self.gain_bucket_a_master
                .update_gains(-gain_modifier, nodes_to_decrease_gain);
        }
    }

    fn update_node_implementation(&mut self, node: &Node) -> KlfmResult<()> {
        if !self.node_id_to_resource_index.contains_key(&node.id) {
            return Ok(());
        }
        // Only the master entry is rewritten. Affinity entries are left
        // alone: the operations that change implementations (mutation,
        // rebalancing) also change the graph's total weight, which affinity
        // is computed against.
        if let Some(gbe) = self.gain_bucket_a_master.entry_by_node_id_mut(node.id) {
            gbe.set_current_weight_vector_index(node.selected_weight_vector_index());
        } else if let Some(gbe) = self.gain_bucket_b_master.entry_by_node_id_mut(node.id) {
            gbe.set_current_weight_vector_index(node.selected_weight_vector_index());
        }
        Ok(())
    }
}
