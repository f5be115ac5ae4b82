/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */
use crate::whippet::error::{KlfmError, KlfmResult};
use crate::whippet::gain_bucket::GainBucketStandard;
use crate::whippet::gain_bucket_entry::GainBucketEntry;
use crate::whippet::gain_bucket_manager::GainBucketManager;
use crate::whippet::id_types::NodeId;
use crate::whippet::node::Node;
use crate::whippet::partitioner_config::MAX_CONSTRAINED_ENTRY_CHECKS;

/// Gain bucket manager for graphs whose balance is constrained in a single
/// resource: one bucket per partition, with selection between the
/// constrained and unconstrained side limited to a bounded search so a move
/// costs amortized O(1).
pub struct GainBucketManagerSingleResource {
    resource_index: usize,
    max_imbalance_fraction: f64,
    gain_bucket_a: GainBucketStandard,
    gain_bucket_b: GainBucketStandard,
}

impl GainBucketManagerSingleResource {
    /// `resource_index` names the resource in the nodes' weight vectors this
    /// manager considers.
    pub fn new(resource_index: usize, max_imbalance_fraction: f64) -> Self {
        Self {
            resource_index,
            max_imbalance_fraction,
            gain_bucket_a: GainBucketStandard::new(),
            gain_bucket_b: GainBucketStandard::new(),
        }
    }

    fn add_entry(&mut self, entry: GainBucketEntry, in_part_a: bool) {
        if in_part_a {
            self.gain_bucket_a.add(entry);
        } else {
            self.gain_bucket_b.add(entry);
        }
    }
}

impl GainBucketManager for GainBucketManagerSingleResource {
    fn get_next_entry(
        &mut self,
        current_balance: &[i64],
        total_weight: &[i64],
    ) -> KlfmResult<GainBucketEntry> {
        let weight_balance = current_balance[self.resource_index];
        let (constrained_bucket, unconstrained_bucket) = if weight_balance > 0 {
            (&mut self.gain_bucket_b, &mut self.gain_bucket_a)
        } else {
            (&mut self.gain_bucket_a, &mut self.gain_bucket_b)
        };

        // Divide by two because the moved weight is subtracted from one
        // partition and added to the other, shifting the balance by double
        // the node weight.
        let max_constrained_node_weight = ((self.max_imbalance_fraction
            * total_weight[self.resource_index] as f64)
            as i64
            - weight_balance.abs())
            / 2;

        // Handle the case where one of the buckets is empty.
        if constrained_bucket.is_empty() {
            if unconstrained_bucket.is_empty() {
                return Err(KlfmError::new(
                    "Requested an entry from an empty gain bucket manager.",
                ));
            }
            return Ok(unconstrained_bucket.pop());
        } else if unconstrained_bucket.is_empty() {
            // The constrained top may not fit, but there is nothing else to
            // offer; the rollback phase discards the move if it hurts.
            return Ok(constrained_bucket.pop());
        }

        /* Finding the highest-gain node that fits has unacceptable O(n)
           worst-case complexity. Only the unconstrained top and a statically
           capped number of constrained entries are considered. */
        let unconstrained_gain = unconstrained_bucket.top().gain;
        let max_checks = if constrained_bucket.num_entries() > MAX_CONSTRAINED_ENTRY_CHECKS {
            MAX_CONSTRAINED_ENTRY_CHECKS
        } else {
            constrained_bucket.num_entries() - 1
        };
        let mut constrained_entries_passed: Vec<GainBucketEntry> = Vec::new();
        let mut constrained_entry = constrained_bucket.pop();
        let mut constrained_entries_checked = 1;
        while constrained_entry.gain > unconstrained_gain
            && constrained_entry.current_weight_vector()[self.resource_index]
                > max_constrained_node_weight
            && constrained_entries_checked <= max_checks
        {
            constrained_entries_passed.push(constrained_entry);
            constrained_entry = constrained_bucket.pop();
            constrained_entries_checked += 1;
        }

        let use_constrained = constrained_entry.gain > unconstrained_gain
            && constrained_entry.current_weight_vector()[self.resource_index]
                <= max_constrained_node_weight;

        let selected = if use_constrained {
            constrained_entry
        } else {
            constrained_bucket.add(constrained_entry);
            unconstrained_bucket.pop()
        };
        for entry in constrained_entries_passed {
            constrained_bucket.add(entry);
        }
        Ok(selected)
    }

    fn num_unlocked_nodes(&self) -> usize {
        self.gain_bucket_a.num_entries() + self.gain_bucket_b.num_entries()
    }

    fn add_node(
        &mut self,
        gain: i64,
        node: &Node,
        in_part_a: bool,
        _total_weight: &[i64],
    ) -> KlfmResult<()> {
        self.add_entry(GainBucketEntry::from_node(gain, node), in_part_a);
        Ok(())
    }

    fn update_gains(
        &mut self,
        gain_modifier: i64,
        nodes_to_increase_gain: &[NodeId],
        nodes_to_decrease_gain: &[NodeId],
        moved_from_part_a: bool,
    ) {
        if moved_from_part_a {
            self.gain_bucket_a
                .update_gains(gain_modifier, nodes_to_increase_gain);
            self.gain_bucket_b
                .update_gains(-gain_modifier, nodes_to_decrease_gain);
        } else {
            self.gain_bucket_b
                .update_gains(gain_modifier, nodes_to_increase_gain);
            self.gain_bucket_a
                .update_gains(-gain_modifier, nodes_to_decrease_gain);
        }
    }

    fn update_node_implementation(&mut self, node: &Node) -> KlfmResult<()> {
        if let Some(gbe) = self.gain_bucket_a.entry_by_node_id_mut(node.id) {
            gbe.current_weight_vector_index = node.selected_weight_vector_index();
        } else if let Some(gbe) = self.gain_bucket_b.entry_by_node_id_mut(node.id) {
            gbe.current_weight_vector_index = node.selected_weight_vector_index();
        }
        Ok(())
    }
}
