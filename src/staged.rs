// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Staged identifier set.
//!
//! Holds every identifier derived from batches that have been ingested but not
//! yet matched. Membership is an exact hash lookup; the prefix bucket set is a
//! cheap first filter so most non-matching records never touch the map.
//!
//! # Invariants
//! - An identifier maps to the earliest epoch it was derived in.
//! - `prefixes` contains the prefix of every key in `ids`.

use crate::batch::PublishedKeyBatch;
use crate::config::ID_PREFIX_LEN;
use crate::types::id::{EphemeralId, Epoch};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

#[derive(Clone, Debug, Default)]
pub struct StagedIdentifiers {
    ids: FxHashMap<EphemeralId, Epoch>,
    prefixes: FxHashSet<[u8; ID_PREFIX_LEN]>,
    epochs: BTreeSet<Epoch>,
}

/// Outcome of staging one batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageCounts {
    /// Identifiers newly added.
    pub inserted: usize,
    /// Identifiers already present (from this or another epoch).
    pub duplicates: usize,
}

impl StagedIdentifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            prefixes: FxHashSet::default(),
            epochs: BTreeSet::new(),
        }
    }

    /// Derive and stage every identifier of `batch`.
    pub fn from_batch(batch: &PublishedKeyBatch, ids_per_key: u32) -> (Self, StageCounts) {
        let mut staged = Self::with_capacity(batch.keys.len() * ids_per_key as usize);
        let mut counts = StageCounts::default();
        for id in batch.derived_ids(ids_per_key) {
            if staged.insert(id, batch.epoch) {
                counts.inserted += 1;
            } else {
                counts.duplicates += 1;
            }
        }
        staged.epochs.insert(batch.epoch);
        (staged, counts)
    }

    /// Stage one identifier. Returns `false` if it was already staged; the
    /// stored epoch then becomes the earlier of the two.
    pub fn insert(&mut self, id: EphemeralId, epoch: Epoch) -> bool {
        self.epochs.insert(epoch);
        self.prefixes.insert(id.prefix());
        match self.ids.get_mut(&id) {
            Some(existing) => {
                if epoch < *existing {
                    *existing = epoch;
                }
                false
            }
            None => {
                self.ids.insert(id, epoch);
                true
            }
        }
    }

    /// Fold another staged set into this one, keeping earliest epochs.
    pub fn merge(&mut self, other: StagedIdentifiers) -> StageCounts {
        let mut counts = StageCounts::default();
        for (id, epoch) in other.ids {
            if self.insert(id, epoch) {
                counts.inserted += 1;
            } else {
                counts.duplicates += 1;
            }
        }
        self.epochs.extend(other.epochs);
        counts
    }

    /// Epoch an identifier is staged under, if any.
    pub fn lookup(&self, id: &EphemeralId) -> Option<Epoch> {
        if !self.prefixes.contains(&id.prefix()) {
            return None;
        }
        self.ids.get(id).copied()
    }

    pub fn might_contain(&self, id: &EphemeralId) -> bool {
        self.prefixes.contains(&id.prefix())
    }

    pub fn epochs(&self) -> impl Iterator<Item = Epoch> + '_ {
        self.epochs.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_earliest_epoch_wins_regardless_of_order() {
        let id = EphemeralId([5; 16]);

        let mut forward = StagedIdentifiers::new();
        assert!(forward.insert(id, Epoch(5)));
        assert!(!forward.insert(id, Epoch(7)));
        assert_eq!(forward.lookup(&id), Some(Epoch(5)));

        let mut backward = StagedIdentifiers::new();
        backward.insert(id, Epoch(7));
        backward.insert(id, Epoch(5));
        assert_eq!(backward.lookup(&id), Some(Epoch(5)));
    }

    #[test]
    fn test_prefix_filter_rejects_unknown_buckets() {
        let mut staged = StagedIdentifiers::new();
        staged.insert(EphemeralId([1; 16]), Epoch(1));

        let mut same_bucket = [1u8; 16];
        same_bucket[15] = 2;
        assert!(staged.might_contain(&EphemeralId(same_bucket)));
        assert_eq!(staged.lookup(&EphemeralId(same_bucket)), None);
        assert!(!staged.might_contain(&EphemeralId([2; 16])));
    }

    #[test]
    fn test_merge_tracks_epochs() {
        let mut a = StagedIdentifiers::new();
        a.insert(EphemeralId([1; 16]), Epoch(2));
        let mut b = StagedIdentifiers::new();
        b.insert(EphemeralId([1; 16]), Epoch(1));
        b.insert(EphemeralId([2; 16]), Epoch(1));

        let counts = a.merge(b);
        assert_eq!(counts, StageCounts { inserted: 1, duplicates: 1 });
        assert_eq!(a.len(), 2);
        assert_eq!(a.epochs().collect::<Vec<_>>(), vec![Epoch(1), Epoch(2)]);
        assert_eq!(a.lookup(&EphemeralId([1; 16])), Some(Epoch(1)));
    }
}
