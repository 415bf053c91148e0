// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! In-memory record index.
//!
//! # Invariants
//! - Every key in `by_time` is in `observed` with the same `observed_at`.
//! - Every location points into a segment listed in `segments`.

use super::segment::Segment;
use exposure_kernel::types::id::{DedupKey, EphemeralId};
use exposure_kernel::types::TimeRange;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Location {
    pub segment: Arc<Segment>,
    pub offset: u64,
    pub frame_len: u64,
}

#[derive(Clone, Debug)]
pub struct IndexEntry {
    pub ephemeral_id: EphemeralId,
    pub location: Location,
}

#[derive(Default)]
pub struct StoreIndex {
    by_time: BTreeMap<(u64, DedupKey), IndexEntry>,
    observed: FxHashMap<DedupKey, u64>,
    segments: BTreeMap<u64, Arc<Segment>>,
}

impl StoreIndex {
    pub fn contains(&self, key: &DedupKey) -> bool {
        self.observed.contains_key(key)
    }

    /// Returns false (and changes nothing) if the key is already indexed.
    pub fn insert(&mut self, key: DedupKey, observed_at: u64, entry: IndexEntry) -> bool {
        if self.observed.contains_key(&key) {
            return false;
        }
        self.observed.insert(key, observed_at);
        self.by_time.insert((observed_at, key), entry);
        true
    }

    pub fn remove(&mut self, key: &DedupKey) -> Option<IndexEntry> {
        let observed_at = self.observed.remove(key)?;
        self.by_time.remove(&(observed_at, *key))
    }

    /// Point an existing entry at a new location.
    pub fn relocate(&mut self, key: &DedupKey, location: Location) -> bool {
        let Some(observed_at) = self.observed.get(key) else {
            return false;
        };
        match self.by_time.get_mut(&(*observed_at, *key)) {
            Some(entry) => {
                entry.location = location;
                true
            }
            None => false,
        }
    }

    pub fn add_segment(&mut self, segment: Arc<Segment>) {
        self.segments.insert(segment.id(), segment);
    }

    pub fn remove_segment(&mut self, id: u64) -> Option<Arc<Segment>> {
        self.segments.remove(&id)
    }

    pub fn segment(&self, id: u64) -> Option<&Arc<Segment>> {
        self.segments.get(&id)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    /// Entries with `observed_at` in the half-open `range`, in index order.
    pub fn range(&self, range: TimeRange) -> impl Iterator<Item = (&(u64, DedupKey), &IndexEntry)> {
        // BTreeMap::range panics on `start > end`.
        let end = range.end.max(range.start);
        self.by_time.range((
            Bound::Included((range.start, DedupKey::default())),
            Bound::Excluded((end, DedupKey::default())),
        ))
    }

    /// Entries observed strictly before `cutoff`.
    pub fn older_than(&self, cutoff: u64) -> impl Iterator<Item = (&(u64, DedupKey), &IndexEntry)> {
        self.by_time.range(..(cutoff, DedupKey::default()))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&(u64, DedupKey), &IndexEntry)> {
        self.by_time.iter()
    }
}
