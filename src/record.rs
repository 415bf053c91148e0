// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Observed encounter record.

use crate::config::DEDUP_CONTEXT;
use crate::types::id::{DedupKey, EphemeralId};
use core::hash::{Hash, Hasher};
use serde::{Deserialize, Serialize};

/// One observed encounter with a nearby broadcaster.
///
/// # Equality
/// Two records are equal when `ephemeral_id`, `observed_at` and
/// `location_hint` match. `signal_strength` is ignored: it is environmental
/// noise and carries no identity, so re-observations of the same frame with
/// a different RSSI collapse into one record.
///
/// `observed_at` comes from the observer's own clock and is not monotonic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    pub ephemeral_id: EphemeralId,
    /// Received signal strength (dBm).
    pub signal_strength: i16,
    /// Seconds since the Unix epoch on the observing device.
    pub observed_at: u64,
    /// Coarse location context, present only when capture is enabled.
    pub location_hint: Option<Vec<u8>>,
}

impl EventRecord {
    pub fn new(ephemeral_id: EphemeralId, signal_strength: i16, observed_at: u64, location_hint: Option<Vec<u8>>) -> Self {
        Self {
            ephemeral_id,
            signal_strength,
            observed_at,
            location_hint,
        }
    }

    /// Content address over the identity fields.
    pub fn dedup_key(&self) -> DedupKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DEDUP_CONTEXT);
        hasher.update(self.ephemeral_id.as_bytes());
        hasher.update(&self.observed_at.to_le_bytes());
        match &self.location_hint {
            Some(hint) => {
                hasher.update(&[1]);
                hasher.update(&(hint.len() as u32).to_le_bytes());
                hasher.update(hint);
            }
            None => {
                hasher.update(&[0]);
            }
        }
        DedupKey(*hasher.finalize().as_bytes())
    }
}

impl PartialEq for EventRecord {
    fn eq(&self, other: &Self) -> bool {
        self.ephemeral_id == other.ephemeral_id
            && self.observed_at == other.observed_at
            && self.location_hint == other.location_hint
    }
}

impl Eq for EventRecord {}

impl Hash for EventRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ephemeral_id.hash(state);
        self.observed_at.hash(state);
        self.location_hint.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> EphemeralId {
        EphemeralId([b; 16])
    }

    #[test]
    fn test_equality_ignores_signal_strength() {
        let a = EventRecord::new(id(1), -40, 1_000, Some(b"u4pru".to_vec()));
        let b = EventRecord::new(id(1), -90, 1_000, Some(b"u4pru".to_vec()));
        assert_eq!(a, b);
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_equality_covers_identity_fields() {
        let base = EventRecord::new(id(1), -40, 1_000, None);
        assert_ne!(base, EventRecord::new(id(2), -40, 1_000, None));
        assert_ne!(base, EventRecord::new(id(1), -40, 1_001, None));
        assert_ne!(base, EventRecord::new(id(1), -40, 1_000, Some(vec![])));
    }

    #[test]
    fn test_dedup_key_distinguishes_absent_and_empty_hint() {
        let none = EventRecord::new(id(7), -50, 42, None);
        let empty = EventRecord::new(id(7), -50, 42, Some(Vec::new()));
        assert_ne!(none.dedup_key(), empty.dedup_key());
    }

    #[test]
    fn test_hash_consistent_with_eq() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(EventRecord::new(id(3), -60, 5, None));
        set.insert(EventRecord::new(id(3), -75, 5, None));
        assert_eq!(set.len(), 1);
    }
}
