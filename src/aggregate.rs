// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Exposure aggregation.
//!
//! Reduces raw matches into one summary per calendar day. The reduction is a
//! pure function of the match *set*: order and repeated matches of the same
//! record do not change the output.

use crate::config::DEFAULT_SCAN_INTERVAL_SECS;
use crate::matcher::ExposureMatch;
use crate::types::day_bucket;
use crate::types::id::DedupKey;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Seconds of contact one observed record stands for.
    pub scan_interval_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
        }
    }
}

/// Per-day exposure bucket handed to the application layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExposureSummary {
    /// Days since the Unix epoch.
    pub day_bucket: u64,
    /// Seconds.
    pub total_duration_estimate: u64,
    pub max_signal_strength: i16,
    pub match_count: u32,
}

impl ExposureSummary {
    /// Fold a later pass's summary for the same day into this one.
    pub fn merge(&mut self, other: &ExposureSummary) {
        debug_assert_eq!(self.day_bucket, other.day_bucket);
        self.total_duration_estimate = self.total_duration_estimate.saturating_add(other.total_duration_estimate);
        self.max_signal_strength = self.max_signal_strength.max(other.max_signal_strength);
        self.match_count = self.match_count.saturating_add(other.match_count);
    }
}

/// One summary per day bucket, ascending by bucket.
pub fn aggregate<I>(matches: I, config: &AggregationConfig) -> Vec<ExposureSummary>
where
    I: IntoIterator<Item = ExposureMatch>,
{
    // Equal records may carry different signal strengths; keep the strongest
    // so the outcome does not depend on which copy arrived first.
    let mut distinct: FxHashMap<DedupKey, (u64, i16)> = FxHashMap::default();
    for m in matches {
        let record = &m.event_record;
        distinct
            .entry(record.dedup_key())
            .and_modify(|(_, rssi)| *rssi = (*rssi).max(record.signal_strength))
            .or_insert((record.observed_at, record.signal_strength));
    }

    let mut buckets: BTreeMap<u64, ExposureSummary> = BTreeMap::new();
    for (observed_at, rssi) in distinct.into_values() {
        let day = day_bucket(observed_at);
        let entry = buckets.entry(day).or_insert(ExposureSummary {
            day_bucket: day,
            total_duration_estimate: 0,
            max_signal_strength: i16::MIN,
            match_count: 0,
        });
        entry.total_duration_estimate = entry.total_duration_estimate.saturating_add(config.scan_interval_secs);
        entry.max_signal_strength = entry.max_signal_strength.max(rssi);
        entry.match_count = entry.match_count.saturating_add(1);
    }

    buckets.into_values().collect()
}

/// Merge a new pass into an existing history, keyed by day bucket.
pub fn merge_into(history: &mut BTreeMap<u64, ExposureSummary>, pass: &[ExposureSummary]) {
    for summary in pass {
        history
            .entry(summary.day_bucket)
            .and_modify(|s| s.merge(summary))
            .or_insert(*summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EventRecord;
    use crate::types::id::{EphemeralId, Epoch};

    fn m(b: u8, t: u64, rssi: i16) -> ExposureMatch {
        let record = EventRecord::new(EphemeralId([b; 16]), rssi, t, None);
        ExposureMatch {
            derived_id: record.ephemeral_id,
            event_record: record,
            matched_epoch: Epoch(1),
        }
    }

    #[test]
    fn test_one_bucket_per_day() {
        let cfg = AggregationConfig { scan_interval_secs: 60 };
        let out = aggregate(vec![m(1, 10, -70), m(2, 86_400 + 5, -55), m(3, 20, -65)], &cfg);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], ExposureSummary {
            day_bucket: 0,
            total_duration_estimate: 120,
            max_signal_strength: -65,
            match_count: 2,
        });
        assert_eq!(out[1].day_bucket, 1);
        assert_eq!(out[1].match_count, 1);
    }

    #[test]
    fn test_repeated_matches_count_once() {
        let cfg = AggregationConfig::default();
        let out = aggregate(vec![m(1, 10, -70), m(1, 10, -40)], &cfg);
        assert_eq!(out[0].match_count, 1);
        assert_eq!(out[0].total_duration_estimate, DEFAULT_SCAN_INTERVAL_SECS);
        assert_eq!(out[0].max_signal_strength, -40);
    }

    #[test]
    fn test_merge_into_history() {
        let cfg = AggregationConfig { scan_interval_secs: 10 };
        let mut history = BTreeMap::new();
        merge_into(&mut history, &aggregate(vec![m(1, 10, -70)], &cfg));
        merge_into(&mut history, &aggregate(vec![m(2, 20, -50)], &cfg));
        let day0 = history[&0];
        assert_eq!(day0.match_count, 2);
        assert_eq!(day0.total_duration_estimate, 20);
        assert_eq!(day0.max_signal_strength, -50);
    }
}
