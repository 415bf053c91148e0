// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Retention sweep.
//!
//! Expired records are removed by copy-on-delete: the surviving frames of an
//! affected segment are copied into a new segment, the index is switched over
//! to the copy, and the old segment is retired. Scans that snapshotted
//! locations in the old segment keep reading it until they finish.

use super::index::{Location, StoreIndex};
use super::segment::Segment;
use super::{EventStore, StoreError};
use crate::telemetry;
use exposure_kernel::codec;
use exposure_kernel::types::id::DedupKey;
use exposure_persistence::frame::{FrameScanner, ScannedFrame};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub(super) const COMPACTION_SUFFIX: &str = ".compact";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    /// Records observed before this instant are gone.
    pub cutoff: u64,
    pub segments_rewritten: usize,
    pub records_removed: usize,
    pub records_retained: usize,
}

/// Live index entries of one segment, keyed by frame offset.
type LiveFrames = FxHashMap<u64, (DedupKey, u64)>;

struct Compaction {
    replacement: Option<Arc<Segment>>,
    relocated: Vec<(DedupKey, Location)>,
    removed: Vec<DedupKey>,
}

impl EventStore {
    /// Remove every record observed more than `retention` before now.
    pub fn sweep_expired(&self, retention: Duration) -> Result<SweepStats, StoreError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.sweep_expired_at(now, retention)
    }

    /// Remove every record with `observed_at < now - retention`.
    pub fn sweep_expired_at(&self, now: u64, retention: Duration) -> Result<SweepStats, StoreError> {
        let _sweep = self.sweep_lock.lock().unwrap_or_else(|e| e.into_inner());
        let started = Instant::now();
        let cutoff = now.saturating_sub(retention.as_secs());
        let mut stats = SweepStats {
            cutoff,
            ..Default::default()
        };

        let affected: BTreeSet<u64> = self
            .read_index()
            .older_than(cutoff)
            .map(|(_, entry)| entry.location.segment.id())
            .collect();
        if affected.is_empty() {
            debug!("Sweep at cutoff {}: nothing expired", cutoff);
            return Ok(stats);
        }

        // Replacement ids are taken before the rotation so the segment appends
        // go to always has the highest id, even if the sweep is cut short.
        let replacements: Vec<(u64, u64)> = affected.iter().map(|&id| (id, self.allocate_segment_id())).collect();
        {
            let mut writer = self.lock_writer();
            self.rotate(&mut writer)?;
        }

        // Affected segments are sealed now and only the sweep changes their
        // entries, so this snapshot stays accurate until the swap.
        let mut live = live_frames(&self.read_index(), &affected);

        for (id, replacement_id) in replacements {
            let Some(old) = self.read_index().segment(id).cloned() else {
                continue;
            };
            let frames = live.remove(&id).unwrap_or_default();
            let compaction = self.compact(&old, frames, cutoff, replacement_id)?;

            let mut index = self.write_index();
            for key in &compaction.removed {
                index.remove(key);
            }
            for (key, location) in compaction.relocated.iter() {
                index.relocate(key, location.clone());
            }
            index.remove_segment(id);
            if let Some(replacement) = compaction.replacement {
                index.add_segment(replacement);
            }
            old.retire();
            drop(index);

            stats.segments_rewritten += 1;
            stats.records_removed += compaction.removed.len();
            stats.records_retained += compaction.relocated.len();
        }

        let records = self.len();
        metrics::counter!(telemetry::RECORDS_SWEPT, stats.records_removed as u64);
        metrics::histogram!(telemetry::SWEEP_DURATION, started.elapsed().as_secs_f64());
        metrics::gauge!(telemetry::STORED_RECORDS, records as f64);
        info!(
            "Sweep at cutoff {}: removed {} records, kept {}, rewrote {} segments",
            cutoff, stats.records_removed, stats.records_retained, stats.segments_rewritten
        );
        Ok(stats)
    }

    /// Copy the frames of `old` that are still live and not expired into a
    /// fresh segment `id`. No copy is made when nothing survives.
    fn compact(&self, old: &Arc<Segment>, mut live: LiveFrames, cutoff: u64, id: u64) -> Result<Compaction, StoreError> {
        let data = fs::read(old.path())?;
        let mut removed = Vec::new();
        let mut survivors = Vec::new();

        for frame in FrameScanner::new(&data) {
            let ScannedFrame::Valid { offset, header, payload } = frame else {
                continue;
            };
            let Some((key, observed_at)) = live.remove(&offset) else {
                continue;
            };
            if observed_at < cutoff {
                removed.push(key);
            } else if codec::decode(payload).is_ok() {
                let start = offset as usize;
                let end = start + header.frame_len() as usize;
                survivors.push((key, &data[start..end]));
            } else {
                removed.push(key);
            }
        }

        // Entries whose frame can no longer be read must not pin the old segment.
        if !live.is_empty() {
            warn!(
                "Segment {}: {} indexed frames are unreadable and will be dropped",
                old.id(),
                live.len()
            );
            self.corrupted.fetch_add(live.len() as u64, std::sync::atomic::Ordering::Relaxed);
            metrics::counter!(telemetry::CORRUPT_FRAMES, live.len() as u64);
            removed.extend(live.into_values().map(|(key, _)| key));
        }

        if survivors.is_empty() {
            return Ok(Compaction {
                replacement: None,
                relocated: Vec::new(),
                removed,
            });
        }

        let replacement = Arc::new(Segment::new(&self.dir, id));
        let tmp_path = replacement.path().with_extension(&COMPACTION_SUFFIX[1..]);

        let mut relocated = Vec::with_capacity(survivors.len());
        {
            let mut out = BufWriter::new(File::create(&tmp_path)?);
            let mut offset = 0u64;
            for (key, frame) in survivors {
                out.write_all(frame)?;
                relocated.push((
                    key,
                    Location {
                        segment: replacement.clone(),
                        offset,
                        frame_len: frame.len() as u64,
                    },
                ));
                offset += frame.len() as u64;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, replacement.path())?;

        debug!(
            "Segment {} compacted into {}: {} kept, {} dropped",
            old.id(),
            id,
            relocated.len(),
            removed.len()
        );
        Ok(Compaction {
            replacement: Some(replacement),
            relocated,
            removed,
        })
    }
}

fn live_frames(index: &StoreIndex, segments: &BTreeSet<u64>) -> BTreeMap<u64, LiveFrames> {
    let mut out: BTreeMap<u64, LiveFrames> = BTreeMap::new();
    for ((observed_at, key), entry) in index.entries() {
        let id = entry.location.segment.id();
        if segments.contains(&id) {
            out.entry(id)
                .or_default()
                .insert(entry.location.offset, (*key, *observed_at));
        }
    }
    out
}
