// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Local event store.
//!
//! Contact events are appended to segment files as checksummed frames and
//! indexed in memory by `(observed_at, DedupKey)`. The index is rebuilt from
//! the segments on open.
//!
//! Appends are serialized by the writer lock and published to the index only
//! after the frame is on disk. Queries snapshot their locations under the index
//! read lock and do the file I/O afterwards, so readers never wait on a writer's
//! fsync and never observe a half-written frame.

mod index;
mod segment;
mod stream;
mod sweep;

pub use stream::RecordStream;
pub use sweep::SweepStats;

use crate::config::DEFAULT_SEGMENT_MAX_BYTES;
use crate::telemetry;
use exposure_kernel::codec;
use exposure_kernel::config::MAX_LOCATION_HINT_LEN;
use exposure_kernel::record::EventRecord;
use exposure_kernel::types::TimeRange;
use exposure_persistence::layout::parse_segment_file_name;
use exposure_persistence::PersistenceError;
use index::{IndexEntry, Location, StoreIndex};
use segment::{scan_segment, ActiveSegment, Segment};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Scan cancelled")]
    Cancelled,
}

/// Reject a record [`Store::append`] would refuse, without touching the store.
pub fn check_record(record: &EventRecord) -> Result<(), StoreError> {
    match &record.location_hint {
        Some(hint) if hint.len() > MAX_LOCATION_HINT_LEN => Err(StoreError::InvalidRecord(format!(
            "location hint is {} bytes, limit is {}",
            hint.len(),
            MAX_LOCATION_HINT_LEN
        ))),
        _ => Ok(()),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Size after which the active segment is sealed and a new one started.
    pub segment_max_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            segment_max_bytes: DEFAULT_SEGMENT_MAX_BYTES,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendOutcome {
    Stored,
    /// A record with the same identity is already stored; nothing was written.
    Duplicate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub records: usize,
    pub segments: usize,
    pub corrupted_frames: u64,
    pub active_segment_bytes: u64,
}

struct Writer {
    active: ActiveSegment,
    next_seq: u64,
}

pub struct EventStore {
    dir: PathBuf,
    config: StoreConfig,
    writer: Mutex<Writer>,
    index: RwLock<StoreIndex>,
    sweep_lock: Mutex<()>,
    next_segment_id: AtomicU64,
    corrupted: Arc<AtomicU64>,
}

impl EventStore {
    /// Open (or create) the store in `dir`, rebuilding the index from the
    /// segment files found there.
    pub fn open(dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = parse_segment_file_name(name) {
                ids.push(id);
            } else if name.ends_with(sweep::COMPACTION_SUFFIX) {
                // Interrupted sweep; the original segment is still in place.
                warn!("Removing unfinished compaction output {:?}", entry.path());
                fs::remove_file(entry.path())?;
            }
        }
        ids.sort_unstable();

        let mut index = StoreIndex::default();
        let mut corrupted = 0u64;
        let mut duplicates = 0u64;
        let mut max_seq = 0u64;
        let mut newest: Option<(Arc<Segment>, u64)> = None;

        for (pos, id) in ids.iter().enumerate() {
            let segment = Arc::new(Segment::new(&dir, *id));
            let scan = scan_segment(&segment)?;
            corrupted += scan.corrupt;

            for frame in scan.frames {
                max_seq = max_seq.max(frame.seq);
                let key = frame.record.dedup_key();
                let entry = IndexEntry {
                    ephemeral_id: frame.record.ephemeral_id,
                    location: Location {
                        segment: segment.clone(),
                        offset: frame.offset,
                        frame_len: frame.frame_len,
                    },
                };
                if !index.insert(key, frame.record.observed_at, entry) {
                    duplicates += 1;
                }
            }

            let is_newest = pos + 1 == ids.len();
            if let Some(torn) = scan.torn_tail {
                if is_newest {
                    warn!("Segment {} has a torn tail of {} bytes; truncating", id, torn);
                } else {
                    warn!("Sealed segment {} ends with {} unreadable bytes", id, torn);
                    corrupted += 1;
                }
            }
            if is_newest {
                newest = Some((segment.clone(), scan.valid_len));
            }
            index.add_segment(segment);
        }

        let mut next_segment_id = ids.last().map_or(1, |id| id + 1);
        let active = match newest {
            Some((segment, valid_len)) if valid_len < config.segment_max_bytes => ActiveSegment::reopen(segment, valid_len)?,
            Some((segment, valid_len)) => {
                // Full: only cut a torn tail, then start a fresh segment.
                drop(ActiveSegment::reopen(segment, valid_len)?);
                let active = ActiveSegment::create(&dir, next_segment_id)?;
                next_segment_id += 1;
                active
            }
            None => {
                let active = ActiveSegment::create(&dir, next_segment_id)?;
                next_segment_id += 1;
                active
            }
        };
        index.add_segment(active.segment().clone());

        if corrupted > 0 {
            metrics::counter!(telemetry::CORRUPT_FRAMES, corrupted);
        }
        metrics::gauge!(telemetry::STORED_RECORDS, index.len() as f64);
        info!(
            "Event store opened at {:?}: {} records in {} segments ({} corrupt frames skipped, {} duplicate copies ignored)",
            dir,
            index.len(),
            index.segment_count(),
            corrupted,
            duplicates
        );

        Ok(Self {
            dir,
            config,
            writer: Mutex::new(Writer {
                active,
                next_seq: max_seq + 1,
            }),
            index: RwLock::new(index),
            sweep_lock: Mutex::new(()),
            next_segment_id: AtomicU64::new(next_segment_id),
            corrupted: Arc::new(AtomicU64::new(corrupted)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Durably append `record` unless an equal record is already stored.
    pub fn append(&self, record: &EventRecord) -> Result<AppendOutcome, StoreError> {
        check_record(record)?;

        let key = record.dedup_key();
        let payload = codec::encode(record).map_err(|e| StoreError::InvalidRecord(e.to_string()))?;

        let mut writer = self.lock_writer();
        // Keys only enter the index under the writer lock, so this check
        // cannot race another append.
        if self.read_index().contains(&key) {
            metrics::counter!(telemetry::RECORDS_DEDUPLICATED, 1);
            return Ok(AppendOutcome::Duplicate);
        }

        if !writer.active.is_empty() && writer.active.len() + payload.len() as u64 > self.config.segment_max_bytes {
            self.rotate(&mut writer)?;
        }

        let seq = writer.next_seq;
        let (offset, frame_len) = writer.active.append(seq, &payload)?;
        writer.next_seq += 1;

        let entry = IndexEntry {
            ephemeral_id: record.ephemeral_id,
            location: Location {
                segment: writer.active.segment().clone(),
                offset,
                frame_len,
            },
        };
        let records = {
            let mut index = self.write_index();
            index.insert(key, record.observed_at, entry);
            index.len()
        };
        drop(writer);

        metrics::counter!(telemetry::RECORDS_APPENDED, 1);
        metrics::gauge!(telemetry::STORED_RECORDS, records as f64);
        Ok(AppendOutcome::Stored)
    }

    /// Records observed in `range`, ascending by `observed_at`, optionally
    /// restricted to identifiers starting with `id_prefix`.
    pub fn query(&self, range: TimeRange, id_prefix: Option<&[u8]>) -> RecordStream {
        RecordStream::new(self.locate(range, id_prefix), self.corrupted.clone(), None)
    }

    /// Like [`EventStore::query`], stopping with `StoreError::Cancelled` once
    /// `cancel` fires.
    pub fn query_cancellable(&self, range: TimeRange, id_prefix: Option<&[u8]>, cancel: CancellationToken) -> RecordStream {
        RecordStream::new(self.locate(range, id_prefix), self.corrupted.clone(), Some(cancel))
    }

    fn locate(&self, range: TimeRange, id_prefix: Option<&[u8]>) -> Vec<Location> {
        let index = self.read_index();
        let locations: Vec<Location> = index
            .range(range)
            .filter(|(_, entry)| id_prefix.map_or(true, |p| entry.ephemeral_id.starts_with(p)))
            .map(|(_, entry)| entry.location.clone())
            .collect();
        debug!(
            "Query [{}, {}) prefix={:?}: {} candidates",
            range.start,
            range.end,
            id_prefix.map(hex::encode),
            locations.len()
        );
        locations
    }

    pub fn len(&self) -> usize {
        self.read_index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_index().is_empty()
    }

    /// Corrupt frames skipped since open, by recovery and by scans.
    pub fn corrupted_count(&self) -> u64 {
        self.corrupted.load(Ordering::Relaxed)
    }

    pub fn segment_count(&self) -> usize {
        self.read_index().segment_count()
    }

    pub fn stats(&self) -> StoreStats {
        let active_segment_bytes = self.lock_writer().active.len();
        let index = self.read_index();
        StoreStats {
            records: index.len(),
            segments: index.segment_count(),
            corrupted_frames: self.corrupted_count(),
            active_segment_bytes,
        }
    }

    /// Seal the active segment and start a new one. Caller holds the writer.
    /// An active segment that never received a frame is dropped instead of
    /// sealed.
    fn rotate(&self, writer: &mut Writer) -> Result<(), StoreError> {
        let id = self.allocate_segment_id();
        let active = ActiveSegment::create(&self.dir, id)?;
        {
            let mut index = self.write_index();
            if writer.active.is_empty() {
                let old = writer.active.segment();
                index.remove_segment(old.id());
                old.retire();
            }
            index.add_segment(active.segment().clone());
        }
        debug!(
            "Sealed segment {} at {} bytes; now writing segment {}",
            writer.active.segment().id(),
            writer.active.len(),
            id
        );
        writer.active = active;
        Ok(())
    }

    fn allocate_segment_id(&self) -> u64 {
        self.next_segment_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock_writer(&self) -> MutexGuard<'_, Writer> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_index(&self) -> RwLockReadGuard<'_, StoreIndex> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, StoreIndex> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exposure_kernel::types::id::EphemeralId;
    use tempfile::tempdir;

    fn rec(b: u8, t: u64, rssi: i16) -> EventRecord {
        EventRecord::new(EphemeralId([b; 16]), rssi, t, None)
    }

    #[test]
    fn test_append_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path(), StoreConfig::default()).unwrap();

        assert_eq!(store.append(&rec(1, 100, -60)).unwrap(), AppendOutcome::Stored);
        assert_eq!(store.append(&rec(1, 100, -60)).unwrap(), AppendOutcome::Duplicate);
        // Signal strength is not part of a record's identity.
        assert_eq!(store.append(&rec(1, 100, -75)).unwrap(), AppendOutcome::Duplicate);
        assert_eq!(store.len(), 1);

        let stored: Vec<_> = store.query(TimeRange::all(), None).map(|r| r.unwrap()).collect();
        assert_eq!(stored[0].signal_strength, -60);
    }

    #[test]
    fn test_location_hint_cap() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path(), StoreConfig::default()).unwrap();
        let mut record = rec(1, 100, -60);
        record.location_hint = Some(vec![b'x'; MAX_LOCATION_HINT_LEN + 1]);
        assert!(matches!(check_record(&record), Err(StoreError::InvalidRecord(_))));
        assert!(matches!(store.append(&record), Err(StoreError::InvalidRecord(_))));
        assert!(store.is_empty());
        record.location_hint = Some(vec![b'x'; MAX_LOCATION_HINT_LEN]);
        assert!(check_record(&record).is_ok());
        assert_eq!(store.append(&record).unwrap(), AppendOutcome::Stored);
    }

    #[test]
    fn test_query_window_order_and_prefix() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path(), StoreConfig::default()).unwrap();
        for (b, t) in [(3u8, 300u64), (1, 100), (2, 200), (4, 50), (5, 400)] {
            store.append(&rec(b, t, -50)).unwrap();
        }

        let times: Vec<u64> = store
            .query(TimeRange::new(100, 400).unwrap(), None)
            .map(|r| r.unwrap().observed_at)
            .collect();
        assert_eq!(times, vec![100, 200, 300]);

        let filtered: Vec<_> = store
            .query(TimeRange::all(), Some(&[2u8, 2][..]))
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(filtered, vec![rec(2, 200, -50)]);
    }

    #[test]
    fn test_cancelled_query_reports_once() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path(), StoreConfig::default()).unwrap();
        for t in 0..10 {
            store.append(&rec(1, t, -50)).unwrap();
        }
        let cancel = CancellationToken::new();
        let mut stream = store.query_cancellable(TimeRange::all(), None, cancel.clone());
        assert!(stream.next().unwrap().is_ok());
        cancel.cancel();
        assert!(matches!(stream.next(), Some(Err(StoreError::Cancelled))));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_rotation_by_size() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path(), StoreConfig { segment_max_bytes: 128 }).unwrap();
        for t in 0..10 {
            store.append(&rec(t as u8, t, -50)).unwrap();
        }
        assert!(store.segment_count() > 1);
        assert_eq!(store.query(TimeRange::all(), None).count(), 10);
    }
}
