// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::index::Location;
use super::StoreError;
use crate::telemetry;
use exposure_kernel::codec;
use exposure_kernel::record::EventRecord;
use exposure_persistence::frame::read_frame_at;
use exposure_persistence::PersistenceError;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::fs::File;
use std::io::{self, BufReader};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::vec;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Lazily reads the records a query selected.
///
/// The set of locations is fixed when the query is made. Each location holds
/// its segment alive, so a sweep that replaces a segment mid-scan does not
/// pull the file out from under the stream. Frames that fail verification are
/// skipped and counted.
pub struct RecordStream {
    pending: vec::IntoIter<Location>,
    readers: FxHashMap<u64, BufReader<File>>,
    corrupted: Arc<AtomicU64>,
    cancel: Option<CancellationToken>,
    finished: bool,
}

impl RecordStream {
    pub(crate) fn new(locations: Vec<Location>, corrupted: Arc<AtomicU64>, cancel: Option<CancellationToken>) -> Self {
        Self {
            pending: locations.into_iter(),
            readers: FxHashMap::default(),
            corrupted,
            cancel,
            finished: false,
        }
    }

    fn read(&mut self, location: &Location) -> Result<Option<EventRecord>, StoreError> {
        let segment_id = location.segment.id();
        let reader = match self.readers.entry(segment_id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(BufReader::new(File::open(location.segment.path())?)),
        };

        match read_frame_at(reader, location.offset, location.frame_len) {
            Ok((_, payload)) => match codec::decode(&payload) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    self.note_corrupt(location, &e.to_string());
                    Ok(None)
                }
            },
            Err(PersistenceError::IoError(e)) if e.kind() != io::ErrorKind::UnexpectedEof => Err(e.into()),
            Err(e) => {
                self.note_corrupt(location, &e.to_string());
                Ok(None)
            }
        }
    }

    fn note_corrupt(&self, location: &Location, reason: &str) {
        warn!(
            "Skipping corrupt frame in segment {} at {}: {}",
            location.segment.id(),
            location.offset,
            reason
        );
        self.corrupted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CORRUPT_FRAMES, 1);
    }
}

impl Iterator for RecordStream {
    type Item = Result<EventRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                self.finished = true;
                return Some(Err(StoreError::Cancelled));
            }
            let location = self.pending.next()?;
            match self.read(&location) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.pending.len() + 1))
    }
}
