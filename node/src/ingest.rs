// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Key batch ingestion.
//!
//! A published batch is checked (epoch order, completeness, signature),
//! expanded into identifiers off to the side, written to its batch file, and
//! only then merged into the pending set. A rejected or failed ingest leaves
//! no trace in memory.

use crate::telemetry;
use crate::watermarks::WatermarkBook;
use exposure_kernel::batch::{BatchVerifier, PublishedKeyBatch};
use exposure_kernel::config::DEFAULT_IDS_PER_KEY;
use exposure_kernel::staged::StagedIdentifiers;
use exposure_kernel::types::id::Epoch;
use exposure_persistence::batch_file;
use exposure_persistence::PersistenceError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Epoch {epoch} is stale (already at {latest})")]
    StaleEpoch { epoch: Epoch, latest: Epoch },
    #[error("Epoch {0} is already staged")]
    DuplicateEpoch(Epoch),
    #[error("Batch truncated: declared {declared} keys, received {received}")]
    Truncated { declared: u32, received: usize },
    #[error("Batch for epoch {0} carries no keys")]
    Empty(Epoch),
    #[error("Signature check failed for epoch {0}")]
    InvalidSignature(Epoch),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl IngestError {
    /// The batch was already handled; the caller can drop it silently.
    pub fn is_noop(&self) -> bool {
        matches!(self, IngestError::StaleEpoch { .. } | IngestError::DuplicateEpoch(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestConfig {
    pub ids_per_key: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ids_per_key: DEFAULT_IDS_PER_KEY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub epoch: Epoch,
    pub keys: usize,
    pub derived_ids: usize,
    /// Derived identifiers that were already staged, from this batch or an
    /// earlier pending one.
    pub duplicate_ids: usize,
}

/// Staged identifiers frozen for one matching pass.
#[derive(Clone, Debug)]
pub struct PendingSnapshot {
    pub staged: Arc<StagedIdentifiers>,
    pub epochs: Vec<Epoch>,
}

impl PendingSnapshot {
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }
}

#[derive(Default)]
struct Pending {
    by_epoch: BTreeMap<Epoch, StagedIdentifiers>,
    merged: Arc<StagedIdentifiers>,
}

impl Pending {
    fn rebuild(&mut self) {
        let mut merged = StagedIdentifiers::new();
        for staged in self.by_epoch.values() {
            merged.merge(staged.clone());
        }
        self.merged = Arc::new(merged);
    }
}

pub struct KeyBatchIngestor {
    batches_dir: PathBuf,
    config: IngestConfig,
    verifier: Arc<dyn BatchVerifier>,
    watermarks: Arc<WatermarkBook>,
    pending: RwLock<Pending>,
    ingest_lock: Mutex<()>,
}

impl KeyBatchIngestor {
    /// Reload every batch file newer than the completion watermark.
    /// Files that no longer verify are skipped.
    pub fn open(
        batches_dir: impl AsRef<Path>,
        watermarks: Arc<WatermarkBook>,
        config: IngestConfig,
        verifier: Arc<dyn BatchVerifier>,
    ) -> Result<Self, IngestError> {
        let batches_dir = batches_dir.as_ref().to_path_buf();
        let marks = watermarks.get();
        let mut pending = Pending::default();

        for (epoch, path) in batch_file::list_batches(&batches_dir)? {
            if marks.is_stale(epoch) {
                continue;
            }
            let batch = match batch_file::read_batch(&path) {
                Ok(b) => b,
                Err(e) => {
                    warn!("Skipping unreadable batch file {:?}: {}", path, e);
                    continue;
                }
            };
            if let Err(e) = validate(&batch, verifier.as_ref()) {
                warn!("Skipping batch file {:?}: {}", path, e);
                continue;
            }
            let (staged, _) = StagedIdentifiers::from_batch(&batch, config.ids_per_key);
            pending.by_epoch.insert(epoch, staged);
        }
        pending.rebuild();

        info!(
            "Key batch ingestor ready: {} pending epochs, {} staged identifiers, completed through {:?}",
            pending.by_epoch.len(),
            pending.merged.len(),
            marks.completed_through
        );

        Ok(Self {
            batches_dir,
            config,
            verifier,
            watermarks,
            pending: RwLock::new(pending),
            ingest_lock: Mutex::new(()),
        })
    }

    pub fn ingest(&self, batch: &PublishedKeyBatch) -> Result<IngestStats, IngestError> {
        let result = self.ingest_inner(batch);
        match &result {
            Ok(stats) => {
                metrics::counter!(telemetry::BATCHES_INGESTED, 1);
                info!(
                    "Staged epoch {}: {} keys, {} identifiers ({} already staged)",
                    stats.epoch, stats.keys, stats.derived_ids, stats.duplicate_ids
                );
            }
            Err(e) if e.is_noop() => debug!("Ignoring batch: {}", e),
            Err(e) => {
                metrics::counter!(telemetry::BATCHES_REJECTED, 1);
                warn!("Rejected batch for epoch {}: {}", batch.epoch, e);
            }
        }
        result
    }

    fn ingest_inner(&self, batch: &PublishedKeyBatch) -> Result<IngestStats, IngestError> {
        let _serial = self.ingest_lock.lock().unwrap_or_else(|e| e.into_inner());

        self.check_epoch(batch.epoch)?;
        validate(batch, self.verifier.as_ref())?;

        let (staged, own) = StagedIdentifiers::from_batch(batch, self.config.ids_per_key);
        batch_file::write_batch(&self.batches_dir, batch)?;

        let mut pending = self.write_pending();
        let across = Arc::make_mut(&mut pending.merged).merge(staged.clone());
        pending.by_epoch.insert(batch.epoch, staged);

        Ok(IngestStats {
            epoch: batch.epoch,
            keys: batch.keys.len(),
            derived_ids: own.inserted + own.duplicates,
            duplicate_ids: own.duplicates + across.duplicates,
        })
    }

    fn check_epoch(&self, epoch: Epoch) -> Result<(), IngestError> {
        if let Some(done) = self.watermarks.get().completed_through {
            if epoch <= done {
                return Err(IngestError::StaleEpoch { epoch, latest: done });
            }
        }
        let pending = self.read_pending();
        if pending.by_epoch.contains_key(&epoch) {
            return Err(IngestError::DuplicateEpoch(epoch));
        }
        if let Some((&latest, _)) = pending.by_epoch.last_key_value() {
            if epoch < latest {
                return Err(IngestError::StaleEpoch { epoch, latest });
            }
        }
        Ok(())
    }

    /// Freeze the current pending set for a matching pass.
    pub fn snapshot(&self) -> PendingSnapshot {
        let pending = self.read_pending();
        PendingSnapshot {
            staged: pending.merged.clone(),
            epochs: pending.by_epoch.keys().copied().collect(),
        }
    }

    /// Mark the epochs of a finished pass as matched: advance the completion
    /// watermark and release their identifiers. Batches staged while the pass
    /// ran stay pending.
    pub fn complete(&self, epochs: &[Epoch], matched_at: u64) -> Result<(), IngestError> {
        let Some(&highest) = epochs.iter().max() else {
            return Ok(());
        };
        let _serial = self.ingest_lock.lock().unwrap_or_else(|e| e.into_inner());

        self.watermarks.update(|m| {
            m.completed_through = Some(m.completed_through.map_or(highest, |done| done.max(highest)));
            m.last_match_at = matched_at;
        })?;

        let mut pending = self.write_pending();
        for epoch in epochs {
            pending.by_epoch.remove(epoch);
        }
        pending.rebuild();
        debug!(
            "Completed through epoch {}; {} epochs still pending",
            highest,
            pending.by_epoch.len()
        );
        Ok(())
    }

    pub fn pending_epochs(&self) -> Vec<Epoch> {
        self.read_pending().by_epoch.keys().copied().collect()
    }

    pub fn staged_len(&self) -> usize {
        self.read_pending().merged.len()
    }

    pub fn completed_through(&self) -> Option<Epoch> {
        self.watermarks.get().completed_through
    }

    fn read_pending(&self) -> RwLockReadGuard<'_, Pending> {
        self.pending.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_pending(&self) -> RwLockWriteGuard<'_, Pending> {
        self.pending.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn validate(batch: &PublishedKeyBatch, verifier: &dyn BatchVerifier) -> Result<(), IngestError> {
    if batch.keys.is_empty() {
        return Err(IngestError::Empty(batch.epoch));
    }
    if !batch.is_complete() {
        return Err(IngestError::Truncated {
            declared: batch.declared_key_count,
            received: batch.keys.len(),
        });
    }
    if !verifier.verify(&batch.signing_bytes(), &batch.signature) {
        return Err(IngestError::InvalidSignature(batch.epoch));
    }
    Ok(())
}
