// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Engine: the store, the ingestor and the exposure history behind one handle.
//!
//! Every method takes `&self`. The store and the ingestor synchronize
//! internally, so appends, batch ingestion, sweeps and a matching pass can all
//! run at once from different tasks.

use crate::config::NodeConfig;
use crate::errors::EngineError;
use crate::history::ExposureHistory;
use crate::ingest::{IngestConfig, IngestStats, KeyBatchIngestor};
use crate::matching::match_window;
use crate::store::{AppendOutcome, EventStore, StoreConfig, StoreError, StoreStats, SweepStats};
use crate::telemetry;
use crate::watermarks::WatermarkBook;
use exposure_kernel::aggregate::{aggregate, AggregationConfig, ExposureSummary};
use exposure_kernel::batch::{BatchVerifier, KeyedBlake3Verifier, PublishedKeyBatch};
use exposure_kernel::record::EventRecord;
use exposure_kernel::types::id::Epoch;
use exposure_kernel::types::TimeRange;
use exposure_persistence::layout::DataLayout;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one matching pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MatchingReport {
    pub range: TimeRange,
    /// Epochs whose identifiers took part; empty if nothing was pending.
    pub epochs: Vec<Epoch>,
    pub scanned: u64,
    pub matched: u64,
    /// Summaries of this pass alone, already folded into the history.
    pub summaries: Vec<ExposureSummary>,
}

#[derive(Clone, Debug, Serialize)]
pub struct EngineStatus {
    pub store: StoreStats,
    pub pending_epochs: Vec<Epoch>,
    pub staged_identifiers: usize,
    pub completed_through: Option<Epoch>,
    pub retention_cutoff: u64,
    pub last_sweep_at: u64,
    pub last_match_at: u64,
}

pub struct Engine {
    store: EventStore,
    ingestor: KeyBatchIngestor,
    watermarks: Arc<WatermarkBook>,
    history: Mutex<ExposureHistory>,
    history_path: PathBuf,
    pass_lock: Mutex<()>,
    aggregation: AggregationConfig,
    retention: Duration,
}

impl Engine {
    /// Open with the shared-secret verifier configured in `config`.
    pub fn open(config: &NodeConfig) -> Result<Self, EngineError> {
        let verifier = Arc::new(KeyedBlake3Verifier::from_secret(&config.verifier_secret));
        Self::open_with_verifier(config, verifier)
    }

    pub fn open_with_verifier(config: &NodeConfig, verifier: Arc<dyn BatchVerifier>) -> Result<Self, EngineError> {
        let layout = DataLayout::new(&config.data_dir);
        fs::create_dir_all(layout.root())?;

        let watermarks = Arc::new(WatermarkBook::load(layout.watermarks_path())?);
        let history_path = layout.exposures_path();
        let history = ExposureHistory::load(&history_path)?;

        // The history is written before the watermark. If only the first
        // write made it, those epochs are already counted.
        if let Some(through) = history.through_epoch {
            if !watermarks.get().is_stale(through) {
                warn!("Completion watermark lags the exposure history; advancing it to epoch {}", through);
                watermarks.update(|m| m.completed_through = Some(through))?;
            }
        }

        let store = EventStore::open(
            layout.segments_dir(),
            StoreConfig {
                segment_max_bytes: config.segment_max_bytes,
            },
        )?;
        let ingestor = KeyBatchIngestor::open(
            layout.batches_dir(),
            watermarks.clone(),
            IngestConfig {
                ids_per_key: config.ids_per_key,
            },
            verifier,
        )?;

        info!("Engine opened at {:?}", layout.root());
        Ok(Self {
            store,
            ingestor,
            watermarks,
            history: Mutex::new(history),
            history_path,
            pass_lock: Mutex::new(()),
            aggregation: AggregationConfig {
                scan_interval_secs: config.scan_interval_secs,
            },
            retention: Duration::from_secs(config.retention_secs),
        })
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn ingestor(&self) -> &KeyBatchIngestor {
        &self.ingestor
    }

    pub fn record_contact(&self, record: &EventRecord) -> Result<AppendOutcome, EngineError> {
        Ok(self.store.append(record)?)
    }

    pub fn ingest_batch(&self, batch: &PublishedKeyBatch) -> Result<IngestStats, EngineError> {
        Ok(self.ingestor.ingest(batch)?)
    }

    /// Match every pending epoch against the records observed in `range`.
    ///
    /// A completed pass folds its summaries into the history and marks its
    /// epochs done. A cancelled or failed pass changes nothing, so the same
    /// epochs are matched again next time.
    pub fn run_matching_pass(&self, range: TimeRange, cancel: &CancellationToken) -> Result<MatchingReport, EngineError> {
        let _pass = self.pass_lock.lock().unwrap_or_else(|e| e.into_inner());
        let started = Instant::now();

        let pending = self.ingestor.snapshot();
        let Some(&through) = pending.epochs.last() else {
            debug!("Matching pass skipped: no pending epochs");
            return Ok(MatchingReport {
                range,
                epochs: Vec::new(),
                scanned: 0,
                matched: 0,
                summaries: Vec::new(),
            });
        };

        let mut matcher = match_window(&self.store, &pending, range, cancel.clone());
        let mut matches = Vec::new();
        for item in matcher.by_ref() {
            match item {
                Ok(m) => matches.push(m),
                Err(StoreError::Cancelled) => {
                    info!("Matching pass over epochs {:?} cancelled", pending.epochs);
                    return Err(EngineError::Cancelled);
                }
                Err(e) => return Err(e.into()),
            }
        }
        let scanned = matcher.scanned();
        let matched = matcher.matched();

        let summaries = aggregate(matches, &self.aggregation);

        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            let mut next = history.clone();
            next.fold(&summaries, through);
            next.save(&self.history_path)?;
            *history = next;
        }
        self.ingestor.complete(&pending.epochs, unix_now())?;

        metrics::counter!(telemetry::MATCHES, matched);
        metrics::histogram!(telemetry::MATCH_PASS_DURATION, started.elapsed().as_secs_f64());
        info!(
            "Matching pass through epoch {}: scanned {} records, {} matches, {} days affected",
            through,
            scanned,
            matched,
            summaries.len()
        );

        Ok(MatchingReport {
            range,
            epochs: pending.epochs,
            scanned,
            matched,
            summaries,
        })
    }

    /// Retention sweep relative to the wall clock.
    pub fn sweep(&self) -> Result<SweepStats, EngineError> {
        self.sweep_at(unix_now())
    }

    pub fn sweep_at(&self, now: u64) -> Result<SweepStats, EngineError> {
        let stats = self.store.sweep_expired_at(now, self.retention)?;
        self.watermarks.update(|m| {
            m.retention_cutoff = m.retention_cutoff.max(stats.cutoff);
            m.last_sweep_at = now;
        })?;
        Ok(stats)
    }

    /// Per-day exposure history, ascending by day.
    pub fn exposure_summaries(&self) -> Vec<ExposureSummary> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).summaries()
    }

    pub fn status(&self) -> EngineStatus {
        let marks = self.watermarks.get();
        EngineStatus {
            store: self.store.stats(),
            pending_epochs: self.ingestor.pending_epochs(),
            staged_identifiers: self.ingestor.staged_len(),
            completed_through: marks.completed_through,
            retention_cutoff: marks.retention_cutoff,
            last_sweep_at: marks.last_sweep_at,
            last_match_at: marks.last_match_at,
        }
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use exposure_kernel::batch::derive_ephemeral_id;
    use exposure_kernel::types::id::{DiagnosisKey, EphemeralId};
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> NodeConfig {
        NodeConfig {
            data_dir: dir.to_path_buf(),
            ids_per_key: 6,
            verifier_secret: "engine-tests".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_pass_marks_epochs_done_and_keeps_history() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let signer = KeyedBlake3Verifier::from_secret(&cfg.verifier_secret);
        let key = DiagnosisKey([3; 16]);

        {
            let engine = Engine::open(&cfg).unwrap();
            engine
                .record_contact(&EventRecord::new(derive_ephemeral_id(&key, Epoch(2), 1), -66, 90_000, None))
                .unwrap();
            engine
                .record_contact(&EventRecord::new(EphemeralId([8; 16]), -40, 90_100, None))
                .unwrap();
            engine.ingest_batch(&PublishedKeyBatch::signed(Epoch(2), vec![key], &signer)).unwrap();

            let report = engine.run_matching_pass(TimeRange::all(), &CancellationToken::new()).unwrap();
            assert_eq!(report.epochs, vec![Epoch(2)]);
            assert_eq!(report.scanned, 2);
            assert_eq!(report.matched, 1);

            // Nothing pending: a second pass is a no-op.
            let again = engine.run_matching_pass(TimeRange::all(), &CancellationToken::new()).unwrap();
            assert!(again.epochs.is_empty());
        }

        let engine = Engine::open(&cfg).unwrap();
        let summaries = engine.exposure_summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].day_bucket, 1);
        assert_eq!(summaries[0].max_signal_strength, -66);
        assert_eq!(engine.status().completed_through, Some(Epoch(2)));
    }

    #[test]
    fn test_cancelled_pass_changes_nothing() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let signer = KeyedBlake3Verifier::from_secret(&cfg.verifier_secret);
        let engine = Engine::open(&cfg).unwrap();
        engine
            .record_contact(&EventRecord::new(EphemeralId([1; 16]), -50, 10, None))
            .unwrap();
        engine
            .ingest_batch(&PublishedKeyBatch::signed(Epoch(1), vec![DiagnosisKey([1; 16])], &signer))
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            engine.run_matching_pass(TimeRange::all(), &cancel),
            Err(EngineError::Cancelled)
        ));
        let status = engine.status();
        assert_eq!(status.completed_through, None);
        assert_eq!(status.pending_epochs, vec![Epoch(1)]);
        assert!(engine.exposure_summaries().is_empty());
    }

    #[test]
    fn test_watermark_repaired_from_history() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let layout = DataLayout::new(dir.path());

        let mut history = ExposureHistory::new();
        history.fold(&[], Epoch(7));
        history.save(&layout.exposures_path()).unwrap();

        let engine = Engine::open(&cfg).unwrap();
        assert_eq!(engine.status().completed_through, Some(Epoch(7)));
    }

    #[test]
    fn test_sweep_records_retention_watermark() {
        let dir = tempdir().unwrap();
        let cfg = NodeConfig {
            retention_secs: 100,
            ..config(dir.path())
        };
        let engine = Engine::open(&cfg).unwrap();
        engine
            .record_contact(&EventRecord::new(EphemeralId([1; 16]), -50, 10, None))
            .unwrap();
        engine
            .record_contact(&EventRecord::new(EphemeralId([2; 16]), -50, 950, None))
            .unwrap();

        let stats = engine.sweep_at(1_000).unwrap();
        assert_eq!(stats.records_removed, 1);
        let status = engine.status();
        assert_eq!(status.retention_cutoff, 900);
        assert_eq!(status.last_sweep_at, 1_000);
        assert_eq!(status.store.records, 1);
    }
}
