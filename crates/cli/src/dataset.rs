//! Read-only view of a node's data directory.
//!
//! Nothing here writes. Torn tails and corrupt frames are reported, not
//! repaired; the node does that itself on its next open.

use anyhow::Context;
use exposure_kernel::aggregate::ExposureSummary;
use exposure_kernel::codec;
use exposure_kernel::record::EventRecord;
use exposure_kernel::types::id::{DedupKey, Epoch};
use exposure_persistence::frame::{FrameScanner, ScannedFrame};
use exposure_persistence::layout::{parse_segment_file_name, DataLayout};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// One record together with where it was found.
#[derive(Debug, Clone)]
pub struct LocatedRecord {
    pub segment: u64,
    pub offset: u64,
    pub record: EventRecord,
}

#[derive(Debug, Default)]
pub struct SegmentReport {
    pub id: u64,
    pub path: PathBuf,
    pub bytes: u64,
    pub records: Vec<LocatedRecord>,
    /// Frames whose checksum or header failed.
    pub corrupt_frames: u64,
    /// Frames that verified but did not decode as a record.
    pub undecodable: u64,
    /// Length of damaged bytes running to end of file.
    pub torn_tail: Option<u64>,
}

impl SegmentReport {
    pub fn is_clean(&self) -> bool {
        self.corrupt_frames == 0 && self.undecodable == 0 && self.torn_tail.is_none()
    }
}

/// Segment files under `layout`, ascending by id.
pub fn list_segments(layout: &DataLayout) -> anyhow::Result<Vec<(u64, PathBuf)>> {
    let dir = layout.segments_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("listing {}", dir.display()))? {
        let entry = entry?;
        if let Some(id) = entry.file_name().to_str().and_then(parse_segment_file_name) {
            out.push((id, entry.path()));
        }
    }
    out.sort_by_key(|(id, _)| *id);
    Ok(out)
}

pub fn scan_segment(id: u64, path: &Path) -> anyhow::Result<SegmentReport> {
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut report = SegmentReport {
        id,
        path: path.to_path_buf(),
        bytes: data.len() as u64,
        ..Default::default()
    };

    for frame in FrameScanner::new(&data) {
        match frame {
            ScannedFrame::Valid { offset, payload, .. } => match codec::decode(payload) {
                Ok(record) => report.records.push(LocatedRecord {
                    segment: id,
                    offset,
                    record,
                }),
                Err(_) => report.undecodable += 1,
            },
            ScannedFrame::Corrupt { .. } => report.corrupt_frames += 1,
            ScannedFrame::TornTail { len, .. } => report.torn_tail = Some(len),
        }
    }
    Ok(report)
}

pub fn scan_all(layout: &DataLayout) -> anyhow::Result<Vec<SegmentReport>> {
    list_segments(layout)?
        .iter()
        .map(|(id, path)| scan_segment(*id, path))
        .collect()
}

/// Every readable record, first copy wins, ordered by observation time.
///
/// A crash during compaction can leave the same record in two segments;
/// the node collapses those on open and so does this.
pub fn distinct_records(reports: &[SegmentReport]) -> Vec<LocatedRecord> {
    let mut seen: HashSet<DedupKey> = HashSet::new();
    let mut out: Vec<LocatedRecord> = reports
        .iter()
        .flat_map(|r| r.records.iter())
        .filter(|r| seen.insert(r.record.dedup_key()))
        .cloned()
        .collect();
    out.sort_by_key(|r| (r.record.observed_at, r.segment, r.offset));
    out
}

/// The node's accumulated exposure history file.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryFile {
    pub version: u32,
    pub through_epoch: Option<Epoch>,
    #[serde(default)]
    pub days: BTreeMap<u64, ExposureSummary>,
}

/// `Ok(None)` when the node has never completed a pass.
pub fn read_history(layout: &DataLayout) -> anyhow::Result<Option<HistoryFile>> {
    let path = layout.exposures_path();
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let history = serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(history))
}
