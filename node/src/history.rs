// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use exposure_kernel::aggregate::{merge_into, ExposureSummary};
use exposure_kernel::types::id::Epoch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

const HISTORY_VERSION: u32 = 1;

/// Exposure summaries accumulated over completed matching passes.
///
/// `through_epoch` is the highest epoch folded in. It is written before the
/// completion watermark, so after a crash between the two writes the engine
/// can tell the watermark is behind and repair it instead of matching the
/// same epochs twice.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureHistory {
    pub version: u32,
    pub through_epoch: Option<Epoch>,
    pub days: BTreeMap<u64, ExposureSummary>,
}

impl ExposureHistory {
    pub fn new() -> Self {
        Self {
            version: HISTORY_VERSION,
            ..Default::default()
        }
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = fs::read(path)?;
        let history: Self = serde_json::from_slice(&bytes)?;
        if history.version != HISTORY_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported exposure history version {}", history.version),
            ));
        }
        Ok(history)
    }

    /// Atomic replace: tmp file, fsync, rename.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serde_json::to_vec_pretty(self)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)
    }

    pub fn fold(&mut self, pass: &[ExposureSummary], through: Epoch) {
        merge_into(&mut self.days, pass);
        self.through_epoch = Some(self.through_epoch.map_or(through, |e| e.max(through)));
    }

    pub fn summaries(&self) -> Vec<ExposureSummary> {
        self.days.values().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn day(bucket: u64, count: u32, rssi: i16) -> ExposureSummary {
        ExposureSummary {
            day_bucket: bucket,
            total_duration_estimate: count as u64 * 300,
            max_signal_strength: rssi,
            match_count: count,
        }
    }

    #[test]
    fn test_fold_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exposures.json");
        assert_eq!(ExposureHistory::load(&path).unwrap(), ExposureHistory::new());

        let mut history = ExposureHistory::new();
        history.fold(&[day(10, 2, -70)], Epoch(3));
        history.fold(&[day(10, 1, -55), day(11, 1, -80)], Epoch(4));
        history.save(&path).unwrap();

        let back = ExposureHistory::load(&path).unwrap();
        assert_eq!(back.through_epoch, Some(Epoch(4)));
        assert_eq!(back.summaries(), vec![day(10, 3, -55), day(11, 1, -80)]);
    }
}
