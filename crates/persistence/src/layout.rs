//! Data directory layout.
//!
//! ```text
//! <root>/segments/seg-00000001.log
//! <root>/batches/epoch-00000000000000000007.batch
//! <root>/watermarks.bin
//! <root>/exposures.json
//! ```

use exposure_kernel::types::id::Epoch;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.root.join("segments")
    }

    pub fn batches_dir(&self) -> PathBuf {
        self.root.join("batches")
    }

    pub fn watermarks_path(&self) -> PathBuf {
        self.root.join("watermarks.bin")
    }

    pub fn exposures_path(&self) -> PathBuf {
        self.root.join("exposures.json")
    }
}

pub fn segment_file_name(id: u64) -> String {
    format!("seg-{:08}.log", id)
}

pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("seg-")?.strip_suffix(".log")?.parse().ok()
}

pub fn batch_file_name(epoch: Epoch) -> String {
    format!("epoch-{:020}.batch", epoch.0)
}

pub fn parse_batch_file_name(name: &str) -> Option<Epoch> {
    name.strip_prefix("epoch-")?
        .strip_suffix(".batch")?
        .parse()
        .ok()
        .map(Epoch)
}
