// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use exposure_persistence::watermark::{self, Watermarks};
use exposure_persistence::PersistenceError;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The watermark file plus its in-memory copy.
///
/// Ingestion, matching and the retention sweep all move different fields;
/// updates go through one lock so none of them overwrites another's progress.
#[derive(Debug)]
pub struct WatermarkBook {
    path: PathBuf,
    marks: Mutex<Watermarks>,
}

impl WatermarkBook {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let marks = watermark::read_or_default(&path)?;
        Ok(Self {
            path,
            marks: Mutex::new(marks),
        })
    }

    pub fn get(&self) -> Watermarks {
        *self.marks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f` and persist the result. Memory is only updated once the
    /// file has been replaced.
    pub fn update<F>(&self, f: F) -> Result<Watermarks, PersistenceError>
    where
        F: FnOnce(&mut Watermarks),
    {
        let mut guard = self.marks.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = *guard;
        f(&mut next);
        if next != *guard {
            watermark::write_to(&self.path, &next)?;
            *guard = next;
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exposure_kernel::types::id::Epoch;
    use tempfile::tempdir;

    #[test]
    fn test_updates_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("watermarks.bin");
        let book = WatermarkBook::load(&path).unwrap();
        book.update(|m| m.completed_through = Some(Epoch(4))).unwrap();
        book.update(|m| m.retention_cutoff = 77).unwrap();

        let reloaded = WatermarkBook::load(&path).unwrap().get();
        assert_eq!(reloaded.completed_through, Some(Epoch(4)));
        assert_eq!(reloaded.retention_cutoff, 77);
    }
}
