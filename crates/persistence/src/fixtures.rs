use crate::batch_file;
use crate::error::Result;
use crate::frame::encode_frame;
use crate::layout::{segment_file_name, DataLayout};
use crate::watermark::{self, Watermarks};

use exposure_kernel::batch::{derive_ephemeral_id, KeyedBlake3Verifier, PublishedKeyBatch};
use exposure_kernel::codec::{encode, encoded_len};
use exposure_kernel::record::EventRecord;
use exposure_kernel::types::id::{DiagnosisKey, EphemeralId, Epoch};

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Shared secret the fixture batch is signed with.
pub const FIXTURE_SECRET: &str = "fixture-publisher";
pub const FIXTURE_KEY: DiagnosisKey = DiagnosisKey([0xD1; 16]);

pub struct TestPaths {
    pub root: PathBuf,
    pub segment: PathBuf,
    pub batch: PathBuf,
    pub watermarks: PathBuf,
}

/// Five records over two days; the first and fourth carry identifiers
/// derived from `FIXTURE_KEY` in epoch 1.
pub fn fixture_records() -> Vec<EventRecord> {
    let hit_a = derive_ephemeral_id(&FIXTURE_KEY, Epoch(1), 0);
    let hit_b = derive_ephemeral_id(&FIXTURE_KEY, Epoch(1), 5);
    vec![
        EventRecord::new(hit_a, -61, 1_000, None),
        EventRecord::new(EphemeralId([0x22; 16]), -72, 2_000, Some(b"u4pru".to_vec())),
        EventRecord::new(EphemeralId([0x33; 16]), -80, 3_000, None),
        EventRecord::new(hit_b, -55, 86_400 + 60, None),
        EventRecord::new(EphemeralId([0x55; 16]), -90, 86_400 + 120, None),
    ]
}

pub fn generate_test_scenario(dir: &Path) -> Result<TestPaths> {
    let layout = DataLayout::new(dir);
    fs::create_dir_all(layout.segments_dir())?;

    // 1. One segment holding the fixture records
    let segment = layout.segments_dir().join(segment_file_name(1));
    {
        let mut file = File::create(&segment)?;
        for (seq, record) in fixture_records().iter().enumerate() {
            file.write_all(&encode_frame(seq as u64 + 1, &encode(record)?))?;
        }
        file.sync_all()?;
    }

    // 2. Epoch 1 batch
    let signer = KeyedBlake3Verifier::from_secret(FIXTURE_SECRET);
    let batch = PublishedKeyBatch::signed(Epoch(1), vec![FIXTURE_KEY], &signer);
    let batch_path = batch_file::write_batch(layout.batches_dir(), &batch)?;

    // 3. Nothing matched yet
    watermark::write_to(layout.watermarks_path(), &Watermarks::default())?;

    Ok(TestPaths {
        root: dir.to_path_buf(),
        segment,
        batch: batch_path,
        watermarks: layout.watermarks_path(),
    })
}

/// Same as [`generate_test_scenario`] with one payload byte of the third
/// frame flipped.
pub fn generate_corrupt_scenario(dir: &Path) -> Result<TestPaths> {
    let paths = generate_test_scenario(dir)?;
    let mut data = fs::read(&paths.segment)?;

    let mut offset = 0usize;
    for record in fixture_records().iter().take(2) {
        offset += crate::frame::FrameHeader::SIZE + encoded_len(record);
    }
    let target = offset + crate::frame::FrameHeader::SIZE + 4;
    data[target] ^= 0xFF;
    fs::write(&paths.segment, &data)?;

    Ok(paths)
}
