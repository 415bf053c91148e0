use anyhow::bail;
use exposure_kernel::batch::{BatchVerifier, KeyedBlake3Verifier};
use exposure_persistence::batch_file;
use exposure_persistence::layout::DataLayout;
use exposure_persistence::watermark;
use std::path::Path;

use crate::dataset;

/// Outcome of a full integrity check.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub segments: usize,
    pub records: usize,
    pub damaged_segments: usize,
    pub batches: usize,
    pub bad_batches: usize,
    pub watermarks_ok: bool,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.damaged_segments == 0 && self.bad_batches == 0 && self.watermarks_ok
    }
}

/// Check every checksum under `dir`. With `secret`, batch signatures are
/// checked too.
pub fn check(dir: &Path, secret: Option<&str>) -> anyhow::Result<VerifyReport> {
    let layout = DataLayout::new(dir);
    let verifier = secret.map(KeyedBlake3Verifier::from_secret);
    let mut report = VerifyReport::default();

    // 1. Segment frames
    for segment in dataset::scan_all(&layout)? {
        report.segments += 1;
        report.records += segment.records.len();
        if !segment.is_clean() {
            report.damaged_segments += 1;
            println!(
                "❌ {}: {} corrupt, {} undecodable, torn tail {}",
                segment.path.display(),
                segment.corrupt_frames,
                segment.undecodable,
                segment.torn_tail.map_or_else(|| "none".to_string(), |len| format!("{} bytes", len))
            );
        }
    }

    // 2. Batch files
    for (epoch, path) in batch_file::list_batches(layout.batches_dir())? {
        report.batches += 1;
        let batch = match batch_file::read_batch(&path) {
            Ok(batch) => batch,
            Err(e) => {
                report.bad_batches += 1;
                println!("❌ batch epoch {}: {}", epoch, e);
                continue;
            }
        };
        if let Some(verifier) = &verifier {
            if !verifier.verify(&batch.signing_bytes(), &batch.signature) {
                report.bad_batches += 1;
                println!("❌ batch epoch {}: signature does not verify", epoch);
            }
        }
    }

    // 3. Watermarks
    match watermark::read_or_default(layout.watermarks_path()) {
        Ok(_) => report.watermarks_ok = true,
        Err(e) => println!("❌ watermarks: {}", e),
    }

    Ok(report)
}

pub fn run(dir: &Path, secret: Option<&str>) -> anyhow::Result<()> {
    let report = check(dir, secret)?;

    if report.is_ok() {
        println!("\n✅ VERIFIED\n");
    } else {
        println!("\n❌ DAMAGED\n");
    }
    println!("Segments:   {} ({} damaged)", report.segments, report.damaged_segments);
    println!("Records:    {}", report.records);
    println!("Batches:    {} ({} rejected)", report.batches, report.bad_batches);
    if secret.is_none() {
        println!("Signatures: not checked (pass --secret)");
    }
    println!();

    if !report.is_ok() {
        bail!("integrity check failed for {}", dir.display());
    }
    Ok(())
}
