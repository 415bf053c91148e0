use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};

use super::format_ts;
use crate::dataset;
use exposure_persistence::batch_file;
use exposure_persistence::layout::DataLayout;
use exposure_persistence::watermark;
use std::path::Path;

pub fn run(dir: &Path) -> anyhow::Result<()> {
    let layout = DataLayout::new(dir);

    println!("\nExposure Store Status: {}", dir.display());
    println!("---------------------");

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["File", "Status", "Details"]);

    // 1. Segments
    let segments = dataset::list_segments(&layout)?;
    if segments.is_empty() {
        table.add_row(vec!["Segments", "MISSING", ""]);
    }
    for (id, path) in &segments {
        let name = format!("segment {}", id);
        match dataset::scan_segment(*id, path) {
            Ok(report) => {
                let status = if report.is_clean() { "FOUND" } else { "DAMAGED" };
                let mut msg = format!("{} bytes, {} records", report.bytes, report.records.len());
                if report.corrupt_frames > 0 {
                    msg.push_str(&format!(", {} corrupt frames", report.corrupt_frames));
                }
                if report.undecodable > 0 {
                    msg.push_str(&format!(", {} undecodable", report.undecodable));
                }
                if let Some(len) = report.torn_tail {
                    msg.push_str(&format!(", torn tail of {} bytes", len));
                }
                table.add_row(vec![name, status.to_string(), msg]);
            }
            Err(e) => {
                table.add_row(vec![name, "CORRUPT".to_string(), e.to_string()]);
            }
        }
    }

    // 2. Staged batches
    let batches = batch_file::list_batches(layout.batches_dir())?;
    if batches.is_empty() {
        table.add_row(vec!["Batches", "MISSING", ""]);
    }
    for (epoch, path) in &batches {
        let name = format!("batch epoch {}", epoch);
        match batch_file::read_batch(path) {
            Ok(batch) => {
                let msg = format!(
                    "{} keys (declared {}), complete: {}",
                    batch.keys.len(),
                    batch.declared_key_count,
                    batch.is_complete()
                );
                table.add_row(vec![name, "FOUND".to_string(), msg]);
            }
            Err(e) => {
                table.add_row(vec![name, "CORRUPT".to_string(), e.to_string()]);
            }
        }
    }

    // 3. Watermarks
    let wm_path = layout.watermarks_path();
    if wm_path.exists() {
        match watermark::read_or_default(&wm_path) {
            Ok(marks) => {
                let msg = format!(
                    "Completed through: {}, Retention cutoff: {}, Last sweep: {}, Last match: {}",
                    marks.completed_through.map_or_else(|| "-".to_string(), |e| e.to_string()),
                    format_ts(marks.retention_cutoff),
                    format_ts(marks.last_sweep_at),
                    format_ts(marks.last_match_at),
                );
                table.add_row(vec!["Watermarks", "FOUND", &msg]);
            }
            Err(e) => {
                table.add_row(vec!["Watermarks", "CORRUPT", &e.to_string()]);
            }
        }
    } else {
        table.add_row(vec!["Watermarks", "MISSING", ""]);
    }

    // 4. Exposure history
    match dataset::read_history(&layout) {
        Ok(Some(history)) => {
            let msg = format!(
                "{} days, through epoch {}",
                history.days.len(),
                history.through_epoch.map_or_else(|| "-".to_string(), |e| e.to_string())
            );
            table.add_row(vec!["Exposure history", "FOUND", &msg]);
        }
        Ok(None) => {
            table.add_row(vec!["Exposure history", "MISSING", ""]);
        }
        Err(e) => {
            table.add_row(vec!["Exposure history", "CORRUPT", &format!("{:#}", e)]);
        }
    }

    println!("{table}\n");
    Ok(())
}
