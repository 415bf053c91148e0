use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};

use super::format_ts;
use crate::dataset;
use exposure_kernel::types::TimeRange;
use exposure_persistence::layout::DataLayout;
use std::path::Path;

/// Print stored records in observation order, restricted to `range`.
pub fn run(dir: &Path, range: TimeRange, limit: Option<usize>) -> anyhow::Result<()> {
    let reports = dataset::scan_all(&DataLayout::new(dir))?;
    let damaged: u64 = reports.iter().map(|r| r.corrupt_frames + r.undecodable).sum();

    let records: Vec<_> = dataset::distinct_records(&reports)
        .into_iter()
        .filter(|r| range.contains(r.record.observed_at))
        .collect();
    let shown = limit.unwrap_or(records.len()).min(records.len());

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Observed", "Ephemeral ID", "RSSI", "Location", "Segment"]);

    for located in &records[..shown] {
        let record = &located.record;
        let hint = match &record.location_hint {
            Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            None => "-".to_string(),
        };
        table.add_row(vec![
            format_ts(record.observed_at),
            record.ephemeral_id.to_hex(),
            record.signal_strength.to_string(),
            hint,
            format!("{}@{}", located.segment, located.offset),
        ]);
    }

    println!("\nContact Timeline\n");
    println!("{table}\n");
    if shown < records.len() {
        println!("... {} more records not shown", records.len() - shown);
    }
    if damaged > 0 {
        println!("\n⚠️  WARNING: {} damaged frames were skipped. Run `verify` for details.\n", damaged);
    }

    Ok(())
}
