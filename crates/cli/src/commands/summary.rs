use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};

use crate::dataset;
use exposure_kernel::aggregate::{aggregate, merge_into, AggregationConfig, ExposureSummary};
use exposure_kernel::batch::{BatchVerifier, KeyedBlake3Verifier};
use exposure_kernel::config::SECONDS_PER_DAY;
use exposure_kernel::matcher::Matcher;
use exposure_kernel::staged::StagedIdentifiers;
use exposure_kernel::types::id::Epoch;
use exposure_persistence::batch_file;
use exposure_persistence::layout::DataLayout;
use exposure_persistence::watermark;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SummaryOptions {
    pub ids_per_key: u32,
    pub scan_interval_secs: u64,
    /// Batches that fail this publisher's signature are left out.
    pub secret: Option<String>,
}

/// What the node would report if it ran a matching pass now.
#[derive(Debug, Default)]
pub struct DryRun {
    /// Summaries already recorded by the node.
    pub history: BTreeMap<u64, ExposureSummary>,
    /// Summaries the pending batches would add.
    pub pending: Vec<ExposureSummary>,
    pub pending_epochs: Vec<Epoch>,
    pub skipped_epochs: Vec<Epoch>,
    pub scanned: u64,
}

impl DryRun {
    /// History with the pending pass folded in.
    pub fn combined(&self) -> BTreeMap<u64, ExposureSummary> {
        let mut days = self.history.clone();
        merge_into(&mut days, &self.pending);
        days
    }
}

/// Match the staged batches the node has not completed yet against the
/// stored records, without touching any file.
pub fn dry_run(dir: &Path, opts: &SummaryOptions) -> anyhow::Result<DryRun> {
    let layout = DataLayout::new(dir);
    let marks = watermark::read_or_default(layout.watermarks_path())?;
    let verifier = opts.secret.as_deref().map(KeyedBlake3Verifier::from_secret);
    let mut out = DryRun::default();

    if let Some(history) = dataset::read_history(&layout)? {
        out.history = history.days;
    }

    let mut staged = StagedIdentifiers::new();
    for (epoch, path) in batch_file::list_batches(layout.batches_dir())? {
        if marks.is_stale(epoch) {
            continue;
        }
        let batch = match batch_file::read_batch(&path) {
            Ok(batch) => batch,
            Err(_) => {
                out.skipped_epochs.push(epoch);
                continue;
            }
        };
        let signed = verifier
            .as_ref()
            .map_or(true, |v| v.verify(&batch.signing_bytes(), &batch.signature));
        if !batch.is_complete() || !signed {
            out.skipped_epochs.push(epoch);
            continue;
        }
        let (from_batch, _) = StagedIdentifiers::from_batch(&batch, opts.ids_per_key);
        staged.merge(from_batch);
    }
    out.pending_epochs = staged.epochs().collect();

    if staged.is_empty() {
        return Ok(out);
    }

    let reports = dataset::scan_all(&layout)?;
    let records = dataset::distinct_records(&reports)
        .into_iter()
        .map(|r| Ok::<_, Infallible>(r.record));
    let mut matcher = Matcher::new(records, &staged);
    let matches: Vec<_> = matcher.by_ref().filter_map(Result::ok).collect();
    out.scanned = matcher.scanned();

    let config = AggregationConfig {
        scan_interval_secs: opts.scan_interval_secs,
    };
    out.pending = aggregate(matches, &config);
    Ok(out)
}

fn summary_table(days: &BTreeMap<u64, ExposureSummary>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Day", "Matches", "Duration (min)", "Max RSSI"]);

    for summary in days.values() {
        let day = chrono::DateTime::from_timestamp((summary.day_bucket * SECONDS_PER_DAY) as i64, 0)
            .unwrap_or_default()
            .format("%Y-%m-%d")
            .to_string();
        table.add_row(vec![
            day,
            summary.match_count.to_string(),
            (summary.total_duration_estimate / 60).to_string(),
            summary.max_signal_strength.to_string(),
        ]);
    }
    table
}

pub fn run(dir: &Path, opts: &SummaryOptions) -> anyhow::Result<()> {
    let result = dry_run(dir, opts)?;

    println!("\nRecorded Exposures\n");
    if result.history.is_empty() {
        println!("(none)\n");
    } else {
        println!("{}\n", summary_table(&result.history));
    }

    if result.pending_epochs.is_empty() {
        println!("No pending batches.\n");
    } else {
        let epochs: Vec<String> = result.pending_epochs.iter().map(|e| e.to_string()).collect();
        println!(
            "Pending epochs {} would match {} of {} scanned records.\n",
            epochs.join(", "),
            result.pending.iter().map(|s| s.match_count as u64).sum::<u64>(),
            result.scanned
        );
        println!("{}\n", summary_table(&result.combined()));
    }

    if !result.skipped_epochs.is_empty() {
        let epochs: Vec<String> = result.skipped_epochs.iter().map(|e| e.to_string()).collect();
        println!("⚠️  Skipped unreadable or unverified batches: {}\n", epochs.join(", "));
    }
    Ok(())
}
