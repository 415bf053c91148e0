use exposure_cli::commands::summary::{self, SummaryOptions};
use exposure_cli::commands::{inspect, timeline, verify};
use exposure_kernel::types::id::Epoch;
use exposure_kernel::types::TimeRange;
use exposure_persistence::fixtures;
use exposure_persistence::layout::DataLayout;
use exposure_persistence::watermark::{self, Watermarks};
use std::fs;
use tempfile::tempdir;

fn options(secret: Option<&str>) -> SummaryOptions {
    SummaryOptions {
        ids_per_key: 144,
        scan_interval_secs: 300,
        secret: secret.map(str::to_string),
    }
}

#[test]
fn test_integration_workflow() {
    let dir = tempdir().unwrap();
    fixtures::generate_test_scenario(dir.path()).unwrap();

    assert!(inspect::run(dir.path()).is_ok());
    assert!(timeline::run(dir.path(), TimeRange::all(), None).is_ok());
    assert!(timeline::run(dir.path(), TimeRange::new(0, 2_500).unwrap(), Some(1)).is_ok());

    let result = verify::run(dir.path(), Some(fixtures::FIXTURE_SECRET));
    assert!(result.is_ok(), "Verification should succeed on valid fixtures");

    assert!(summary::run(dir.path(), &options(None)).is_ok());
}

#[test]
fn test_verify_detects_corrupt_frame() {
    let dir = tempdir().unwrap();
    fixtures::generate_corrupt_scenario(dir.path()).unwrap();

    let report = verify::check(dir.path(), None).unwrap();
    assert_eq!(report.segments, 1);
    assert_eq!(report.damaged_segments, 1);
    assert_eq!(report.records, 4);
    assert!(verify::run(dir.path(), None).is_err());

    // Inspect and timeline still work on a damaged directory.
    assert!(inspect::run(dir.path()).is_ok());
    assert!(timeline::run(dir.path(), TimeRange::all(), None).is_ok());
}

#[test]
fn test_verify_wrong_publisher_secret() {
    let dir = tempdir().unwrap();
    fixtures::generate_test_scenario(dir.path()).unwrap();

    let report = verify::check(dir.path(), Some("someone-else")).unwrap();
    assert_eq!(report.batches, 1);
    assert_eq!(report.bad_batches, 1);
    assert!(!report.is_ok());
}

#[test]
fn test_verify_damaged_watermarks() {
    let dir = tempdir().unwrap();
    let paths = fixtures::generate_test_scenario(dir.path()).unwrap();
    let mut bytes = fs::read(&paths.watermarks).unwrap();
    bytes[20] ^= 0xFF;
    fs::write(&paths.watermarks, bytes).unwrap();

    let report = verify::check(dir.path(), None).unwrap();
    assert!(!report.watermarks_ok);
}

#[test]
fn test_summary_dry_run_matches_pending_epoch() {
    let dir = tempdir().unwrap();
    fixtures::generate_test_scenario(dir.path()).unwrap();

    let run = summary::dry_run(dir.path(), &options(Some(fixtures::FIXTURE_SECRET))).unwrap();
    assert_eq!(run.pending_epochs, vec![Epoch(1)]);
    assert!(run.skipped_epochs.is_empty());
    assert_eq!(run.scanned, 5);

    // Hits on day 0 and day 1, one record each.
    assert_eq!(run.pending.len(), 2);
    assert_eq!(run.pending[0].day_bucket, 0);
    assert_eq!(run.pending[0].match_count, 1);
    assert_eq!(run.pending[0].max_signal_strength, -61);
    assert_eq!(run.pending[1].day_bucket, 1);
    assert_eq!(run.pending[1].max_signal_strength, -55);
    assert!(run.history.is_empty());
    assert_eq!(run.combined().len(), 2);
}

#[test]
fn test_summary_skips_completed_and_unverified_epochs() {
    let dir = tempdir().unwrap();
    fixtures::generate_test_scenario(dir.path()).unwrap();

    let run = summary::dry_run(dir.path(), &options(Some("someone-else"))).unwrap();
    assert!(run.pending_epochs.is_empty());
    assert_eq!(run.skipped_epochs, vec![Epoch(1)]);
    assert!(run.pending.is_empty());

    let layout = DataLayout::new(dir.path());
    let marks = Watermarks {
        completed_through: Some(Epoch(1)),
        ..Default::default()
    };
    watermark::write_to(layout.watermarks_path(), &marks).unwrap();

    let run = summary::dry_run(dir.path(), &options(None)).unwrap();
    assert!(run.pending_epochs.is_empty());
    assert!(run.skipped_epochs.is_empty());
}

#[test]
fn test_summary_reads_recorded_history() {
    let dir = tempdir().unwrap();
    fixtures::generate_test_scenario(dir.path()).unwrap();
    let layout = DataLayout::new(dir.path());
    fs::write(
        layout.exposures_path(),
        r#"{
  "version": 1,
  "through_epoch": 0,
  "days": {
    "3": { "day_bucket": 3, "total_duration_estimate": 600, "max_signal_strength": -70, "match_count": 2 }
  }
}"#,
    )
    .unwrap();

    let run = summary::dry_run(dir.path(), &options(None)).unwrap();
    assert_eq!(run.history.len(), 1);
    assert_eq!(run.history[&3].match_count, 2);
    assert_eq!(run.combined().len(), 3);
    assert!(summary::run(dir.path(), &options(None)).is_ok());
}
