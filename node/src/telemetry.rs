// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub const RECORDS_APPENDED: &str = "exposure_records_appended_total";
pub const RECORDS_DEDUPLICATED: &str = "exposure_records_deduplicated_total";
pub const CORRUPT_FRAMES: &str = "exposure_corrupt_frames_total";
pub const BATCHES_INGESTED: &str = "exposure_batches_ingested_total";
pub const BATCHES_REJECTED: &str = "exposure_batches_rejected_total";
pub const MATCHES: &str = "exposure_matches_total";
pub const MATCH_PASS_DURATION: &str = "exposure_matching_duration_seconds";
pub const SWEEP_DURATION: &str = "exposure_sweep_duration_seconds";
pub const RECORDS_SWEPT: &str = "exposure_sweep_removed_total";
pub const STORED_RECORDS: &str = "exposure_store_records";

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    // 1. Logs
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "exposure_node=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Metrics (Prometheus)
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROM_HANDLE.set(handle).is_err() {
                tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
            }
        }
        Err(e) => tracing::error!("failed to install Prometheus recorder: {}", e),
    }

    metrics::describe_counter!(RECORDS_APPENDED, "Contact events durably appended to the store");
    metrics::describe_counter!(RECORDS_DEDUPLICATED, "Appends dropped as duplicates of a stored record");
    metrics::describe_counter!(CORRUPT_FRAMES, "Segment frames skipped because they failed verification");
    metrics::describe_counter!(BATCHES_INGESTED, "Published key batches staged for matching");
    metrics::describe_counter!(BATCHES_REJECTED, "Published key batches rejected at ingestion");
    metrics::describe_counter!(MATCHES, "Stored records matched against staged identifiers");
    metrics::describe_histogram!(MATCH_PASS_DURATION, "Time taken by one matching pass");
    metrics::describe_histogram!(SWEEP_DURATION, "Time taken by one retention sweep");
    metrics::describe_counter!(RECORDS_SWEPT, "Records removed by retention sweeps");
    metrics::describe_gauge!(STORED_RECORDS, "Records currently held by the store");

    metrics::gauge!("exposure_node_up", 1.0);
}

/// Get the Prometheus handle to render metrics
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}
