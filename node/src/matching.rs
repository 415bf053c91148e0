// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::ingest::PendingSnapshot;
use crate::store::{EventStore, RecordStream};
use exposure_kernel::matcher::Matcher;
use exposure_kernel::types::TimeRange;
use tokio_util::sync::CancellationToken;

/// Lazily match the records observed in `range` against a frozen pending set.
///
/// The staged set stays in memory and the store is streamed past it. Store
/// errors, including `StoreError::Cancelled`, come through as `Err` items.
pub fn match_window<'a>(
    store: &EventStore,
    pending: &'a PendingSnapshot,
    range: TimeRange,
    cancel: CancellationToken,
) -> Matcher<'a, RecordStream> {
    Matcher::new(store.query_cancellable(range, None, cancel), &pending.staged)
}
