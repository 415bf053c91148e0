// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! exposure-kernel: the pure core of the local exposure-event engine.
//!
//! Everything here is I/O free. Durable storage, batch staging on disk and the
//! service surface live in `exposure-node`.

pub mod config;
pub mod error;
pub mod types;
pub mod record;
pub mod codec;
pub mod batch;
pub mod staged;
pub mod matcher;
pub mod aggregate;

pub use aggregate::{aggregate, AggregationConfig, ExposureSummary};
pub use batch::{BatchVerifier, KeyedBlake3Verifier, PublishedKeyBatch};
pub use error::{DecodeError, EncodeError, KernelError};
pub use matcher::{ExposureMatch, Matcher};
pub use record::EventRecord;
pub use staged::StagedIdentifiers;
pub use types::id::{DedupKey, DiagnosisKey, EphemeralId, Epoch};
pub use types::TimeRange;

#[cfg(test)]
pub mod tests;
