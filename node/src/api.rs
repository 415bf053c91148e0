// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::engine::{EngineStatus, MatchingReport};
use crate::errors::EngineError;
use crate::ingest::IngestStats;
use exposure_kernel::aggregate::ExposureSummary;
use exposure_kernel::batch::PublishedKeyBatch;
use exposure_kernel::record::EventRecord;
use exposure_kernel::types::id::{DiagnosisKey, EphemeralId, Epoch};
use exposure_kernel::types::TimeRange;
use serde::{Deserialize, Serialize};

/// One decoded radio observation. Identifiers travel as hex.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ContactEvent {
    pub ephemeral_id: EphemeralId,
    pub signal_strength: i16,
    pub observed_at: u64,
    /// Coarse geohash, stored as its UTF-8 bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_hint: Option<String>,
}

impl From<ContactEvent> for EventRecord {
    fn from(e: ContactEvent) -> Self {
        EventRecord::new(
            e.ephemeral_id,
            e.signal_strength,
            e.observed_at,
            e.location_hint.map(String::into_bytes),
        )
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RecordEventsRequest {
    pub events: Vec<ContactEvent>,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct RecordEventsResponse {
    pub stored: usize,
    pub duplicates: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PublishBatchRequest {
    pub epoch: Epoch,
    pub declared_key_count: u32,
    pub keys: Vec<DiagnosisKey>,
    /// Hex-encoded publisher signature.
    pub signature: String,
}

impl TryFrom<PublishBatchRequest> for PublishedKeyBatch {
    type Error = EngineError;

    fn try_from(req: PublishBatchRequest) -> Result<Self, Self::Error> {
        let signature = hex::decode(&req.signature).map_err(|e| EngineError::InvalidInput(format!("signature: {}", e)))?;
        Ok(PublishedKeyBatch {
            epoch: req.epoch,
            declared_key_count: req.declared_key_count,
            keys: req.keys,
            signature,
        })
    }
}

impl From<&PublishedKeyBatch> for PublishBatchRequest {
    fn from(batch: &PublishedKeyBatch) -> Self {
        Self {
            epoch: batch.epoch,
            declared_key_count: batch.declared_key_count,
            keys: batch.keys.clone(),
            signature: hex::encode(&batch.signature),
        }
    }
}

pub type PublishBatchResponse = IngestStats;

#[derive(Serialize, Deserialize, Debug)]
pub struct ExposuresResponse {
    pub summaries: Vec<ExposureSummary>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct RunMatchingRequest {
    /// Window start in seconds; defaults to the beginning of time.
    pub start: Option<u64>,
    /// Window end (exclusive); defaults to no upper bound.
    pub end: Option<u64>,
    /// Cancel the pass if it has not finished after this long.
    pub timeout_ms: Option<u64>,
}

impl RunMatchingRequest {
    pub fn range(&self) -> Result<TimeRange, EngineError> {
        let all = TimeRange::all();
        Ok(TimeRange::new(self.start.unwrap_or(all.start), self.end.unwrap_or(all.end))?)
    }
}

pub type RunMatchingResponse = MatchingReport;
pub type StoreStatsResponse = EngineStatus;

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthResponse {
    pub status: String,
}
