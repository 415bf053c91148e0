// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Protocol constants.

/// Width in bytes of a broadcast ephemeral identifier.
pub const EPHEMERAL_ID_LEN: usize = 16;

/// Width in bytes of a published diagnosis key.
pub const DIAGNOSIS_KEY_LEN: usize = 16;

/// Bytes of the ephemeral identifier used for prefix buckets.
pub const ID_PREFIX_LEN: usize = 2;

/// Largest location hint the store accepts.
pub const MAX_LOCATION_HINT_LEN: usize = 64;

/// Current record encoding version.
pub const CODEC_VERSION: u8 = 1;

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Default epidemiological look-back window (14 days).
pub const DEFAULT_RETENTION_SECS: u64 = 14 * SECONDS_PER_DAY;

/// Default duration one observed record stands for.
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 300;

/// Default number of ephemeral identifiers derived from one key per epoch
/// (one per 10-minute interval of a day).
pub const DEFAULT_IDS_PER_KEY: u32 = 144;

/// blake3 `derive_key` context for identifier derivation.
pub const DERIVATION_CONTEXT: &str = "exposure-kernel 2025 ephemeral id derivation v1";

/// Domain separator for batch signatures.
pub const BATCH_SIGNING_CONTEXT: &[u8] = b"exposure.batch.v1";

/// Domain separator for dedup keys.
pub const DEDUP_CONTEXT: &[u8] = b"exposure.dedup.v1";
