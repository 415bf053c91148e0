// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

/// Failure to decode an [`EventRecord`](crate::record::EventRecord) from bytes.
///
/// Decoding only checks framing. A record that decodes cleanly may still be
/// rejected by the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated record: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("invalid ephemeral id length: expected {expected}, found {found}")]
    InvalidLength { expected: usize, found: usize },

    #[error("unsupported record version {0}")]
    UnsupportedVersion(u8),

    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}

/// A record that cannot be represented in the wire layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("location hint is {len} bytes, the encoding allows at most {max}")]
    HintTooLong { len: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("invalid hex identifier: {0}")]
    InvalidHex(String),

    #[error("identifier has {found} bytes, expected {expected}")]
    InvalidIdLength { expected: usize, found: usize },

    #[error("time range start {start} is after end {end}")]
    InvalidRange { start: u64, end: u64 },
}

pub type KernelResult<T> = core::result::Result<T, KernelError>;
