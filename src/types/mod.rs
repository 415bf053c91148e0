// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::config::SECONDS_PER_DAY;
use crate::error::{KernelError, KernelResult};
use serde::{Deserialize, Serialize};

pub mod id;

/// Half-open window `[start, end)` over `observed_at` seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: u64,
    pub end: u64,
}

impl TimeRange {
    pub fn new(start: u64, end: u64) -> KernelResult<Self> {
        if start > end {
            return Err(KernelError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Everything the store could hold.
    pub fn all() -> Self {
        Self { start: 0, end: u64::MAX }
    }

    pub fn contains(&self, t: u64) -> bool {
        t >= self.start && t < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Calendar-day bucket (days since the Unix epoch) of a timestamp.
pub fn day_bucket(observed_at: u64) -> u64 {
    observed_at / SECONDS_PER_DAY
}
