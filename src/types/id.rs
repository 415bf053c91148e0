// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Identity types.

use crate::config::{DIAGNOSIS_KEY_LEN, EPHEMERAL_ID_LEN, ID_PREFIX_LEN};
use crate::error::{KernelError, KernelResult};
use core::fmt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Key rotation period number, assigned by the key-distribution service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Epoch(pub u64);

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rotating identifier broadcast by a device. Opaque to the observer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct EphemeralId(pub [u8; EPHEMERAL_ID_LEN]);

impl EphemeralId {
    pub fn from_slice(bytes: &[u8]) -> KernelResult<Self> {
        let arr: [u8; EPHEMERAL_ID_LEN] = bytes.try_into().map_err(|_| KernelError::InvalidIdLength {
            expected: EPHEMERAL_ID_LEN,
            found: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> KernelResult<Self> {
        let bytes = hex::decode(s).map_err(|e| KernelError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Bucket prefix used by the staged-set pre-filter.
    pub fn prefix(&self) -> [u8; ID_PREFIX_LEN] {
        let mut p = [0u8; ID_PREFIX_LEN];
        p.copy_from_slice(&self.0[..ID_PREFIX_LEN]);
        p
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Published key from which a diagnosed device's ephemeral IDs are derived.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct DiagnosisKey(pub [u8; DIAGNOSIS_KEY_LEN]);

impl DiagnosisKey {
    pub fn from_slice(bytes: &[u8]) -> KernelResult<Self> {
        let arr: [u8; DIAGNOSIS_KEY_LEN] = bytes.try_into().map_err(|_| KernelError::InvalidIdLength {
            expected: DIAGNOSIS_KEY_LEN,
            found: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> KernelResult<Self> {
        let bytes = hex::decode(s).map_err(|e| KernelError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Content address of a record: blake3 over its identity fields.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct DedupKey(pub [u8; 32]);

impl DedupKey {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

macro_rules! hex_debug_and_serde {
    ($ty:ident) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($ty), hex::encode(self.0))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                let arr = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| serde::de::Error::invalid_length(bytes.len(), &"fixed-width hex identifier"))?;
                Ok($ty(arr))
            }
        }
    };
}

hex_debug_and_serde!(EphemeralId);
hex_debug_and_serde!(DiagnosisKey);
hex_debug_and_serde!(DedupKey);
