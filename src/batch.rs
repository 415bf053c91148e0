// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Published key batches and identifier derivation.
//!
//! A batch carries the diagnosis keys released for one rotation epoch. The
//! ephemeral identifiers a diagnosed device broadcast during that epoch are
//! derived from each key; the observer never learns anything else about the
//! device.
//!
//! Signature checking is delegated to a [`BatchVerifier`]. The keyed blake3
//! verifier is the one the node ships with.

use crate::config::{BATCH_SIGNING_CONTEXT, DERIVATION_CONTEXT, EPHEMERAL_ID_LEN};
use crate::types::id::{DiagnosisKey, EphemeralId, Epoch};
use serde::{Deserialize, Serialize};

/// Keys released by the key-distribution service for one epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedKeyBatch {
    pub epoch: Epoch,
    /// Key count announced by the publisher. A mismatch with `keys.len()`
    /// means the batch was cut short in transit.
    pub declared_key_count: u32,
    pub keys: Vec<DiagnosisKey>,
    pub signature: Vec<u8>,
}

impl PublishedKeyBatch {
    /// Build a complete batch signed with `signer`.
    pub fn signed(epoch: Epoch, keys: Vec<DiagnosisKey>, signer: &KeyedBlake3Verifier) -> Self {
        let mut batch = Self {
            epoch,
            declared_key_count: keys.len() as u32,
            keys,
            signature: Vec::new(),
        };
        batch.signature = signer.sign(&batch.signing_bytes()).to_vec();
        batch
    }

    /// Canonical bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BATCH_SIGNING_CONTEXT.len() + 12 + self.keys.len() * 16);
        buf.extend_from_slice(BATCH_SIGNING_CONTEXT);
        buf.extend_from_slice(&self.epoch.0.to_le_bytes());
        buf.extend_from_slice(&self.declared_key_count.to_le_bytes());
        for key in &self.keys {
            buf.extend_from_slice(&key.0);
        }
        buf
    }

    pub fn is_complete(&self) -> bool {
        self.keys.len() == self.declared_key_count as usize
    }

    /// All identifiers derived from this batch, key by key.
    pub fn derived_ids(&self, ids_per_key: u32) -> impl Iterator<Item = EphemeralId> + '_ {
        let epoch = self.epoch;
        self.keys
            .iter()
            .flat_map(move |key| derive_ephemeral_ids(key, epoch, ids_per_key))
    }
}

/// Identifiers broadcast under `key` during `epoch`, one per interval.
pub fn derive_ephemeral_ids(key: &DiagnosisKey, epoch: Epoch, ids_per_key: u32) -> impl Iterator<Item = EphemeralId> {
    let secret = blake3::derive_key(DERIVATION_CONTEXT, &key.0);
    (0..ids_per_key).map(move |interval| derive_one(&secret, epoch, interval))
}

/// Identifier for a single interval.
pub fn derive_ephemeral_id(key: &DiagnosisKey, epoch: Epoch, interval: u32) -> EphemeralId {
    let secret = blake3::derive_key(DERIVATION_CONTEXT, &key.0);
    derive_one(&secret, epoch, interval)
}

fn derive_one(secret: &[u8; 32], epoch: Epoch, interval: u32) -> EphemeralId {
    let mut input = [0u8; 12];
    input[..8].copy_from_slice(&epoch.0.to_le_bytes());
    input[8..].copy_from_slice(&interval.to_le_bytes());
    let hash = blake3::keyed_hash(secret, &input);
    let mut id = [0u8; EPHEMERAL_ID_LEN];
    id.copy_from_slice(&hash.as_bytes()[..EPHEMERAL_ID_LEN]);
    EphemeralId(id)
}

/// Checks a publisher signature over [`PublishedKeyBatch::signing_bytes`].
pub trait BatchVerifier: Send + Sync {
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;
}

/// Shared-secret verifier: the signature is `blake3::keyed_hash(key, message)`.
#[derive(Clone)]
pub struct KeyedBlake3Verifier {
    key: [u8; 32],
}

impl KeyedBlake3Verifier {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derive the verifier key from a passphrase-like secret.
    pub fn from_secret(secret: &str) -> Self {
        Self::new(*blake3::hash(secret.as_bytes()).as_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 32] {
        *blake3::keyed_hash(&self.key, message).as_bytes()
    }
}

impl BatchVerifier for KeyedBlake3Verifier {
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(sig) = <[u8; 32]>::try_from(signature) else {
            return false;
        };
        // blake3::Hash equality is constant time.
        blake3::keyed_hash(&self.key, message) == blake3::Hash::from(sig)
    }
}

impl core::fmt::Debug for KeyedBlake3Verifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("KeyedBlake3Verifier(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> DiagnosisKey {
        DiagnosisKey([b; 16])
    }

    #[test]
    fn test_derivation_is_deterministic_and_epoch_bound() {
        let a: Vec<_> = derive_ephemeral_ids(&key(1), Epoch(3), 4).collect();
        let b: Vec<_> = derive_ephemeral_ids(&key(1), Epoch(3), 4).collect();
        let c: Vec<_> = derive_ephemeral_ids(&key(1), Epoch(4), 4).collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a[2], derive_ephemeral_id(&key(1), Epoch(3), 2));
    }

    #[test]
    fn test_signed_batch_verifies() {
        let signer = KeyedBlake3Verifier::from_secret("publisher");
        let batch = PublishedKeyBatch::signed(Epoch(9), vec![key(1), key(2)], &signer);
        assert!(batch.is_complete());
        assert!(signer.verify(&batch.signing_bytes(), &batch.signature));

        let other = KeyedBlake3Verifier::from_secret("someone else");
        assert!(!other.verify(&batch.signing_bytes(), &batch.signature));
    }

    #[test]
    fn test_tampered_batch_fails_verification() {
        let signer = KeyedBlake3Verifier::from_secret("publisher");
        let mut batch = PublishedKeyBatch::signed(Epoch(9), vec![key(1), key(2)], &signer);
        batch.keys[1] = key(3);
        assert!(!signer.verify(&batch.signing_bytes(), &batch.signature));
        assert!(!signer.verify(&batch.signing_bytes(), &[0u8; 7]));
    }

    #[test]
    fn test_derived_ids_count() {
        let signer = KeyedBlake3Verifier::from_secret("publisher");
        let batch = PublishedKeyBatch::signed(Epoch(1), vec![key(1), key(2), key(3)], &signer);
        assert_eq!(batch.derived_ids(10).count(), 30);
    }
}
