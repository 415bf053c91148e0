//! Staged key batch files, one per epoch.
//!
//! ```text
//! [magic "EXPB"][version: u32][epoch: u64][payload_len: u32][crc64: u64][payload]
//! ```
//! The payload is the bincode encoding of a `PublishedKeyBatch`. Files are
//! written to a temporary name, fsync'd, then renamed into place, so a batch
//! file is either absent or complete.

use crate::error::{PersistenceError, Result};
use crate::layout::{batch_file_name, parse_batch_file_name};
use byteorder::{ByteOrder, LittleEndian};
use crc64fast::Digest;
use exposure_kernel::batch::PublishedKeyBatch;
use exposure_kernel::types::id::Epoch;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const BATCH_MAGIC: [u8; 4] = *b"EXPB";
pub const BATCH_VERSION: u32 = 1;
const HEADER_SIZE: usize = 4 + 4 + 8 + 4 + 8; // 28 bytes

fn crc(epoch: u64, payload: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(&epoch.to_le_bytes());
    digest.write(payload);
    digest.sum64()
}

pub fn encode_batch(batch: &PublishedKeyBatch) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(batch, bincode::config::standard())
        .map_err(|e| PersistenceError::InvalidFormat(e.to_string()))?;

    let mut buf = vec![0u8; HEADER_SIZE];
    buf[0..4].copy_from_slice(&BATCH_MAGIC);
    LittleEndian::write_u32(&mut buf[4..8], BATCH_VERSION);
    LittleEndian::write_u64(&mut buf[8..16], batch.epoch.0);
    LittleEndian::write_u32(&mut buf[16..20], payload.len() as u32);
    LittleEndian::write_u64(&mut buf[20..28], crc(batch.epoch.0, &payload));
    buf.extend_from_slice(&payload);
    Ok(buf)
}

pub fn decode_batch(bytes: &[u8]) -> Result<PublishedKeyBatch> {
    if bytes.len() < HEADER_SIZE {
        return Err(PersistenceError::InvalidFormat(format!("batch file too short: {} bytes", bytes.len())));
    }
    if bytes[0..4] != BATCH_MAGIC {
        return Err(PersistenceError::InvalidMagic);
    }
    let version = LittleEndian::read_u32(&bytes[4..8]);
    if version != BATCH_VERSION {
        return Err(PersistenceError::UnsupportedVersion(version));
    }
    let epoch = LittleEndian::read_u64(&bytes[8..16]);
    let payload_len = LittleEndian::read_u32(&bytes[16..20]) as usize;
    let expected = LittleEndian::read_u64(&bytes[20..28]);

    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != payload_len {
        return Err(PersistenceError::InvalidFormat(format!(
            "batch payload is {} bytes, header says {}",
            payload.len(),
            payload_len
        )));
    }
    let found = crc(epoch, payload);
    if found != expected {
        return Err(PersistenceError::ChecksumMismatch { expected, found });
    }

    let (batch, _): (PublishedKeyBatch, _) = bincode::serde::decode_from_slice(payload, bincode::config::standard())
        .map_err(|e| PersistenceError::InvalidFormat(e.to_string()))?;
    if batch.epoch.0 != epoch {
        return Err(PersistenceError::InvalidFormat(format!(
            "batch body epoch {} does not match header epoch {}",
            batch.epoch, epoch
        )));
    }
    Ok(batch)
}

/// Atomically write the batch file for `batch.epoch` into `dir`.
pub fn write_batch(dir: impl AsRef<Path>, batch: &PublishedKeyBatch) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let path = dir.join(batch_file_name(batch.epoch));
    let tmp_path = path.with_extension("tmp");

    let bytes = encode_batch(batch)?;
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, &path)?;
    Ok(path)
}

pub fn read_batch(path: impl AsRef<Path>) -> Result<PublishedKeyBatch> {
    let bytes = fs::read(path)?;
    decode_batch(&bytes)
}

/// Batch files in `dir`, ascending by epoch. Leftover temporary files are
/// ignored.
pub fn list_batches(dir: impl AsRef<Path>) -> Result<Vec<(Epoch, PathBuf)>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(epoch) = name.to_str().and_then(parse_batch_file_name) {
            out.push((epoch, entry.path()));
        }
    }
    out.sort_by_key(|(epoch, _)| *epoch);
    Ok(out)
}
