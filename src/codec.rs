// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! EventRecord wire codec.
//!
//! # Layout (little-endian)
//! ```text
//! [version: u8][id_len: u8][ephemeral_id: id_len]
//! [signal_strength: i16][observed_at: u64]
//! [has_location: u8][location_len: u16][location: location_len]
//! ```
//! `location_len` and the location bytes are only present when
//! `has_location == 1`. Field order and widths are fixed, so equal inputs
//! always produce identical bytes.

use crate::config::{CODEC_VERSION, EPHEMERAL_ID_LEN};
use crate::error::{DecodeError, EncodeError};
use crate::record::EventRecord;
use crate::types::id::EphemeralId;
use byteorder::{ByteOrder, LittleEndian};

/// Version byte plus id length byte.
pub const HEADER_LEN: usize = 2;

/// Smallest well-formed encoding (no location hint).
pub const MIN_ENCODED_LEN: usize = HEADER_LEN + EPHEMERAL_ID_LEN + 2 + 8 + 1;

pub fn encoded_len(record: &EventRecord) -> usize {
    MIN_ENCODED_LEN + record.location_hint.as_ref().map_or(0, |h| 2 + h.len())
}

/// Largest location hint the `u16` length prefix can describe.
pub const MAX_ENCODABLE_HINT_LEN: usize = u16::MAX as usize;

/// Encode a record. Fails if the location hint does not fit its length prefix.
pub fn encode(record: &EventRecord) -> Result<Vec<u8>, EncodeError> {
    if let Some(hint) = &record.location_hint {
        if hint.len() > MAX_ENCODABLE_HINT_LEN {
            return Err(EncodeError::HintTooLong {
                len: hint.len(),
                max: MAX_ENCODABLE_HINT_LEN,
            });
        }
    }

    let mut buf = vec![0u8; encoded_len(record)];
    let mut pos = 0;

    buf[pos] = CODEC_VERSION;
    buf[pos + 1] = EPHEMERAL_ID_LEN as u8;
    pos += HEADER_LEN;

    buf[pos..pos + EPHEMERAL_ID_LEN].copy_from_slice(record.ephemeral_id.as_bytes());
    pos += EPHEMERAL_ID_LEN;

    LittleEndian::write_i16(&mut buf[pos..pos + 2], record.signal_strength);
    pos += 2;
    LittleEndian::write_u64(&mut buf[pos..pos + 8], record.observed_at);
    pos += 8;

    match &record.location_hint {
        Some(hint) => {
            buf[pos] = 1;
            pos += 1;
            LittleEndian::write_u16(&mut buf[pos..pos + 2], hint.len() as u16);
            pos += 2;
            buf[pos..pos + hint.len()].copy_from_slice(hint);
        }
        None => {
            buf[pos] = 0;
        }
    }

    Ok(buf)
}

/// Decode exactly one record from `bytes`.
pub fn decode(bytes: &[u8]) -> Result<EventRecord, DecodeError> {
    let (record, consumed) = decode_prefix(bytes)?;
    if consumed != bytes.len() {
        return Err(DecodeError::TrailingBytes(bytes.len() - consumed));
    }
    Ok(record)
}

/// Decode one record from the front of `bytes`, returning it with the number
/// of bytes it occupied.
pub fn decode_prefix(bytes: &[u8]) -> Result<(EventRecord, usize), DecodeError> {
    let mut cursor = SliceCursor { bytes, pos: 0 };

    let header = cursor.take(HEADER_LEN)?;
    let version = header[0];
    if version != CODEC_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let id_len = header[1] as usize;
    if id_len != EPHEMERAL_ID_LEN {
        return Err(DecodeError::InvalidLength {
            expected: EPHEMERAL_ID_LEN,
            found: id_len,
        });
    }

    let mut id = [0u8; EPHEMERAL_ID_LEN];
    id.copy_from_slice(cursor.take(EPHEMERAL_ID_LEN)?);

    let signal_strength = LittleEndian::read_i16(cursor.take(2)?);
    let observed_at = LittleEndian::read_u64(cursor.take(8)?);

    let location_hint = match cursor.take(1)?[0] {
        0 => None,
        _ => {
            let len = LittleEndian::read_u16(cursor.take(2)?) as usize;
            Some(cursor.take(len)?.to_vec())
        }
    };

    let record = EventRecord {
        ephemeral_id: EphemeralId(id),
        signal_strength,
        observed_at,
        location_hint,
    };
    Ok((record, cursor.pos))
}

struct SliceCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SliceCursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(DecodeError::Truncated {
                needed: end,
                available: self.bytes.len(),
            });
        }
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }
}
