//! Segment log framing.
//!
//! ```text
//! [magic: u32][seq: u64][payload_len: u32][checksum: u64][payload]
//! ```
//! The crc64 covers `seq || payload_len || payload`. The magic lets a reader
//! find the next frame after a damaged region instead of giving up on the
//! rest of the segment.

use crate::error::{PersistenceError, Result};
use crc64fast::Digest;
use std::io::{Read, Seek, SeekFrom};

/// "EXPR" read as a little-endian u32.
pub const FRAME_MAGIC: u32 = u32::from_le_bytes(*b"EXPR");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub seq: u64,
    pub payload_len: u32,
    pub checksum: u64,
}

impl FrameHeader {
    pub const SIZE: usize = 4 + 8 + 4 + 8; // 24 bytes

    pub fn for_payload(seq: u64, payload: &[u8]) -> Self {
        Self {
            seq,
            payload_len: payload.len() as u32,
            checksum: checksum(seq, payload),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&FRAME_MAGIC.to_le_bytes());
        buf[4..12].copy_from_slice(&self.seq.to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[16..24].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn parse(buf: &[u8; Self::SIZE]) -> Result<Self> {
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != FRAME_MAGIC {
            return Err(PersistenceError::InvalidMagic);
        }
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&buf[4..12]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&buf[12..16]);
        let mut sum = [0u8; 8];
        sum.copy_from_slice(&buf[16..24]);
        Ok(Self {
            seq: u64::from_le_bytes(seq),
            payload_len: u32::from_le_bytes(len),
            checksum: u64::from_le_bytes(sum),
        })
    }

    pub fn frame_len(&self) -> u64 {
        Self::SIZE as u64 + self.payload_len as u64
    }

    pub fn verify(&self, payload: &[u8]) -> Result<()> {
        let found = checksum(self.seq, payload);
        if found != self.checksum {
            return Err(PersistenceError::ChecksumMismatch {
                expected: self.checksum,
                found,
            });
        }
        Ok(())
    }
}

pub fn checksum(seq: u64, payload: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(&seq.to_le_bytes());
    digest.write(&(payload.len() as u32).to_le_bytes());
    digest.write(payload);
    digest.sum64()
}

/// Header followed by payload, ready for a single `write_all`.
pub fn encode_frame(seq: u64, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader::for_payload(seq, payload);
    let mut buf = Vec::with_capacity(FrameHeader::SIZE + payload.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Read and verify the frame at `offset`. `frame_len` is the full length
/// recorded when the frame was indexed.
pub fn read_frame_at<R: Read + Seek>(reader: &mut R, offset: u64, frame_len: u64) -> Result<(FrameHeader, Vec<u8>)> {
    if frame_len < FrameHeader::SIZE as u64 {
        return Err(PersistenceError::InvalidFormat(format!("frame length {} below header size", frame_len)));
    }
    reader.seek(SeekFrom::Start(offset))?;

    let mut head = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut head)?;
    let header = FrameHeader::parse(&head)?;
    if header.frame_len() != frame_len {
        return Err(PersistenceError::InvalidFormat(format!(
            "frame at {} claims {} bytes, index says {}",
            offset,
            header.frame_len(),
            frame_len
        )));
    }

    let mut payload = vec![0u8; header.payload_len as usize];
    reader.read_exact(&mut payload)?;
    header.verify(&payload)?;
    Ok((header, payload))
}

/// What a sequential scan found at one position of a segment.
#[derive(Debug, PartialEq, Eq)]
pub enum ScannedFrame<'a> {
    Valid {
        offset: u64,
        header: FrameHeader,
        payload: &'a [u8],
    },
    /// Damaged bytes followed by another frame.
    Corrupt { offset: u64, len: u64 },
    /// Damaged or incomplete bytes running to the end of the segment,
    /// typically a write torn by a crash.
    TornTail { offset: u64, len: u64 },
}

/// Sequential frame scanner over a whole segment held in memory.
pub struct FrameScanner<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FrameScanner<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn try_frame_at(&self, at: usize) -> Option<(FrameHeader, &'a [u8])> {
        let rest = &self.data[at..];
        let head: &[u8; FrameHeader::SIZE] = rest.get(..FrameHeader::SIZE)?.try_into().ok()?;
        let header = FrameHeader::parse(head).ok()?;
        let end = FrameHeader::SIZE + header.payload_len as usize;
        let payload = rest.get(FrameHeader::SIZE..end)?;
        header.verify(payload).ok()?;
        Some((header, payload))
    }

    /// Next position after `from` that starts with a verifiable frame.
    fn resync(&self, from: usize) -> Option<usize> {
        let magic = FRAME_MAGIC.to_le_bytes();
        let mut at = from;
        while at + FrameHeader::SIZE <= self.data.len() {
            let hit = self.data[at..].windows(4).position(|w| w == magic)?;
            let candidate = at + hit;
            if self.try_frame_at(candidate).is_some() {
                return Some(candidate);
            }
            at = candidate + 1;
        }
        None
    }
}

impl<'a> Iterator for FrameScanner<'a> {
    type Item = ScannedFrame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let offset = self.pos;

        if let Some((header, payload)) = self.try_frame_at(offset) {
            self.pos += header.frame_len() as usize;
            return Some(ScannedFrame::Valid {
                offset: offset as u64,
                header,
                payload,
            });
        }

        match self.resync(offset + 1) {
            Some(next) => {
                self.pos = next;
                Some(ScannedFrame::Corrupt {
                    offset: offset as u64,
                    len: (next - offset) as u64,
                })
            }
            None => {
                self.pos = self.data.len();
                Some(ScannedFrame::TornTail {
                    offset: offset as u64,
                    len: (self.data.len() - offset) as u64,
                })
            }
        }
    }
}
