use crate::error::{PersistenceError, Result};
use byteorder::{ByteOrder, LittleEndian};
use crc64fast::Digest;
use exposure_kernel::types::id::Epoch;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Progress markers that must survive a restart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermarks {
    /// Highest epoch whose batch has been fully matched. Batches at or below
    /// it are stale.
    pub completed_through: Option<Epoch>,
    /// Records observed before this instant have been swept.
    pub retention_cutoff: u64,
    pub last_sweep_at: u64,
    pub last_match_at: u64,
}

impl Watermarks {
    pub const SIZE: usize = 4 + 4 + 1 + 3 + 8 + 8 + 8 + 8 + 8; // 52 bytes
    pub const MAGIC: [u8; 4] = *b"EXPW";
    pub const VERSION: u32 = 1;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&Self::MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], Self::VERSION);
        buf[8] = self.completed_through.is_some() as u8;
        // 9..12 reserved
        LittleEndian::write_u64(&mut buf[12..20], self.completed_through.map_or(0, |e| e.0));
        LittleEndian::write_u64(&mut buf[20..28], self.retention_cutoff);
        LittleEndian::write_u64(&mut buf[28..36], self.last_sweep_at);
        LittleEndian::write_u64(&mut buf[36..44], self.last_match_at);
        let crc = crc_of(&buf[..44]);
        LittleEndian::write_u64(&mut buf[44..52], crc);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() != Self::SIZE {
            return Err(PersistenceError::InvalidFormat(format!(
                "watermark file is {} bytes, expected {}",
                buf.len(),
                Self::SIZE
            )));
        }
        if buf[0..4] != Self::MAGIC {
            return Err(PersistenceError::InvalidMagic);
        }
        let version = LittleEndian::read_u32(&buf[4..8]);
        if version != Self::VERSION {
            return Err(PersistenceError::UnsupportedVersion(version));
        }
        let expected = LittleEndian::read_u64(&buf[44..52]);
        let found = crc_of(&buf[..44]);
        if expected != found {
            return Err(PersistenceError::ChecksumMismatch { expected, found });
        }

        let completed_through = match buf[8] {
            0 => None,
            _ => Some(Epoch(LittleEndian::read_u64(&buf[12..20]))),
        };
        Ok(Self {
            completed_through,
            retention_cutoff: LittleEndian::read_u64(&buf[20..28]),
            last_sweep_at: LittleEndian::read_u64(&buf[28..36]),
            last_match_at: LittleEndian::read_u64(&buf[36..44]),
        })
    }

    /// Whether a batch for `epoch` has already been fully processed.
    pub fn is_stale(&self, epoch: Epoch) -> bool {
        self.completed_through.is_some_and(|done| epoch <= done)
    }
}

fn crc_of(bytes: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(bytes);
    digest.sum64()
}

/// Replace the watermark file atomically (tmp + fsync + rename).
pub fn write_to(path: impl AsRef<Path>, marks: &Watermarks) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&marks.to_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read the watermark file; a missing file means nothing has happened yet.
pub fn read_or_default(path: impl AsRef<Path>) -> Result<Watermarks> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Watermarks::default());
    }
    Watermarks::from_bytes(&fs::read(path)?)
}
