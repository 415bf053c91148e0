// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Segment files.
//!
//! A segment is an append-only file of framed records. Only the active
//! segment is ever written; sealed segments are read-only until a sweep
//! replaces them. Segments are shared as `Arc<Segment>` between the index and
//! in-flight scans, and a retired segment's file is removed when the last
//! reference goes away.

use exposure_kernel::codec;
use exposure_kernel::record::EventRecord;
use exposure_persistence::frame::{encode_frame, FrameScanner, ScannedFrame};
use exposure_persistence::layout::segment_file_name;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Segment {
    id: u64,
    path: PathBuf,
    retired: AtomicBool,
}

impl Segment {
    pub fn new(dir: &Path, id: u64) -> Self {
        Self {
            id,
            path: dir.join(segment_file_name(id)),
            retired: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file once nothing references this segment any more.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.retired.load(Ordering::Acquire) {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed retired segment {:?}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove retired segment {:?}: {}", self.path, e),
        }
    }
}

/// The segment currently receiving appends.
pub struct ActiveSegment {
    segment: Arc<Segment>,
    writer: BufWriter<File>,
    len: u64,
}

impl ActiveSegment {
    pub fn create(dir: &Path, id: u64) -> io::Result<Self> {
        let segment = Arc::new(Segment::new(dir, id));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(segment.path())?;
        Ok(Self {
            segment,
            writer: BufWriter::new(file),
            len: 0,
        })
    }

    /// Continue appending to a recovered segment whose valid prefix is
    /// `valid_len` bytes. Anything after it is cut off first.
    pub fn reopen(segment: Arc<Segment>, valid_len: u64) -> io::Result<Self> {
        let file = OpenOptions::new().write(true).open(segment.path())?;
        if file.metadata()?.len() != valid_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        drop(file);
        let file = OpenOptions::new().append(true).open(segment.path())?;
        Ok(Self {
            segment,
            writer: BufWriter::new(file),
            len: valid_len,
        })
    }

    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Write one frame and make it durable. Returns `(offset, frame_len)`.
    ///
    /// On failure the segment is cut back to its previous length so a later
    /// append never lands behind a partial frame.
    pub fn append(&mut self, seq: u64, payload: &[u8]) -> io::Result<(u64, u64)> {
        let frame = encode_frame(seq, payload);
        let offset = self.len;

        let written = self
            .writer
            .write_all(&frame)
            .and_then(|_| self.writer.flush())
            .and_then(|_| self.writer.get_ref().sync_data());

        if let Err(e) = written {
            self.rollback(offset);
            return Err(e);
        }

        self.len += frame.len() as u64;
        Ok((offset, frame.len() as u64))
    }

    fn rollback(&mut self, len: u64) {
        // Drop whatever the BufWriter still holds before cutting the file.
        let file = match self.writer.get_ref().try_clone() {
            Ok(f) => f,
            Err(e) => {
                warn!("Segment {} rollback failed: {}", self.segment.id(), e);
                return;
            }
        };
        self.writer = BufWriter::new(file);
        if let Err(e) = self.writer.get_ref().set_len(len) {
            warn!("Segment {} rollback to {} failed: {}", self.segment.id(), len, e);
        }
    }
}

/// One valid record found while scanning a segment.
pub struct RecoveredFrame {
    pub offset: u64,
    pub frame_len: u64,
    pub seq: u64,
    pub record: EventRecord,
}

pub struct SegmentScan {
    pub frames: Vec<RecoveredFrame>,
    /// Frames that failed verification or did not decode.
    pub corrupt: u64,
    /// Length of the prefix that ends with the last whole frame.
    pub valid_len: u64,
    /// Bytes of a torn write at the end of the file.
    pub torn_tail: Option<u64>,
}

/// Read a whole segment and decode every frame that verifies.
pub fn scan_segment(segment: &Segment) -> io::Result<SegmentScan> {
    let data = fs::read(segment.path())?;
    let mut scan = SegmentScan {
        frames: Vec::new(),
        corrupt: 0,
        valid_len: data.len() as u64,
        torn_tail: None,
    };

    for frame in FrameScanner::new(&data) {
        match frame {
            ScannedFrame::Valid { offset, header, payload } => match codec::decode(payload) {
                Ok(record) => scan.frames.push(RecoveredFrame {
                    offset,
                    frame_len: header.frame_len(),
                    seq: header.seq,
                    record,
                }),
                Err(e) => {
                    warn!("Segment {} frame at {} does not decode: {}", segment.id(), offset, e);
                    scan.corrupt += 1;
                }
            },
            ScannedFrame::Corrupt { offset, len } => {
                warn!("Segment {}: skipping {} corrupt bytes at {}", segment.id(), len, offset);
                scan.corrupt += 1;
            }
            ScannedFrame::TornTail { offset, len } => {
                scan.valid_len = offset;
                scan.torn_tail = Some(len);
            }
        }
    }
    Ok(scan)
}
