//! Write-ahead logging.
//!
//! A generic, CRC-protected, append-only log. The commit pipeline
//! appends batch payloads to it; the manifest reuses the same framing
//! for its event log. Any record type implementing [`WalData`] (the
//! crate [`encoding`](crate::encoding) traits plus `Send + Sync`) can
//! be stored.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES][HEADER_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! ...
//! ```
//!
//! - **Header** — a [`WalHeader`] followed by a 4-byte CRC32.
//! - **Record** — 4-byte little-endian length, payload bytes, 4-byte
//!   CRC32 over `len || payload`. A batch is one record; a record may
//!   be arbitrarily large up to the configured limit.
//!
//! # Durability
//!
//! `append` and `append_group` take an explicit `sync` flag; the
//! commit pipeline maps the engine's sync mode onto it (`None` never
//! syncs, `PerBatch` syncs every append, `Group` syncs once per
//! leader-written group, amortizing the fsync).
//!
//! # Recovery
//!
//! [`WalIter`] replays records sequentially, verifying each CRC.
//! Replay surfaces `ChecksumMismatch` / `UnexpectedEof` for a torn
//! tail; recovery treats those as the end of the durable log and
//! anything else as corruption.

#[cfg(test)]
mod tests;

use std::{
    ffi::OsStr,
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::encoding::{self, EncodingError};

const U32_SIZE: usize = std::mem::size_of::<u32>();

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Data integrity failure — checksum did not match.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Record exceeds the configured maximum size.
    #[error("record size exceeds limit ({0} bytes)")]
    RecordTooLarge(usize),

    /// Unexpected end-of-file during read (torn tail).
    #[error("unexpected end of file")]
    UnexpectedEof,

    /// WAL header failed integrity validation.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WalError {
    /// Whether this error marks a torn tail rather than corruption of
    /// settled data. Recovery stops cleanly at a torn tail.
    pub fn is_torn_tail(&self) -> bool {
        matches!(self, WalError::ChecksumMismatch | WalError::UnexpectedEof)
    }
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// Metadata written at the start of every WAL segment.
#[derive(Debug)]
pub struct WalHeader {
    /// Magic constant identifying segment files (`b"SWAL"`).
    magic: [u8; 4],

    /// WAL format version.
    version: u32,

    /// Maximum record size (in bytes).
    max_record_size: u32,

    /// Segment number; matches the number in the file name.
    segment: u64,
}

impl WalHeader {
    /// Expected 4-byte magic constant.
    pub const MAGIC: [u8; 4] = *b"SWAL";

    /// Current supported version number.
    pub const VERSION: u32 = 1;

    /// Default maximum record size (64 MiB — a batch is one record).
    pub const DEFAULT_MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

    /// Encoded size of the header (without the trailing CRC):
    /// `magic(4) + version(4) + max_record_size(4) + segment(8)`.
    pub const ENCODED_SIZE: usize = 4 + 4 + 4 + 8;

    /// Total on-disk size including the trailing CRC32.
    pub const HEADER_DISK_SIZE: usize = Self::ENCODED_SIZE + U32_SIZE;

    fn new(max_record_size: u32, segment: u64) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            max_record_size,
            segment,
        }
    }

    /// Returns the segment number recorded in the header.
    pub fn segment(&self) -> u64 {
        self.segment
    }
}

impl encoding::Encode for WalHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.magic, buf)?;
        encoding::Encode::encode_to(&self.version, buf)?;
        encoding::Encode::encode_to(&self.max_record_size, buf)?;
        encoding::Encode::encode_to(&self.segment, buf)?;
        Ok(())
    }
}

impl encoding::Decode for WalHeader {
    fn decode_from(r: &mut encoding::ByteReader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            magic: <[u8; 4]>::decode_from(r)?,
            version: u32::decode_from(r)?,
            max_record_size: u32::decode_from(r)?,
            segment: u64::decode_from(r)?,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// WalData
// ------------------------------------------------------------------------------------------------

/// Marker trait for record types storable in a [`Wal`].
pub trait WalData: encoding::Encode + encoding::Decode + std::fmt::Debug + Send + Sync {}
impl<T> WalData for T where T: encoding::Encode + encoding::Decode + std::fmt::Debug + Send + Sync {}

/// Formats the canonical segment file name for a segment number.
pub fn segment_file_name(segment: u64) -> String {
    format!("wal-{segment:06}.log")
}

// ------------------------------------------------------------------------------------------------
// Wal
// ------------------------------------------------------------------------------------------------

/// A thread-safe append-only log segment.
///
/// The file handle is shared behind `Arc<Mutex<_>>` so replay
/// iterators can coexist with appenders; each lock hold covers one
/// record.
#[derive(Debug)]
pub struct Wal<T: WalData> {
    /// Shared file handle.
    inner_file: Arc<Mutex<File>>,

    /// Path to the segment on disk.
    path: PathBuf,

    /// Validated segment header.
    header: WalHeader,

    _phantom: std::marker::PhantomData<T>,
}

impl<T: WalData> Wal<T> {
    /// Opens or creates a segment at `path`.
    ///
    /// The file name must be `wal-<segment>.log`; the embedded segment
    /// number is validated against the header of an existing file.
    pub fn open<P: AsRef<Path>>(path: P, max_record_size: Option<u32>) -> Result<Self, WalError> {
        let path_ref = path.as_ref();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path_ref)?;

        let segment = Self::parse_segment_from_path(path_ref)
            .ok_or_else(|| WalError::Internal("segment file name not recognized".into()))?;

        let header = if file.metadata()?.len() == 0 {
            let header = WalHeader::new(
                max_record_size.unwrap_or(WalHeader::DEFAULT_MAX_RECORD_SIZE),
                segment,
            );
            write_header(&mut file, &header)?;
            file.sync_all()?;
            info!(path = %path_ref.display(), segment, "WAL segment created");
            header
        } else {
            file.seek(SeekFrom::Start(0))?;
            let header = read_and_validate_header(&mut file)?;
            if header.segment != segment {
                return Err(WalError::InvalidHeader("segment number mismatch".into()));
            }
            debug!(
                path = %path_ref.display(),
                segment = header.segment,
                "WAL segment header validated"
            );
            header
        };

        Ok(Self {
            inner_file: Arc::new(Mutex::new(file)),
            path: path_ref.to_path_buf(),
            header,
            _phantom: std::marker::PhantomData,
        })
    }

    /// Parse the segment number from a `wal-<segment>.log` file name.
    pub fn parse_segment_from_path(path: &Path) -> Option<u64> {
        let name = path.file_name().and_then(OsStr::to_str)?;
        name.strip_prefix("wal-")
            .and_then(|s| s.strip_suffix(".log"))
            .and_then(|s| s.parse::<u64>().ok())
    }

    /// Appends a single record, syncing when `sync` is set.
    pub fn append(&self, record: &T, sync: bool) -> Result<(), WalError> {
        self.append_group(std::slice::from_ref(record), sync)
    }

    /// Appends a group of records under one lock hold and at most one
    /// fsync. This is the group-commit path: the WAL leader batches
    /// the group's payloads and pays the sync cost once.
    pub fn append_group(&self, records: &[T], sync: bool) -> Result<(), WalError> {
        let mut encoded = Vec::with_capacity(records.len());
        for record in records {
            let payload = encoding::encode_to_vec(record)?;
            let len = u32::try_from(payload.len())
                .map_err(|_| WalError::RecordTooLarge(payload.len()))?;
            if len > self.header.max_record_size {
                return Err(WalError::RecordTooLarge(len as usize));
            }
            encoded.push(payload);
        }

        let mut guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("mutex poisoned".into()))?;

        for payload in &encoded {
            let len_bytes = (payload.len() as u32).to_le_bytes();
            let checksum = compute_crc(&[&len_bytes, payload]);
            guard.write_all(&len_bytes)?;
            guard.write_all(payload)?;
            guard.write_all(&checksum.to_le_bytes())?;
            trace!(
                segment = self.header.segment,
                len = payload.len(),
                "WAL record appended"
            );
        }
        if sync {
            guard.sync_all()?;
        }
        Ok(())
    }

    /// Forces an fsync of the segment.
    pub fn sync(&self) -> Result<(), WalError> {
        let guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("mutex poisoned".into()))?;
        guard.sync_all()?;
        Ok(())
    }

    /// Returns an iterator replaying all records from the segment.
    pub fn replay_iter(&self) -> Result<WalIter<T>, WalError> {
        debug!(path = %self.path.display(), "WAL replay started");
        Ok(WalIter {
            file: Arc::clone(&self.inner_file),
            offset: WalHeader::HEADER_DISK_SIZE as u64,
            max_record_size: self.header.max_record_size as usize,
            _phantom: std::marker::PhantomData,
        })
    }

    /// Truncates the segment back to just its header.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        let mut guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("mutex poisoned".into()))?;
        guard.set_len(0)?;
        guard.seek(SeekFrom::Start(0))?;
        write_header(&mut *guard, &self.header)?;
        guard.sync_all()?;
        info!(path = %self.path.display(), "WAL segment truncated");
        Ok(())
    }

    /// Path of the underlying segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Segment number of this WAL.
    pub fn segment(&self) -> u64 {
        self.header.segment
    }

    /// Current on-disk size in bytes.
    pub fn file_size(&self) -> Result<u64, WalError> {
        let guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("mutex poisoned".into()))?;
        Ok(guard.metadata()?.len())
    }
}

impl<T: WalData> Drop for Wal<T> {
    fn drop(&mut self) {
        match self.inner_file.lock() {
            Ok(guard) => {
                if let Err(e) = guard.sync_all() {
                    error!(path = %self.path.display(), error = %e, "WAL sync failed on drop");
                }
            }
            Err(poisoned) => {
                let file = poisoned.into_inner();
                if let Err(e) = file.sync_all() {
                    error!(path = %self.path.display(), error = %e, "WAL sync failed on drop (poisoned lock)");
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// WalIter
// ------------------------------------------------------------------------------------------------

/// Streaming replay iterator.
///
/// Reads one record per step, seeking to its own logical offset each
/// time so it can share the file with concurrent appenders. Holds an
/// `Arc` on the file handle and may outlive the [`Wal`].
pub struct WalIter<T: WalData> {
    file: Arc<Mutex<File>>,
    offset: u64,
    max_record_size: usize,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: WalData> Iterator for WalIter<T> {
    type Item = Result<T, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut guard = match self.file.lock() {
            Ok(g) => g,
            Err(_) => return Some(Err(WalError::Internal("mutex poisoned".into()))),
        };

        if let Err(e) = guard.seek(SeekFrom::Start(self.offset)) {
            return Some(Err(WalError::Io(e)));
        }

        let mut len_bytes = [0u8; U32_SIZE];
        match guard.read_exact(&mut len_bytes) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                trace!(offset = self.offset, "WAL replay reached end of file");
                return None;
            }
            Err(e) => return Some(Err(WalError::Io(e))),
        }

        let record_len = u32::from_le_bytes(len_bytes) as usize;
        if record_len > self.max_record_size {
            return Some(Err(WalError::RecordTooLarge(record_len)));
        }

        let mut record_bytes = vec![0u8; record_len];
        if let Err(e) = guard.read_exact(&mut record_bytes) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                warn!(
                    offset = self.offset,
                    len = record_len,
                    "WAL truncated record (partial payload)"
                );
                return Some(Err(WalError::UnexpectedEof));
            }
            return Some(Err(WalError::Io(e)));
        }

        let mut checksum_bytes = [0u8; U32_SIZE];
        if let Err(e) = guard.read_exact(&mut checksum_bytes) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                warn!(
                    offset = self.offset,
                    len = record_len,
                    "WAL truncated record (partial checksum)"
                );
                return Some(Err(WalError::UnexpectedEof));
            }
            return Some(Err(WalError::Io(e)));
        }
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        if let Ok(pos) = guard.stream_position() {
            self.offset = pos;
        }

        if let Err(e) = verify_crc(&[&len_bytes, &record_bytes], stored_checksum) {
            warn!(offset = self.offset, len = record_len, "WAL record checksum mismatch");
            return Some(Err(e));
        }

        match encoding::decode_from_slice::<T>(&record_bytes) {
            Ok(record) => Some(Ok(record)),
            Err(e) => Some(Err(WalError::Encoding(e))),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Header I/O helpers
// ------------------------------------------------------------------------------------------------

fn write_header<W: Write>(writer: &mut W, header: &WalHeader) -> Result<(), WalError> {
    let header_bytes = encoding::encode_to_vec(header)?;
    let checksum = compute_crc(&[&header_bytes]);
    writer.write_all(&header_bytes)?;
    writer.write_all(&checksum.to_le_bytes())?;
    Ok(())
}

fn read_and_validate_header<R: Read>(reader: &mut R) -> Result<WalHeader, WalError> {
    let mut header_bytes = vec![0u8; WalHeader::ENCODED_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let mut checksum_bytes = [0u8; U32_SIZE];
    reader.read_exact(&mut checksum_bytes)?;
    let stored_checksum = u32::from_le_bytes(checksum_bytes);

    verify_crc(&[&header_bytes], stored_checksum)
        .map_err(|_| WalError::InvalidHeader("header checksum mismatch".into()))?;

    let header = encoding::decode_from_slice::<WalHeader>(&header_bytes)?;

    if header.magic != WalHeader::MAGIC {
        return Err(WalError::InvalidHeader("bad magic".into()));
    }
    if header.version != WalHeader::VERSION {
        return Err(WalError::InvalidHeader(format!(
            "unsupported version {}",
            header.version
        )));
    }
    Ok(header)
}

// ------------------------------------------------------------------------------------------------
// CRC helpers
// ------------------------------------------------------------------------------------------------

fn compute_crc(parts: &[&[u8]]) -> u32 {
    let mut hasher = Crc32::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

fn verify_crc(parts: &[&[u8]], expected: u32) -> Result<(), WalError> {
    if compute_crc(parts) != expected {
        return Err(WalError::ChecksumMismatch);
    }
    Ok(())
}
