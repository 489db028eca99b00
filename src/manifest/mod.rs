//! Manifest — the durable metadata authority.
//!
//! Tracks everything the engine must reconstruct after a crash:
//!
//! - the last durably-acknowledged sequence number,
//! - the oldest live WAL segment (everything newer gets replayed),
//! - the per-level table lists (the current [`Version`]'s contents),
//! - the monotonic file-number counter shared by WALs and tables,
//! - the comparator name the database was created under.
//!
//! ## Durability model
//!
//! WAL + periodic snapshot:
//!
//! 1. Every mutation appends a [`ManifestEvent`] to `manifest.wal`
//!    (the generic [`Wal`] framing) before touching in-memory state.
//! 2. [`Manifest::checkpoint`] serializes the whole
//!    [`ManifestData`] into `MANIFEST-000001` (checksummed, written
//!    via temp-file + rename + directory fsync) and truncates the
//!    event log.
//! 3. On open: load the snapshot when valid, then replay the event
//!    log on top. A corrupt snapshot falls back to full log replay —
//!    the log is ground truth, snapshots are an optimization.
//!
//! ## Thread safety
//!
//! The event WAL is internally synchronized; `ManifestData` sits
//! behind a mutex. Only `checkpoint` takes `&mut self`, because it
//! truncates the log and must not race appenders.

#[cfg(test)]
mod tests;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{info, warn};

use crate::encoding::{self, ByteReader, EncodingError};
use crate::key::SeqNum;
use crate::version::{NUM_LEVELS, TableMeta, VersionEdit};
use crate::wal::{Wal, WalError};

const SNAPSHOT_FILENAME: &str = "MANIFEST-000001";
const SNAPSHOT_TMP_SUFFIX: &str = "tmp";
/// Fixed single-segment event log; truncated on checkpoint.
const LOG_FILENAME: &str = "wal-000000.log";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying event-log failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Snapshot failed checksum validation.
    #[error("snapshot checksum mismatch")]
    SnapshotChecksumMismatch,

    /// The database was created under a different comparator.
    #[error("comparator mismatch: db uses {stored:?}, options use {given:?}")]
    ComparatorMismatch {
        /// Name recorded in the manifest.
        stored: String,
        /// Name supplied by the caller.
        given: String,
    },

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// ManifestData
// ------------------------------------------------------------------------------------------------

/// In-memory image of the durable metadata.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ManifestData {
    /// Manifest format version.
    version: u64,

    /// Last sequence number known durable.
    last_seq: SeqNum,

    /// Oldest WAL segment still holding unflushed writes. Segments
    /// below this number are deletable.
    active_wal: u64,

    /// Next file number; shared by WAL segments and tables.
    next_file_num: u64,

    /// Comparator name the database was created under.
    comparator: String,

    /// Per-level table metadata; the durable image of the current
    /// version.
    levels: Vec<Vec<TableMeta>>,

    /// Runtime-only: diverged from the last snapshot. Not persisted.
    dirty: bool,
}

impl Default for ManifestData {
    fn default() -> Self {
        Self {
            version: 1,
            last_seq: 0,
            active_wal: 0,
            next_file_num: 1,
            comparator: String::new(),
            levels: vec![Vec::new(); NUM_LEVELS],
            dirty: false,
        }
    }
}

impl encoding::Encode for ManifestData {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.version, buf)?;
        encoding::Encode::encode_to(&self.last_seq, buf)?;
        encoding::Encode::encode_to(&self.active_wal, buf)?;
        encoding::Encode::encode_to(&self.next_file_num, buf)?;
        encoding::Encode::encode_to(&self.comparator, buf)?;
        encoding::Encode::encode_to(&(self.levels.len() as u32), buf)?;
        for level in &self.levels {
            encoding::encode_vec(level, buf)?;
        }
        Ok(())
    }
}

impl encoding::Decode for ManifestData {
    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, EncodingError> {
        let version = u64::decode_from(r)?;
        let last_seq = u64::decode_from(r)?;
        let active_wal = u64::decode_from(r)?;
        let next_file_num = u64::decode_from(r)?;
        let comparator = String::decode_from(r)?;
        let level_count = u32::decode_from(r)? as usize;
        if level_count > NUM_LEVELS {
            return Err(EncodingError::Custom(format!(
                "manifest claims {level_count} levels"
            )));
        }
        let mut levels = Vec::with_capacity(NUM_LEVELS);
        for _ in 0..level_count {
            levels.push(encoding::decode_vec::<TableMeta>(r)?);
        }
        levels.resize(NUM_LEVELS, Vec::new());
        Ok(Self {
            version,
            last_seq,
            active_wal,
            next_file_num,
            comparator,
            levels,
            dirty: false,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// ManifestEvent
// ------------------------------------------------------------------------------------------------

/// One metadata mutation in the event log.
#[derive(Debug)]
pub enum ManifestEvent {
    /// Advances the durable last sequence number.
    SetLastSeq {
        /// New last sequence number.
        seq: SeqNum,
    },

    /// Moves the oldest-live-WAL watermark.
    SetActiveWal {
        /// New oldest live segment.
        segment: u64,
    },

    /// Persists a file-number allocation.
    AllocateFileNum {
        /// The number handed out.
        file_num: u64,
    },

    /// Records the comparator name at creation.
    SetComparator {
        /// Comparator name.
        name: String,
    },

    /// Atomic version edit: tables added/removed, and optionally a
    /// new active-WAL watermark, in one crash-safe record.
    ApplyEdit {
        /// Tables added, with level.
        added: Vec<(u32, TableMeta)>,
        /// Tables removed, by (level, file number).
        deleted: Vec<(u32, u64)>,
        /// New watermark, when the edit retires WAL segments.
        active_wal: Option<u64>,
    },
}

impl encoding::Encode for ManifestEvent {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            ManifestEvent::SetLastSeq { seq } => {
                encoding::Encode::encode_to(&0u32, buf)?;
                encoding::Encode::encode_to(seq, buf)?;
            }
            ManifestEvent::SetActiveWal { segment } => {
                encoding::Encode::encode_to(&1u32, buf)?;
                encoding::Encode::encode_to(segment, buf)?;
            }
            ManifestEvent::AllocateFileNum { file_num } => {
                encoding::Encode::encode_to(&2u32, buf)?;
                encoding::Encode::encode_to(file_num, buf)?;
            }
            ManifestEvent::SetComparator { name } => {
                encoding::Encode::encode_to(&3u32, buf)?;
                encoding::Encode::encode_to(name, buf)?;
            }
            ManifestEvent::ApplyEdit {
                added,
                deleted,
                active_wal,
            } => {
                encoding::Encode::encode_to(&4u32, buf)?;
                encoding::Encode::encode_to(&(added.len() as u32), buf)?;
                for (level, meta) in added {
                    encoding::Encode::encode_to(level, buf)?;
                    encoding::Encode::encode_to(meta, buf)?;
                }
                encoding::Encode::encode_to(&(deleted.len() as u32), buf)?;
                for (level, file_num) in deleted {
                    encoding::Encode::encode_to(level, buf)?;
                    encoding::Encode::encode_to(file_num, buf)?;
                }
                encoding::Encode::encode_to(active_wal, buf)?;
            }
        }
        Ok(())
    }
}

impl encoding::Decode for ManifestEvent {
    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, EncodingError> {
        let tag = u32::decode_from(r)?;
        match tag {
            0 => Ok(ManifestEvent::SetLastSeq {
                seq: u64::decode_from(r)?,
            }),
            1 => Ok(ManifestEvent::SetActiveWal {
                segment: u64::decode_from(r)?,
            }),
            2 => Ok(ManifestEvent::AllocateFileNum {
                file_num: u64::decode_from(r)?,
            }),
            3 => Ok(ManifestEvent::SetComparator {
                name: String::decode_from(r)?,
            }),
            4 => {
                let added_count = u32::decode_from(r)? as usize;
                let mut added = Vec::with_capacity(added_count.min(1024));
                for _ in 0..added_count {
                    let level = u32::decode_from(r)?;
                    let meta = TableMeta::decode_from(r)?;
                    added.push((level, meta));
                }
                let deleted_count = u32::decode_from(r)? as usize;
                let mut deleted = Vec::with_capacity(deleted_count.min(1024));
                for _ in 0..deleted_count {
                    let level = u32::decode_from(r)?;
                    let file_num = u64::decode_from(r)?;
                    deleted.push((level, file_num));
                }
                let active_wal = Option::<u64>::decode_from(r)?;
                Ok(ManifestEvent::ApplyEdit {
                    added,
                    deleted,
                    active_wal,
                })
            }
            _ => Err(EncodingError::InvalidTag {
                tag,
                type_name: "ManifestEvent",
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Snapshot
// ------------------------------------------------------------------------------------------------

/// On-disk snapshot payload: data followed by a trailing CRC32.
#[derive(Debug)]
struct ManifestSnapshot {
    data: ManifestData,
    checksum: u32,
}

impl encoding::Encode for ManifestSnapshot {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.data, buf)?;
        encoding::Encode::encode_to(&self.checksum, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ManifestSnapshot {
    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            data: ManifestData::decode_from(r)?,
            checksum: u32::decode_from(r)?,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Manifest
// ------------------------------------------------------------------------------------------------

/// Persistent metadata manager.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    log: Wal<ManifestEvent>,
    data: Mutex<ManifestData>,
}

impl Manifest {
    /// Opens (or creates) the manifest in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = dir.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let snapshot_path = path.join(SNAPSHOT_FILENAME);
        let mut data = ManifestData::default();

        if snapshot_path.exists() {
            match Self::read_snapshot(&snapshot_path) {
                Ok(snap) => {
                    data = snap;
                    info!(path = %snapshot_path.display(), "manifest snapshot loaded");
                }
                Err(e) => {
                    // The event log is ground truth; a corrupt
                    // snapshot only costs a full replay.
                    warn!(
                        path = %snapshot_path.display(),
                        error = %e,
                        "manifest snapshot unreadable; replaying event log from scratch"
                    );
                    data = ManifestData::default();
                }
            }
        }

        let log = Wal::<ManifestEvent>::open(path.join(LOG_FILENAME), None)?;
        let manifest = Manifest {
            path,
            log,
            data: Mutex::new(data),
        };
        manifest.replay_log()?;
        Ok(manifest)
    }

    fn replay_log(&self) -> Result<(), ManifestError> {
        let mut count = 0usize;
        for record in self.log.replay_iter()? {
            let event = match record {
                Ok(event) => event,
                Err(e) if e.is_torn_tail() => {
                    warn!(error = %e, "manifest event log has a torn tail; stopping replay");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            let mut data = self.lock_data()?;
            Self::apply_event(&mut data, &event);
            count += 1;
        }
        if count > 0 {
            info!(events = count, "manifest event log replayed");
        }
        Ok(())
    }

    fn read_snapshot(path: &Path) -> Result<ManifestData, ManifestError> {
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        if bytes.len() < 4 {
            return Err(ManifestError::SnapshotChecksumMismatch);
        }
        let body = &bytes[..bytes.len() - 4];
        let stored = u32::from_le_bytes([
            bytes[bytes.len() - 4],
            bytes[bytes.len() - 3],
            bytes[bytes.len() - 2],
            bytes[bytes.len() - 1],
        ]);
        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != stored {
            return Err(ManifestError::SnapshotChecksumMismatch);
        }

        let snapshot = encoding::decode_from_slice::<ManifestSnapshot>(&bytes)?;
        Ok(snapshot.data)
    }

    fn lock_data(&self) -> Result<std::sync::MutexGuard<'_, ManifestData>, ManifestError> {
        self.data
            .lock()
            .map_err(|_| ManifestError::Internal("mutex poisoned".into()))
    }

    fn apply_event(data: &mut ManifestData, event: &ManifestEvent) {
        match event {
            ManifestEvent::SetLastSeq { seq } => {
                data.last_seq = data.last_seq.max(*seq);
            }
            ManifestEvent::SetActiveWal { segment } => {
                data.active_wal = *segment;
            }
            ManifestEvent::AllocateFileNum { file_num } => {
                data.next_file_num = data.next_file_num.max(file_num + 1);
            }
            ManifestEvent::SetComparator { name } => {
                data.comparator = name.clone();
            }
            ManifestEvent::ApplyEdit {
                added,
                deleted,
                active_wal,
            } => {
                for (level, file_num) in deleted {
                    let level = *level as usize;
                    if level < data.levels.len() {
                        data.levels[level].retain(|m| m.file_num != *file_num);
                    }
                }
                for (level, meta) in added {
                    let level = *level as usize;
                    if level >= data.levels.len() {
                        continue;
                    }
                    if level == 0 {
                        data.levels[0].insert(0, meta.clone());
                    } else {
                        let pos =
                            data.levels[level].partition_point(|m| m.smallest < meta.smallest);
                        data.levels[level].insert(pos, meta.clone());
                    }
                }
                if let Some(segment) = active_wal {
                    data.active_wal = *segment;
                }
            }
        }
        data.dirty = true;
    }

    fn log_and_apply(&self, event: ManifestEvent) -> Result<(), ManifestError> {
        self.log.append(&event, true)?;
        let mut data = self.lock_data()?;
        Self::apply_event(&mut data, &event);
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Accessors
    // --------------------------------------------------------------------------------------------

    /// Last durably-recorded sequence number.
    pub fn last_seq(&self) -> Result<SeqNum, ManifestError> {
        Ok(self.lock_data()?.last_seq)
    }

    /// Oldest WAL segment still holding unflushed writes.
    pub fn active_wal(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.active_wal)
    }

    /// Comparator name recorded at creation; empty on a fresh db.
    pub fn comparator(&self) -> Result<String, ManifestError> {
        Ok(self.lock_data()?.comparator.clone())
    }

    /// Per-level table metadata.
    pub fn levels(&self) -> Result<Vec<Vec<TableMeta>>, ManifestError> {
        Ok(self.lock_data()?.levels.clone())
    }

    /// Next file number without allocating it.
    pub fn peek_next_file_num(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.next_file_num)
    }

    // --------------------------------------------------------------------------------------------
    // Mutations
    // --------------------------------------------------------------------------------------------

    /// Records the comparator name; validates against an existing one.
    pub fn bind_comparator(&self, name: &str) -> Result<(), ManifestError> {
        let stored = self.comparator()?;
        if stored.is_empty() {
            return self.log_and_apply(ManifestEvent::SetComparator {
                name: name.to_string(),
            });
        }
        if stored != name {
            return Err(ManifestError::ComparatorMismatch {
                stored,
                given: name.to_string(),
            });
        }
        Ok(())
    }

    /// Advances the durable last sequence number (monotonic).
    pub fn set_last_seq(&self, seq: SeqNum) -> Result<(), ManifestError> {
        self.log_and_apply(ManifestEvent::SetLastSeq { seq })
    }

    /// Moves the oldest-live-WAL watermark.
    pub fn set_active_wal(&self, segment: u64) -> Result<(), ManifestError> {
        self.log_and_apply(ManifestEvent::SetActiveWal { segment })
    }

    /// Allocates the next file number, persisting the increment.
    /// The data lock spans the read-and-increment so concurrent
    /// callers never receive the same number.
    pub fn allocate_file_num(&self) -> Result<u64, ManifestError> {
        let mut data = self.lock_data()?;
        let file_num = data.next_file_num;
        self.log.append(&ManifestEvent::AllocateFileNum { file_num }, true)?;
        data.next_file_num = file_num + 1;
        data.dirty = true;
        Ok(file_num)
    }

    /// Atomically records a version edit, optionally advancing the
    /// active-WAL watermark in the same durable record.
    pub fn apply_edit(
        &self,
        edit: &VersionEdit,
        active_wal: Option<u64>,
    ) -> Result<(), ManifestError> {
        self.log_and_apply(ManifestEvent::ApplyEdit {
            added: edit.added.clone(),
            deleted: edit.deleted.clone(),
            active_wal,
        })
    }

    /// Serializes the current state into the snapshot file and
    /// truncates the event log.
    pub fn checkpoint(&mut self) -> Result<(), ManifestError> {
        let snapshot = ManifestSnapshot {
            data: self.lock_data()?.clone(),
            checksum: 0,
        };

        let mut bytes = encoding::encode_to_vec(&snapshot)?;
        let mut hasher = Crc32::new();
        hasher.update(&bytes[..bytes.len() - 4]);
        let checksum = hasher.finalize();
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&checksum.to_le_bytes());

        let tmp_path = self
            .path
            .join(format!("{SNAPSHOT_FILENAME}.{SNAPSHOT_TMP_SUFFIX}"));
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, self.path.join(SNAPSHOT_FILENAME))?;
        fsync_dir(&self.path)?;

        self.log.truncate()?;
        self.lock_data()?.dirty = false;

        info!(path = %self.path.display(), "manifest checkpointed");
        Ok(())
    }
}

fn fsync_dir(dir: &Path) -> Result<(), ManifestError> {
    let f = File::open(dir)?;
    f.sync_all()?;
    Ok(())
}
