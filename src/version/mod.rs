//! Versions and read state.
//!
//! A [`Version`] is an immutable snapshot of the LSM's file metadata:
//! one ordered list of tables per level. Level 0 is newest-first and
//! may overlap; levels ≥ 1 are disjoint and sorted by smallest key.
//!
//! Versions are never mutated. An edit (today: a flush result)
//! produces a successor via [`Version::apply`] under the engine
//! mutex; readers continue on the `Arc<Version>` they captured. A
//! table file is deletable only once no version references its
//! metadata — the engine checks `Arc` reference counts when it
//! sweeps obsolete files.
//!
//! [`ReadState`] is the atomically swappable reader view: the
//! memtable queue plus the current version. The engine publishes a
//! new `Arc<ReadState>` on every rotation and flush; readers clone
//! the `Arc` and are untouched by later swaps.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::encoding::{self, ByteReader, EncodingError};
use crate::key::{InternalKey, SeqNum};
use crate::memtable::Memtable;

/// Number of LSM levels.
pub const NUM_LEVELS: usize = 7;

// ------------------------------------------------------------------------------------------------
// TableMeta
// ------------------------------------------------------------------------------------------------

/// Immutable metadata of one table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    /// File number; names the file on disk.
    pub file_num: u64,
    /// File size in bytes.
    pub size: u64,
    /// Smallest internal key in the file.
    pub smallest: InternalKey,
    /// Largest internal key in the file.
    pub largest: InternalKey,
    /// Lowest seqnum in the file.
    pub min_seq: SeqNum,
    /// Highest seqnum in the file.
    pub max_seq: SeqNum,
}

impl encoding::Encode for TableMeta {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.file_num, buf)?;
        encoding::Encode::encode_to(&self.size, buf)?;
        encoding::Encode::encode_to(&self.smallest, buf)?;
        encoding::Encode::encode_to(&self.largest, buf)?;
        encoding::Encode::encode_to(&self.min_seq, buf)?;
        encoding::Encode::encode_to(&self.max_seq, buf)?;
        Ok(())
    }
}

impl encoding::Decode for TableMeta {
    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            file_num: u64::decode_from(r)?,
            size: u64::decode_from(r)?,
            smallest: InternalKey::decode_from(r)?,
            largest: InternalKey::decode_from(r)?,
            min_seq: u64::decode_from(r)?,
            max_seq: u64::decode_from(r)?,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// VersionEdit
// ------------------------------------------------------------------------------------------------

/// A delta applied to a version: files added and removed per level,
/// plus bookkeeping the manifest persists alongside.
#[derive(Debug, Default, Clone)]
pub struct VersionEdit {
    /// Tables added, with their target level.
    pub added: Vec<(u32, TableMeta)>,
    /// Tables removed, by level and file number.
    pub deleted: Vec<(u32, u64)>,
}

// ------------------------------------------------------------------------------------------------
// Version
// ------------------------------------------------------------------------------------------------

/// An immutable per-level list of table metadata.
#[derive(Debug)]
pub struct Version {
    /// `levels[0]` newest-first and overlapping; `levels[1..]`
    /// disjoint, sorted by smallest key.
    pub levels: Vec<Vec<Arc<TableMeta>>>,
}

impl Version {
    /// The empty version.
    pub fn empty() -> Self {
        Self {
            levels: vec![Vec::new(); NUM_LEVELS],
        }
    }

    /// Applies an edit, producing the successor version.
    ///
    /// New L0 tables are prepended (newest first); tables on deeper
    /// levels are kept sorted by smallest key.
    pub fn apply(&self, edit: &VersionEdit) -> Version {
        let mut levels = self.levels.clone();

        for (level, file_num) in &edit.deleted {
            let level = *level as usize;
            if level < levels.len() {
                levels[level].retain(|m| m.file_num != *file_num);
            }
        }

        for (level, meta) in &edit.added {
            let level = *level as usize;
            if level >= levels.len() {
                continue;
            }
            let meta = Arc::new(meta.clone());
            if level == 0 {
                levels[0].insert(0, meta);
            } else {
                let pos = levels[level].partition_point(|m| m.smallest < meta.smallest);
                levels[level].insert(pos, meta);
            }
        }

        Version { levels }
    }

    /// Every file number referenced by this version.
    pub fn live_file_nums(&self) -> Vec<u64> {
        self.levels
            .iter()
            .flat_map(|l| l.iter().map(|m| m.file_num))
            .collect()
    }

    /// Total number of tables across all levels.
    pub fn table_count(&self) -> usize {
        self.levels.iter().map(|l| l.len()).sum()
    }

    /// Number of tables in level 0.
    pub fn l0_len(&self) -> usize {
        self.levels[0].len()
    }
}

// ------------------------------------------------------------------------------------------------
// ReadState
// ------------------------------------------------------------------------------------------------

/// The atomically swappable reader view: a consistent pair of
/// memtable queue and version.
///
/// The engine publishes a fresh `Arc<ReadState>` under its mutex;
/// readers clone the `Arc` out of an `RwLock` (held only for the
/// clone) and then run entirely on their copy.
#[derive(Debug)]
pub struct ReadState {
    /// Memtable queue, oldest → newest. The last entry is the only
    /// mutable memtable.
    pub memtables: Vec<Arc<Memtable>>,
    /// Current version.
    pub version: Arc<Version>,
}

impl ReadState {
    /// The mutable memtable at the queue tail.
    pub fn mutable_memtable(&self) -> Option<&Arc<Memtable>> {
        self.memtables.last()
    }

    /// Number of immutable memtables pending flush.
    pub fn immutable_count(&self) -> usize {
        self.memtables.len().saturating_sub(1)
    }
}
