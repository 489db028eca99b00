//! Table builder — writes a complete table file from sorted streams.
//!
//! Consumes point entries in internal-key order plus the range
//! tombstones and range-key records that accompany them, and produces
//! the full on-disk structure described in the
//! [module docs](super): header, data blocks, bloom filter, side
//! blocks, properties, metaindex, index, footer.
//!
//! # Input requirements
//!
//! - `points` sorted by internal key (user key ASC, trailer DESC);
//!   duplicate user keys are expected — tables store every version.
//! - `range_dels` and `range_keys` sorted by start key.
//!
//! # Atomicity
//!
//! Everything is written to `<path>.tmp`, synced, then renamed onto
//! the final path. A crash cannot leave a partially-written table
//! under the real name.

use std::fs::{File, OpenOptions, rename};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use bloomfilter::Bloom;
use tracing::debug;

use crate::encoding;
use crate::key::{Comparator, InternalKey, SeqNum, ValueKind};
use crate::record::{PointEntry, RangeKeyRecord, RangeTombstone};

use super::{
    BlockHandle, IndexEntry, META_BLOOM, META_PROPERTIES, META_RANGE_DELS, META_RANGE_KEYS,
    MetaIndexEntry, RangeDelCell, RangeKeyCell, TABLE_FOOTER_SIZE, TABLE_MAGIC, TABLE_VERSION,
    TableError, TableFooter, TableHeader, TableProperties, crc32,
};

// ------------------------------------------------------------------------------------------------
// BuiltTable
// ------------------------------------------------------------------------------------------------

/// Result of a successful build: everything the version metadata
/// needs to register the new file.
#[derive(Debug)]
pub struct BuiltTable {
    /// Properties written into the table.
    pub properties: TableProperties,
    /// Smallest internal key covered by the table.
    pub smallest: InternalKey,
    /// Largest internal key covered by the table.
    pub largest: InternalKey,
    /// Final file size in bytes.
    pub file_size: u64,
}

// ------------------------------------------------------------------------------------------------
// BuildStats
// ------------------------------------------------------------------------------------------------

struct BuildStats {
    record_count: u64,
    tombstone_count: u64,
    min_seq: SeqNum,
    max_seq: SeqNum,
    smallest_user_key: Option<Vec<u8>>,
    largest_user_key: Option<Vec<u8>>,
}

impl BuildStats {
    fn new() -> Self {
        Self {
            record_count: 0,
            tombstone_count: 0,
            min_seq: SeqNum::MAX,
            max_seq: 0,
            smallest_user_key: None,
            largest_user_key: None,
        }
    }

    fn track_seq(&mut self, seq: SeqNum) {
        self.min_seq = self.min_seq.min(seq);
        self.max_seq = self.max_seq.max(seq);
    }

    fn track_user_key(&mut self, key: &[u8]) {
        if self
            .smallest_user_key
            .as_deref()
            .is_none_or(|s| key < s)
        {
            self.smallest_user_key = Some(key.to_vec());
        }
        if self.largest_user_key.as_deref().is_none_or(|l| key > l) {
            self.largest_user_key = Some(key.to_vec());
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Block I/O helpers
// ------------------------------------------------------------------------------------------------

/// Writes a checksummed block: `[len (4 B)][payload][crc32 (4 B)]`.
/// Returns the block's handle.
fn write_checksummed_block(
    writer: &mut (impl Write + Seek),
    payload: &[u8],
) -> Result<BlockHandle, TableError> {
    let offset = writer.stream_position()?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.write_all(&crc32(payload).to_le_bytes())?;
    Ok(BlockHandle {
        offset,
        size: payload.len() as u64,
    })
}

fn write_header(writer: &mut impl Write) -> Result<(), TableError> {
    let header = TableHeader {
        magic: TABLE_MAGIC,
        version: TABLE_VERSION,
    };
    let header_bytes = encoding::encode_to_vec(&header)?;
    writer.write_all(&header_bytes)?;
    writer.write_all(&crc32(&header_bytes).to_le_bytes())?;
    Ok(())
}

fn write_footer(
    file: &mut File,
    metaindex: BlockHandle,
    index: BlockHandle,
) -> Result<u64, TableError> {
    let current = file.metadata()?.len();
    let total = current + TABLE_FOOTER_SIZE as u64;

    let footer = TableFooter {
        metaindex,
        index,
        total_file_size: total,
        footer_crc32: 0,
    };
    let crc = crc32(&encoding::encode_to_vec(&footer)?);
    let footer = TableFooter {
        footer_crc32: crc,
        ..footer
    };
    let footer_bytes = encoding::encode_to_vec(&footer)?;

    let mut writer = BufWriter::new(&mut *file);
    writer.write_all(&footer_bytes)?;
    writer.flush()?;
    drop(writer);
    file.sync_all()?;
    Ok(total)
}

/// Encodes one point cell into the current block buffer:
/// `[key_len][value_len][trailer][key][value]`.
fn encode_cell(block: &mut Vec<u8>, entry: &PointEntry) {
    block.extend_from_slice(&(entry.key.user_key.len() as u32).to_le_bytes());
    block.extend_from_slice(&(entry.value.len() as u32).to_le_bytes());
    block.extend_from_slice(&entry.key.trailer().to_le_bytes());
    block.extend_from_slice(&entry.key.user_key);
    block.extend_from_slice(&entry.value);
}

// ------------------------------------------------------------------------------------------------
// TableBuilder
// ------------------------------------------------------------------------------------------------

/// Builds one table file on disk.
pub struct TableBuilder {
    path: PathBuf,
    block_size: usize,
    bloom_fp_rate: f64,
}

impl TableBuilder {
    /// Creates a builder targeting `path`.
    ///
    /// `bloom_bits_per_key` sizes the filter; zero disables it.
    pub fn new(path: impl AsRef<Path>, block_size: usize, bloom_bits_per_key: usize) -> Self {
        // Standard approximation: fp ≈ 0.6185^(bits/key).
        let rate = if bloom_bits_per_key == 0 {
            1.0
        } else {
            0.6185f64
                .powi(bloom_bits_per_key as i32)
                .clamp(1e-6, 0.99)
        };
        Self {
            path: path.as_ref().to_path_buf(),
            block_size: block_size.max(256),
            bloom_fp_rate: rate,
        }
    }

    /// Consumes the sorted inputs and writes a complete table.
    ///
    /// The comparator supplies the prefix split: both the full user
    /// key and its prefix go into the bloom filter, so prefix seeks
    /// can short-circuit.
    pub fn build(
        self,
        cmp: &dyn Comparator,
        points: &[PointEntry],
        range_dels: &[RangeTombstone],
        range_keys: &[RangeKeyRecord],
    ) -> Result<BuiltTable, TableError> {
        if points.is_empty() && range_dels.is_empty() && range_keys.is_empty() {
            return Err(TableError::Corrupt("refusing to build an empty table".into()));
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(&mut file);

        // 1. Header.
        write_header(&mut writer)?;

        // 2. Data blocks + bloom + stats.
        let mut stats = BuildStats::new();
        let mut bloom: Option<Bloom<Vec<u8>>> = if self.bloom_fp_rate < 1.0 && !points.is_empty() {
            Some(
                Bloom::new_for_fp_rate(points.len() * 2, self.bloom_fp_rate)
                    .map_err(|e| TableError::Corrupt(e.to_string()))?,
            )
        } else {
            None
        };

        let mut index_entries: Vec<IndexEntry> = Vec::new();
        let mut block = Vec::<u8>::new();
        let mut block_first: Option<InternalKey> = None;

        for entry in points {
            stats.record_count += 1;
            if entry.key.kind.is_point_tombstone() {
                stats.tombstone_count += 1;
            }
            stats.track_seq(entry.key.seq);
            stats.track_user_key(&entry.key.user_key);

            if let Some(b) = &mut bloom {
                b.set(&entry.key.user_key);
                let split = cmp.split(&entry.key.user_key);
                if split < entry.key.user_key.len() {
                    b.set(&entry.key.user_key[..split].to_vec());
                }
            }

            if block_first.is_none() {
                block_first = Some(entry.key.clone());
            }
            encode_cell(&mut block, entry);

            if block.len() >= self.block_size {
                flush_block(&mut writer, &mut block, &mut block_first, &mut index_entries)?;
            }
        }
        if !block.is_empty() {
            flush_block(&mut writer, &mut block, &mut block_first, &mut index_entries)?;
        }

        // 3. Bloom block.
        let bloom_payload = bloom.map(|b| b.as_slice().to_vec()).unwrap_or_default();
        let bloom_handle = write_checksummed_block(&mut writer, &bloom_payload)?;

        // 4. Range tombstone block.
        let mut rd_payload = Vec::new();
        let rd_cells: Vec<RangeDelCell> = range_dels
            .iter()
            .map(|t| {
                stats.track_seq(t.seq);
                stats.track_user_key(&t.start);
                stats.track_user_key(&t.end);
                RangeDelCell {
                    start: t.start.clone(),
                    end: t.end.clone(),
                    seq: t.seq,
                }
            })
            .collect();
        encoding::encode_vec(&rd_cells, &mut rd_payload)?;
        let rd_handle = write_checksummed_block(&mut writer, &rd_payload)?;

        // 5. Range key block.
        let mut rk_payload = Vec::new();
        let rk_cells: Vec<RangeKeyCell> = range_keys
            .iter()
            .map(|rk| {
                stats.track_seq(rk.seq);
                stats.track_user_key(&rk.start);
                stats.track_user_key(&rk.end);
                RangeKeyCell {
                    kind: rk.kind as u8,
                    start: rk.start.clone(),
                    end: rk.end.clone(),
                    seq: rk.seq,
                    suffix: rk.suffix.clone(),
                    value: rk.value.clone(),
                }
            })
            .collect();
        encoding::encode_vec(&rk_cells, &mut rk_payload)?;
        let rk_handle = write_checksummed_block(&mut writer, &rk_payload)?;

        // 6. Properties block.
        let properties = TableProperties {
            record_count: stats.record_count,
            tombstone_count: stats.tombstone_count,
            range_del_count: range_dels.len() as u64,
            range_key_count: range_keys.len() as u64,
            min_seq: if stats.min_seq == SeqNum::MAX {
                0
            } else {
                stats.min_seq
            },
            max_seq: stats.max_seq,
            smallest_user_key: stats.smallest_user_key.clone().unwrap_or_default(),
            largest_user_key: stats.largest_user_key.clone().unwrap_or_default(),
        };
        let props_payload = encoding::encode_to_vec(&properties)?;
        let props_handle = write_checksummed_block(&mut writer, &props_payload)?;

        // 7. Metaindex block.
        let meta_entries = vec![
            MetaIndexEntry {
                name: META_BLOOM.to_string(),
                handle: bloom_handle,
            },
            MetaIndexEntry {
                name: META_PROPERTIES.to_string(),
                handle: props_handle,
            },
            MetaIndexEntry {
                name: META_RANGE_DELS.to_string(),
                handle: rd_handle,
            },
            MetaIndexEntry {
                name: META_RANGE_KEYS.to_string(),
                handle: rk_handle,
            },
        ];
        let mut meta_payload = Vec::new();
        encoding::encode_vec(&meta_entries, &mut meta_payload)?;
        let meta_handle = write_checksummed_block(&mut writer, &meta_payload)?;

        // 8. Index block.
        let mut index_payload = Vec::new();
        encoding::encode_vec(&index_entries, &mut index_payload)?;
        let index_handle = write_checksummed_block(&mut writer, &index_payload)?;

        // 9. Flush buffered data, then footer + sync.
        writer.flush()?;
        drop(writer);
        file.sync_all()?;
        let file_size = write_footer(&mut file, meta_handle, index_handle)?;

        rename(&tmp_path, &self.path)?;

        // Key bounds for version metadata: points plus range spans.
        let (smallest, largest) = key_bounds(points, range_dels, range_keys);

        debug!(
            path = %self.path.display(),
            records = properties.record_count,
            blocks = index_entries.len(),
            file_size,
            "table built"
        );

        Ok(BuiltTable {
            properties,
            smallest,
            largest,
            file_size,
        })
    }
}

fn flush_block(
    writer: &mut (impl Write + Seek),
    block: &mut Vec<u8>,
    block_first: &mut Option<InternalKey>,
    index_entries: &mut Vec<IndexEntry>,
) -> Result<(), TableError> {
    let payload = std::mem::take(block);
    let handle = write_checksummed_block(writer, &payload)?;
    let first_key = block_first
        .take()
        .ok_or_else(|| TableError::Corrupt("data block without first key".into()))?;
    index_entries.push(IndexEntry {
        first_key,
        handle,
    });
    Ok(())
}

/// Smallest and largest internal keys across all record streams.
fn key_bounds(
    points: &[PointEntry],
    range_dels: &[RangeTombstone],
    range_keys: &[RangeKeyRecord],
) -> (InternalKey, InternalKey) {
    let mut smallest: Option<InternalKey> = None;
    let mut largest: Option<InternalKey> = None;

    let mut consider = |k: InternalKey| {
        if smallest.as_ref().is_none_or(|s| k < *s) {
            smallest = Some(k.clone());
        }
        if largest.as_ref().is_none_or(|l| k > *l) {
            largest = Some(k);
        }
    };

    if let Some(first) = points.first() {
        consider(first.key.clone());
    }
    if let Some(last) = points.last() {
        consider(last.key.clone());
    }
    for t in range_dels {
        consider(InternalKey::new(t.start.clone(), t.seq, ValueKind::RangeDelete));
        consider(InternalKey::new(t.end.clone(), 0, ValueKind::RangeDelete));
    }
    for rk in range_keys {
        consider(InternalKey::new(rk.start.clone(), rk.seq, rk.kind));
        consider(InternalKey::new(rk.end.clone(), 0, rk.kind));
    }

    // Callers reject fully-empty builds, so both bounds exist.
    let smallest = smallest.unwrap_or_else(|| InternalKey::new(Vec::new(), 0, ValueKind::Set));
    let largest = largest.unwrap_or_else(|| InternalKey::new(Vec::new(), 0, ValueKind::Set));
    (smallest, largest)
}
