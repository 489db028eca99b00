//! Sorted String Tables.
//!
//! Immutable, memory-mapped, sorted on-disk tables. Each table stores
//! point entries in internal-key order `(user key ASC, trailer DESC)`,
//! plus side blocks for range tombstones and range keys, a bloom
//! filter over user keys and prefixes, a properties block, and a
//! block index enabling binary-search seeks.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES][HEADER_CRC32_LE]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! ...
//! [BLOOM_LEN_LE][BLOOM_BYTES][BLOOM_CRC32_LE]
//! [RANGE_DELS_LEN_LE][RANGE_DELS_BYTES][RANGE_DELS_CRC32_LE]
//! [RANGE_KEYS_LEN_LE][RANGE_KEYS_BYTES][RANGE_KEYS_CRC32_LE]
//! [PROPERTIES_LEN_LE][PROPERTIES_BYTES][PROPERTIES_CRC32_LE]
//! [METAINDEX_LEN_LE][METAINDEX_BYTES][METAINDEX_CRC32_LE]
//! [INDEX_LEN_LE][INDEX_BYTES][INDEX_CRC32_LE]
//! [FOOTER_BYTES]
//! ```
//!
//! Data-block cells are `[key_len u32][value_len u32][trailer u64]`
//! followed by key and value bytes. The index block maps each data
//! block's first internal key to its [`BlockHandle`].
//!
//! # Block cache
//!
//! [`TableReader::read_block`] consults the engine's block-cache
//! handle before touching the mmap: a hit returns the cached,
//! already-verified block payload; a miss verifies the CRC, decodes,
//! inserts (ignoring `CacheFull`), and returns. Cached payloads are
//! keyed by `(handle, file number, block offset)` and purged when the
//! file is deleted.
//!
//! # Concurrency
//!
//! Tables are immutable, so readers share one [`TableReader`] freely.
//! The reader counts open iterators for leak detection; the file
//! cache defers close until the count drains.

pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

pub use builder::{BuiltTable, TableBuilder};
pub use iterator::TableIter;

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

use crate::cache::{CacheHandle, CacheValue};
use crate::encoding::{self, ByteReader, EncodingError};
use crate::key::{InternalKey, SeqNum, ValueKind};
use crate::record::{RangeKeyRecord, RangeTombstone};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

pub(crate) const TABLE_MAGIC: [u8; 4] = *b"STBL";
pub(crate) const TABLE_VERSION: u32 = 1;
pub(crate) const TABLE_HEADER_SIZE: usize = 12;
pub(crate) const TABLE_FOOTER_SIZE: usize = 44;
pub(crate) const BLOCK_LEN_SIZE: usize = 4;
pub(crate) const BLOCK_CRC_SIZE: usize = 4;

/// Canonical table file name for a file number.
pub fn table_file_name(file_num: u64) -> String {
    format!("{file_num:06}.sst")
}

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by table operations (open, read, build).
#[derive(Debug, Error)]
pub enum TableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Block or footer failed integrity validation.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Malformed table structure.
    #[error("corrupt table: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// Format structures
// ------------------------------------------------------------------------------------------------

/// Handle to a checksummed block: offset of its length prefix and the
/// byte length of the encoded payload (prefix and CRC excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHandle {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

impl encoding::Encode for BlockHandle {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.offset, buf)?;
        encoding::Encode::encode_to(&self.size, buf)?;
        Ok(())
    }
}

impl encoding::Decode for BlockHandle {
    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            offset: u64::decode_from(r)?,
            size: u64::decode_from(r)?,
        })
    }
}

pub(crate) struct TableHeader {
    pub(crate) magic: [u8; 4],
    pub(crate) version: u32,
}

impl encoding::Encode for TableHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.magic, buf)?;
        encoding::Encode::encode_to(&self.version, buf)?;
        Ok(())
    }
}

impl encoding::Decode for TableHeader {
    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            magic: <[u8; 4]>::decode_from(r)?,
            version: u32::decode_from(r)?,
        })
    }
}

pub(crate) struct TableFooter {
    pub(crate) metaindex: BlockHandle,
    pub(crate) index: BlockHandle,
    pub(crate) total_file_size: u64,
    pub(crate) footer_crc32: u32,
}

impl encoding::Encode for TableFooter {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.metaindex, buf)?;
        encoding::Encode::encode_to(&self.index, buf)?;
        encoding::Encode::encode_to(&self.total_file_size, buf)?;
        encoding::Encode::encode_to(&self.footer_crc32, buf)?;
        Ok(())
    }
}

impl encoding::Decode for TableFooter {
    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            metaindex: BlockHandle::decode_from(r)?,
            index: BlockHandle::decode_from(r)?,
            total_file_size: u64::decode_from(r)?,
            footer_crc32: u32::decode_from(r)?,
        })
    }
}

/// Statistics and key bounds recorded per table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableProperties {
    /// Total point entries (all versions).
    pub record_count: u64,
    /// Point tombstones among them.
    pub tombstone_count: u64,
    /// Range tombstones in the side block.
    pub range_del_count: u64,
    /// Range-key records in the side block.
    pub range_key_count: u64,
    /// Lowest seqnum present.
    pub min_seq: SeqNum,
    /// Highest seqnum present.
    pub max_seq: SeqNum,
    /// Smallest user key present (points and range starts).
    pub smallest_user_key: Vec<u8>,
    /// Largest user key present (points and range ends).
    pub largest_user_key: Vec<u8>,
}

impl encoding::Encode for TableProperties {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.record_count, buf)?;
        encoding::Encode::encode_to(&self.tombstone_count, buf)?;
        encoding::Encode::encode_to(&self.range_del_count, buf)?;
        encoding::Encode::encode_to(&self.range_key_count, buf)?;
        encoding::Encode::encode_to(&self.min_seq, buf)?;
        encoding::Encode::encode_to(&self.max_seq, buf)?;
        encoding::Encode::encode_to(&self.smallest_user_key, buf)?;
        encoding::Encode::encode_to(&self.largest_user_key, buf)?;
        Ok(())
    }
}

impl encoding::Decode for TableProperties {
    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            record_count: u64::decode_from(r)?,
            tombstone_count: u64::decode_from(r)?,
            range_del_count: u64::decode_from(r)?,
            range_key_count: u64::decode_from(r)?,
            min_seq: u64::decode_from(r)?,
            max_seq: u64::decode_from(r)?,
            smallest_user_key: <Vec<u8>>::decode_from(r)?,
            largest_user_key: <Vec<u8>>::decode_from(r)?,
        })
    }
}

/// Index entry: the first internal key of a data block.
#[derive(Debug)]
pub(crate) struct IndexEntry {
    pub(crate) first_key: InternalKey,
    pub(crate) handle: BlockHandle,
}

impl encoding::Encode for IndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.first_key, buf)?;
        encoding::Encode::encode_to(&self.handle, buf)?;
        Ok(())
    }
}

impl encoding::Decode for IndexEntry {
    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            first_key: InternalKey::decode_from(r)?,
            handle: BlockHandle::decode_from(r)?,
        })
    }
}

#[derive(Debug)]
pub(crate) struct MetaIndexEntry {
    pub(crate) name: String,
    pub(crate) handle: BlockHandle,
}

impl encoding::Encode for MetaIndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.name, buf)?;
        encoding::Encode::encode_to(&self.handle, buf)?;
        Ok(())
    }
}

impl encoding::Decode for MetaIndexEntry {
    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            name: String::decode_from(r)?,
            handle: BlockHandle::decode_from(r)?,
        })
    }
}

pub(crate) const META_BLOOM: &str = "filter.bloom";
pub(crate) const META_PROPERTIES: &str = "meta.properties";
pub(crate) const META_RANGE_DELS: &str = "meta.range_dels";
pub(crate) const META_RANGE_KEYS: &str = "meta.range_keys";

/// Range tombstone cell as stored in the range-del block.
pub(crate) struct RangeDelCell {
    pub(crate) start: Vec<u8>,
    pub(crate) end: Vec<u8>,
    pub(crate) seq: SeqNum,
}

impl encoding::Encode for RangeDelCell {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.start, buf)?;
        encoding::Encode::encode_to(&self.end, buf)?;
        encoding::Encode::encode_to(&self.seq, buf)?;
        Ok(())
    }
}

impl encoding::Decode for RangeDelCell {
    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            start: <Vec<u8>>::decode_from(r)?,
            end: <Vec<u8>>::decode_from(r)?,
            seq: u64::decode_from(r)?,
        })
    }
}

/// Range-key cell as stored in the range-key block.
pub(crate) struct RangeKeyCell {
    pub(crate) kind: u8,
    pub(crate) start: Vec<u8>,
    pub(crate) end: Vec<u8>,
    pub(crate) seq: SeqNum,
    pub(crate) suffix: Vec<u8>,
    pub(crate) value: Vec<u8>,
}

impl encoding::Encode for RangeKeyCell {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.kind, buf)?;
        encoding::Encode::encode_to(&self.start, buf)?;
        encoding::Encode::encode_to(&self.end, buf)?;
        encoding::Encode::encode_to(&self.seq, buf)?;
        encoding::Encode::encode_to(&self.suffix, buf)?;
        encoding::Encode::encode_to(&self.value, buf)?;
        Ok(())
    }
}

impl encoding::Decode for RangeKeyCell {
    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            kind: u8::decode_from(r)?,
            start: <Vec<u8>>::decode_from(r)?,
            end: <Vec<u8>>::decode_from(r)?,
            seq: u64::decode_from(r)?,
            suffix: <Vec<u8>>::decode_from(r)?,
            value: <Vec<u8>>::decode_from(r)?,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// TableReader
// ------------------------------------------------------------------------------------------------

/// An open, memory-mapped, immutable table.
pub struct TableReader {
    /// File number this reader serves.
    pub file_num: u64,

    mmap: Mmap,

    /// Serialized bloom filter bytes; empty when the table has no
    /// point entries.
    bloom: Vec<u8>,

    /// Table statistics and key bounds.
    pub properties: TableProperties,

    /// Decoded range tombstones, sorted by (start ASC, seq DESC).
    range_dels: Vec<RangeTombstone>,

    /// Decoded range-key records, sorted by (start ASC, seq DESC).
    range_keys: Vec<RangeKeyRecord>,

    /// Block index: first internal key per data block.
    pub(crate) index: Vec<IndexEntry>,

    /// Engine block-cache handle; `None` runs uncached.
    cache: Option<Arc<CacheHandle>>,

    /// Open iterator count, for leak detection.
    open_iters: AtomicU64,
}

impl TableReader {
    /// Opens a table, verifying header, footer, and every metadata
    /// block.
    ///
    /// # Safety
    ///
    /// Uses a read-only `Mmap` over a file that is never modified
    /// after its atomic rename into place; all block boundaries are
    /// validated before slicing.
    pub fn open(
        path: impl AsRef<Path>,
        file_num: u64,
        cache: Option<Arc<CacheHandle>>,
    ) -> Result<Self, TableError> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { Mmap::map(&file)? };
        let file_len = mmap.len();

        if file_len < TABLE_HEADER_SIZE + BLOCK_CRC_SIZE + TABLE_FOOTER_SIZE {
            return Err(TableError::Corrupt("file too small".into()));
        }

        // Header + its CRC.
        let header_bytes = &mmap[..TABLE_HEADER_SIZE];
        let stored = u32::from_le_bytes([
            mmap[TABLE_HEADER_SIZE],
            mmap[TABLE_HEADER_SIZE + 1],
            mmap[TABLE_HEADER_SIZE + 2],
            mmap[TABLE_HEADER_SIZE + 3],
        ]);
        if crc32(header_bytes) != stored {
            return Err(TableError::ChecksumMismatch);
        }
        let header = encoding::decode_from_slice::<TableHeader>(header_bytes)?;
        if header.magic != TABLE_MAGIC {
            return Err(TableError::Corrupt("header magic mismatch".into()));
        }
        if header.version != TABLE_VERSION {
            return Err(TableError::Corrupt(format!(
                "unsupported table version {}",
                header.version
            )));
        }

        // Footer.
        let footer_start = file_len - TABLE_FOOTER_SIZE;
        let mut footer = encoding::decode_from_slice::<TableFooter>(&mmap[footer_start..])?;
        let stored_crc = footer.footer_crc32;
        footer.footer_crc32 = 0;
        let footer_bytes = encoding::encode_to_vec(&footer)?;
        if crc32(&footer_bytes) != stored_crc {
            return Err(TableError::ChecksumMismatch);
        }
        if footer.total_file_size != file_len as u64 {
            return Err(TableError::Corrupt("footer size mismatch".into()));
        }

        // Metaindex → named blocks.
        let metaindex_bytes = read_checksummed_block(&mmap, &footer.metaindex)?;
        let mut r = ByteReader::new(&metaindex_bytes);
        let meta_entries: Vec<MetaIndexEntry> = encoding::decode_vec(&mut r)?;

        let mut bloom = Vec::new();
        let mut properties = None;
        let mut range_dels = Vec::new();
        let mut range_keys = Vec::new();

        for entry in &meta_entries {
            let payload = read_checksummed_block(&mmap, &entry.handle)?;
            match entry.name.as_str() {
                META_BLOOM => bloom = payload,
                META_PROPERTIES => {
                    properties = Some(encoding::decode_from_slice::<TableProperties>(&payload)?);
                }
                META_RANGE_DELS => {
                    let mut r = ByteReader::new(&payload);
                    let cells: Vec<RangeDelCell> = encoding::decode_vec(&mut r)?;
                    range_dels = cells
                        .into_iter()
                        .map(|c| RangeTombstone::new(c.start, c.end, c.seq))
                        .collect();
                }
                META_RANGE_KEYS => {
                    let mut r = ByteReader::new(&payload);
                    let cells: Vec<RangeKeyCell> = encoding::decode_vec(&mut r)?;
                    let mut out = Vec::with_capacity(cells.len());
                    for c in cells {
                        let kind = ValueKind::from_u8(c.kind).ok_or_else(|| {
                            TableError::Corrupt(format!("bad range-key kind {}", c.kind))
                        })?;
                        out.push(RangeKeyRecord {
                            kind,
                            start: c.start,
                            end: c.end,
                            seq: c.seq,
                            suffix: c.suffix,
                            value: c.value,
                        });
                    }
                    range_keys = out;
                }
                other => {
                    return Err(TableError::Corrupt(format!(
                        "unknown metaindex entry {other:?}"
                    )));
                }
            }
        }

        let properties =
            properties.ok_or_else(|| TableError::Corrupt("missing properties block".into()))?;

        // Block index.
        let index_bytes = read_checksummed_block(&mmap, &footer.index)?;
        let mut r = ByteReader::new(&index_bytes);
        let index: Vec<IndexEntry> = encoding::decode_vec(&mut r)?;

        debug!(
            file_num,
            blocks = index.len(),
            records = properties.record_count,
            "table opened"
        );

        Ok(Self {
            file_num,
            mmap,
            bloom,
            properties,
            range_dels,
            range_keys,
            index,
            cache,
            open_iters: AtomicU64::new(0),
        })
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Range tombstones stored in this table.
    pub fn range_dels(&self) -> &[RangeTombstone] {
        &self.range_dels
    }

    /// Range-key records stored in this table.
    pub fn range_keys(&self) -> &[RangeKeyRecord] {
        &self.range_keys
    }

    /// Number of iterators currently open on this reader.
    pub fn open_iter_count(&self) -> u64 {
        self.open_iters.load(Ordering::Acquire)
    }

    pub(crate) fn iter_opened(&self) {
        self.open_iters.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn iter_closed(&self) {
        self.open_iters.fetch_sub(1, Ordering::AcqRel);
    }

    /// Whether `key` may be present according to the bloom filter.
    /// `false` is definitive; `true` means "must check".
    pub fn bloom_may_contain(&self, key: &[u8]) -> bool {
        if self.bloom.is_empty() {
            return true;
        }
        match Bloom::from_slice(&self.bloom) {
            Ok(bloom) => bloom.check(&key.to_vec()),
            Err(_) => true,
        }
    }

    /// Index of the block that could contain `ikey`: the last block
    /// whose first key is ≤ `ikey`. Returns 0 when `ikey` precedes
    /// every block (the caller's in-block scan handles the miss).
    pub(crate) fn block_for_seek(&self, ikey: &InternalKey) -> usize {
        let pp = self.index.partition_point(|e| e.first_key <= *ikey);
        pp.saturating_sub(1)
    }

    /// Number of data blocks.
    pub(crate) fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Reads data block `block_idx`, consulting the block cache.
    ///
    /// The cached payload is the verified cell stream; CRC checking
    /// happens only on cache miss.
    pub(crate) fn read_block(&self, block_idx: usize) -> Result<CacheValue, TableError> {
        let handle = &self.index[block_idx].handle;

        if let Some(cache) = &self.cache
            && let Some(hit) = cache.get(self.file_num, handle.offset)
        {
            return Ok(hit);
        }

        let payload = read_checksummed_block(&self.mmap, handle)?;
        let value: CacheValue = Arc::from(payload.into_boxed_slice());

        if let Some(cache) = &self.cache {
            // CacheFull degrades gracefully; the read proceeds.
            let _ = cache.set(self.file_num, handle.offset, Arc::clone(&value));
        }
        Ok(value)
    }
}

impl std::fmt::Debug for TableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableReader")
            .field("file_num", &self.file_num)
            .field("blocks", &self.index.len())
            .field("records", &self.properties.record_count)
            .finish_non_exhaustive()
    }
}

// ------------------------------------------------------------------------------------------------
// Block I/O helpers
// ------------------------------------------------------------------------------------------------

pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    hasher.finalize()
}

/// Reads and verifies a `[len][payload][crc]` block from the mmap.
pub(crate) fn read_checksummed_block(
    mmap: &Mmap,
    handle: &BlockHandle,
) -> Result<Vec<u8>, TableError> {
    let start = handle.offset as usize;
    let payload_len = handle.size as usize;
    let total = BLOCK_LEN_SIZE + payload_len + BLOCK_CRC_SIZE;
    if start + total > mmap.len() {
        return Err(TableError::Corrupt("block out of bounds".into()));
    }

    let len_bytes = &mmap[start..start + BLOCK_LEN_SIZE];
    let stored_len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
    if stored_len as usize != payload_len {
        return Err(TableError::Corrupt("block length mismatch".into()));
    }

    let payload = &mmap[start + BLOCK_LEN_SIZE..start + BLOCK_LEN_SIZE + payload_len];
    let crc_start = start + BLOCK_LEN_SIZE + payload_len;
    let stored_crc = u32::from_le_bytes([
        mmap[crc_start],
        mmap[crc_start + 1],
        mmap[crc_start + 2],
        mmap[crc_start + 3],
    ]);
    if crc32(payload) != stored_crc {
        return Err(TableError::ChecksumMismatch);
    }
    Ok(payload.to_vec())
}
