//! Write batches.
//!
//! A [`Batch`] is an ordered log of operations in one contiguous byte
//! buffer. The buffer *is* the WAL payload: committing a batch appends
//! `repr()` to the log verbatim, so there is exactly one serialization
//! of a write on the write path.
//!
//! # Wire format
//!
//! ```text
//! [base seqnum (u64 LE)][op count (u32 LE)][reserved (u32 LE)]
//! [kind (u8)][fields…]   ← op 0
//! [kind (u8)][fields…]   ← op 1
//! ...
//! ```
//!
//! Variable-length fields are `[u32 len][bytes]`. The op at index `i`
//! commits at sequence number `base + i`; the base is stamped into the
//! header by the commit pipeline at Enqueue.
//!
//! # Indexed batches
//!
//! An indexed batch additionally maintains a skip-list over its own
//! operations so uncommitted state can be read and iterated. Index
//! entries carry sequence numbers with [`SEQ_NUM_BATCH_BIT`] set plus
//! the op index, which makes them (a) always visible to the owning
//! batch's iterator and (b) ordered newest-op-first per key.


use crossbeam_skiplist::SkipMap;

use crate::encoding::{ByteReader, EncodingError};
use crate::key::{InternalKey, SEQ_NUM_BATCH_BIT, SeqNum, ValueKind};
use crate::record::{RangeKeyRecord, RangeTombstone};

/// Byte length of the batch header.
pub const BATCH_HEADER_LEN: usize = 16;

// ------------------------------------------------------------------------------------------------
// BatchOp — borrowed decoded operation
// ------------------------------------------------------------------------------------------------

/// One decoded batch operation, borrowing from the batch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp<'a> {
    /// Point write.
    Set { key: &'a [u8], value: &'a [u8] },
    /// Point tombstone.
    Delete { key: &'a [u8] },
    /// Tombstone pairing with one older `Set`.
    SingleDelete { key: &'a [u8] },
    /// Merge operand.
    Merge { key: &'a [u8], value: &'a [u8] },
    /// Range tombstone over `[start, end)`.
    RangeDelete { start: &'a [u8], end: &'a [u8] },
    /// Range-key set over `[start, end)`.
    RangeKeySet {
        start: &'a [u8],
        end: &'a [u8],
        suffix: &'a [u8],
        value: &'a [u8],
    },
    /// Range-key unset over `[start, end)`.
    RangeKeyUnset {
        start: &'a [u8],
        end: &'a [u8],
        suffix: &'a [u8],
    },
    /// Range-key delete over `[start, end)`.
    RangeKeyDelete { start: &'a [u8], end: &'a [u8] },
    /// WAL-only payload; skipped on memtable apply.
    LogData { data: &'a [u8] },
}

impl BatchOp<'_> {
    /// The kind byte for this operation.
    pub fn kind(&self) -> ValueKind {
        match self {
            BatchOp::Set { .. } => ValueKind::Set,
            BatchOp::Delete { .. } => ValueKind::Delete,
            BatchOp::SingleDelete { .. } => ValueKind::SingleDelete,
            BatchOp::Merge { .. } => ValueKind::Merge,
            BatchOp::RangeDelete { .. } => ValueKind::RangeDelete,
            BatchOp::RangeKeySet { .. } => ValueKind::RangeKeySet,
            BatchOp::RangeKeyUnset { .. } => ValueKind::RangeKeyUnset,
            BatchOp::RangeKeyDelete { .. } => ValueKind::RangeKeyDelete,
            BatchOp::LogData { .. } => ValueKind::LogData,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Batch
// ------------------------------------------------------------------------------------------------

/// An atomic, ordered sequence of write operations.
///
/// Built through the typed mutation methods, committed through
/// `Engine::apply`. A batch is not thread-safe; it is built by one
/// writer and then handed to the commit pipeline.
pub struct Batch {
    /// Header + encoded operations. The commit pipeline appends this
    /// buffer to the WAL unchanged.
    repr: Vec<u8>,

    /// Number of operations encoded in `repr`.
    count: u32,

    /// Skip-list over op offsets, present for indexed batches.
    index: Option<SkipMap<InternalKey, u32>>,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    /// Creates an empty, unindexed batch.
    pub fn new() -> Self {
        Self {
            repr: vec![0u8; BATCH_HEADER_LEN],
            count: 0,
            index: None,
        }
    }

    /// Creates an empty batch that indexes its own operations so they
    /// can be iterated before commit.
    pub fn new_indexed() -> Self {
        Self {
            index: Some(SkipMap::new()),
            ..Self::new()
        }
    }

    /// Reconstructs a batch from a WAL record payload.
    ///
    /// Validates the header and walks every op so a torn or corrupt
    /// record is rejected before replay.
    pub fn from_repr(repr: Vec<u8>) -> Result<Self, EncodingError> {
        if repr.len() < BATCH_HEADER_LEN {
            return Err(EncodingError::UnexpectedEof {
                needed: BATCH_HEADER_LEN,
                available: repr.len(),
            });
        }
        let count = u32::from_le_bytes([repr[8], repr[9], repr[10], repr[11]]);
        let batch = Self {
            repr,
            count,
            index: None,
        };
        let mut seen = 0u32;
        for op in batch.iter_ops() {
            op?;
            seen += 1;
        }
        if seen != count {
            return Err(EncodingError::Custom(format!(
                "batch header claims {count} ops, found {seen}"
            )));
        }
        Ok(batch)
    }

    /// The raw batch buffer (header + ops); what the WAL stores.
    pub fn repr(&self) -> &[u8] {
        &self.repr
    }

    /// Number of operations in the batch. Each reserves one seqnum.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Whether the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Total encoded size in bytes.
    pub fn byte_size(&self) -> usize {
        self.repr.len()
    }

    /// Whether this batch indexes its operations.
    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    /// Base sequence number stamped by the commit pipeline; zero for
    /// an uncommitted batch.
    pub fn base_seq(&self) -> SeqNum {
        u64::from_le_bytes([
            self.repr[0],
            self.repr[1],
            self.repr[2],
            self.repr[3],
            self.repr[4],
            self.repr[5],
            self.repr[6],
            self.repr[7],
        ])
    }

    /// Stamps the reserved base sequence number into the header.
    /// Called once by the commit pipeline at Enqueue.
    pub(crate) fn set_base_seq(&mut self, base: SeqNum) {
        self.repr[0..8].copy_from_slice(&base.to_le_bytes());
    }

    fn bump_count(&mut self) {
        self.count += 1;
        let c = self.count.to_le_bytes();
        self.repr[8..12].copy_from_slice(&c);
    }

    fn push_bytes(&mut self, b: &[u8]) {
        self.repr.extend_from_slice(&(b.len() as u32).to_le_bytes());
        self.repr.extend_from_slice(b);
    }

    /// Appends an op and indexes it when this batch is indexed.
    /// Returns the byte offset of the op's kind byte.
    fn push_op(&mut self, kind: ValueKind, fields: &[&[u8]]) -> u32 {
        let offset = self.repr.len() as u32;
        self.repr.push(kind as u8);
        for f in fields {
            self.push_bytes(f);
        }
        let op_index = self.count;
        self.bump_count();

        if let Some(index) = &self.index
            && kind != ValueKind::LogData
        {
            // Key the index entry by the op's primary key (the start
            // key for range ops) with the batch bit + op index as the
            // seqnum, so later ops on the same key sort first.
            let ikey = InternalKey::new(
                fields[0].to_vec(),
                SEQ_NUM_BATCH_BIT | op_index as u64,
                kind,
            );
            index.insert(ikey, offset);
        }
        offset
    }

    // --------------------------------------------------------------------------------------------
    // Mutations
    // --------------------------------------------------------------------------------------------

    /// Appends a point write.
    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        self.push_op(ValueKind::Set, &[key, value]);
    }

    /// Appends a point tombstone.
    pub fn delete(&mut self, key: &[u8]) {
        self.push_op(ValueKind::Delete, &[key]);
    }

    /// Appends a single-delete tombstone.
    pub fn single_delete(&mut self, key: &[u8]) {
        self.push_op(ValueKind::SingleDelete, &[key]);
    }

    /// Appends a merge operand.
    pub fn merge(&mut self, key: &[u8], value: &[u8]) {
        self.push_op(ValueKind::Merge, &[key, value]);
    }

    /// Appends a range tombstone over `[start, end)`.
    pub fn delete_range(&mut self, start: &[u8], end: &[u8]) {
        self.push_op(ValueKind::RangeDelete, &[start, end]);
    }

    /// Appends a range-key set over `[start, end)`.
    pub fn range_key_set(&mut self, start: &[u8], end: &[u8], suffix: &[u8], value: &[u8]) {
        self.push_op(ValueKind::RangeKeySet, &[start, end, suffix, value]);
    }

    /// Appends a range-key unset over `[start, end)`.
    pub fn range_key_unset(&mut self, start: &[u8], end: &[u8], suffix: &[u8]) {
        self.push_op(ValueKind::RangeKeyUnset, &[start, end, suffix]);
    }

    /// Appends a range-key delete over `[start, end)`.
    pub fn range_key_delete(&mut self, start: &[u8], end: &[u8]) {
        self.push_op(ValueKind::RangeKeyDelete, &[start, end]);
    }

    /// Appends an opaque WAL-only payload.
    pub fn log_data(&mut self, data: &[u8]) {
        self.push_op(ValueKind::LogData, &[data]);
    }

    // --------------------------------------------------------------------------------------------
    // Iteration
    // --------------------------------------------------------------------------------------------

    /// Iterates the operations in insertion (commit) order.
    pub fn iter_ops(&self) -> BatchOpIter<'_> {
        BatchOpIter {
            reader: ByteReader::new(&self.repr[BATCH_HEADER_LEN..]),
        }
    }

    /// Decodes the single op starting at `offset` in the buffer.
    pub(crate) fn op_at(&self, offset: u32) -> Result<BatchOp<'_>, EncodingError> {
        let mut r = ByteReader::new(&self.repr[offset as usize..]);
        decode_op(&mut r)
    }

    /// Iterates the indexed ops in `(user key ASC, op index DESC)`
    /// order. Returns `None` for unindexed batches.
    pub(crate) fn indexed_entries(
        &self,
    ) -> Option<impl Iterator<Item = (InternalKey, u32)> + '_> {
        self.index
            .as_ref()
            .map(|idx| idx.iter().map(|e| (e.key().clone(), *e.value())))
    }

    /// Materializes the indexed batch's uncommitted state for the
    /// iterator stack: point entries in internal-key order plus the
    /// batch's range tombstones and range keys, all carrying
    /// batch-bit seqnums. Returns `None` for unindexed batches.
    pub fn read_view(&self) -> Option<Result<BatchView, EncodingError>> {
        let entries = self.indexed_entries()?;
        let mut view = BatchView::default();
        for (ikey, offset) in entries {
            let op = match self.op_at(offset) {
                Ok(op) => op,
                Err(e) => return Some(Err(e)),
            };
            match op {
                BatchOp::Set { value, .. } | BatchOp::Merge { value, .. } => {
                    view.points.push((ikey, value.to_vec()));
                }
                BatchOp::Delete { .. } | BatchOp::SingleDelete { .. } => {
                    view.points.push((ikey, Vec::new()));
                }
                BatchOp::RangeDelete { start, end } => {
                    if start < end {
                        view.range_dels
                            .push(RangeTombstone::new(start, end, ikey.seq));
                    }
                }
                BatchOp::RangeKeySet {
                    start,
                    end,
                    suffix,
                    value,
                } => {
                    if start < end {
                        view.range_keys.push(RangeKeyRecord {
                            kind: ValueKind::RangeKeySet,
                            start: start.to_vec(),
                            end: end.to_vec(),
                            seq: ikey.seq,
                            suffix: suffix.to_vec(),
                            value: value.to_vec(),
                        });
                    }
                }
                BatchOp::RangeKeyUnset { start, end, suffix } => {
                    if start < end {
                        view.range_keys.push(RangeKeyRecord {
                            kind: ValueKind::RangeKeyUnset,
                            start: start.to_vec(),
                            end: end.to_vec(),
                            seq: ikey.seq,
                            suffix: suffix.to_vec(),
                            value: Vec::new(),
                        });
                    }
                }
                BatchOp::RangeKeyDelete { start, end } => {
                    if start < end {
                        view.range_keys.push(RangeKeyRecord {
                            kind: ValueKind::RangeKeyDelete,
                            start: start.to_vec(),
                            end: end.to_vec(),
                            seq: ikey.seq,
                            suffix: Vec::new(),
                            value: Vec::new(),
                        });
                    }
                }
                BatchOp::LogData { .. } => {}
            }
        }
        Some(Ok(view))
    }
}

/// Snapshot of an indexed batch's uncommitted state, consumed by the
/// iterator stack.
#[derive(Debug, Default)]
pub struct BatchView {
    /// Point entries in `(user key ASC, op index DESC)` order.
    pub points: Vec<(InternalKey, Vec<u8>)>,
    /// The batch's range tombstones.
    pub range_dels: Vec<RangeTombstone>,
    /// The batch's range-key records.
    pub range_keys: Vec<RangeKeyRecord>,
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("count", &self.count)
            .field("byte_size", &self.repr.len())
            .field("indexed", &self.index.is_some())
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Op decoding
// ------------------------------------------------------------------------------------------------

fn decode_op<'a>(r: &mut ByteReader<'a>) -> Result<BatchOp<'a>, EncodingError> {
    let kind_byte = r.read_u8()?;
    let kind = ValueKind::from_u8(kind_byte).ok_or(EncodingError::InvalidTag {
        tag: kind_byte as u32,
        type_name: "ValueKind",
    })?;

    Ok(match kind {
        ValueKind::Set => BatchOp::Set {
            key: r.read_bytes()?,
            value: r.read_bytes()?,
        },
        ValueKind::Delete => BatchOp::Delete {
            key: r.read_bytes()?,
        },
        ValueKind::SingleDelete => BatchOp::SingleDelete {
            key: r.read_bytes()?,
        },
        ValueKind::Merge => BatchOp::Merge {
            key: r.read_bytes()?,
            value: r.read_bytes()?,
        },
        ValueKind::RangeDelete => BatchOp::RangeDelete {
            start: r.read_bytes()?,
            end: r.read_bytes()?,
        },
        ValueKind::RangeKeySet => BatchOp::RangeKeySet {
            start: r.read_bytes()?,
            end: r.read_bytes()?,
            suffix: r.read_bytes()?,
            value: r.read_bytes()?,
        },
        ValueKind::RangeKeyUnset => BatchOp::RangeKeyUnset {
            start: r.read_bytes()?,
            end: r.read_bytes()?,
            suffix: r.read_bytes()?,
        },
        ValueKind::RangeKeyDelete => BatchOp::RangeKeyDelete {
            start: r.read_bytes()?,
            end: r.read_bytes()?,
        },
        ValueKind::LogData => BatchOp::LogData {
            data: r.read_bytes()?,
        },
    })
}

/// Iterator over a batch's operations in insertion order.
pub struct BatchOpIter<'a> {
    reader: ByteReader<'a>,
}

impl<'a> Iterator for BatchOpIter<'a> {
    type Item = Result<BatchOp<'a>, EncodingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.is_empty() {
            return None;
        }
        Some(decode_op(&mut self.reader))
    }
}
