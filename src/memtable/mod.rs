//! Memtable — the in-memory head of the LSM tree.
//!
//! ## Design Invariants
//!
//! - Entries are inserted at seqnums reserved by the commit pipeline;
//!   insertion order between concurrent batches does not matter
//!   because their seqnum ranges are disjoint.
//! - A memtable may hold multiple versions per user key; resolution
//!   happens at read time in the iterator stack.
//! - Deletes are tombstones, never physical removal.
//! - Exactly one live memtable is paired with each WAL segment; the
//!   segment number is fixed at construction.
//!
//! ## Concurrency
//!
//! The three skip-lists ([`crossbeam_skiplist::SkipMap`]) give
//! lock-free inserts and wait-free ordered traversal: insertions
//! publish with release stores on the next pointers, readers observe
//! them with acquire loads. Writers never block readers and readers
//! never block writers. Size accounting is a relaxed atomic — it
//! bounds the memtable approximately, which is all rotation needs.
//!
//! ## Lifecycle
//!
//! `Mutable` → `Frozen` (rotation) → `Flushing` (picked up by the
//! flush worker) → `Flushed` (table durable, WAL segment deletable).
//! Only the queue tail is ever `Mutable`.

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;
use thiserror::Error;
use tracing::trace;

use crate::batch::{Batch, BatchOp};
use crate::encoding::EncodingError;
use crate::key::{InternalKey, SeqNum, ValueKind};
use crate::record::{PointEntry, RangeKeyRecord, RangeTombstone};

/// Accounting overhead charged per skip-list entry, covering node
/// links and the key struct itself.
const ENTRY_OVERHEAD: usize = 64;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by memtable operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// A batch op or stored payload failed to decode.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The memtable is no longer mutable.
    #[error("memtable is not mutable")]
    NotMutable,
}

// ------------------------------------------------------------------------------------------------
// State
// ------------------------------------------------------------------------------------------------

/// Lifecycle state of a memtable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemtableState {
    /// Accepting writes; the tail of the memtable queue.
    Mutable = 0,
    /// Rotated out, awaiting flush.
    Frozen = 1,
    /// Being written to a table by the flush worker.
    Flushing = 2,
    /// Table durable; the memtable is dropped once readers release it.
    Flushed = 3,
}

impl MemtableState {
    fn from_u8(v: u8) -> MemtableState {
        match v {
            0 => MemtableState::Mutable,
            1 => MemtableState::Frozen,
            2 => MemtableState::Flushing,
            _ => MemtableState::Flushed,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Memtable
// ------------------------------------------------------------------------------------------------

/// Ordered in-memory map of recent writes.
///
/// Three skip-lists keyed by internal key: point entries, range
/// tombstones (keyed by start key), and range keys (keyed by start
/// key). Range payloads are encoded with
/// [`RangeTombstone::encode_value`] / [`RangeKeyRecord::encode_value`].
pub struct Memtable {
    points: SkipMap<InternalKey, Vec<u8>>,
    range_dels: SkipMap<InternalKey, Vec<u8>>,
    range_keys: SkipMap<InternalKey, Vec<u8>>,

    /// Approximate in-memory footprint in bytes.
    approximate_size: AtomicUsize,

    /// Rotation threshold.
    capacity: usize,

    /// Lifecycle state ([`MemtableState`] as u8).
    state: AtomicU8,

    /// WAL segment paired with this memtable.
    wal_segment: u64,

    /// Highest seqnum applied; drives recovery.
    max_seq: AtomicU64,

    /// Batches paired with this memtable whose apply has not finished.
    /// The flush worker waits for zero before reading entries.
    appliers: AtomicUsize,
}

impl Memtable {
    /// Creates an empty mutable memtable paired with `wal_segment`.
    pub fn new(wal_segment: u64, capacity: usize) -> Self {
        Self {
            points: SkipMap::new(),
            range_dels: SkipMap::new(),
            range_keys: SkipMap::new(),
            approximate_size: AtomicUsize::new(0),
            capacity,
            state: AtomicU8::new(MemtableState::Mutable as u8),
            wal_segment,
            max_seq: AtomicU64::new(0),
            appliers: AtomicUsize::new(0),
        }
    }

    /// The WAL segment this memtable is paired with.
    pub fn wal_segment(&self) -> u64 {
        self.wal_segment
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MemtableState {
        MemtableState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the memtable still accepts writes.
    pub fn is_mutable(&self) -> bool {
        self.state() == MemtableState::Mutable
    }

    /// Marks the memtable immutable-pending-flush.
    pub fn mark_frozen(&self) {
        self.state
            .store(MemtableState::Frozen as u8, Ordering::Release);
    }

    /// Marks the memtable as being flushed.
    pub fn mark_flushing(&self) {
        self.state
            .store(MemtableState::Flushing as u8, Ordering::Release);
    }

    /// Marks the memtable's contents durable in a table.
    pub fn mark_flushed(&self) {
        self.state
            .store(MemtableState::Flushed as u8, Ordering::Release);
    }

    /// Approximate footprint in bytes.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size.load(Ordering::Relaxed)
    }

    /// Whether adding `incoming` bytes should trigger rotation.
    /// An empty memtable never rotates — oversized batches are
    /// admitted whole rather than wedging the pipeline.
    pub fn should_rotate(&self, incoming: usize) -> bool {
        let size = self.approximate_size();
        size > 0 && size + incoming > self.capacity
    }

    /// Whether no entries have been applied.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.range_dels.is_empty() && self.range_keys.is_empty()
    }

    /// Highest seqnum applied to this memtable.
    pub fn max_seq(&self) -> SeqNum {
        self.max_seq.load(Ordering::Acquire)
    }

    /// Registers `n` batches that will apply to this memtable.
    /// Called by the commit pipeline when it pairs a WAL group.
    pub fn begin_applies(&self, n: usize) {
        self.appliers.fetch_add(n, Ordering::AcqRel);
    }

    /// Marks one paired batch as fully applied.
    pub fn finish_apply(&self) {
        self.appliers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Whether every paired batch has finished applying. A frozen
    /// memtable must quiesce before it can be flushed.
    pub fn quiesced(&self) -> bool {
        self.appliers.load(Ordering::Acquire) == 0
    }

    // --------------------------------------------------------------------------------------------
    // Apply
    // --------------------------------------------------------------------------------------------

    /// Applies a batch's operations at the reserved seqnum range
    /// `[base, base + batch.count())`.
    ///
    /// Safe to call concurrently for different batches: seqnum ranges
    /// are disjoint and skip-list insertion is concurrency-safe.
    /// `LogData` consumes its seqnum but leaves no entry.
    ///
    /// A `Frozen` memtable still accepts applies: a batch paired with
    /// this memtable by the commit pipeline may land after rotation.
    /// Only flush onward rejects writes; the flush worker waits for
    /// [`Memtable::quiesced`] first.
    pub fn apply(&self, batch: &Batch, base: SeqNum) -> Result<(), MemtableError> {
        if matches!(
            self.state(),
            MemtableState::Flushing | MemtableState::Flushed
        ) {
            return Err(MemtableError::NotMutable);
        }

        let mut added = 0usize;
        let mut high = 0u64;

        for (i, op) in batch.iter_ops().enumerate() {
            let op = op?;
            let seq = base + i as u64;
            high = seq;

            match op {
                BatchOp::Set { key, value } => {
                    added += self.insert_point(key, seq, ValueKind::Set, value);
                }
                BatchOp::Merge { key, value } => {
                    added += self.insert_point(key, seq, ValueKind::Merge, value);
                }
                BatchOp::Delete { key } => {
                    added += self.insert_point(key, seq, ValueKind::Delete, b"");
                }
                BatchOp::SingleDelete { key } => {
                    added += self.insert_point(key, seq, ValueKind::SingleDelete, b"");
                }
                BatchOp::RangeDelete { start, end } => {
                    if start >= end {
                        // Empty range: a no-op, but the seqnum stays
                        // consumed.
                        continue;
                    }
                    let rec = RangeTombstone::new(start, end, seq);
                    let payload = rec.encode_value()?;
                    added += ENTRY_OVERHEAD + start.len() + payload.len();
                    self.range_dels.insert(
                        InternalKey::new(start.to_vec(), seq, ValueKind::RangeDelete),
                        payload,
                    );
                }
                BatchOp::RangeKeySet {
                    start,
                    end,
                    suffix,
                    value,
                } => {
                    added +=
                        self.insert_range_key(start, end, seq, ValueKind::RangeKeySet, suffix, value)?;
                }
                BatchOp::RangeKeyUnset { start, end, suffix } => {
                    added +=
                        self.insert_range_key(start, end, seq, ValueKind::RangeKeyUnset, suffix, b"")?;
                }
                BatchOp::RangeKeyDelete { start, end } => {
                    added +=
                        self.insert_range_key(start, end, seq, ValueKind::RangeKeyDelete, b"", b"")?;
                }
                BatchOp::LogData { .. } => {}
            }
        }

        self.approximate_size.fetch_add(added, Ordering::Relaxed);
        self.max_seq.fetch_max(high, Ordering::AcqRel);

        trace!(
            base,
            count = batch.count(),
            bytes = added,
            "batch applied to memtable"
        );
        Ok(())
    }

    fn insert_point(&self, key: &[u8], seq: SeqNum, kind: ValueKind, value: &[u8]) -> usize {
        self.points
            .insert(InternalKey::new(key.to_vec(), seq, kind), value.to_vec());
        ENTRY_OVERHEAD + key.len() + value.len()
    }

    fn insert_range_key(
        &self,
        start: &[u8],
        end: &[u8],
        seq: SeqNum,
        kind: ValueKind,
        suffix: &[u8],
        value: &[u8],
    ) -> Result<usize, MemtableError> {
        if start >= end {
            return Ok(0);
        }
        let rec = RangeKeyRecord {
            kind,
            start: start.to_vec(),
            end: end.to_vec(),
            seq,
            suffix: suffix.to_vec(),
            value: value.to_vec(),
        };
        let payload = rec.encode_value()?;
        let charge = ENTRY_OVERHEAD + start.len() + payload.len();
        self.range_keys
            .insert(InternalKey::new(start.to_vec(), seq, kind), payload);
        Ok(charge)
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// All range tombstones currently in the memtable.
    ///
    /// Snapshot filtering happens in the iterator stack; this returns
    /// every version.
    pub fn range_tombstones(&self) -> Result<Vec<RangeTombstone>, MemtableError> {
        let mut out = Vec::new();
        for entry in self.range_dels.iter() {
            let k = entry.key();
            out.push(RangeTombstone::decode(
                k.user_key.clone(),
                k.seq,
                entry.value(),
            )?);
        }
        Ok(out)
    }

    /// All range-key records currently in the memtable.
    pub fn range_key_records(&self) -> Result<Vec<RangeKeyRecord>, MemtableError> {
        let mut out = Vec::new();
        for entry in self.range_keys.iter() {
            let k = entry.key();
            out.push(RangeKeyRecord::decode(
                k.kind,
                k.user_key.clone(),
                k.seq,
                entry.value(),
            )?);
        }
        Ok(out)
    }

    /// Materializes the full contents for a flush: every point
    /// version, every range tombstone, every range-key record, all in
    /// internal-key order. Does not mutate state.
    pub fn flush_entries(
        &self,
    ) -> Result<(Vec<PointEntry>, Vec<RangeTombstone>, Vec<RangeKeyRecord>), MemtableError> {
        let points = self
            .points
            .iter()
            .map(|e| PointEntry::new(e.key().clone(), e.value().clone()))
            .collect();
        Ok((points, self.range_tombstones()?, self.range_key_records()?))
    }

    /// Number of point entries (all versions).
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Creates a positioning cursor over the point entries.
    pub fn iter(self: &std::sync::Arc<Self>) -> MemtableIter {
        MemtableIter {
            mem: std::sync::Arc::clone(self),
            current: None,
        }
    }
}

impl std::fmt::Debug for Memtable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memtable")
            .field("wal_segment", &self.wal_segment)
            .field("state", &self.state())
            .field("approximate_size", &self.approximate_size())
            .field("points", &self.points.len())
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// MemtableIter
// ------------------------------------------------------------------------------------------------

/// Bidirectional cursor over a memtable's point entries.
///
/// Positions are re-derived from the skip-list on every step
/// (`O(log n)` per move); the cursor therefore never holds a borrow
/// into the map and stays valid across concurrent inserts. An insert
/// racing a step is observed or not per the skip-list's publication
/// order — either way the view is consistent for entries at or below
/// the read snapshot, because committed entries at lower seqnums are
/// fully published before the snapshot's visible seqnum advances.
pub struct MemtableIter {
    mem: std::sync::Arc<Memtable>,
    current: Option<(InternalKey, Vec<u8>)>,
}

impl MemtableIter {
    /// Positions at the first entry with internal key ≥ `ikey`.
    pub fn seek_ge(&mut self, ikey: &InternalKey) {
        self.current = self
            .mem
            .points
            .lower_bound(std::ops::Bound::Included(ikey))
            .map(|e| (e.key().clone(), e.value().clone()));
    }

    /// Positions at the last entry with internal key < `ikey`.
    pub fn seek_lt(&mut self, ikey: &InternalKey) {
        self.current = self
            .mem
            .points
            .upper_bound(std::ops::Bound::Excluded(ikey))
            .map(|e| (e.key().clone(), e.value().clone()));
    }

    /// Positions at the first entry.
    pub fn first(&mut self) {
        self.current = self
            .mem
            .points
            .front()
            .map(|e| (e.key().clone(), e.value().clone()));
    }

    /// Positions at the last entry.
    pub fn last(&mut self) {
        self.current = self
            .mem
            .points
            .back()
            .map(|e| (e.key().clone(), e.value().clone()));
    }

    /// Steps forward; no-op when exhausted.
    pub fn next(&mut self) {
        let Some((cur, _)) = &self.current else {
            return;
        };
        let next = self
            .mem
            .points
            .lower_bound(std::ops::Bound::Excluded(cur))
            .map(|e| (e.key().clone(), e.value().clone()));
        self.current = next;
    }

    /// Steps backward; no-op when exhausted.
    pub fn prev(&mut self) {
        let Some((cur, _)) = &self.current else {
            return;
        };
        let prev = self
            .mem
            .points
            .upper_bound(std::ops::Bound::Excluded(cur))
            .map(|e| (e.key().clone(), e.value().clone()));
        self.current = prev;
    }

    /// Current entry, if positioned.
    pub fn current(&self) -> Option<(&InternalKey, &[u8])> {
        self.current.as_ref().map(|(k, v)| (k, v.as_slice()))
    }

    /// Invalidates the position.
    pub fn clear(&mut self) {
        self.current = None;
    }
}
