//! The iterator stack.
//!
//! Three layers sit between storage and the public API:
//!
//! 1. **Child iterators** ([`ChildIter`]) — one positioning cursor
//!    per source: the indexed batch (if any), each memtable in the
//!    snapshot queue, each level-0 table, and one [`LevelIter`] per
//!    deeper level. Dispatch over the source kinds is a tagged
//!    variant with a shared capability set (`seek_ge`, `seek_lt`,
//!    `first`, `last`, `next`, `prev`, `current`).
//! 2. **Merged iterator** ([`MergedIter`]) — heap-merges the children
//!    into one internal-key-ordered stream, applying snapshot
//!    visibility and range-tombstone suppression.
//! 3. **User iterator** ([`Iter`]) — resolves versions per user key
//!    (sets, tombstones, merge chains), enforces bounds and limits,
//!    interleaves range keys, and exposes the public positioning
//!    surface.

pub mod level;
pub mod merged;
pub mod rangekeys;
pub mod user;

#[cfg(test)]
mod tests;

pub use level::LevelIter;
pub use merged::MergedIter;
pub use rangekeys::{RangeKeyItem, ResolvedSpan};
pub use user::{Iter, IterOptions, IterValidity, KeyTypes, LazyValue};

use crate::key::InternalKey;
use crate::memtable::MemtableIter;
use crate::sstable::TableIter;

// ------------------------------------------------------------------------------------------------
// VecIter — cursor over materialized entries (indexed batches)
// ------------------------------------------------------------------------------------------------

/// Positioning cursor over a sorted, materialized entry list.
/// Backs the indexed-batch child.
pub struct VecIter {
    entries: Vec<(InternalKey, Vec<u8>)>,
    pos: Option<usize>,
}

impl VecIter {
    /// Creates a cursor; `entries` must be sorted by internal key.
    pub fn new(entries: Vec<(InternalKey, Vec<u8>)>) -> Self {
        Self { entries, pos: None }
    }

    fn set(&mut self, pos: usize) {
        self.pos = (pos < self.entries.len()).then_some(pos);
    }

    pub fn seek_ge(&mut self, ikey: &InternalKey) {
        let pos = self.entries.partition_point(|(k, _)| k < ikey);
        self.set(pos);
    }

    pub fn seek_lt(&mut self, ikey: &InternalKey) {
        let pos = self.entries.partition_point(|(k, _)| k < ikey);
        self.pos = pos.checked_sub(1);
    }

    pub fn first(&mut self) {
        self.set(0);
    }

    pub fn last(&mut self) {
        self.pos = self.entries.len().checked_sub(1);
    }

    pub fn next(&mut self) {
        if let Some(p) = self.pos {
            self.set(p + 1);
        }
    }

    pub fn prev(&mut self) {
        self.pos = self.pos.and_then(|p| p.checked_sub(1));
    }

    pub fn current(&self) -> Option<(&InternalKey, &[u8])> {
        self.pos
            .and_then(|p| self.entries.get(p))
            .map(|(k, v)| (k, v.as_slice()))
    }
}

// ------------------------------------------------------------------------------------------------
// ChildIter — tagged dispatch over source kinds
// ------------------------------------------------------------------------------------------------

/// One source's cursor in the merge.
pub enum ChildIter {
    /// Uncommitted indexed-batch entries.
    Batch(VecIter),
    /// One memtable from the snapshot queue.
    Memtable(MemtableIter),
    /// One level-0 table.
    Table(TableIter),
    /// One level ≥ 1 (lazily opened files).
    Level(LevelIter),
}

impl ChildIter {
    pub fn seek_ge(&mut self, ikey: &InternalKey) {
        match self {
            ChildIter::Batch(it) => it.seek_ge(ikey),
            ChildIter::Memtable(it) => it.seek_ge(ikey),
            ChildIter::Table(it) => it.seek_ge(ikey),
            ChildIter::Level(it) => it.seek_ge(ikey),
        }
    }

    /// Prefix-aware seek; table-backed children consult their bloom
    /// filters and may short-circuit to exhausted.
    pub fn seek_prefix_ge(&mut self, prefix: &[u8], ikey: &InternalKey) {
        match self {
            ChildIter::Batch(it) => it.seek_ge(ikey),
            ChildIter::Memtable(it) => it.seek_ge(ikey),
            ChildIter::Table(it) => it.seek_prefix_ge(prefix, ikey),
            ChildIter::Level(it) => it.seek_prefix_ge(prefix, ikey),
        }
    }

    pub fn seek_lt(&mut self, ikey: &InternalKey) {
        match self {
            ChildIter::Batch(it) => it.seek_lt(ikey),
            ChildIter::Memtable(it) => it.seek_lt(ikey),
            ChildIter::Table(it) => it.seek_lt(ikey),
            ChildIter::Level(it) => it.seek_lt(ikey),
        }
    }

    pub fn first(&mut self) {
        match self {
            ChildIter::Batch(it) => it.first(),
            ChildIter::Memtable(it) => it.first(),
            ChildIter::Table(it) => it.first(),
            ChildIter::Level(it) => it.first(),
        }
    }

    pub fn last(&mut self) {
        match self {
            ChildIter::Batch(it) => it.last(),
            ChildIter::Memtable(it) => it.last(),
            ChildIter::Table(it) => it.last(),
            ChildIter::Level(it) => it.last(),
        }
    }

    pub fn next(&mut self) {
        match self {
            ChildIter::Batch(it) => it.next(),
            ChildIter::Memtable(it) => it.next(),
            ChildIter::Table(it) => it.next(),
            ChildIter::Level(it) => it.next(),
        }
    }

    pub fn prev(&mut self) {
        match self {
            ChildIter::Batch(it) => it.prev(),
            ChildIter::Memtable(it) => it.prev(),
            ChildIter::Table(it) => it.prev(),
            ChildIter::Level(it) => it.prev(),
        }
    }

    pub fn current(&self) -> Option<(&InternalKey, &[u8])> {
        match self {
            ChildIter::Batch(it) => it.current(),
            ChildIter::Memtable(it) => it.current(),
            ChildIter::Table(it) => it.current(),
            ChildIter::Level(it) => it.current(),
        }
    }

    /// First sticky error from a storage-backed child.
    pub fn error(&self) -> Option<String> {
        match self {
            ChildIter::Batch(_) | ChildIter::Memtable(_) => None,
            ChildIter::Table(it) => it.error().map(|e| e.to_string()),
            ChildIter::Level(it) => it.error().map(str::to_string),
        }
    }
}
