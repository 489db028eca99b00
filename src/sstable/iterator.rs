//! Table iterator — bidirectional positioning over one table's point
//! entries.
//!
//! Blocks load lazily through [`TableReader::read_block`] (and so
//! through the block cache). Within a block, cells are parsed once
//! into offset metadata and compared in place; the current entry is
//! materialized only when positioning settles.
//!
//! Errors are sticky: a failed block load or parse invalidates the
//! iterator, `error()` reports the first failure, and every
//! subsequent positioning call is a no-op until the next seek.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::cache::CacheValue;
use crate::key::{InternalKey, ValueKind};

use super::{TableError, TableReader};

/// Fixed per-cell header: `key_len u32 + value_len u32 + trailer u64`.
const CELL_HEADER: usize = 16;

struct CellMeta {
    key_start: usize,
    key_len: usize,
    val_start: usize,
    val_len: usize,
    trailer: u64,
}

struct ParsedBlock {
    data: CacheValue,
    cells: Vec<CellMeta>,
}

impl ParsedBlock {
    fn parse(data: CacheValue) -> Result<Self, TableError> {
        let mut cells = Vec::new();
        let mut pos = 0usize;
        let buf: &[u8] = &data;

        while pos < buf.len() {
            if pos + CELL_HEADER > buf.len() {
                return Err(TableError::Corrupt("truncated cell header".into()));
            }
            let key_len =
                u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize;
            let val_len = u32::from_le_bytes([
                buf[pos + 4],
                buf[pos + 5],
                buf[pos + 6],
                buf[pos + 7],
            ]) as usize;
            let trailer = u64::from_le_bytes([
                buf[pos + 8],
                buf[pos + 9],
                buf[pos + 10],
                buf[pos + 11],
                buf[pos + 12],
                buf[pos + 13],
                buf[pos + 14],
                buf[pos + 15],
            ]);
            let key_start = pos + CELL_HEADER;
            let val_start = key_start + key_len;
            if val_start + val_len > buf.len() {
                return Err(TableError::Corrupt("cell overruns block".into()));
            }
            cells.push(CellMeta {
                key_start,
                key_len,
                val_start,
                val_len,
                trailer,
            });
            pos = val_start + val_len;
        }
        Ok(Self { data, cells })
    }

    fn user_key(&self, i: usize) -> &[u8] {
        let c = &self.cells[i];
        &self.data[c.key_start..c.key_start + c.key_len]
    }

    fn value(&self, i: usize) -> &[u8] {
        let c = &self.cells[i];
        &self.data[c.val_start..c.val_start + c.val_len]
    }

    /// Compares cell `i` against `ikey` in internal-key order.
    fn cmp_cell(&self, i: usize, ikey: &InternalKey) -> Ordering {
        self.user_key(i)
            .cmp(ikey.user_key.as_slice())
            .then_with(|| ikey.trailer().cmp(&self.cells[i].trailer))
    }
}

// ------------------------------------------------------------------------------------------------
// TableIter
// ------------------------------------------------------------------------------------------------

/// Bidirectional iterator over a table's point entries.
pub struct TableIter {
    reader: Arc<TableReader>,
    block_idx: usize,
    block: Option<ParsedBlock>,
    entry_idx: usize,
    current: Option<(InternalKey, Vec<u8>)>,
    err: Option<TableError>,
}

impl TableIter {
    /// Opens an iterator; the reader's open-iterator count tracks it
    /// until drop.
    pub fn new(reader: Arc<TableReader>) -> Self {
        reader.iter_opened();
        Self {
            reader,
            block_idx: 0,
            block: None,
            entry_idx: 0,
            current: None,
            err: None,
        }
    }

    /// First sticky error, if any.
    pub fn error(&self) -> Option<&TableError> {
        self.err.as_ref()
    }

    /// Current entry, if positioned.
    pub fn current(&self) -> Option<(&InternalKey, &[u8])> {
        self.current.as_ref().map(|(k, v)| (k, v.as_slice()))
    }

    fn fail(&mut self, e: TableError) {
        self.err = Some(e);
        self.current = None;
        self.block = None;
    }

    fn load_block(&mut self, idx: usize) -> bool {
        match self
            .reader
            .read_block(idx)
            .and_then(ParsedBlock::parse)
        {
            Ok(block) => {
                self.block_idx = idx;
                self.block = Some(block);
                true
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    fn materialize(&mut self) {
        let Some(block) = &self.block else {
            self.current = None;
            return;
        };
        if self.entry_idx >= block.cells.len() {
            self.current = None;
            return;
        }
        let trailer = block.cells[self.entry_idx].trailer;
        let Some(kind) = ValueKind::from_u8(trailer as u8) else {
            self.fail(TableError::Corrupt(format!(
                "bad kind byte {}",
                trailer as u8
            )));
            return;
        };
        let key = InternalKey {
            user_key: block.user_key(self.entry_idx).to_vec(),
            seq: trailer >> 8,
            kind,
        };
        let value = block.value(self.entry_idx).to_vec();
        self.current = Some((key, value));
    }

    /// Positions at the first entry with internal key ≥ `ikey`.
    pub fn seek_ge(&mut self, ikey: &InternalKey) {
        self.err = None;
        self.current = None;
        if self.reader.block_count() == 0 {
            return;
        }
        let mut idx = self.reader.block_for_seek(ikey);
        loop {
            if !self.load_block(idx) {
                return;
            }
            let Some(block) = &self.block else {
                return;
            };
            // First cell ≥ ikey within this block.
            let pos = (0..block.cells.len())
                .find(|&i| block.cmp_cell(i, ikey) != Ordering::Less);
            match pos {
                Some(i) => {
                    self.entry_idx = i;
                    self.materialize();
                    return;
                }
                None => {
                    idx += 1;
                    if idx >= self.reader.block_count() {
                        return; // exhausted
                    }
                }
            }
        }
    }

    /// Prefix-aware seek: consults the bloom filter with `prefix` and
    /// short-circuits to exhausted on a definitive miss.
    pub fn seek_prefix_ge(&mut self, prefix: &[u8], ikey: &InternalKey) {
        if !self.reader.bloom_may_contain(prefix) {
            self.err = None;
            self.current = None;
            return;
        }
        self.seek_ge(ikey);
    }

    /// Positions at the last entry with internal key < `ikey`.
    pub fn seek_lt(&mut self, ikey: &InternalKey) {
        self.err = None;
        self.current = None;
        if self.reader.block_count() == 0 {
            return;
        }
        // Last block whose first key is < ikey; later blocks hold
        // only entries ≥ ikey.
        let pp = self
            .reader
            .index
            .partition_point(|e| e.first_key < *ikey);
        if pp == 0 {
            return; // everything ≥ ikey
        }
        let idx = pp - 1;
        if !self.load_block(idx) {
            return;
        }
        let Some(block) = &self.block else {
            return;
        };
        // Last cell < ikey; cell 0 qualifies by construction.
        let pos = block
            .cells
            .iter()
            .enumerate()
            .take_while(|(i, _)| block.cmp_cell(*i, ikey) == Ordering::Less)
            .map(|(i, _)| i)
            .last();
        match pos {
            Some(i) => {
                self.entry_idx = i;
                self.materialize();
            }
            None => self.current = None,
        }
    }

    /// Positions at the first entry of the table.
    pub fn first(&mut self) {
        self.err = None;
        self.current = None;
        if self.reader.block_count() == 0 {
            return;
        }
        if self.load_block(0) {
            self.entry_idx = 0;
            self.materialize();
        }
    }

    /// Positions at the last entry of the table.
    pub fn last(&mut self) {
        self.err = None;
        self.current = None;
        let blocks = self.reader.block_count();
        if blocks == 0 {
            return;
        }
        if self.load_block(blocks - 1) {
            let len = self.block.as_ref().map(|b| b.cells.len()).unwrap_or(0);
            if len == 0 {
                self.current = None;
                return;
            }
            self.entry_idx = len - 1;
            self.materialize();
        }
    }

    /// Steps forward; exhausts past the final entry.
    pub fn next(&mut self) {
        if self.current.is_none() || self.err.is_some() {
            return;
        }
        let len = self.block.as_ref().map(|b| b.cells.len()).unwrap_or(0);
        if self.entry_idx + 1 < len {
            self.entry_idx += 1;
            self.materialize();
            return;
        }
        let next_block = self.block_idx + 1;
        if next_block >= self.reader.block_count() {
            self.current = None;
            return;
        }
        if self.load_block(next_block) {
            self.entry_idx = 0;
            self.materialize();
        }
    }

    /// Steps backward; exhausts before the first entry.
    pub fn prev(&mut self) {
        if self.current.is_none() || self.err.is_some() {
            return;
        }
        if self.entry_idx > 0 {
            self.entry_idx -= 1;
            self.materialize();
            return;
        }
        if self.block_idx == 0 {
            self.current = None;
            return;
        }
        let prev_block = self.block_idx - 1;
        if self.load_block(prev_block) {
            let len = self.block.as_ref().map(|b| b.cells.len()).unwrap_or(0);
            if len == 0 {
                self.current = None;
                return;
            }
            self.entry_idx = len - 1;
            self.materialize();
        }
    }
}

impl Drop for TableIter {
    fn drop(&mut self) {
        self.reader.iter_closed();
    }
}

impl std::fmt::Debug for TableIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableIter")
            .field("file_num", &self.reader.file_num)
            .field("block_idx", &self.block_idx)
            .field("positioned", &self.current.is_some())
            .finish()
    }
}
