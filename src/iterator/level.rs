//! Level iterator — one cursor over a whole level ≥ 1.
//!
//! A level's files are disjoint and sorted by key, so one iterator
//! suffices: seeks binary-search the file list on the in-memory
//! metadata and open the single candidate file lazily through the
//! file cache. Sequential iteration hops to the neighboring file when
//! the current one exhausts.
//!
//! Open failures are sticky; the merged iterator surfaces them
//! through the user iterator's `error()`.

use std::sync::Arc;

use crate::error::Error;
use crate::key::InternalKey;
use crate::sstable::{TableIter, TableReader};
use crate::version::TableMeta;

/// Opens a table reader by file number; backed by the engine's file
/// cache.
pub type FileOpener = Arc<dyn Fn(u64) -> Result<Arc<TableReader>, Error> + Send + Sync>;

/// Single cursor over a sorted, disjoint file list.
pub struct LevelIter {
    files: Vec<Arc<TableMeta>>,
    opener: FileOpener,
    file_idx: usize,
    iter: Option<TableIter>,
    err: Option<String>,
}

impl LevelIter {
    /// Creates a cursor over `files`, which must be disjoint and
    /// sorted by smallest key.
    pub fn new(files: Vec<Arc<TableMeta>>, opener: FileOpener) -> Self {
        Self {
            files,
            opener,
            file_idx: 0,
            iter: None,
            err: None,
        }
    }

    /// First sticky error, if any.
    pub fn error(&self) -> Option<&str> {
        self.err.as_deref()
    }

    fn fail(&mut self, msg: String) {
        self.err = Some(msg);
        self.iter = None;
    }

    /// Opens file `idx` and returns its iterator, or records the
    /// failure.
    fn open_file(&mut self, idx: usize) -> bool {
        match (self.opener)(self.files[idx].file_num) {
            Ok(reader) => {
                self.file_idx = idx;
                self.iter = Some(TableIter::new(reader));
                true
            }
            Err(e) => {
                self.fail(format!("open file {}: {e}", self.files[idx].file_num));
                false
            }
        }
    }

    pub fn seek_ge(&mut self, ikey: &InternalKey) {
        self.err = None;
        self.iter = None;
        // First file whose largest key is ≥ the target.
        let idx = self.files.partition_point(|m| m.largest < *ikey);
        if idx >= self.files.len() {
            return;
        }
        if self.open_file(idx)
            && let Some(iter) = &mut self.iter
        {
            iter.seek_ge(ikey);
            if iter.current().is_none() && iter.error().is_none() {
                // Key range gap between files: land on the next file.
                self.advance_file();
            }
            self.check_table_error();
        }
    }

    pub fn seek_prefix_ge(&mut self, prefix: &[u8], ikey: &InternalKey) {
        self.err = None;
        self.iter = None;
        let idx = self.files.partition_point(|m| m.largest < *ikey);
        if idx >= self.files.len() {
            return;
        }
        if self.open_file(idx)
            && let Some(iter) = &mut self.iter
        {
            // A disjoint level has one candidate file per prefix;
            // a bloom miss there exhausts the level iterator.
            iter.seek_prefix_ge(prefix, ikey);
            self.check_table_error();
        }
    }

    pub fn seek_lt(&mut self, ikey: &InternalKey) {
        self.err = None;
        self.iter = None;
        // Last file whose smallest key is < the target.
        let idx = self.files.partition_point(|m| m.smallest < *ikey);
        let Some(idx) = idx.checked_sub(1) else {
            return;
        };
        if self.open_file(idx)
            && let Some(iter) = &mut self.iter
        {
            iter.seek_lt(ikey);
            if iter.current().is_none() && iter.error().is_none() {
                self.retreat_file();
            }
            self.check_table_error();
        }
    }

    pub fn first(&mut self) {
        self.err = None;
        self.iter = None;
        if self.files.is_empty() {
            return;
        }
        if self.open_file(0)
            && let Some(iter) = &mut self.iter
        {
            iter.first();
            if iter.current().is_none() && iter.error().is_none() {
                self.advance_file();
            }
            self.check_table_error();
        }
    }

    pub fn last(&mut self) {
        self.err = None;
        self.iter = None;
        if self.files.is_empty() {
            return;
        }
        let idx = self.files.len() - 1;
        if self.open_file(idx)
            && let Some(iter) = &mut self.iter
        {
            iter.last();
            if iter.current().is_none() && iter.error().is_none() {
                self.retreat_file();
            }
            self.check_table_error();
        }
    }

    pub fn next(&mut self) {
        if self.err.is_some() {
            return;
        }
        if let Some(iter) = &mut self.iter {
            iter.next();
            if iter.current().is_none() && iter.error().is_none() {
                self.advance_file();
            }
            self.check_table_error();
        }
    }

    pub fn prev(&mut self) {
        if self.err.is_some() {
            return;
        }
        if let Some(iter) = &mut self.iter {
            iter.prev();
            if iter.current().is_none() && iter.error().is_none() {
                self.retreat_file();
            }
            self.check_table_error();
        }
    }

    pub fn current(&self) -> Option<(&InternalKey, &[u8])> {
        self.iter.as_ref().and_then(|it| it.current())
    }

    /// Moves to the first entry of the next file, skipping empties.
    fn advance_file(&mut self) {
        loop {
            let next = self.file_idx + 1;
            if next >= self.files.len() {
                self.iter = None;
                return;
            }
            if !self.open_file(next) {
                return;
            }
            if let Some(iter) = &mut self.iter {
                iter.first();
                if iter.current().is_some() || iter.error().is_some() {
                    self.check_table_error();
                    return;
                }
            }
        }
    }

    /// Moves to the last entry of the previous file, skipping empties.
    fn retreat_file(&mut self) {
        loop {
            let Some(prev) = self.file_idx.checked_sub(1) else {
                self.iter = None;
                return;
            };
            if !self.open_file(prev) {
                return;
            }
            if let Some(iter) = &mut self.iter {
                iter.last();
                if iter.current().is_some() || iter.error().is_some() {
                    self.check_table_error();
                    return;
                }
            }
        }
    }

    fn check_table_error(&mut self) {
        if let Some(iter) = &self.iter
            && let Some(e) = iter.error()
        {
            let msg = format!("file {}: {e}", self.files[self.file_idx].file_num);
            self.fail(msg);
        }
    }
}
