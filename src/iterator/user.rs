//! User iterator — the public positioning surface.
//!
//! Wraps a [`MergedIter`] and turns the internal version stream into
//! the user-visible key space:
//!
//! - per user key, the newest visible version decides the outcome
//!   (set, tombstone, or a merge chain folded by the configured
//!   merger);
//! - `[lower, upper)` bounds restrict emission and can be swapped
//!   mid-iteration (`set_bounds` invalidates the position);
//! - `*_with_limit` steps report [`IterValidity::AtLimit`] for
//!   efficient paging;
//! - resolved range-key spans interleave with point keys and can mask
//!   them by suffix;
//! - values are exposed through [`LazyValue`], the deferred
//!   materialization surface;
//! - a monotone sequence of `seek_ge` calls is served with bounded
//!   `next` probes before falling back to a full seek.
//!
//! Errors are sticky: the first child failure or cancellation parks
//! the iterator in `Exhausted` with the error held for `error()` /
//! `close()`.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::trace;

use crate::batch::BatchView;
use crate::error::Error;
use crate::key::{Comparator, InternalKey, SeqNum, ValueKind};
use crate::memtable::Memtable;
use crate::record::{Merger, RangeKeyRecord, RangeTombstone};
use crate::sstable::TableIter;
use crate::version::ReadState;

use super::level::{FileOpener, LevelIter};
use super::merged::MergedIter;
use super::rangekeys::{RangeKeyItem, ResolvedSpan, masks_point, resolve_range_keys};
use super::{ChildIter, VecIter};

/// How many `next` probes a monotone re-seek may spend before a full
/// seek.
const SEEK_USING_NEXT_PROBES: usize = 8;

// ------------------------------------------------------------------------------------------------
// Options and validity
// ------------------------------------------------------------------------------------------------

/// Which keyspaces an iterator observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyTypes {
    /// Point keys only.
    #[default]
    PointsOnly,
    /// Range keys only.
    RangesOnly,
    /// Both, interleaved.
    PointsAndRanges,
}

/// Construction options for an iterator.
#[derive(Debug, Clone, Default)]
pub struct IterOptions {
    /// Inclusive lower bound on user keys.
    pub lower_bound: Option<Vec<u8>>,
    /// Exclusive upper bound on user keys.
    pub upper_bound: Option<Vec<u8>>,
    /// Keyspaces to observe.
    pub key_types: KeyTypes,
    /// Hide point keys covered by a range key whose suffix orders at
    /// or before the point key's suffix.
    pub mask_suffixes: bool,
    /// Cancellation signal, checked at seek boundaries and between
    /// steps.
    pub cancel: Option<Arc<std::sync::atomic::AtomicBool>>,
}

/// Position validity tristate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterValidity {
    /// Positioned on a key.
    Valid,
    /// Past the data (or the bounds) in the iteration direction.
    Exhausted,
    /// The step stopped at a caller-supplied limit.
    AtLimit,
}

/// A value handle that defers materialization.
///
/// Consumers that only need keys never touch it; `get` materializes
/// on demand.
#[derive(Debug, Clone, Default)]
pub struct LazyValue {
    bytes: Vec<u8>,
}

impl LazyValue {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Materializes the value bytes.
    pub fn get(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the handle, returning the bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    /// Value length without materializing.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the value is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

// ------------------------------------------------------------------------------------------------
// IterSources — everything needed to (re)build the stack
// ------------------------------------------------------------------------------------------------

/// The captured snapshot and plumbing an iterator is built from.
/// Kept by the iterator so `set_options` / `clone_with` can rebuild
/// the internal state on the same snapshot.
pub(crate) struct IterSources {
    pub(crate) cmp: Arc<dyn Comparator>,
    pub(crate) merger: Arc<dyn Merger>,
    /// Pinned read state: memtables and version survive while the
    /// iterator lives.
    pub(crate) read_state: Arc<ReadState>,
    /// Uncommitted indexed-batch view, if iterating a batch.
    pub(crate) batch_view: Option<Arc<BatchView>>,
    /// Snapshot visibility bound.
    pub(crate) visible: SeqNum,
    /// Table opener backed by the engine's file cache.
    pub(crate) opener: FileOpener,
    /// Cancellation signal, checked at seeks and steps.
    pub(crate) cancel: Option<Arc<std::sync::atomic::AtomicBool>>,
}

impl IterSources {
    /// Builds the child set plus the side collections of range
    /// tombstones and range-key records across every source.
    fn build(&self) -> Result<(Vec<ChildIter>, Vec<RangeTombstone>, Vec<RangeKeyRecord>), Error> {
        let mut children = Vec::new();
        let mut range_dels = Vec::new();
        let mut range_keys = Vec::new();

        if let Some(view) = &self.batch_view {
            children.push(ChildIter::Batch(VecIter::new(view.points.clone())));
            range_dels.extend(view.range_dels.iter().cloned());
            range_keys.extend(view.range_keys.iter().cloned());
        }

        for mem in &self.read_state.memtables {
            collect_memtable_ranges(mem, &mut range_dels, &mut range_keys)?;
            children.push(ChildIter::Memtable(mem.iter()));
        }

        // Level 0: one child per (possibly overlapping) table.
        for meta in &self.read_state.version.levels[0] {
            let reader = (self.opener)(meta.file_num)?;
            range_dels.extend(reader.range_dels().iter().cloned());
            range_keys.extend(reader.range_keys().iter().cloned());
            children.push(ChildIter::Table(TableIter::new(reader)));
        }

        // Deeper levels: a single lazy iterator per level. Range
        // records still need collecting eagerly, which touches each
        // file once through the file cache.
        for level in self.read_state.version.levels.iter().skip(1) {
            if level.is_empty() {
                continue;
            }
            for meta in level {
                let reader = (self.opener)(meta.file_num)?;
                range_dels.extend(reader.range_dels().iter().cloned());
                range_keys.extend(reader.range_keys().iter().cloned());
            }
            children.push(ChildIter::Level(LevelIter::new(
                level.clone(),
                Arc::clone(&self.opener),
            )));
        }

        Ok((children, range_dels, range_keys))
    }
}

fn collect_memtable_ranges(
    mem: &Arc<Memtable>,
    range_dels: &mut Vec<RangeTombstone>,
    range_keys: &mut Vec<RangeKeyRecord>,
) -> Result<(), Error> {
    range_dels.extend(
        mem.range_tombstones()
            .map_err(|e| Error::Invariant(e.to_string()))?,
    );
    range_keys.extend(
        mem.range_key_records()
            .map_err(|e| Error::Invariant(e.to_string()))?,
    );
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Iter
// ------------------------------------------------------------------------------------------------

/// Ordered iterator over the engine's user-visible key space at one
/// snapshot.
pub struct Iter {
    sources: IterSources,
    opts: IterOptions,
    merged: MergedIter,
    spans: Vec<ResolvedSpan>,
    validity: IterValidity,
    dir: Direction,
    key_buf: Vec<u8>,
    value: LazyValue,
    /// Resolved point waiting to interleave with span starts.
    pending_point: Option<(Vec<u8>, Vec<u8>)>,
    /// Whether the current position carries a point key.
    has_point: bool,
    /// Items of the span covering the current position.
    cur_range: Vec<RangeKeyItem>,
    /// Span starts at or before this position have been emitted.
    last_pos: Option<Vec<u8>>,
    err: Option<Error>,
}

impl Iter {
    pub(crate) fn new(sources: IterSources, opts: IterOptions) -> Result<Self, Error> {
        let (children, range_dels, range_key_records) = sources.build()?;
        let merged = MergedIter::new(
            Arc::clone(&sources.cmp),
            children,
            range_dels,
            sources.visible,
            sources.cancel.clone(),
        );
        let spans = if opts.key_types == KeyTypes::PointsOnly && !opts.mask_suffixes {
            Vec::new()
        } else {
            resolve_range_keys(sources.cmp.as_ref(), &range_key_records, sources.visible)
        };
        Ok(Self {
            sources,
            opts,
            merged,
            spans,
            validity: IterValidity::Exhausted,
            dir: Direction::Forward,
            key_buf: Vec::new(),
            value: LazyValue::default(),
            pending_point: None,
            has_point: false,
            cur_range: Vec::new(),
            last_pos: None,
            err: None,
        })
    }

    // --------------------------------------------------------------------------------------------
    // Accessors
    // --------------------------------------------------------------------------------------------

    /// Whether the iterator is positioned on a key.
    pub fn valid(&self) -> bool {
        self.validity == IterValidity::Valid
    }

    /// The position validity tristate.
    pub fn validity(&self) -> IterValidity {
        self.validity
    }

    /// Current user key; meaningful while `valid()`.
    pub fn key(&self) -> &[u8] {
        &self.key_buf
    }

    /// Current point value handle; empty when the position is a
    /// bare range-key span.
    pub fn value(&self) -> &LazyValue {
        &self.value
    }

    /// Whether the current position carries a point key.
    pub fn has_point(&self) -> bool {
        self.has_point
    }

    /// Range-key items covering the current position; empty when
    /// none.
    pub fn range_keys(&self) -> &[RangeKeyItem] {
        &self.cur_range
    }

    /// First sticky error.
    pub fn error(&self) -> Option<&Error> {
        self.err.as_ref().or_else(|| self.merged.error())
    }

    /// Releases the iterator, surfacing any pending error.
    pub fn close(mut self) -> Result<(), Error> {
        if let Some(e) = self.err.take() {
            return Err(e);
        }
        match self.merged.error() {
            Some(Error::Canceled) => Err(Error::Canceled),
            Some(e) => Err(Error::Corruption(e.to_string())),
            None => Ok(()),
        }
    }

    /// The snapshot sequence this iterator reads at.
    pub fn snapshot_seq(&self) -> SeqNum {
        self.sources.visible
    }

    // --------------------------------------------------------------------------------------------
    // Option surgery
    // --------------------------------------------------------------------------------------------

    /// Replaces the bounds; the current position is invalidated and
    /// the caller must re-seek.
    pub fn set_bounds(&mut self, lower: Option<Vec<u8>>, upper: Option<Vec<u8>>) {
        self.opts.lower_bound = lower;
        self.opts.upper_bound = upper;
        self.invalidate();
    }

    /// Rebuilds the iterator under new options on the same snapshot.
    pub fn set_options(&mut self, opts: IterOptions) -> Result<(), Error> {
        let (children, range_dels, range_key_records) = self.sources.build()?;
        self.merged = MergedIter::new(
            Arc::clone(&self.sources.cmp),
            children,
            range_dels,
            self.sources.visible,
            self.sources.cancel.clone(),
        );
        self.spans = if opts.key_types == KeyTypes::PointsOnly && !opts.mask_suffixes {
            Vec::new()
        } else {
            resolve_range_keys(
                self.sources.cmp.as_ref(),
                &range_key_records,
                self.sources.visible,
            )
        };
        self.opts = opts;
        self.invalidate();
        Ok(())
    }

    /// Creates an independent iterator on the same snapshot, with
    /// `opts` (or this iterator's options when `None`).
    pub fn clone_with(&self, opts: Option<IterOptions>) -> Result<Iter, Error> {
        let sources = IterSources {
            cmp: Arc::clone(&self.sources.cmp),
            merger: Arc::clone(&self.sources.merger),
            read_state: Arc::clone(&self.sources.read_state),
            batch_view: self.sources.batch_view.clone(),
            visible: self.sources.visible,
            opener: Arc::clone(&self.sources.opener),
            cancel: self.sources.cancel.clone(),
        };
        Iter::new(sources, opts.unwrap_or_else(|| self.opts.clone()))
    }

    fn invalidate(&mut self) {
        self.validity = IterValidity::Exhausted;
        self.pending_point = None;
        self.last_pos = None;
        self.has_point = false;
        self.cur_range.clear();
        self.key_buf.clear();
        self.value = LazyValue::default();
        // Cancellation is non-fatal: a re-seek may recover.
        if matches!(self.err, Some(Error::Canceled)) {
            self.err = None;
        }
    }

    // --------------------------------------------------------------------------------------------
    // Positioning
    // --------------------------------------------------------------------------------------------

    /// Positions at the first key ≥ `key` (clamped to the bounds).
    pub fn seek_ge(&mut self, key: &[u8]) {
        // Monotone seek optimization: when already positioned before
        // the target in forward direction, probe with next() first.
        if self.dir == Direction::Forward
            && self.validity == IterValidity::Valid
            && self.sources.cmp.compare(&self.key_buf, key) != Ordering::Greater
        {
            for _ in 0..SEEK_USING_NEXT_PROBES {
                if self.validity != IterValidity::Valid {
                    break;
                }
                if self.sources.cmp.compare(&self.key_buf, key) != Ordering::Less {
                    trace!("seek_ge satisfied by next probes");
                    return;
                }
                self.next();
            }
            if self.validity == IterValidity::Valid
                && self.sources.cmp.compare(&self.key_buf, key) != Ordering::Less
            {
                return;
            }
        }
        self.full_seek_ge(key, None);
    }

    fn full_seek_ge(&mut self, key: &[u8], prefix: Option<&[u8]>) {
        self.invalidate();
        self.dir = Direction::Forward;
        let target = self.clamp_lower(key);

        let ikey = InternalKey::bound_before(target.clone());
        match prefix {
            Some(p) => self.merged.seek_prefix_ge(p, &ikey),
            None => self.merged.seek_ge(&ikey),
        }
        self.last_pos = None;
        self.emit_forward(Some(&target), None);
    }

    /// Prefix-aware seek; table sources consult bloom filters.
    pub fn seek_prefix_ge(&mut self, prefix: &[u8], key: &[u8]) {
        self.full_seek_ge(key, Some(prefix));
    }

    /// Positions at the last key < `key` (clamped to the bounds).
    pub fn seek_lt(&mut self, key: &[u8]) {
        self.invalidate();
        self.dir = Direction::Reverse;
        let target = match &self.opts.upper_bound {
            Some(upper) if self.cmp(key, upper) == Ordering::Greater => upper.clone(),
            _ => key.to_vec(),
        };
        self.merged.seek_lt(&InternalKey::bound_before(target.clone()));
        self.last_pos = Some(target.clone());
        self.emit_reverse(None);
    }

    /// Positions at the first key in bounds.
    pub fn first(&mut self) {
        let start = self.opts.lower_bound.clone().unwrap_or_default();
        self.full_seek_ge(&start, None);
    }

    /// Positions at the last key in bounds.
    pub fn last(&mut self) {
        match self.opts.upper_bound.clone() {
            Some(upper) => self.seek_lt(&upper),
            None => {
                self.invalidate();
                self.dir = Direction::Reverse;
                self.merged.last();
                self.last_pos = None;
                self.emit_reverse(None);
            }
        }
    }

    /// Steps to the next key.
    pub fn next(&mut self) {
        self.step_forward(None);
    }

    /// Steps to the next key, reporting [`IterValidity::AtLimit`]
    /// when the found key is at or beyond `limit`.
    pub fn next_with_limit(&mut self, limit: &[u8]) {
        self.step_forward(Some(limit));
    }

    /// Steps to the previous key.
    pub fn prev(&mut self) {
        self.step_reverse(None);
    }

    /// Steps to the previous key, reporting
    /// [`IterValidity::AtLimit`] when the found key is below `limit`.
    pub fn prev_with_limit(&mut self, limit: &[u8]) {
        self.step_reverse(Some(limit));
    }

    fn step_forward(&mut self, limit: Option<&[u8]>) {
        if self.validity == IterValidity::Exhausted && self.last_pos.is_none() {
            return;
        }
        if self.dir == Direction::Reverse {
            // Direction reversal: re-anchor forward past the current
            // position.
            let anchor = self.key_buf.clone();
            self.dir = Direction::Forward;
            self.merged
                .seek_ge(&InternalKey::bound_after(anchor.clone()));
            self.pending_point = None;
            self.last_pos = Some(anchor);
            self.emit_forward(None, limit);
            return;
        }
        self.emit_forward(None, limit);
    }

    fn step_reverse(&mut self, limit: Option<&[u8]>) {
        if self.validity == IterValidity::Exhausted && self.last_pos.is_none() {
            return;
        }
        if self.dir == Direction::Forward {
            let anchor = self.key_buf.clone();
            self.dir = Direction::Reverse;
            self.merged
                .seek_lt(&InternalKey::bound_before(anchor.clone()));
            self.pending_point = None;
            self.last_pos = Some(anchor);
            self.emit_reverse(limit);
            return;
        }
        self.emit_reverse(limit);
    }

    // --------------------------------------------------------------------------------------------
    // Emission
    // --------------------------------------------------------------------------------------------

    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.sources.cmp.compare(a, b)
    }

    fn clamp_lower(&self, key: &[u8]) -> Vec<u8> {
        match &self.opts.lower_bound {
            Some(lower) if self.cmp(key, lower) == Ordering::Less => lower.clone(),
            _ => key.to_vec(),
        }
    }

    fn check_merged_error(&mut self) -> bool {
        if self.err.is_some() {
            return true;
        }
        if let Some(e) = self.merged.error() {
            self.err = Some(match e {
                Error::Canceled => Error::Canceled,
                other => Error::Corruption(other.to_string()),
            });
            self.validity = IterValidity::Exhausted;
            return true;
        }
        false
    }

    /// Emits the next position ≥ `seek_target` (inclusive) or past
    /// `last_pos` (exclusive). Interleaves span starts with points.
    fn emit_forward(&mut self, seek_target: Option<&[u8]>, limit: Option<&[u8]>) {
        loop {
            if self.check_merged_error() {
                return;
            }
            if self.pending_point.is_none() && self.opts.key_types != KeyTypes::RangesOnly {
                self.pending_point = self.resolve_next_point_forward();
                if self.check_merged_error() {
                    return;
                }
            }

            let span_pos = self.next_span_pos_forward(seek_target);

            let (pos, with_point): (Vec<u8>, bool) =
                match (&self.pending_point, &span_pos) {
                    (None, None) => {
                        self.validity = IterValidity::Exhausted;
                        self.has_point = false;
                        self.cur_range.clear();
                        return;
                    }
                    (Some((pk, _)), None) => (pk.clone(), true),
                    (None, Some(sp)) => (sp.clone(), false),
                    (Some((pk, _)), Some(sp)) => match self.cmp(pk, sp) {
                        Ordering::Less => (pk.clone(), true),
                        Ordering::Greater => (sp.clone(), false),
                        Ordering::Equal => (pk.clone(), true),
                    },
                };

            // Upper bound applies to both kinds of positions.
            if let Some(upper) = &self.opts.upper_bound
                && self.cmp(&pos, upper) != Ordering::Less
            {
                self.validity = IterValidity::Exhausted;
                self.has_point = false;
                self.cur_range.clear();
                return;
            }

            if let Some(limit) = limit
                && self.cmp(&pos, limit) != Ordering::Less
            {
                // Paging cap: stop without consuming the position.
                self.validity = IterValidity::AtLimit;
                self.key_buf = pos;
                self.has_point = false;
                self.cur_range.clear();
                return;
            }

            self.last_pos = Some(pos.clone());
            self.key_buf = pos;

            if with_point {
                let (_, v) = self
                    .pending_point
                    .take()
                    .unwrap_or((Vec::new(), Vec::new()));
                self.value = LazyValue::new(v);
                self.has_point = true;
            } else {
                self.value = LazyValue::default();
                self.has_point = false;
            }
            self.load_cur_range();

            if self.opts.key_types == KeyTypes::RangesOnly && self.cur_range.is_empty() {
                continue;
            }
            self.validity = IterValidity::Valid;
            return;
        }
    }

    /// Emits the previous position, interleaving span starts.
    fn emit_reverse(&mut self, limit: Option<&[u8]>) {
        loop {
            if self.check_merged_error() {
                return;
            }
            if self.pending_point.is_none() && self.opts.key_types != KeyTypes::RangesOnly {
                self.pending_point = self.resolve_prev_point();
                if self.check_merged_error() {
                    return;
                }
            }

            let span_pos = self.next_span_pos_reverse();

            let (pos, with_point): (Vec<u8>, bool) =
                match (&self.pending_point, &span_pos) {
                    (None, None) => {
                        self.validity = IterValidity::Exhausted;
                        self.has_point = false;
                        self.cur_range.clear();
                        return;
                    }
                    (Some((pk, _)), None) => (pk.clone(), true),
                    (None, Some(sp)) => (sp.clone(), false),
                    (Some((pk, _)), Some(sp)) => match self.cmp(pk, sp) {
                        Ordering::Greater => (pk.clone(), true),
                        Ordering::Less => (sp.clone(), false),
                        Ordering::Equal => (pk.clone(), true),
                    },
                };

            if let Some(lower) = &self.opts.lower_bound
                && self.cmp(&pos, lower) == Ordering::Less
            {
                self.validity = IterValidity::Exhausted;
                self.has_point = false;
                self.cur_range.clear();
                return;
            }

            if let Some(limit) = limit
                && self.cmp(&pos, limit) == Ordering::Less
            {
                self.validity = IterValidity::AtLimit;
                self.key_buf = pos;
                self.has_point = false;
                self.cur_range.clear();
                return;
            }

            self.last_pos = Some(pos.clone());
            self.key_buf = pos;

            if with_point {
                let (_, v) = self
                    .pending_point
                    .take()
                    .unwrap_or((Vec::new(), Vec::new()));
                self.value = LazyValue::new(v);
                self.has_point = true;
            } else {
                self.value = LazyValue::default();
                self.has_point = false;
            }
            self.load_cur_range();

            if self.opts.key_types == KeyTypes::RangesOnly && self.cur_range.is_empty() {
                continue;
            }
            self.validity = IterValidity::Valid;
            return;
        }
    }

    /// First span position after `last_pos` (or at/after the seek
    /// target). A span covering the target emits at the target.
    fn next_span_pos_forward(&self, seek_target: Option<&[u8]>) -> Option<Vec<u8>> {
        if self.opts.key_types == KeyTypes::PointsOnly {
            return None;
        }
        if let Some(t) = seek_target {
            for span in &self.spans {
                if span.covers(self.sources.cmp.as_ref(), t) {
                    return Some(t.to_vec());
                }
                if self.cmp(&span.start, t) != Ordering::Less {
                    return Some(span.start.clone());
                }
            }
            return None;
        }
        let after = self.last_pos.as_deref()?;
        self.spans
            .iter()
            .find(|s| self.cmp(&s.start, after) == Ordering::Greater)
            .map(|s| s.start.clone())
    }

    /// Greatest span start strictly below `last_pos`.
    fn next_span_pos_reverse(&self) -> Option<Vec<u8>> {
        if self.opts.key_types == KeyTypes::PointsOnly {
            return None;
        }
        let before = self.last_pos.as_deref();
        self.spans
            .iter()
            .rev()
            .find(|s| match before {
                Some(b) => self.cmp(&s.start, b) == Ordering::Less,
                None => true,
            })
            .map(|s| s.start.clone())
    }

    fn load_cur_range(&mut self) {
        self.cur_range.clear();
        if self.opts.key_types == KeyTypes::PointsOnly {
            return;
        }
        let key = self.key_buf.clone();
        if let Some(span) = self
            .spans
            .iter()
            .find(|s| s.covers(self.sources.cmp.as_ref(), &key))
        {
            self.cur_range = span.items.clone();
        }
    }

    // --------------------------------------------------------------------------------------------
    // Point resolution
    // --------------------------------------------------------------------------------------------

    /// Resolves the next live point key in forward order: collects
    /// the visible versions of the next user key and folds them.
    fn resolve_next_point_forward(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        loop {
            let user_key = {
                let (ikey, _) = self.merged.current()?;
                ikey.user_key.clone()
            };
            if let Some(upper) = &self.opts.upper_bound
                && self.cmp(&user_key, upper) != Ordering::Less
            {
                return None;
            }

            // Versions arrive newest-first in forward order.
            let mut versions: Vec<(ValueKind, Vec<u8>)> = Vec::new();
            while let Some((k, v)) = self.merged.current() {
                if k.user_key != user_key {
                    break;
                }
                versions.push((k.kind, v.to_vec()));
                self.merged.next();
            }

            if let Some(value) = self.resolve_versions(&user_key, &versions) {
                if self.masked(&user_key) {
                    continue;
                }
                return Some((user_key, value));
            }
        }
    }

    /// Resolves the previous live point key: reverse order delivers
    /// versions oldest-first, so the collected list is flipped before
    /// folding.
    fn resolve_prev_point(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        loop {
            let user_key = {
                let (ikey, _) = self.merged.current()?;
                ikey.user_key.clone()
            };
            if let Some(lower) = &self.opts.lower_bound
                && self.cmp(&user_key, lower) == Ordering::Less
            {
                return None;
            }

            let mut versions: Vec<(ValueKind, Vec<u8>)> = Vec::new();
            while let Some((k, v)) = self.merged.current() {
                if k.user_key != user_key {
                    break;
                }
                versions.push((k.kind, v.to_vec()));
                self.merged.prev();
            }
            versions.reverse();

            if let Some(value) = self.resolve_versions(&user_key, &versions) {
                if self.masked(&user_key) {
                    continue;
                }
                return Some((user_key, value));
            }
        }
    }

    /// Folds a user key's visible versions (newest first) into the
    /// live value, or `None` when the key is deleted / absent.
    ///
    /// `SingleDelete` is treated as a full tombstone for everything
    /// older in view; pairing with multiple older sets is not
    /// distinguished.
    fn resolve_versions(
        &self,
        user_key: &[u8],
        versions: &[(ValueKind, Vec<u8>)],
    ) -> Option<Vec<u8>> {
        let mut operands: Vec<Vec<u8>> = Vec::new();
        for (kind, value) in versions {
            match kind {
                ValueKind::Set => {
                    return Some(if operands.is_empty() {
                        value.clone()
                    } else {
                        self.sources
                            .merger
                            .merge(user_key, &operands, Some(value))
                    });
                }
                ValueKind::Delete | ValueKind::SingleDelete => {
                    return if operands.is_empty() {
                        None
                    } else {
                        Some(self.sources.merger.merge(user_key, &operands, None))
                    };
                }
                ValueKind::Merge => operands.push(value.clone()),
                // Range kinds and LogData never reach the point
                // stream.
                _ => {}
            }
        }
        if operands.is_empty() {
            None
        } else {
            Some(self.sources.merger.merge(user_key, &operands, None))
        }
    }

    fn masked(&self, user_key: &[u8]) -> bool {
        self.opts.mask_suffixes && masks_point(self.sources.cmp.as_ref(), &self.spans, user_key)
    }
}

impl std::fmt::Debug for Iter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iter")
            .field("validity", &self.validity)
            .field("snapshot", &self.sources.visible)
            .finish_non_exhaustive()
    }
}
