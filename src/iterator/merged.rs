//! Merged iterator — heap merge with snapshot visibility.
//!
//! Combines the child iterators of a captured read state into one
//! stream ordered by internal key `(user key ASC, trailer DESC)`.
//! After every positioning operation the iterator *settles*: entries
//! above the snapshot's visible seqnum and entries shadowed by a
//! visible range tombstone are stepped over, so consumers only ever
//! observe the snapshot-consistent version stream.
//!
//! A min-heap over the children picks the next candidate in O(log C);
//! reverse iteration flips the heap's sense. Direction changes and
//! seeks rebuild the heap.
//!
//! Cancellation is checked at seek boundaries and between steps; a
//! canceled iterator drains with [`Error::Canceled`] sticky.

use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::error::Error;
use crate::key::{Comparator, InternalKey, SeqNum, compare_internal};
use crate::record::RangeTombstone;

use super::ChildIter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Forward,
    Reverse,
}

/// The snapshot-consistent internal entry stream.
pub struct MergedIter {
    cmp: Arc<dyn Comparator>,
    children: Vec<ChildIter>,
    /// Heap of child indexes; `heap[0]` holds the best candidate.
    heap: Vec<usize>,
    dir: Direction,
    /// Snapshot visibility bound.
    visible: SeqNum,
    /// Range tombstones across all sources in the read state.
    range_dels: Vec<RangeTombstone>,
    cancel: Option<Arc<AtomicBool>>,
    err: Option<Error>,
}

impl MergedIter {
    /// Builds a merged iterator over `children` at snapshot
    /// `visible`, with `range_dels` collected from every source.
    pub fn new(
        cmp: Arc<dyn Comparator>,
        children: Vec<ChildIter>,
        range_dels: Vec<RangeTombstone>,
        visible: SeqNum,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            cmp,
            children,
            heap: Vec::new(),
            dir: Direction::Forward,
            visible,
            range_dels,
            cancel,
            err: None,
        }
    }

    /// Snapshot visibility bound of this iterator.
    pub fn visible_seq(&self) -> SeqNum {
        self.visible
    }

    /// First sticky error: a child failure or cancellation.
    pub fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// Current entry, if positioned.
    pub fn current(&self) -> Option<(&InternalKey, &[u8])> {
        if self.err.is_some() {
            return None;
        }
        let &top = self.heap.first()?;
        self.children[top].current()
    }

    fn canceled(&mut self) -> bool {
        if let Some(cancel) = &self.cancel
            && cancel.load(std::sync::atomic::Ordering::Acquire)
        {
            self.err = Some(Error::Canceled);
            self.heap.clear();
            return true;
        }
        false
    }

    fn check_child_errors(&mut self) {
        if self.err.is_some() {
            return;
        }
        for child in &self.children {
            if let Some(msg) = child.error() {
                self.err = Some(Error::Corruption(msg));
                self.heap.clear();
                return;
            }
        }
    }

    // --------------------------------------------------------------------------------------------
    // Heap
    // --------------------------------------------------------------------------------------------

    /// Whether child `a` orders before child `b` in the current
    /// direction. Both must be positioned.
    fn child_before(&self, a: usize, b: usize) -> bool {
        let (Some((ka, _)), Some((kb, _))) =
            (self.children[a].current(), self.children[b].current())
        else {
            return false;
        };
        let ord = compare_internal(self.cmp.as_ref(), ka, kb);
        match self.dir {
            Direction::Forward => ord == Ordering::Less,
            Direction::Reverse => ord == Ordering::Greater,
        }
    }

    fn rebuild_heap(&mut self) {
        self.heap = (0..self.children.len())
            .filter(|&i| self.children[i].current().is_some())
            .collect();
        if self.heap.len() > 1 {
            for i in (0..self.heap.len() / 2).rev() {
                self.sift_down(i);
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            if left >= self.heap.len() {
                return;
            }
            let right = left + 1;
            let mut best = left;
            if right < self.heap.len() && self.child_before(self.heap[right], self.heap[left]) {
                best = right;
            }
            if self.child_before(self.heap[best], self.heap[i]) {
                self.heap.swap(best, i);
                i = best;
            } else {
                return;
            }
        }
    }

    /// Steps the top child and restores the heap property.
    fn step_top(&mut self) {
        let Some(&top) = self.heap.first() else {
            return;
        };
        match self.dir {
            Direction::Forward => self.children[top].next(),
            Direction::Reverse => self.children[top].prev(),
        }
        if self.children[top].current().is_none() {
            self.heap.swap_remove(0);
        }
        self.sift_down(0);
    }

    // --------------------------------------------------------------------------------------------
    // Settling
    // --------------------------------------------------------------------------------------------

    /// Whether the current top entry must be skipped: invisible at
    /// the snapshot, or shadowed by a visible range tombstone.
    fn top_suppressed(&self) -> bool {
        let Some((key, _)) = self.current() else {
            return false;
        };
        if !key.visible_at(self.visible) {
            return true;
        }
        self.range_dels
            .iter()
            .any(|t| t.shadows(self.cmp.as_ref(), &key.user_key, key.seq, self.visible))
    }

    /// Advances past suppressed entries in the current direction.
    fn settle(&mut self) {
        loop {
            if self.canceled() {
                return;
            }
            self.check_child_errors();
            if self.err.is_some() {
                return;
            }
            if !self.top_suppressed() {
                return;
            }
            self.step_top();
        }
    }

    // --------------------------------------------------------------------------------------------
    // Positioning
    // --------------------------------------------------------------------------------------------

    /// Positions at the first visible entry with internal key ≥ `ikey`.
    pub fn seek_ge(&mut self, ikey: &InternalKey) {
        if self.canceled() {
            return;
        }
        self.err = None;
        self.dir = Direction::Forward;
        for child in &mut self.children {
            child.seek_ge(ikey);
        }
        self.rebuild_heap();
        self.settle();
    }

    /// Prefix-aware seek; pushes the prefix into table children so
    /// bloom lookups can short-circuit.
    pub fn seek_prefix_ge(&mut self, prefix: &[u8], ikey: &InternalKey) {
        if self.canceled() {
            return;
        }
        self.err = None;
        self.dir = Direction::Forward;
        for child in &mut self.children {
            child.seek_prefix_ge(prefix, ikey);
        }
        self.rebuild_heap();
        self.settle();
    }

    /// Positions at the last visible entry with internal key < `ikey`.
    pub fn seek_lt(&mut self, ikey: &InternalKey) {
        if self.canceled() {
            return;
        }
        self.err = None;
        self.dir = Direction::Reverse;
        for child in &mut self.children {
            child.seek_lt(ikey);
        }
        self.rebuild_heap();
        self.settle();
    }

    /// Positions at the first visible entry.
    pub fn first(&mut self) {
        if self.canceled() {
            return;
        }
        self.err = None;
        self.dir = Direction::Forward;
        for child in &mut self.children {
            child.first();
        }
        self.rebuild_heap();
        self.settle();
    }

    /// Positions at the last visible entry.
    pub fn last(&mut self) {
        if self.canceled() {
            return;
        }
        self.err = None;
        self.dir = Direction::Reverse;
        for child in &mut self.children {
            child.last();
        }
        self.rebuild_heap();
        self.settle();
    }

    /// Steps to the next visible entry (forward order).
    ///
    /// The iterator must be in forward direction; the user iterator
    /// re-seeks on reversal.
    pub fn next(&mut self) {
        if self.canceled() || self.err.is_some() {
            return;
        }
        debug_assert_eq!(self.dir, Direction::Forward);
        self.step_top();
        self.settle();
    }

    /// Steps to the previous visible entry (reverse order: user key
    /// descending, seqnum ascending within a user key).
    pub fn prev(&mut self) {
        if self.canceled() || self.err.is_some() {
            return;
        }
        debug_assert_eq!(self.dir, Direction::Reverse);
        self.step_top();
        self.settle();
    }

    /// Whether the iterator is positioned on an entry.
    pub fn valid(&self) -> bool {
        self.current().is_some()
    }
}
