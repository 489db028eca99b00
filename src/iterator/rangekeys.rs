//! Range-key resolution and masking.
//!
//! Range-key mutations (`RangeKeySet` / `RangeKeyUnset` /
//! `RangeKeyDelete`) accumulate across batches, memtables, and
//! tables. At iterator construction the visible records are
//! *fragmented* at every span boundary and *resolved* per fragment:
//! newest-first, a set survives unless a newer unset with the same
//! suffix or a newer range-key delete covers it.
//!
//! The resolved spans drive two user-iterator features:
//!
//! - `range_keys()` — the set items covering the current position;
//! - **masking** — when enabled, a point key whose suffix orders at
//!   or after a covering span's suffix is hidden.

use std::cmp::Ordering;

use crate::key::{Comparator, SeqNum, ValueKind, is_visible};
use crate::record::RangeKeyRecord;

/// One surviving range-key item within a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeKeyItem {
    /// The item's suffix.
    pub suffix: Vec<u8>,
    /// The item's value.
    pub value: Vec<u8>,
    /// Seqnum of the surviving set.
    pub seq: SeqNum,
}

/// A maximal fragment `[start, end)` with its surviving items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSpan {
    /// Inclusive fragment start.
    pub start: Vec<u8>,
    /// Exclusive fragment end.
    pub end: Vec<u8>,
    /// Surviving set items, ordered by suffix.
    pub items: Vec<RangeKeyItem>,
}

impl ResolvedSpan {
    /// Whether the fragment covers `user_key`.
    pub fn covers(&self, cmp: &dyn Comparator, user_key: &[u8]) -> bool {
        cmp.compare(&self.start, user_key) != Ordering::Greater
            && cmp.compare(user_key, &self.end) == Ordering::Less
    }
}

/// Fragments and resolves the visible range-key records.
///
/// Returns non-empty spans sorted by start key.
pub fn resolve_range_keys(
    cmp: &dyn Comparator,
    records: &[RangeKeyRecord],
    visible: SeqNum,
) -> Vec<ResolvedSpan> {
    let visible_records: Vec<&RangeKeyRecord> = records
        .iter()
        .filter(|r| is_visible(r.seq, visible))
        .collect();
    if visible_records.is_empty() {
        return Vec::new();
    }

    // Fragment at every boundary.
    let mut bounds: Vec<&[u8]> = Vec::with_capacity(visible_records.len() * 2);
    for r in &visible_records {
        bounds.push(&r.start);
        bounds.push(&r.end);
    }
    bounds.sort_by(|a, b| cmp.compare(a, b));
    bounds.dedup();

    let mut spans = Vec::new();
    for pair in bounds.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        // Records overlapping this fragment, newest first.
        let mut overlapping: Vec<&RangeKeyRecord> = visible_records
            .iter()
            .filter(|r| {
                cmp.compare(&r.start, start) != Ordering::Greater
                    && cmp.compare(start, &r.end) == Ordering::Less
            })
            .copied()
            .collect();
        if overlapping.is_empty() {
            continue;
        }
        overlapping.sort_by(|a, b| b.seq.cmp(&a.seq));

        // Newest-first resolution: a suffix is decided by the first
        // set or unset naming it; a range-key delete decides
        // everything older.
        let mut items: Vec<RangeKeyItem> = Vec::new();
        let mut decided: Vec<&[u8]> = Vec::new();
        for r in overlapping {
            match r.kind {
                ValueKind::RangeKeySet => {
                    if !decided.iter().any(|s| cmp.compare(s, &r.suffix) == Ordering::Equal) {
                        decided.push(&r.suffix);
                        items.push(RangeKeyItem {
                            suffix: r.suffix.clone(),
                            value: r.value.clone(),
                            seq: r.seq,
                        });
                    }
                }
                ValueKind::RangeKeyUnset => {
                    if !decided.iter().any(|s| cmp.compare(s, &r.suffix) == Ordering::Equal) {
                        decided.push(&r.suffix);
                    }
                }
                ValueKind::RangeKeyDelete => break,
                _ => {}
            }
        }

        if !items.is_empty() {
            items.sort_by(|a, b| cmp.compare(&a.suffix, &b.suffix));
            spans.push(ResolvedSpan {
                start: start.to_vec(),
                end: end.to_vec(),
                items,
            });
        }
    }

    // Coalesce adjacent fragments with identical item sets.
    let mut merged: Vec<ResolvedSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        if let Some(last) = merged.last_mut()
            && cmp.compare(&last.end, &span.start) == Ordering::Equal
            && last.items == span.items
        {
            last.end = span.end;
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Whether a point key is hidden by range-key masking: some covering
/// span carries an item whose suffix orders at or before the point
/// key's suffix.
pub fn masks_point(
    cmp: &dyn Comparator,
    spans: &[ResolvedSpan],
    user_key: &[u8],
) -> bool {
    let split = cmp.split(user_key);
    if split >= user_key.len() {
        return false; // no suffix to compare
    }
    let point_suffix = &user_key[split..];
    spans.iter().any(|span| {
        span.covers(cmp, user_key)
            && span.items.iter().any(|item| {
                !item.suffix.is_empty()
                    && cmp.compare(&item.suffix, point_suffix) != Ordering::Greater
            })
    })
}
