//! Shared record types that travel between engine layers.
//!
//! The memtable, the table builder, and the iterator stack exchange
//! three currencies:
//!
//! - [`PointEntry`] — one versioned point record (set, merge operand,
//!   or point tombstone).
//! - [`RangeTombstone`] — a versioned `[start, end)` deletion.
//! - [`RangeKeyRecord`] — one range-key mutation (set / unset /
//!   delete) over `[start, end)`.
//!
//! Range records are stored in skip-lists and table blocks keyed by
//! their start internal key; the remaining fields ride in an encoded
//! value payload produced and parsed here.

use std::cmp::Ordering;

use crate::encoding::{self, ByteReader, EncodingError};
use crate::key::{Comparator, InternalKey, SeqNum, ValueKind, is_visible};

// ------------------------------------------------------------------------------------------------
// PointEntry
// ------------------------------------------------------------------------------------------------

/// A single versioned point record.
///
/// `value` is empty for tombstones; the kind inside the internal key
/// says how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointEntry {
    /// Full internal key (user key, seqnum, kind).
    pub key: InternalKey,
    /// Value bytes; empty for `Delete` / `SingleDelete`.
    pub value: Vec<u8>,
}

impl PointEntry {
    /// Creates a point entry.
    pub fn new(key: InternalKey, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// RangeTombstone
// ------------------------------------------------------------------------------------------------

/// A versioned range deletion covering `[start, end)`.
///
/// A tombstone shadows a point record when it covers the record's user
/// key, its seqnum is strictly greater than the record's, and it is
/// itself visible at the reading snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTombstone {
    /// Inclusive start of the deleted range.
    pub start: Vec<u8>,
    /// Exclusive end of the deleted range.
    pub end: Vec<u8>,
    /// Sequence number of the deletion.
    pub seq: SeqNum,
}

impl RangeTombstone {
    /// Creates a range tombstone.
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>, seq: SeqNum) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            seq,
        }
    }

    /// Whether this tombstone deletes `(user_key, entry_seq)` as seen
    /// from a snapshot at `visible`.
    pub fn shadows(
        &self,
        cmp: &dyn Comparator,
        user_key: &[u8],
        entry_seq: SeqNum,
        visible: SeqNum,
    ) -> bool {
        is_visible(self.seq, visible)
            && self.seq > entry_seq
            && cmp.compare(&self.start, user_key) != Ordering::Greater
            && cmp.compare(user_key, &self.end) == Ordering::Less
    }

    /// Encodes the non-key payload (the end key).
    pub fn encode_value(&self) -> Result<Vec<u8>, EncodingError> {
        encoding::encode_to_vec(&self.end)
    }

    /// Reconstructs a tombstone from its start key, seqnum, and
    /// encoded payload.
    pub fn decode(start: Vec<u8>, seq: SeqNum, payload: &[u8]) -> Result<Self, EncodingError> {
        let end = encoding::decode_from_slice::<Vec<u8>>(payload)?;
        Ok(Self { start, end, seq })
    }
}

// ------------------------------------------------------------------------------------------------
// RangeKeyRecord
// ------------------------------------------------------------------------------------------------

/// One range-key mutation over `[start, end)`.
///
/// - `RangeKeySet` carries a suffix and a value.
/// - `RangeKeyUnset` carries a suffix.
/// - `RangeKeyDelete` carries neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeKeyRecord {
    /// One of the three range-key kinds.
    pub kind: ValueKind,
    /// Inclusive start of the span.
    pub start: Vec<u8>,
    /// Exclusive end of the span.
    pub end: Vec<u8>,
    /// Sequence number of the mutation.
    pub seq: SeqNum,
    /// Suffix for set/unset; empty for delete.
    pub suffix: Vec<u8>,
    /// Value for set; empty otherwise.
    pub value: Vec<u8>,
}

impl RangeKeyRecord {
    /// Encodes the non-key payload: `[end][suffix][value]`.
    pub fn encode_value(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::new();
        encoding::Encode::encode_to(&self.end, &mut buf)?;
        encoding::Encode::encode_to(&self.suffix, &mut buf)?;
        encoding::Encode::encode_to(&self.value, &mut buf)?;
        Ok(buf)
    }

    /// Reconstructs a record from its start key, seqnum, kind, and
    /// encoded payload.
    pub fn decode(
        kind: ValueKind,
        start: Vec<u8>,
        seq: SeqNum,
        payload: &[u8],
    ) -> Result<Self, EncodingError> {
        let mut r = ByteReader::new(payload);
        let end = <Vec<u8> as encoding::Decode>::decode_from(&mut r)?;
        let suffix = <Vec<u8> as encoding::Decode>::decode_from(&mut r)?;
        let value = <Vec<u8> as encoding::Decode>::decode_from(&mut r)?;
        Ok(Self {
            kind,
            start,
            end,
            seq,
            suffix,
            value,
        })
    }

    /// Whether the span covers `user_key`.
    pub fn covers(&self, cmp: &dyn Comparator, user_key: &[u8]) -> bool {
        cmp.compare(&self.start, user_key) != Ordering::Greater
            && cmp.compare(user_key, &self.end) == Ordering::Less
    }
}

// ------------------------------------------------------------------------------------------------
// Merger
// ------------------------------------------------------------------------------------------------

/// Combines merge operands at read time.
///
/// The iterator stack collects the visible `Merge` operands for a key
/// newest-first, stopping at the first `Set` (the base) or tombstone,
/// then hands the chain here.
pub trait Merger: Send + Sync + std::fmt::Debug {
    /// Stable identifier for diagnostics.
    fn name(&self) -> &'static str;

    /// Produces the merged value. `operands` are newest → oldest;
    /// `base` is the older `Set` value the chain landed on, if any.
    fn merge(&self, key: &[u8], operands: &[Vec<u8>], base: Option<&[u8]>) -> Vec<u8>;
}

/// Default merger: concatenates base and operands oldest → newest.
#[derive(Debug, Default, Clone, Copy)]
pub struct AppendMerger;

impl Merger for AppendMerger {
    fn name(&self) -> &'static str {
        "stratadb.append"
    }

    fn merge(&self, _key: &[u8], operands: &[Vec<u8>], base: Option<&[u8]>) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(base) = base {
            out.extend_from_slice(base);
        }
        for operand in operands.iter().rev() {
            out.extend_from_slice(operand);
        }
        out
    }
}
