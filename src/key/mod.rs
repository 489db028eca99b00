//! Internal keys, sequence numbers, and value kinds.
//!
//! Every record in the engine is addressed by an **internal key**: the
//! user key plus a 64-bit *trailer* packing the 56-bit sequence number
//! and the operation kind (`trailer = seq << 8 | kind`).
//!
//! ## Ordering
//!
//! Internal keys order by user key **ascending** (comparator order),
//! then trailer **descending**. The descending trailer puts the
//! newest version of a key first, which is what lets the merge
//! iterator resolve shadowing by taking the first visible version it
//! encounters.
//!
//! ## Sequence number space
//!
//! Sequence numbers are 56-bit and strictly monotonic; the engine
//! never reuses one, even when a commit fails after reservation.
//! Bit 55 ([`SEQ_NUM_BATCH_BIT`]) marks entries belonging to an
//! uncommitted indexed batch: such entries bypass the snapshot
//! visibility check, but only the owning batch's iterator ever
//! produces them.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;

use crate::encoding::{self, ByteReader, EncodingError};

// ------------------------------------------------------------------------------------------------
// Sequence numbers
// ------------------------------------------------------------------------------------------------

/// Monotonic write-ordering identifier. 56 bits are usable.
pub type SeqNum = u64;

/// Largest assignable sequence number.
pub const MAX_SEQ_NUM: SeqNum = (1 << 56) - 1;

/// Marks sequence numbers of entries in an uncommitted indexed batch.
/// Entries carrying this bit are visible regardless of the snapshot
/// sequence, and are only ever emitted by the owning batch's iterator.
pub const SEQ_NUM_BATCH_BIT: SeqNum = 1 << 55;

/// Whether `seq` is visible at snapshot sequence `visible`.
#[inline]
pub fn is_visible(seq: SeqNum, visible: SeqNum) -> bool {
    seq <= visible || seq & SEQ_NUM_BATCH_BIT != 0
}

// ------------------------------------------------------------------------------------------------
// Value kinds
// ------------------------------------------------------------------------------------------------

/// The operation kind carried in an internal key's trailer byte.
///
/// The numeric values are part of the on-disk format. At equal user
/// key and sequence number, the higher-numbered kind orders first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ValueKind {
    /// Point tombstone: suppresses all older versions of the key.
    Delete = 0,
    /// Point write.
    Set = 1,
    /// Merge operand, combined at read time by the configured merger.
    Merge = 2,
    /// Opaque payload recorded in the WAL only; never reaches a
    /// memtable or table.
    LogData = 3,
    /// Tombstone pairing with a single older `Set` of the same key.
    SingleDelete = 4,
    /// Range tombstone covering `[start, end)`.
    RangeDelete = 5,
    /// Sets a range key over `[start, end)` with a suffix and value.
    RangeKeySet = 6,
    /// Unsets a range key suffix over `[start, end)`.
    RangeKeyUnset = 7,
    /// Removes all range keys over `[start, end)`.
    RangeKeyDelete = 8,
}

impl ValueKind {
    /// Highest kind value; used to build positioning bounds.
    pub const MAX: ValueKind = ValueKind::RangeKeyDelete;

    /// Decodes a kind byte, rejecting unknown values.
    pub fn from_u8(b: u8) -> Option<ValueKind> {
        Some(match b {
            0 => ValueKind::Delete,
            1 => ValueKind::Set,
            2 => ValueKind::Merge,
            3 => ValueKind::LogData,
            4 => ValueKind::SingleDelete,
            5 => ValueKind::RangeDelete,
            6 => ValueKind::RangeKeySet,
            7 => ValueKind::RangeKeyUnset,
            8 => ValueKind::RangeKeyDelete,
            _ => return None,
        })
    }

    /// Whether this kind suppresses older point versions of its key.
    pub fn is_point_tombstone(self) -> bool {
        matches!(self, ValueKind::Delete | ValueKind::SingleDelete)
    }

    /// Whether this kind belongs to the range-key keyspace.
    pub fn is_range_key(self) -> bool {
        matches!(
            self,
            ValueKind::RangeKeySet | ValueKind::RangeKeyUnset | ValueKind::RangeKeyDelete
        )
    }
}

// ------------------------------------------------------------------------------------------------
// Internal key
// ------------------------------------------------------------------------------------------------

/// User key + sequence number + kind.
///
/// The derived `Eq` compares all three fields; `Ord` compares user key
/// ascending, then trailer descending, matching the on-disk sort.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InternalKey {
    /// User-supplied key bytes.
    pub user_key: Vec<u8>,
    /// Sequence number of the operation (56 bits).
    pub seq: SeqNum,
    /// Operation kind.
    pub kind: ValueKind,
}

impl InternalKey {
    /// Creates an internal key.
    pub fn new(user_key: impl Into<Vec<u8>>, seq: SeqNum, kind: ValueKind) -> Self {
        Self {
            user_key: user_key.into(),
            seq,
            kind,
        }
    }

    /// The packed trailer: `(seq << 8) | kind`.
    #[inline]
    pub fn trailer(&self) -> u64 {
        (self.seq << 8) | self.kind as u64
    }

    /// A key ordering at-or-before every real entry for `user_key`.
    /// Used as the inclusive start bound of per-user-key scans.
    pub fn bound_before(user_key: impl Into<Vec<u8>>) -> Self {
        Self::new(user_key, MAX_SEQ_NUM, ValueKind::MAX)
    }

    /// A key ordering after every real entry for `user_key`.
    pub fn bound_after(user_key: impl Into<Vec<u8>>) -> Self {
        Self::new(user_key, 0, ValueKind::Delete)
    }

    /// Whether this entry is visible at snapshot sequence `visible`.
    #[inline]
    pub fn visible_at(&self, visible: SeqNum) -> bool {
        is_visible(self.seq, visible)
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .cmp(&other.user_key)
            .then_with(|| other.trailer().cmp(&self.trailer()))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl encoding::Encode for InternalKey {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.user_key, buf)?;
        encoding::Encode::encode_to(&self.trailer(), buf)?;
        Ok(())
    }
}

impl encoding::Decode for InternalKey {
    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, EncodingError> {
        let user_key = <Vec<u8>>::decode_from(r)?;
        let trailer = u64::decode_from(r)?;
        let kind = ValueKind::from_u8(trailer as u8).ok_or(EncodingError::InvalidTag {
            tag: (trailer & 0xFF) as u32,
            type_name: "ValueKind",
        })?;
        Ok(Self {
            user_key,
            seq: trailer >> 8,
            kind,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Comparator
// ------------------------------------------------------------------------------------------------

/// Defines the user-key ordering and the prefix/suffix split used by
/// prefix seeks and range-key masking.
///
/// The memtable skip-lists order keys bytewise; a comparator must be
/// byte-order compatible. The comparator name is recorded in the
/// manifest and validated on open so an engine is never re-opened
/// under a different ordering.
pub trait Comparator: Send + Sync + std::fmt::Debug {
    /// Stable identifier recorded in the manifest.
    fn name(&self) -> &'static str;

    /// Three-way comparison of two user keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Length of the prefix of `key`. The remainder is the suffix
    /// consulted by `seek_prefix_ge` and range-key masking. The
    /// default treats the whole key as prefix (no suffix).
    fn split(&self, key: &[u8]) -> usize {
        key.len()
    }
}

/// Lexicographic byte-order comparator; the engine default.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &'static str {
        "stratadb.bytewise"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Compares two internal keys under a user-key comparator:
/// user key ascending, then trailer descending.
pub fn compare_internal(cmp: &dyn Comparator, a: &InternalKey, b: &InternalKey) -> Ordering {
    cmp.compare(&a.user_key, &b.user_key)
        .then_with(|| b.trailer().cmp(&a.trailer()))
}
