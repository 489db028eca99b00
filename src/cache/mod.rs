//! Block cache — sharded, Clock-PRO evicted, refcount-managed.
//!
//! A fixed-capacity cache of opaque byte blocks keyed by
//! `(handle id, file number, offset)`. The cache is partitioned into
//! `4 × logical CPUs` shards; the low bits of the key hash select the
//! shard, so contention is bounded by per-shard mutex hold time.
//!
//! ## Handles
//!
//! A [`CacheHandle`] namespaces entries per engine. Multiple engines
//! sharing one cache cannot collide on identical file numbers, and an
//! engine's entries are purged when its handle is dropped.
//!
//! ## Eviction
//!
//! Each shard runs Clock-PRO (see [`clock`]): entries are classified
//! hot / resident-cold / non-resident-test, a hit sets the reference
//! bit without touching list structure, and the hands demote or evict
//! under capacity pressure. The resident-cold target starts at 1% of
//! shard capacity and adapts when test entries are re-referenced
//! before expiry.
//!
//! ## Values
//!
//! Values are `Arc<[u8]>`: an atomic refcount with the payload freed
//! by whichever holder drops last. A `get` hit clones the `Arc`
//! (refcount increment); eviction drops the shard's reference while
//! outstanding readers keep theirs.
//!
//! ## Failure
//!
//! [`CacheHandle::set`] returns [`CacheError::Full`] when a single
//! charge exceeds shard capacity; callers proceed without caching.

pub mod clock;
pub mod file;

#[cfg(test)]
mod tests;

use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::debug;

use clock::ClockPro;

/// A cached block payload. Cloning increments the refcount; the block
/// is freed when the last holder drops.
pub type CacheValue = std::sync::Arc<[u8]>;

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

/// Errors returned by cache admission.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The value cannot fit; the caller proceeds uncached.
    #[error("cache full")]
    Full,
}

// ------------------------------------------------------------------------------------------------
// Keys and shard routing
// ------------------------------------------------------------------------------------------------

/// Full key of a cached block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Namespacing handle id (one per engine).
    pub handle_id: u64,
    /// File number the block belongs to.
    pub file_num: u64,
    /// Byte offset of the block within the file.
    pub offset: u64,
}

/// Number of shards for a cache shared on this host.
pub(crate) fn default_shard_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    4 * cpus
}

/// Routes a hashable key to one of `shards` indexes.
pub(crate) fn shard_for<K: Hash>(key: &K, shards: usize) -> usize {
    let mut h = std::hash::DefaultHasher::new();
    key.hash(&mut h);
    (h.finish() as usize) % shards
}

// ------------------------------------------------------------------------------------------------
// Cache
// ------------------------------------------------------------------------------------------------

/// A sharded block cache, shareable across engines on a host.
pub struct Cache {
    shards: Vec<Mutex<ClockPro>>,
    next_handle_id: AtomicU64,
}

impl Cache {
    /// Creates a cache with `capacity` bytes spread across
    /// `4 × logical CPUs` shards.
    pub fn new(capacity: usize) -> std::sync::Arc<Self> {
        Self::with_shards(capacity, default_shard_count())
    }

    /// Creates a cache with an explicit shard count. Exposed for
    /// deterministic tests.
    pub fn with_shards(capacity: usize, shards: usize) -> std::sync::Arc<Self> {
        let shards = shards.max(1);
        let per_shard = (capacity / shards).max(1);
        debug!(capacity, shards, per_shard, "block cache created");
        std::sync::Arc::new(Self {
            shards: (0..shards)
                .map(|_| Mutex::new(ClockPro::new(per_shard)))
                .collect(),
            next_handle_id: AtomicU64::new(1),
        })
    }

    /// Allocates a handle namespacing one engine's entries.
    pub fn new_handle(self: &std::sync::Arc<Self>) -> CacheHandle {
        CacheHandle {
            cache: std::sync::Arc::clone(self),
            id: self.next_handle_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<ClockPro> {
        &self.shards[shard_for(key, self.shards.len())]
    }

    /// Total bytes resident across all shards.
    pub fn resident_bytes(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().map(|g| g.resident_bytes()).unwrap_or(0))
            .sum()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("shards", &self.shards.len())
            .finish_non_exhaustive()
    }
}

// ------------------------------------------------------------------------------------------------
// CacheHandle
// ------------------------------------------------------------------------------------------------

/// An engine's namespaced view of a shared [`Cache`].
///
/// Dropping the handle purges all entries it inserted, upholding the
/// invariant that a handle's blocks never outlive its engine (and so
/// cannot collide with a later engine reusing file numbers).
pub struct CacheHandle {
    cache: std::sync::Arc<Cache>,
    id: u64,
}

impl CacheHandle {
    /// This handle's namespace id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Looks up a block, bumping its reference bit on hit.
    pub fn get(&self, file_num: u64, offset: u64) -> Option<CacheValue> {
        let key = CacheKey {
            handle_id: self.id,
            file_num,
            offset,
        };
        self.cache.shard(&key).lock().ok()?.get(&key)
    }

    /// Inserts a block. The value stays pinned by the cache's own
    /// reference until evicted; callers keep theirs independently.
    pub fn set(&self, file_num: u64, offset: u64, value: CacheValue) -> Result<(), CacheError> {
        let key = CacheKey {
            handle_id: self.id,
            file_num,
            offset,
        };
        let Ok(mut shard) = self.cache.shard(&key).lock() else {
            return Err(CacheError::Full);
        };
        shard.set(key, value)
    }

    /// Removes every cached block of `file_num` in this namespace.
    /// Called when the file is deleted from disk.
    pub fn evict_file(&self, file_num: u64) {
        for shard in &self.cache.shards {
            if let Ok(mut guard) = shard.lock() {
                guard.evict_matching(|k| k.handle_id == self.id && k.file_num == file_num);
            }
        }
    }

    /// Removes every entry in this namespace.
    pub fn evict_all(&self) {
        for shard in &self.cache.shards {
            if let Ok(mut guard) = shard.lock() {
                guard.evict_matching(|k| k.handle_id == self.id);
            }
        }
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        self.evict_all();
    }
}

impl std::fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle").field("id", &self.id).finish()
    }
}
