//! File cache — memoized open table readers.
//!
//! Maps `(handle id, file number, file type)` to an open
//! [`TableReader`], capacity-bounded in open readers (file
//! descriptors). Routing reuses the block cache's shard helpers;
//! eviction is a second-chance clock per shard.
//!
//! ## Single-flight opens
//!
//! Concurrent misses for the same key block on one opener: the first
//! caller installs an in-flight marker and opens the file outside the
//! shard lock; losers wait on the flight's condvar and receive the
//! winner's reader (or its error). A file is opened and its footer
//! parsed exactly once no matter how many readers race.
//!
//! ## Lifetimes
//!
//! Readers are `Arc`-shared: eviction drops the cache's reference
//! while outstanding iterators keep theirs, deferring the close until
//! the last drops. [`TableReader::open_iter_count`] exposes the open
//! iterator count for leak detection.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use thiserror::Error;
use tracing::{debug, warn};

use crate::record::{RangeKeyRecord, RangeTombstone};
use crate::sstable::{TableIter, TableReader};

use super::shard_for;

// ------------------------------------------------------------------------------------------------
// Keys and errors
// ------------------------------------------------------------------------------------------------

/// Kind of file a cached reader serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// Sorted string table.
    Table,
    /// Blob file holding separated values.
    Blob,
}

/// Full key of a cached reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileKey {
    /// Namespacing handle id (one per engine).
    pub handle_id: u64,
    /// File number.
    pub file_num: u64,
    /// File type dimension.
    pub file_type: FileType,
}

/// Open failures propagated to every waiter of a single-flight open.
#[derive(Debug, Clone, Error)]
pub enum FileCacheError {
    /// The file is unreadable or failed validation. A `NotFound` for
    /// a file referenced by the current version lands here.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Transient I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

// ------------------------------------------------------------------------------------------------
// Single-flight plumbing
// ------------------------------------------------------------------------------------------------

struct Flight {
    state: Mutex<Option<Result<Arc<TableReader>, FileCacheError>>>,
    cv: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<Arc<TableReader>, FileCacheError> {
        let mut guard = match self.state.lock() {
            Ok(g) => g,
            Err(_) => {
                return Err(FileCacheError::Io("open flight mutex poisoned".into()));
            }
        };
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            guard = match self.cv.wait(guard) {
                Ok(g) => g,
                Err(_) => {
                    return Err(FileCacheError::Io("open flight mutex poisoned".into()));
                }
            };
        }
    }

    fn complete(&self, result: Result<Arc<TableReader>, FileCacheError>) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = Some(result);
        }
        self.cv.notify_all();
    }
}

enum FileSlot {
    Opening(Arc<Flight>),
    Ready {
        reader: Arc<TableReader>,
        referenced: bool,
    },
}

struct FileShard {
    map: HashMap<FileKey, FileSlot>,
    clock: Vec<FileKey>,
    hand: usize,
}

impl FileShard {
    fn ready_count(&self) -> usize {
        self.map
            .values()
            .filter(|s| matches!(s, FileSlot::Ready { .. }))
            .count()
    }

    /// Second-chance eviction down to `capacity` ready readers.
    fn evict_to(&mut self, capacity: usize) {
        let mut fuel = self.clock.len() * 2 + 4;
        while self.ready_count() > capacity && fuel > 0 && !self.clock.is_empty() {
            fuel -= 1;
            self.hand %= self.clock.len();
            let key = self.clock[self.hand];

            let evict = match self.map.get_mut(&key) {
                Some(FileSlot::Ready { referenced, .. }) => {
                    if *referenced {
                        *referenced = false;
                        false
                    } else {
                        true
                    }
                }
                Some(FileSlot::Opening(_)) => false,
                // Stale clock entry.
                None => true,
            };

            if evict {
                self.map.remove(&key);
                self.clock.remove(self.hand);
                debug!(file_num = key.file_num, "file cache evicted reader");
            } else {
                self.hand += 1;
            }
        }
    }

    fn remove(&mut self, key: &FileKey) {
        if self.map.remove(key).is_some() {
            self.clock.retain(|k| k != key);
            self.hand = 0;
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FileCache
// ------------------------------------------------------------------------------------------------

/// Sharded cache of open readers, shareable across engines.
pub struct FileCache {
    shards: Vec<Mutex<FileShard>>,
    capacity_per_shard: usize,
}

impl FileCache {
    /// Creates a cache bounded at `max_open_files` readers, spread
    /// across `shards` shards.
    pub fn new(max_open_files: usize, shards: usize) -> Self {
        let shards = shards.max(1);
        let capacity_per_shard = (max_open_files / shards).max(1);
        Self {
            shards: (0..shards)
                .map(|_| {
                    Mutex::new(FileShard {
                        map: HashMap::new(),
                        clock: Vec::new(),
                        hand: 0,
                    })
                })
                .collect(),
            capacity_per_shard,
        }
    }

    fn shard(&self, key: &FileKey) -> &Mutex<FileShard> {
        &self.shards[shard_for(key, self.shards.len())]
    }

    /// Returns the cached reader for `key`, opening it via `open` on
    /// first use. Concurrent callers for the same key share one open.
    pub fn find_or_create(
        &self,
        key: FileKey,
        open: impl FnOnce() -> Result<Arc<TableReader>, FileCacheError>,
    ) -> Result<Arc<TableReader>, FileCacheError> {
        // Fast path / flight registration under the shard lock.
        enum FastPath {
            Ready(Arc<TableReader>),
            Wait(Arc<Flight>),
            Miss,
        }

        let flight = {
            let mut shard = self
                .shard(&key)
                .lock()
                .map_err(|_| FileCacheError::Io("file cache shard poisoned".into()))?;
            let fast = match shard.map.get_mut(&key) {
                Some(FileSlot::Ready { reader, referenced }) => {
                    *referenced = true;
                    FastPath::Ready(Arc::clone(reader))
                }
                Some(FileSlot::Opening(flight)) => FastPath::Wait(Arc::clone(flight)),
                None => FastPath::Miss,
            };
            match fast {
                FastPath::Ready(reader) => return Ok(reader),
                FastPath::Wait(flight) => {
                    drop(shard);
                    return flight.wait();
                }
                FastPath::Miss => {
                    let flight = Arc::new(Flight::new());
                    shard
                        .map
                        .insert(key, FileSlot::Opening(Arc::clone(&flight)));
                    flight
                }
            }
        };

        // We are the opener; run the open outside the lock.
        let result = open();

        let mut shard = match self.shard(&key).lock() {
            Ok(s) => s,
            Err(_) => {
                flight.complete(result.clone());
                return result;
            }
        };
        match &result {
            Ok(reader) => {
                shard.map.insert(
                    key,
                    FileSlot::Ready {
                        reader: Arc::clone(reader),
                        referenced: true,
                    },
                );
                shard.clock.push(key);
                let cap = self.capacity_per_shard;
                shard.evict_to(cap);
            }
            Err(e) => {
                warn!(file_num = key.file_num, error = %e, "file open failed");
                shard.remove(&key);
            }
        }
        drop(shard);

        flight.complete(result.clone());
        result
    }

    /// Drops the cached reader for `key`, if any. Outstanding
    /// iterators keep the reader alive until they close.
    pub fn evict(&self, key: &FileKey) {
        if let Ok(mut shard) = self.shard(key).lock() {
            shard.remove(key);
        }
    }

    /// Drops every reader belonging to `handle_id`.
    pub fn evict_handle(&self, handle_id: u64) {
        for shard in &self.shards {
            if let Ok(mut guard) = shard.lock() {
                let victims: Vec<FileKey> = guard
                    .map
                    .keys()
                    .filter(|k| k.handle_id == handle_id)
                    .copied()
                    .collect();
                for key in victims {
                    guard.remove(&key);
                }
            }
        }
    }

    /// Number of open readers currently cached.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().map(|g| g.ready_count()).unwrap_or(0))
            .sum()
    }

    /// Whether no readers are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache")
            .field("shards", &self.shards.len())
            .field("capacity_per_shard", &self.capacity_per_shard)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Iterator bundles
// ------------------------------------------------------------------------------------------------

/// Which iterator kinds a caller wants from a file.
#[derive(Debug, Clone, Copy, Default)]
pub struct IterKinds {
    /// Point entries.
    pub point: bool,
    /// Range tombstones.
    pub range_del: bool,
    /// Range keys.
    pub range_key: bool,
}

impl IterKinds {
    /// All three kinds.
    pub fn all() -> Self {
        Self {
            point: true,
            range_del: true,
            range_key: true,
        }
    }

    /// Point entries only.
    pub fn point_only() -> Self {
        Self {
            point: true,
            ..Self::default()
        }
    }
}

/// The bundle returned by [`FileCache::new_iters`].
pub struct IterSet {
    /// Point iterator, when requested.
    pub point: Option<TableIter>,
    /// The file's range tombstones, when requested.
    pub range_dels: Vec<RangeTombstone>,
    /// The file's range-key records, when requested.
    pub range_keys: Vec<RangeKeyRecord>,
}

impl FileCache {
    /// Opens the requested iterator subset over a file, going through
    /// `find_or_create` for the reader.
    pub fn new_iters(
        &self,
        key: FileKey,
        kinds: IterKinds,
        open: impl FnOnce() -> Result<Arc<TableReader>, FileCacheError>,
    ) -> Result<IterSet, FileCacheError> {
        let reader = self.find_or_create(key, open)?;
        Ok(IterSet {
            point: kinds.point.then(|| TableIter::new(Arc::clone(&reader))),
            range_dels: if kinds.range_del {
                reader.range_dels().to_vec()
            } else {
                Vec::new()
            },
            range_keys: if kinds.range_key {
                reader.range_keys().to_vec()
            } else {
                Vec::new()
            },
        })
    }
}

impl From<FileCacheError> for crate::error::Error {
    fn from(e: FileCacheError) -> Self {
        match e {
            FileCacheError::Corruption(m) => crate::error::Error::Corruption(m),
            FileCacheError::Io(m) => crate::error::Error::Io(std::io::Error::other(m)),
        }
    }
}
