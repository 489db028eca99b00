//! The storage engine handle.
//!
//! ## Design Overview
//!
//! The engine organises data across three layers, queried newest
//! first: the mutable memtable (paired with the active WAL segment),
//! the frozen memtables awaiting flush, and the immutable tables of
//! the current version. Writes run through the commit pipeline
//! (WAL-first, group commit, contiguous visibility); reads capture a
//! [`ReadState`] and never block writers.
//!
//! ## Concurrency Model
//!
//! - The **engine mutex** guards rotation, version install, and read
//!   state publication. It is never held across file I/O except the
//!   short manifest metadata commits.
//! - **Readers** clone the current `Arc<ReadState>` out of an
//!   `RwLock` and then run lock-free on their snapshot.
//! - **Writers** serialize only at the commit pipeline's Enqueue and
//!   at rotation.
//! - A single **flush worker** thread drains frozen memtables into
//!   level-0 tables, installs version edits, and retires WAL
//!   segments. Writes stall at Enqueue when the frozen queue exceeds
//!   its threshold, and resume as flushes complete.
//!
//! ## Durability & Recovery
//!
//! Every committed batch reaches the WAL before it is applied. On
//! open, the manifest (snapshot + event log) rebuilds the version;
//! WAL segments at or above the recorded watermark replay into
//! frozen memtables; orphaned table files are removed. `close`
//! flushes everything, checkpoints the manifest, and fsyncs the
//! directories.

#[cfg(test)]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};

use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use tracing::{debug, error, info, warn};

use crate::batch::Batch;
use crate::cache::file::{FileCache, FileCacheError, FileKey, FileType};
use crate::cache::{Cache, CacheHandle, default_shard_count};
use crate::commit::{CommitEnv, CommitPipeline, SyncMode};
use crate::error::{Error, Result};
use crate::iterator::level::FileOpener;
use crate::iterator::user::IterSources;
use crate::iterator::{Iter, IterOptions};
use crate::key::{BytewiseComparator, Comparator, SeqNum};
use crate::manifest::Manifest;
use crate::memtable::Memtable;
use crate::record::{AppendMerger, Merger};
use crate::sstable::{TableBuilder, TableError, TableReader, table_file_name};
use crate::version::{ReadState, TableMeta, Version, VersionEdit};
use crate::wal::{Wal, segment_file_name};

pub const MANIFEST_DIR: &str = "manifest";
pub const WAL_DIR: &str = "wal";
pub const TABLE_DIR: &str = "tables";

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`Engine`] instance.
#[derive(Debug, Clone)]
pub struct Options {
    /// User-key ordering. Must agree with byte order; the name is
    /// recorded in the manifest and validated on reopen.
    pub comparator: Arc<dyn Comparator>,

    /// Read-time combiner for `Merge` operands.
    pub merger: Arc<dyn Merger>,

    /// Shared block cache; `None` creates a private one of
    /// `cache_size` bytes.
    pub cache: Option<Arc<Cache>>,

    /// Private block cache size when `cache` is `None`.
    pub cache_size: usize,

    /// Shared file cache; `None` creates a private one bounded at
    /// `max_open_files`.
    pub file_cache: Option<Arc<FileCache>>,

    /// Open reader bound for a private file cache.
    pub max_open_files: usize,

    /// Memtable rotation threshold in bytes.
    pub memtable_size: usize,

    /// Immutable memtables tolerated before writes stall.
    pub memtable_stall_limit: usize,

    /// Level-0 table count at which writes stall.
    pub l0_stop_writes_threshold: usize,

    /// WAL durability policy.
    pub wal_sync: SyncMode,

    /// Table data-block size in bytes.
    pub block_size: usize,

    /// Bloom filter sizing; zero disables the filters.
    pub bloom_bits_per_key: usize,

    /// Reject all writes; recovery still replays the WAL in memory.
    pub read_only: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            merger: Arc::new(AppendMerger),
            cache: None,
            cache_size: 8 << 20,
            file_cache: None,
            max_open_files: 256,
            memtable_size: 4 << 20,
            memtable_stall_limit: 2,
            l0_stop_writes_threshold: 12,
            wal_sync: SyncMode::Group,
            block_size: 4096,
            bloom_bits_per_key: 10,
            read_only: false,
        }
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug)]
pub struct EngineStats {
    /// Memtables in the queue (mutable tail included).
    pub memtable_count: usize,
    /// Immutable memtables pending flush.
    pub immutable_count: usize,
    /// Tables in level 0.
    pub l0_table_count: usize,
    /// Tables across all levels.
    pub table_count: usize,
    /// Currently published sequence number.
    pub visible_seq: SeqNum,
    /// Bytes resident in the block cache (all handles).
    pub cache_resident_bytes: usize,
}

// ------------------------------------------------------------------------------------------------
// Layout
// ------------------------------------------------------------------------------------------------

/// Filesystem realization of the object-provider surface: names
/// files by number under the engine root.
#[derive(Debug, Clone)]
struct Layout {
    root: PathBuf,
}

impl Layout {
    fn manifest_dir(&self) -> PathBuf {
        self.root.join(MANIFEST_DIR)
    }

    fn wal_dir(&self) -> PathBuf {
        self.root.join(WAL_DIR)
    }

    fn table_dir(&self) -> PathBuf {
        self.root.join(TABLE_DIR)
    }

    fn wal_path(&self, segment: u64) -> PathBuf {
        self.wal_dir().join(segment_file_name(segment))
    }

    fn table_path(&self, file_num: u64) -> PathBuf {
        self.table_dir().join(table_file_name(file_num))
    }
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

enum FlushMsg {
    /// Frozen memtables may be waiting.
    Work,
    /// Drain every frozen memtable, then acknowledge.
    FlushAll(Sender<Result<()>>),
    /// Drain, then exit the worker.
    Shutdown(Sender<Result<()>>),
}

/// State guarded by the engine mutex.
struct EngineMu {
    /// Active WAL; replaced on rotation. `Arc` so appends run outside
    /// the mutex.
    wal: Arc<Wal<Vec<u8>>>,
    /// Memtable queue, oldest → newest; the tail is mutable.
    memtables: Vec<Arc<Memtable>>,
    /// Current version.
    version: Arc<Version>,
}

struct EngineInner {
    opts: Options,
    layout: Layout,
    manifest: Mutex<Manifest>,
    pipeline: CommitPipeline,
    mu: Mutex<EngineMu>,
    stall_cv: Condvar,
    read_state: RwLock<Arc<ReadState>>,
    cache: Arc<Cache>,
    cache_handle: Arc<CacheHandle>,
    file_cache: Arc<FileCache>,
    flush_tx: Option<Sender<FlushMsg>>,
    flush_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    closed: AtomicBool,
}

/// The main storage engine handle.
///
/// Thread-safe; clones share the same engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Opens (or creates) an engine rooted at `path`.
    ///
    /// On a fresh directory the layout is created; on an existing one
    /// the manifest is replayed, live WAL segments are recovered into
    /// memtables, and orphaned tables are removed.
    pub fn open(path: impl AsRef<Path>, opts: Options) -> Result<Engine> {
        let layout = Layout {
            root: path.as_ref().to_path_buf(),
        };
        fs::create_dir_all(layout.manifest_dir())?;
        fs::create_dir_all(layout.wal_dir())?;
        fs::create_dir_all(layout.table_dir())?;

        // 1. Manifest: durable metadata and comparator check.
        let manifest = Manifest::open(layout.manifest_dir())?;
        if !opts.read_only {
            manifest.bind_comparator(opts.comparator.name())?;
        } else {
            let stored = manifest.comparator()?;
            if !stored.is_empty() && stored != opts.comparator.name() {
                return Err(Error::Invariant(format!(
                    "comparator mismatch: db uses {stored:?}"
                )));
            }
        }

        // 2. Version from the manifest's level image.
        let mut version = Version::empty();
        let levels = manifest.levels()?;
        let mut live_files: Vec<u64> = Vec::new();
        {
            let mut edit = VersionEdit::default();
            for (level, metas) in levels.into_iter().enumerate() {
                for meta in metas {
                    live_files.push(meta.file_num);
                    edit.added.push((level as u32, meta));
                }
            }
            version = version.apply(&edit);
        }

        // 3. Remove orphaned tables (present on disk, absent from the
        // manifest — a crash between build and install).
        if !opts.read_only {
            for entry in fs::read_dir(layout.table_dir())? {
                let entry = entry?;
                let p = entry.path();
                if p.extension().and_then(|s| s.to_str()) == Some("sst")
                    && let Some(stem) = p.file_stem().and_then(|s| s.to_str())
                    && let Ok(num) = stem.parse::<u64>()
                    && !live_files.contains(&num)
                {
                    warn!(file_num = num, "removing orphaned table");
                    fs::remove_file(&p)?;
                }
            }
        }

        // 4. Replay live WAL segments into memtables, oldest first.
        let watermark = manifest.active_wal()?;
        let mut segments: Vec<u64> = Vec::new();
        for entry in fs::read_dir(layout.wal_dir())? {
            let entry = entry?;
            if let Some(seg) = Wal::<Vec<u8>>::parse_segment_from_path(&entry.path())
                && seg >= watermark
            {
                segments.push(seg);
            }
        }
        segments.sort_unstable();

        let mut max_seq = manifest.last_seq()?;
        let mut memtables: Vec<Arc<Memtable>> = Vec::new();
        for seg in &segments {
            let mem = Arc::new(Memtable::new(*seg, opts.memtable_size));
            let wal: Wal<Vec<u8>> = Wal::open(layout.wal_path(*seg), None)?;
            let mut records = 0usize;
            for record in wal.replay_iter()? {
                let payload = match record {
                    Ok(p) => p,
                    Err(e) if e.is_torn_tail() => {
                        warn!(segment = seg, error = %e, "WAL torn tail; stopping replay");
                        break;
                    }
                    Err(e) => return Err(e.into()),
                };
                let batch = Batch::from_repr(payload)
                    .map_err(|e| Error::Corruption(format!("WAL batch: {e}")))?;
                let base = batch.base_seq();
                mem.apply(&batch, base)
                    .map_err(|e| Error::Corruption(format!("WAL replay: {e}")))?;
                records += 1;
            }
            max_seq = max_seq.max(mem.max_seq());
            if records > 0 {
                mem.mark_frozen();
                memtables.push(mem);
            } else if !opts.read_only {
                // Empty segment: recycle it.
                drop(wal);
                let _ = fs::remove_file(layout.wal_path(*seg));
            }
            debug!(segment = seg, records, "WAL segment replayed");
        }

        // 5. Fresh mutable memtable + WAL at the queue tail.
        let active_segment = if opts.read_only {
            // Read-only engines keep the recovered state in memory
            // and never touch the log again.
            segments.last().copied().unwrap_or(watermark)
        } else {
            manifest.allocate_file_num()?
        };

        let wal: Arc<Wal<Vec<u8>>> = if opts.read_only {
            // A throwaway in-tempdir segment is pointless read-only;
            // reuse (or create) the active segment handle for the
            // type, never appending to it.
            Arc::new(Wal::open(layout.wal_path(active_segment.max(watermark)), None)?)
        } else {
            Arc::new(Wal::open(layout.wal_path(active_segment), None)?)
        };
        if !opts.read_only {
            memtables.push(Arc::new(Memtable::new(active_segment, opts.memtable_size)));
            if memtables.len() == 1 {
                // Nothing recovered: the watermark moves to the fresh
                // segment.
                manifest.set_active_wal(active_segment)?;
            }
        } else if memtables.is_empty() {
            memtables.push(Arc::new(Memtable::new(active_segment, opts.memtable_size)));
        }

        // 6. Caches.
        let cache = opts
            .cache
            .clone()
            .unwrap_or_else(|| Cache::new(opts.cache_size));
        let cache_handle = Arc::new(cache.new_handle());
        let file_cache = opts
            .file_cache
            .clone()
            .unwrap_or_else(|| Arc::new(FileCache::new(opts.max_open_files, default_shard_count())));

        let version = Arc::new(version);
        let read_state = Arc::new(ReadState {
            memtables: memtables.clone(),
            version: Arc::clone(&version),
        });

        let pipeline = CommitPipeline::new(max_seq + 1, max_seq);
        if opts.read_only {
            pipeline.reject_new("engine is read-only");
        }

        let recovered_frozen = memtables.iter().filter(|m| !m.is_mutable()).count();
        let read_only = opts.read_only;

        let (flush_tx, flush_rx) = if read_only {
            (None, None)
        } else {
            let (tx, rx) = unbounded();
            (Some(tx), Some(rx))
        };

        let inner = Arc::new(EngineInner {
            opts,
            layout,
            manifest: Mutex::new(manifest),
            pipeline,
            mu: Mutex::new(EngineMu {
                wal,
                memtables,
                version,
            }),
            stall_cv: Condvar::new(),
            read_state: RwLock::new(read_state),
            cache,
            cache_handle,
            file_cache,
            flush_tx,
            flush_thread: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        if let Some(rx) = flush_rx {
            // The worker holds only a weak handle: dropping the last
            // engine clone tears the channel down and the worker
            // exits without flushing (crash semantics for tests and
            // abnormal exits alike).
            let worker = Arc::downgrade(&inner);
            let handle = std::thread::Builder::new()
                .name("stratadb-flush".into())
                .spawn(move || flush_worker(worker, rx))
                .map_err(Error::Io)?;
            *inner
                .flush_thread
                .lock()
                .map_err(|_| Error::Invariant("flush thread mutex poisoned".into()))? =
                Some(handle);
        }

        info!(
            root = %inner.layout.root.display(),
            recovered_memtables = recovered_frozen,
            last_seq = max_seq,
            "engine opened"
        );

        let engine = Engine { inner };
        if recovered_frozen > 0 {
            engine.notify_flush();
        }
        Ok(engine)
    }

    fn notify_flush(&self) {
        if let Some(tx) = &self.inner.flush_tx {
            let _ = tx.send(FlushMsg::Work);
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("engine closed".into()));
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Commits a user-provided batch. `sync` overrides the engine's
    /// configured WAL policy for this commit.
    pub fn apply(&self, batch: &mut Batch, sync: Option<SyncMode>) -> Result<()> {
        self.check_open()?;
        let mode = sync.unwrap_or(self.inner.opts.wal_sync);
        self.inner
            .pipeline
            .commit(self.inner.as_ref(), batch, mode)?;
        Ok(())
    }

    fn apply_one(&self, build: impl FnOnce(&mut Batch)) -> Result<()> {
        let mut batch = Batch::new();
        build(&mut batch);
        self.apply(&mut batch, None)
    }

    /// Inserts or updates a key.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.apply_one(|b| b.set(key, value))
    }

    /// Deletes a key.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.apply_one(|b| b.delete(key))
    }

    /// Deletes a key that was set at most once.
    pub fn single_delete(&self, key: &[u8]) -> Result<()> {
        self.apply_one(|b| b.single_delete(key))
    }

    /// Deletes every key in `[start, end)`.
    pub fn delete_range(&self, start: &[u8], end: &[u8]) -> Result<()> {
        self.apply_one(|b| b.delete_range(start, end))
    }

    /// Appends a merge operand for a key.
    pub fn merge(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.apply_one(|b| b.merge(key, value))
    }

    /// Sets a range key over `[start, end)`.
    pub fn range_key_set(
        &self,
        start: &[u8],
        end: &[u8],
        suffix: &[u8],
        value: &[u8],
    ) -> Result<()> {
        self.apply_one(|b| b.range_key_set(start, end, suffix, value))
    }

    /// Unsets a range-key suffix over `[start, end)`.
    pub fn range_key_unset(&self, start: &[u8], end: &[u8], suffix: &[u8]) -> Result<()> {
        self.apply_one(|b| b.range_key_unset(start, end, suffix))
    }

    /// Removes all range keys over `[start, end)`.
    pub fn range_key_delete(&self, start: &[u8], end: &[u8]) -> Result<()> {
        self.apply_one(|b| b.range_key_delete(start, end))
    }

    /// Records an opaque payload in the WAL only.
    pub fn log_data(&self, data: &[u8]) -> Result<()> {
        self.apply_one(|b| b.log_data(data))
    }

    /// Creates an empty batch.
    pub fn new_batch(&self) -> Batch {
        Batch::new()
    }

    /// Creates an empty indexed batch, iterable before commit.
    pub fn new_indexed_batch(&self) -> Batch {
        Batch::new_indexed()
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Point lookup at the current visible sequence.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.get_at(self.inner.pipeline.visible_seq(), key)
    }

    pub(crate) fn get_at(&self, visible: SeqNum, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut it = self.iter_at(visible, IterOptions::default(), None)?;
        it.seek_prefix_ge(key, key);
        if it.valid() && it.key() == key {
            return Ok(Some(it.value().get().to_vec()));
        }
        if let Some(e) = it.error() {
            return Err(Error::Corruption(e.to_string()));
        }
        Ok(None)
    }

    /// Creates an iterator over the engine at the current visible
    /// sequence.
    pub fn new_iter(&self, opts: IterOptions) -> Result<Iter> {
        self.check_open()?;
        self.iter_at(self.inner.pipeline.visible_seq(), opts, None)
    }

    /// Creates an iterator that overlays an indexed batch's
    /// uncommitted state on the engine.
    pub fn new_batch_iter(&self, batch: &Batch, opts: IterOptions) -> Result<Iter> {
        self.check_open()?;
        let view = batch
            .read_view()
            .ok_or_else(|| Error::Invariant("batch is not indexed".into()))?
            .map_err(|e| Error::Invariant(format!("batch index: {e}")))?;
        self.iter_at(
            self.inner.pipeline.visible_seq(),
            opts,
            Some(Arc::new(view)),
        )
    }

    /// Clones the current read state; the only reader-side lock, held
    /// for the duration of one `Arc` clone.
    pub(crate) fn capture_read_state(&self) -> Result<Arc<ReadState>> {
        let guard = self
            .inner
            .read_state
            .read()
            .map_err(|_| Error::Invariant("read state lock poisoned".into()))?;
        Ok(Arc::clone(&guard))
    }

    pub(crate) fn iter_at(
        &self,
        visible: SeqNum,
        opts: IterOptions,
        batch_view: Option<Arc<crate::batch::BatchView>>,
    ) -> Result<Iter> {
        let read_state = self.capture_read_state()?;
        self.iter_with_state(read_state, visible, opts, batch_view)
    }

    pub(crate) fn iter_with_state(
        &self,
        read_state: Arc<ReadState>,
        visible: SeqNum,
        opts: IterOptions,
        batch_view: Option<Arc<crate::batch::BatchView>>,
    ) -> Result<Iter> {
        let cancel = opts.cancel.clone();
        let sources = IterSources {
            cmp: Arc::clone(&self.inner.opts.comparator),
            merger: Arc::clone(&self.inner.opts.merger),
            read_state,
            batch_view,
            visible,
            opener: self.inner.table_opener(),
            cancel,
        };
        Iter::new(sources, opts)
    }

    /// Captures a snapshot: a stable read view at the current visible
    /// sequence, pinning the memtables and version it references.
    pub fn new_snapshot(&self) -> Result<Snapshot> {
        self.check_open()?;
        let seq = self.inner.pipeline.visible_seq();
        let read_state = self.capture_read_state()?;
        Ok(Snapshot {
            engine: self.clone(),
            seq,
            read_state,
        })
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats> {
        let mu = self
            .inner
            .mu
            .lock()
            .map_err(|_| Error::Invariant("engine mutex poisoned".into()))?;
        Ok(EngineStats {
            memtable_count: mu.memtables.len(),
            immutable_count: mu.memtables.len().saturating_sub(1),
            l0_table_count: mu.version.l0_len(),
            table_count: mu.version.table_count(),
            visible_seq: self.inner.pipeline.visible_seq(),
            cache_resident_bytes: self.inner.cache.resident_bytes(),
        })
    }

    // --------------------------------------------------------------------------------------------
    // Flush / close
    // --------------------------------------------------------------------------------------------

    /// Rotates the mutable memtable and blocks until every frozen
    /// memtable is flushed to a table.
    pub fn flush(&self) -> Result<()> {
        self.check_open()?;
        let Some(tx) = &self.inner.flush_tx else {
            return Err(Error::Closed("engine is read-only".into()));
        };
        self.inner.rotate_if_nonempty()?;
        let (ack_tx, ack_rx) = bounded(1);
        tx.send(FlushMsg::FlushAll(ack_tx))
            .map_err(|_| Error::Closed("flush worker stopped".into()))?;
        ack_rx
            .recv()
            .map_err(|_| Error::Closed("flush worker stopped".into()))?
    }

    /// Rotates the mutable memtable and schedules the flush without
    /// waiting.
    pub fn async_flush(&self) -> Result<()> {
        self.check_open()?;
        if self.inner.flush_tx.is_none() {
            return Err(Error::Closed("engine is read-only".into()));
        }
        self.inner.rotate_if_nonempty()?;
        self.notify_flush();
        Ok(())
    }

    /// Gracefully shuts the engine down: drains writes, flushes all
    /// memtables, checkpoints the manifest, stops background work,
    /// and releases cache entries.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.pipeline.reject_new("engine closed");
        self.inner.stall_cv.notify_all();

        if let Some(tx) = &self.inner.flush_tx {
            self.inner.rotate_if_nonempty()?;
            let (ack_tx, ack_rx) = bounded(1);
            if tx.send(FlushMsg::Shutdown(ack_tx)).is_ok() {
                match ack_rx.recv() {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(Error::Invariant("flush worker died during close".into()));
                    }
                }
            }
            if let Ok(mut guard) = self.inner.flush_thread.lock()
                && let Some(handle) = guard.take()
            {
                let _ = handle.join();
            }

            let mut manifest = self
                .inner
                .manifest
                .lock()
                .map_err(|_| Error::Invariant("manifest mutex poisoned".into()))?;
            manifest.set_last_seq(self.inner.pipeline.visible_seq())?;
            manifest.checkpoint()?;
        }

        for dir in [
            self.inner.layout.manifest_dir(),
            self.inner.layout.wal_dir(),
            self.inner.layout.table_dir(),
            self.inner.layout.root.clone(),
        ] {
            if let Ok(d) = fs::File::open(&dir) {
                let _ = d.sync_all();
            }
        }

        self.inner.file_cache.evict_handle(self.inner.cache_handle.id());
        self.inner.cache_handle.evict_all();

        info!(root = %self.inner.layout.root.display(), "engine closed");
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Snapshot
// ------------------------------------------------------------------------------------------------

/// A read view pinned at a captured visible sequence.
///
/// Holds the memtable queue and version of its capture, keeping them
/// from reclamation; reads through the snapshot never observe writes
/// committed after it. Pins release on drop.
pub struct Snapshot {
    engine: Engine,
    seq: SeqNum,
    read_state: Arc<ReadState>,
}

impl Snapshot {
    /// The captured visible sequence.
    pub fn seq(&self) -> SeqNum {
        self.seq
    }

    /// Point lookup at the snapshot.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut it = self.new_iter(IterOptions::default())?;
        it.seek_prefix_ge(key, key);
        if it.valid() && it.key() == key {
            return Ok(Some(it.value().get().to_vec()));
        }
        if let Some(e) = it.error() {
            return Err(Error::Corruption(e.to_string()));
        }
        Ok(None)
    }

    /// Creates an iterator reading at the snapshot.
    pub fn new_iter(&self, opts: IterOptions) -> Result<Iter> {
        self.engine
            .iter_with_state(Arc::clone(&self.read_state), self.seq, opts, None)
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").field("seq", &self.seq).finish()
    }
}

// ------------------------------------------------------------------------------------------------
// EngineInner
// ------------------------------------------------------------------------------------------------

impl EngineInner {
    fn lock_mu(&self) -> Result<std::sync::MutexGuard<'_, EngineMu>> {
        self.mu
            .lock()
            .map_err(|_| Error::Invariant("engine mutex poisoned".into()))
    }

    fn lock_manifest(&self) -> Result<std::sync::MutexGuard<'_, Manifest>> {
        self.manifest
            .lock()
            .map_err(|_| Error::Invariant("manifest mutex poisoned".into()))
    }

    /// Publishes a fresh read state. Callers hold the engine mutex.
    fn publish_read_state(&self, mu: &EngineMu) {
        let fresh = Arc::new(ReadState {
            memtables: mu.memtables.clone(),
            version: Arc::clone(&mu.version),
        });
        if let Ok(mut guard) = self.read_state.write() {
            *guard = fresh;
        }
    }

    /// Freezes the mutable memtable and installs a fresh one with a
    /// new WAL segment. Callers hold the engine mutex.
    fn rotate_locked(&self, mu: &mut EngineMu) -> Result<()> {
        let segment = self.lock_manifest()?.allocate_file_num()?;
        let wal: Wal<Vec<u8>> = Wal::open(self.layout.wal_path(segment), None)?;

        if let Some(current) = mu.memtables.last() {
            current.mark_frozen();
        }
        mu.wal = Arc::new(wal);
        mu.memtables
            .push(Arc::new(Memtable::new(segment, self.opts.memtable_size)));
        self.publish_read_state(mu);

        debug!(segment, queue = mu.memtables.len(), "memtable rotated");
        if let Some(tx) = &self.flush_tx {
            let _ = tx.send(FlushMsg::Work);
        }
        Ok(())
    }

    /// Rotates when the mutable memtable has content.
    fn rotate_if_nonempty(&self) -> Result<()> {
        let mut mu = self.lock_mu()?;
        let rotate = mu.memtables.last().is_some_and(|m| !m.is_empty());
        if rotate {
            self.rotate_locked(&mut mu)?;
        }
        Ok(())
    }

    /// Builds the table-opener closure for iterators, routed through
    /// the file cache with single-flight semantics. A `NotFound` for
    /// a file in the current version surfaces as corruption.
    fn table_opener(&self) -> FileOpener {
        let file_cache = Arc::clone(&self.file_cache);
        let cache_handle = Arc::clone(&self.cache_handle);
        let handle_id = self.cache_handle.id();
        let layout = self.layout.clone();
        Arc::new(move |file_num| {
            let key = FileKey {
                handle_id,
                file_num,
                file_type: FileType::Table,
            };
            let cache_handle = Arc::clone(&cache_handle);
            let layout = layout.clone();
            file_cache
                .find_or_create(key, move || {
                    let path = layout.table_path(file_num);
                    TableReader::open(&path, file_num, Some(cache_handle))
                        .map(Arc::new)
                        .map_err(|e| match e {
                            TableError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                                FileCacheError::Corruption(format!(
                                    "table {file_num} referenced by the current version is missing"
                                ))
                            }
                            TableError::Io(io) => FileCacheError::Io(io.to_string()),
                            other => FileCacheError::Corruption(other.to_string()),
                        })
                })
                .map_err(Error::from)
        })
    }

    /// Installs a version edit: manifest first (durable), then the
    /// in-memory version and read state in one publication. With
    /// `retire_oldest_memtable`, the flushed queue head is removed
    /// and the next entry's WAL segment becomes the manifest's
    /// active-WAL watermark. Deleted files are purged from both
    /// caches and removed from disk.
    pub(crate) fn install_edit(
        &self,
        edit: &VersionEdit,
        retire_oldest_memtable: bool,
    ) -> Result<()> {
        let removed: Vec<u64> = edit.deleted.iter().map(|(_, f)| *f).collect();
        {
            let mut mu = self.lock_mu()?;
            let active_wal = if retire_oldest_memtable {
                mu.memtables.get(1).map(|m| m.wal_segment())
            } else {
                None
            };
            let manifest = self.lock_manifest()?;
            manifest.apply_edit(edit, active_wal)?;
            manifest.set_last_seq(self.pipeline.visible_seq())?;
            drop(manifest);
            if !edit.added.is_empty() || !edit.deleted.is_empty() {
                mu.version = Arc::new(mu.version.apply(edit));
            }
            if retire_oldest_memtable {
                mu.memtables.remove(0);
            }
            self.publish_read_state(&mu);
            self.stall_cv.notify_all();
        }
        for file_num in removed {
            self.file_cache.evict(&FileKey {
                handle_id: self.cache_handle.id(),
                file_num,
                file_type: FileType::Table,
            });
            self.cache_handle.evict_file(file_num);
            let _ = fs::remove_file(self.layout.table_path(file_num));
            debug!(file_num, "obsolete table removed");
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// CommitEnv
// ------------------------------------------------------------------------------------------------

impl CommitEnv for EngineInner {
    fn wait_for_stall(&self) -> Result<()> {
        let mut mu = self.lock_mu()?;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::Closed("engine closed".into()));
            }
            let immutable = mu.memtables.len().saturating_sub(1);
            let l0 = mu.version.l0_len();
            if immutable < self.opts.memtable_stall_limit
                && l0 < self.opts.l0_stop_writes_threshold
            {
                return Ok(());
            }
            debug!(immutable, l0, "write stalled");
            mu = self
                .stall_cv
                .wait(mu)
                .map_err(|_| Error::Invariant("engine mutex poisoned".into()))?;
        }
    }

    fn prepare_group(&self, group_bytes: usize, batches: usize) -> Result<Arc<Memtable>> {
        let mut mu = self.lock_mu()?;
        if mu
            .memtables
            .last()
            .is_some_and(|m| m.should_rotate(group_bytes))
        {
            self.rotate_locked(&mut mu)?;
        }
        let mem = mu
            .memtables
            .last()
            .cloned()
            .ok_or_else(|| Error::Invariant("memtable queue empty".into()))?;
        mem.begin_applies(batches);
        Ok(mem)
    }

    fn wal_append(&self, payloads: &[&[u8]], mode: SyncMode) -> Result<()> {
        let wal = {
            let mu = self.lock_mu()?;
            Arc::clone(&mu.wal)
        };
        match mode {
            SyncMode::PerBatch => {
                for p in payloads {
                    wal.append(&p.to_vec(), true)?;
                }
            }
            SyncMode::Group => {
                let records: Vec<Vec<u8>> = payloads.iter().map(|p| p.to_vec()).collect();
                wal.append_group(&records, true)?;
            }
            SyncMode::None => {
                let records: Vec<Vec<u8>> = payloads.iter().map(|p| p.to_vec()).collect();
                wal.append_group(&records, false)?;
            }
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Flush worker
// ------------------------------------------------------------------------------------------------

fn flush_worker(inner: std::sync::Weak<EngineInner>, rx: Receiver<FlushMsg>) {
    for msg in rx.iter() {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match msg {
            FlushMsg::Work => {
                if let Err(e) = drain_frozen(&inner) {
                    error!(error = %e, "flush failed; engine latched fatal");
                    inner.pipeline.reject_new(&format!("flush failed: {e}"));
                }
            }
            FlushMsg::FlushAll(ack) => {
                let result = drain_frozen(&inner);
                if let Err(e) = &result {
                    error!(error = %e, "flush failed; engine latched fatal");
                    inner.pipeline.reject_new(&format!("flush failed: {e}"));
                }
                let _ = ack.send(result);
            }
            FlushMsg::Shutdown(ack) => {
                let result = drain_frozen(&inner);
                let _ = ack.send(result);
                return;
            }
        }
    }
}

fn drain_frozen(inner: &EngineInner) -> Result<()> {
    while flush_one(inner)? {}
    Ok(())
}

/// Flushes the oldest frozen memtable into a level-0 table.
///
/// Returns `Ok(false)` when no frozen memtable is pending.
fn flush_one(inner: &EngineInner) -> Result<bool> {
    let mem = {
        let mu = inner.lock_mu()?;
        if mu.memtables.len() <= 1 {
            return Ok(false);
        }
        Arc::clone(&mu.memtables[0])
    };

    // Wait out in-flight appliers paired before the freeze.
    while !mem.quiesced() {
        std::thread::sleep(std::time::Duration::from_micros(100));
    }
    mem.mark_flushing();

    let mut edit = VersionEdit::default();
    if !mem.is_empty() {
        let (points, dels, rkeys) = mem
            .flush_entries()
            .map_err(|e| Error::Corruption(format!("flush read: {e}")))?;
        let file_num = inner.lock_manifest()?.allocate_file_num()?;
        let path = inner.layout.table_path(file_num);
        let built = TableBuilder::new(
            &path,
            inner.opts.block_size,
            inner.opts.bloom_bits_per_key,
        )
        .build(inner.opts.comparator.as_ref(), &points, &dels, &rkeys)?;

        edit.added.push((
            0,
            TableMeta {
                file_num,
                size: built.file_size,
                smallest: built.smallest,
                largest: built.largest,
                min_seq: built.properties.min_seq,
                max_seq: built.properties.max_seq,
            },
        ));
        info!(
            file_num,
            records = built.properties.record_count,
            bytes = built.file_size,
            wal_segment = mem.wal_segment(),
            "memtable flushed"
        );
    }

    // Install: the next queue entry's segment becomes the watermark.
    inner.install_edit(&edit, true)?;
    mem.mark_flushed();

    // The segment's contents are durable in the table; retire it.
    let _ = fs::remove_file(inner.layout.wal_path(mem.wal_segment()));
    Ok(true)
}
