//! # StrataDB
//!
//! An embeddable **LSM-tree** storage engine for ordered key–value
//! data, built around a precise read/write concurrency plane:
//! atomic batch commit through a group-commit WAL pipeline, snapshot
//! reads over an atomically published read state, and a merged
//! iterator honoring sequence-number visibility and tombstones.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         Engine                             │
//! │                                                            │
//! │  write: batch ─► commit pipeline ─► WAL ∥ memtable ─► seq  │
//! │                                                            │
//! │  ┌───────────┐  ┌─────────────┐  ┌───────────────────┐    │
//! │  │  Mutable   │  │   Frozen    │  │  Tables (L0..L6)  │    │
//! │  │  memtable  │  │  memtables  │  │  + block cache    │    │
//! │  │  + WAL     │  │  + WALs     │  │  + file cache     │    │
//! │  └─────┬──────┘  └──────┬──────┘  └─────────┬─────────┘    │
//! │        │ rotate         │ flush             │              │
//! │        └──────────►     └─────────►         │              │
//! │                                             │              │
//! │  read: snapshot ─► merged iterator ─► user iterator        │
//! │                                                            │
//! │  ┌────────────────────────────────────────────────────┐    │
//! │  │        Manifest (event log + snapshot)             │    │
//! │  └────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`db`] | Engine handle — open, read, write, snapshot, flush, close |
//! | [`batch`] | Atomic write batches, optionally self-indexed |
//! | [`commit`] | Commit pipeline: seqnum reservation, group WAL, publication |
//! | [`memtable`] | Lock-free skip-list write buffer with range records |
//! | [`wal`] | Generic CRC-framed write-ahead log |
//! | [`sstable`] | Immutable mmap'd sorted tables with bloom filters |
//! | [`cache`] | Sharded Clock-PRO block cache + single-flight file cache |
//! | [`iterator`] | Merged, level, and user iterators; range keys |
//! | [`version`] | Immutable versions and the swappable read state |
//! | [`manifest`] | Durable metadata (event log + snapshot model) |
//! | [`key`] | Internal keys, seqnums, kinds, comparators |
//! | [`encoding`] | Deterministic binary wire codec |
//!
//! ## Key Guarantees
//!
//! - **Atomic batches** — a batch's operations commit and become
//!   visible together, in reservation order.
//! - **Snapshot isolation** — readers capture a consistent
//!   (memtables, version, visible seqnum) triple and are unaffected
//!   by concurrent writes and flushes.
//! - **Durability** — a commit is acknowledged only after its WAL
//!   append satisfies the configured sync policy; recovery replays
//!   the manifest and live WAL segments.
//! - **Ordered iteration** — forward and reverse, with bounds,
//!   paging limits, range tombstones, range keys, and merge
//!   operands resolved at read time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stratadb::{Engine, IterOptions, Options};
//!
//! let engine = Engine::open("/tmp/my_db", Options::default())?;
//!
//! engine.set(b"hello", b"world")?;
//! assert_eq!(engine.get(b"hello")?, Some(b"world".to_vec()));
//!
//! let snap = engine.new_snapshot()?;
//! engine.delete(b"hello")?;
//! assert_eq!(snap.get(b"hello")?, Some(b"world".to_vec()));
//! assert_eq!(engine.get(b"hello")?, None);
//!
//! let mut it = engine.new_iter(IterOptions::default())?;
//! it.first();
//! while it.valid() {
//!     println!("{:?} = {:?}", it.key(), it.value().get());
//!     it.next();
//! }
//!
//! engine.close()?;
//! # Ok::<(), stratadb::Error>(())
//! ```

pub mod batch;
pub mod cache;
pub mod commit;
pub mod db;
pub mod encoding;
pub mod error;
pub mod iterator;
pub mod key;
pub mod manifest;
pub mod memtable;
pub mod record;
pub mod sstable;
pub mod version;
pub mod wal;

pub use batch::Batch;
pub use commit::SyncMode;
pub use db::{Engine, EngineStats, Options, Snapshot};
pub use error::{Error, Result};
pub use iterator::{Iter, IterOptions, IterValidity, KeyTypes, LazyValue, RangeKeyItem};
pub use key::{BytewiseComparator, Comparator, SeqNum};
pub use record::{AppendMerger, Merger};
