use std::sync::Arc;

use tempfile::TempDir;

use crate::batch::Batch;
use crate::error::Error;
use crate::iterator::level::FileOpener;
use crate::iterator::user::{Iter, IterOptions, IterSources};
use crate::key::{BytewiseComparator, SeqNum};
use crate::memtable::Memtable;
use crate::record::AppendMerger;
use crate::sstable::{TableBuilder, TableReader, table_file_name};
use crate::version::{ReadState, TableMeta, Version, VersionEdit};

/// Test harness: a memtable fed by batches, optional flushed tables,
/// and an iterator factory over the assembled read state.
pub struct Harness {
    pub tmp: TempDir,
    pub mem: Arc<Memtable>,
    pub version: Version,
    pub next_seq: SeqNum,
    next_file: u64,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
            mem: Arc::new(Memtable::new(1, 64 << 20)),
            version: Version::empty(),
            next_seq: 1,
            next_file: 1,
        }
    }

    /// Applies a batch at the next seqnums, returning the base.
    pub fn apply(&mut self, batch: &Batch) -> SeqNum {
        let base = self.next_seq;
        self.mem.apply(batch, base).unwrap();
        self.next_seq += batch.count() as u64;
        base
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) -> SeqNum {
        let mut b = Batch::new();
        b.set(key, value);
        self.apply(&b)
    }

    pub fn delete(&mut self, key: &[u8]) -> SeqNum {
        let mut b = Batch::new();
        b.delete(key);
        self.apply(&b)
    }

    /// Flushes the current memtable into an L0 table and swaps in a
    /// fresh memtable.
    pub fn flush(&mut self) {
        self.flush_to(0);
    }

    /// Flushes the current memtable into a table at `level`. Deeper
    /// levels must be kept disjoint by the caller.
    pub fn flush_to(&mut self, level: u32) {
        let (points, dels, rkeys) = self.mem.flush_entries().unwrap();
        let file_num = self.next_file;
        self.next_file += 1;
        let path = self.tmp.path().join(table_file_name(file_num));
        let built = TableBuilder::new(&path, 4096, 10)
            .build(&BytewiseComparator, &points, &dels, &rkeys)
            .unwrap();
        self.version = self.version.apply(&VersionEdit {
            added: vec![(
                level,
                TableMeta {
                    file_num,
                    size: built.file_size,
                    smallest: built.smallest,
                    largest: built.largest,
                    min_seq: built.properties.min_seq,
                    max_seq: built.properties.max_seq,
                },
            )],
            ..Default::default()
        });
        self.mem = Arc::new(Memtable::new(file_num + 1, 64 << 20));
    }

    fn opener(&self) -> FileOpener {
        let dir = self.tmp.path().to_path_buf();
        Arc::new(move |file_num| {
            TableReader::open(dir.join(table_file_name(file_num)), file_num, None)
                .map(Arc::new)
                .map_err(|e| Error::Corruption(e.to_string()))
        })
    }

    /// Builds an iterator at the current visible seqnum.
    pub fn iter(&self, opts: IterOptions) -> Iter {
        self.iter_at(self.next_seq - 1, opts)
    }

    /// Builds an iterator at an explicit snapshot seqnum.
    pub fn iter_at(&self, visible: SeqNum, opts: IterOptions) -> Iter {
        self.iter_with(visible, opts, None, None)
    }

    pub fn iter_with(
        &self,
        visible: SeqNum,
        opts: IterOptions,
        batch: Option<&Batch>,
        cancel: Option<Arc<std::sync::atomic::AtomicBool>>,
    ) -> Iter {
        let read_state = Arc::new(ReadState {
            memtables: vec![Arc::clone(&self.mem)],
            version: Arc::new(Version {
                levels: self.version.levels.clone(),
            }),
        });
        let sources = IterSources {
            cmp: Arc::new(BytewiseComparator),
            merger: Arc::new(AppendMerger),
            read_state,
            batch_view: batch
                .and_then(|b| b.read_view())
                .map(|v| Arc::new(v.unwrap())),
            visible,
            opener: self.opener(),
            cancel,
        };
        Iter::new(sources, opts).unwrap()
    }
}

/// Collects `(key, value)` pairs walking forward from `first()`.
pub fn collect_forward(it: &mut Iter) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    it.first();
    while it.valid() {
        out.push((it.key().to_vec(), it.value().get().to_vec()));
        it.next();
    }
    out
}

/// Collects `(key, value)` pairs walking backward from `last()`.
pub fn collect_reverse(it: &mut Iter) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    it.last();
    while it.valid() {
        out.push((it.key().to_vec(), it.value().get().to_vec()));
        it.prev();
    }
    out
}
