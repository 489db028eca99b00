use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

use crate::db::{Engine, Options};

pub fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::DEBUG)
        .try_init();
}

/// Opens an engine in a fresh temp dir with test-friendly options.
pub fn open_engine(opts: Options) -> (TempDir, Engine) {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), opts).unwrap();
    (tmp, engine)
}

pub fn small_memtable_opts() -> Options {
    Options {
        memtable_size: 1024,
        memtable_stall_limit: 2,
        ..Options::default()
    }
}

/// Collects all live `(key, value)` pairs in order.
pub fn scan_all(engine: &Engine) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut it = engine
        .new_iter(crate::iterator::IterOptions::default())
        .unwrap();
    let mut out = Vec::new();
    it.first();
    while it.valid() {
        out.push((it.key().to_vec(), it.value().get().to_vec()));
        it.next();
    }
    assert!(it.error().is_none(), "scan error: {:?}", it.error());
    out
}
