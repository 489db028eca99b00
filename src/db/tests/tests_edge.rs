#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tempfile::TempDir;

    use crate::db::tests::helpers::{init_tracing, open_engine};
    use crate::db::{Engine, Options};
    use crate::error::Error;
    use crate::iterator::IterOptions;
    use crate::key::Comparator;

    #[test]
    fn test_writes_rejected_after_close() {
        let (_tmp, engine) = open_engine(Options::default());
        engine.set(b"k", b"v").unwrap();
        engine.close().unwrap();

        assert!(matches!(engine.set(b"k2", b"v"), Err(Error::Closed(_))));
        assert!(matches!(
            engine.new_iter(IterOptions::default()),
            Err(Error::Closed(_))
        ));
        // Close is idempotent.
        engine.close().unwrap();
    }

    #[test]
    fn test_read_only_engine() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        {
            let engine = Engine::open(tmp.path(), Options::default()).unwrap();
            engine.set(b"k", b"v").unwrap();
            engine.close().unwrap();
        }
        let engine = Engine::open(
            tmp.path(),
            Options {
                read_only: true,
                ..Options::default()
            },
        )
        .unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(matches!(engine.set(b"x", b"y"), Err(Error::Closed(_))));
        assert!(engine.flush().is_err());
    }

    #[test]
    fn test_comparator_mismatch_on_reopen() {
        #[derive(Debug)]
        struct OtherComparator;
        impl Comparator for OtherComparator {
            fn name(&self) -> &'static str {
                "test.other"
            }
            fn compare(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering {
                a.cmp(b)
            }
        }

        init_tracing();
        let tmp = TempDir::new().unwrap();
        {
            let engine = Engine::open(tmp.path(), Options::default()).unwrap();
            engine.close().unwrap();
        }
        let res = Engine::open(
            tmp.path(),
            Options {
                comparator: Arc::new(OtherComparator),
                ..Options::default()
            },
        );
        assert!(res.is_err(), "comparator mismatch must refuse to open");
    }

    #[test]
    fn test_canceled_iterator_drains_with_error() {
        let (_tmp, engine) = open_engine(Options::default());
        for i in 0..10u32 {
            engine.set(format!("{i:02}").as_bytes(), b"v").unwrap();
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let mut it = engine
            .new_iter(IterOptions {
                cancel: Some(Arc::clone(&cancel)),
                ..Default::default()
            })
            .unwrap();
        it.first();
        assert!(it.valid());

        cancel.store(true, Ordering::Release);
        it.next();
        assert!(!it.valid());
        assert!(matches!(it.error(), Some(Error::Canceled)));
        assert!(matches!(it.close(), Err(Error::Canceled)));
        engine.close().unwrap();
    }

    #[test]
    fn test_empty_keys_and_values() {
        let (_tmp, engine) = open_engine(Options::default());
        engine.set(b"", b"empty-key").unwrap();
        engine.set(b"empty-value", b"").unwrap();
        assert_eq!(engine.get(b"").unwrap(), Some(b"empty-key".to_vec()));
        assert_eq!(engine.get(b"empty-value").unwrap(), Some(Vec::new()));
        engine.close().unwrap();
    }

    #[test]
    fn test_large_values_roundtrip() {
        let (_tmp, engine) = open_engine(Options::default());
        let big = vec![0xABu8; 1 << 20];
        engine.set(b"big", &big).unwrap();
        assert_eq!(engine.get(b"big").unwrap(), Some(big.clone()));
        engine.flush().unwrap();
        assert_eq!(engine.get(b"big").unwrap(), Some(big));
        engine.close().unwrap();
    }

    #[test]
    fn test_shared_caches_across_engines() {
        init_tracing();
        let cache = crate::cache::Cache::with_shards(1 << 20, 2);
        let tmp_a = TempDir::new().unwrap();
        let tmp_b = TempDir::new().unwrap();

        let a = Engine::open(
            tmp_a.path(),
            Options {
                cache: Some(Arc::clone(&cache)),
                ..Options::default()
            },
        )
        .unwrap();
        let b = Engine::open(
            tmp_b.path(),
            Options {
                cache: Some(Arc::clone(&cache)),
                ..Options::default()
            },
        )
        .unwrap();

        // Identical file numbers in both engines must not collide.
        a.set(b"k", b"from-a").unwrap();
        a.flush().unwrap();
        b.set(b"k", b"from-b").unwrap();
        b.flush().unwrap();

        assert_eq!(a.get(b"k").unwrap(), Some(b"from-a".to_vec()));
        assert_eq!(b.get(b"k").unwrap(), Some(b"from-b".to_vec()));

        a.close().unwrap();
        b.close().unwrap();
    }

    #[test]
    fn test_batch_bigger_than_memtable() {
        let (_tmp, engine) = open_engine(Options {
            memtable_size: 256,
            ..Options::default()
        });
        let mut batch = engine.new_batch();
        for i in 0..20u32 {
            batch.set(format!("k{i:02}").as_bytes(), &[0u8; 64]);
        }
        engine.apply(&mut batch, None).unwrap();
        for i in 0..20u32 {
            assert!(engine.get(format!("k{i:02}").as_bytes()).unwrap().is_some());
        }
        engine.close().unwrap();
    }
}
