#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use crate::cache::file::{FileCache, FileCacheError, FileKey, FileType, IterKinds};
    use crate::key::{BytewiseComparator, InternalKey, ValueKind};
    use crate::record::PointEntry;
    use crate::sstable::{TableBuilder, TableReader, table_file_name};

    fn build_table(tmp: &TempDir, file_num: u64) -> std::path::PathBuf {
        let path = tmp.path().join(table_file_name(file_num));
        let points = vec![PointEntry::new(
            InternalKey::new(b"k".to_vec(), 1, ValueKind::Set),
            b"v",
        )];
        TableBuilder::new(&path, 4096, 10)
            .build(&BytewiseComparator, &points, &[], &[])
            .unwrap();
        path
    }

    fn key(file_num: u64) -> FileKey {
        FileKey {
            handle_id: 1,
            file_num,
            file_type: FileType::Table,
        }
    }

    #[test]
    fn test_find_or_create_opens_once() {
        let tmp = TempDir::new().unwrap();
        let path = build_table(&tmp, 1);
        let cache = FileCache::new(8, 1);
        let opens = AtomicUsize::new(0);

        for _ in 0..5 {
            let reader = cache
                .find_or_create(key(1), || {
                    opens.fetch_add(1, Ordering::SeqCst);
                    TableReader::open(&path, 1, None)
                        .map(Arc::new)
                        .map_err(|e| FileCacheError::Corruption(e.to_string()))
                })
                .unwrap();
            assert_eq!(reader.file_num, 1);
        }
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_misses_share_one_open() {
        let tmp = TempDir::new().unwrap();
        let path = build_table(&tmp, 2);
        let cache = Arc::new(FileCache::new(8, 1));
        let opens = Arc::new(AtomicUsize::new(0));

        let mut joins = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let opens = Arc::clone(&opens);
            let path = path.clone();
            joins.push(std::thread::spawn(move || {
                let reader = cache
                    .find_or_create(key(2), move || {
                        opens.fetch_add(1, Ordering::SeqCst);
                        // Stretch the open window so racers pile up.
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        TableReader::open(&path, 2, None)
                            .map(Arc::new)
                            .map_err(|e| FileCacheError::Corruption(e.to_string()))
                    })
                    .unwrap();
                assert_eq!(reader.file_num, 2);
            }));
        }
        for j in joins {
            j.join().unwrap();
        }
        assert_eq!(opens.load(Ordering::SeqCst), 1, "open was not single-flight");
    }

    #[test]
    fn test_open_failure_propagates_and_clears() {
        let cache = FileCache::new(8, 1);
        let res = cache.find_or_create(key(3), || {
            Err(FileCacheError::Corruption("missing file".into()))
        });
        assert!(res.is_err());

        // A later attempt runs a fresh open.
        let tmp = TempDir::new().unwrap();
        let path = build_table(&tmp, 3);
        let reader = cache
            .find_or_create(key(3), || {
                TableReader::open(&path, 3, None)
                    .map(Arc::new)
                    .map_err(|e| FileCacheError::Corruption(e.to_string()))
            })
            .unwrap();
        assert_eq!(reader.file_num, 3);
    }

    #[test]
    fn test_capacity_evicts_unreferenced_readers() {
        let tmp = TempDir::new().unwrap();
        let cache = FileCache::new(2, 1);
        for n in 1..=4u64 {
            let path = build_table(&tmp, n);
            cache
                .find_or_create(key(n), || {
                    TableReader::open(&path, n, None)
                        .map(Arc::new)
                        .map_err(|e| FileCacheError::Corruption(e.to_string()))
                })
                .unwrap();
        }
        assert!(cache.len() <= 2, "cache over capacity: {}", cache.len());
    }

    #[test]
    fn test_evicted_reader_survives_for_holders() {
        let tmp = TempDir::new().unwrap();
        let path = build_table(&tmp, 5);
        let cache = FileCache::new(8, 1);
        let reader = cache
            .find_or_create(key(5), || {
                TableReader::open(&path, 5, None)
                    .map(Arc::new)
                    .map_err(|e| FileCacheError::Corruption(e.to_string()))
            })
            .unwrap();

        cache.evict(&key(5));
        assert_eq!(cache.len(), 0);
        // Our Arc still reads fine after eviction.
        assert_eq!(reader.properties.record_count, 1);
    }

    #[test]
    fn test_new_iters_subset() {
        let tmp = TempDir::new().unwrap();
        let path = build_table(&tmp, 6);
        let cache = FileCache::new(8, 1);

        let set = cache
            .new_iters(key(6), IterKinds::point_only(), || {
                TableReader::open(&path, 6, None)
                    .map(Arc::new)
                    .map_err(|e| FileCacheError::Corruption(e.to_string()))
            })
            .unwrap();
        assert!(set.point.is_some());
        assert!(set.range_dels.is_empty());
        assert!(set.range_keys.is_empty());

        let mut it = set.point.unwrap();
        it.first();
        assert_eq!(it.current().unwrap().0.user_key, b"k");
    }

    #[test]
    fn test_blob_and_table_keys_are_distinct() {
        let a = FileKey {
            handle_id: 1,
            file_num: 9,
            file_type: FileType::Table,
        };
        let b = FileKey {
            handle_id: 1,
            file_num: 9,
            file_type: FileType::Blob,
        };
        assert_ne!(a, b);
    }
}
