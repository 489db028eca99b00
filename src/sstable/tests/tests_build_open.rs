#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::cache::Cache;
    use crate::key::{BytewiseComparator, InternalKey, ValueKind};
    use crate::record::{PointEntry, RangeKeyRecord, RangeTombstone};
    use crate::sstable::{TableBuilder, TableError, TableReader, table_file_name};

    fn point(key: &[u8], seq: u64, kind: ValueKind, value: &[u8]) -> PointEntry {
        PointEntry::new(InternalKey::new(key.to_vec(), seq, kind), value)
    }

    fn sorted(mut points: Vec<PointEntry>) -> Vec<PointEntry> {
        points.sort_by(|a, b| a.key.cmp(&b.key));
        points
    }

    #[test]
    fn test_build_open_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(table_file_name(1));

        let points = sorted(vec![
            point(b"a", 10, ValueKind::Set, b"1"),
            point(b"b", 11, ValueKind::Set, b"2"),
            point(b"c", 12, ValueKind::Delete, b""),
        ]);
        let dels = vec![RangeTombstone::new(b"x".to_vec(), b"z".to_vec(), 13)];
        let built = TableBuilder::new(&path, 4096, 10)
            .build(&BytewiseComparator, &points, &dels, &[])
            .unwrap();

        assert_eq!(built.properties.record_count, 3);
        assert_eq!(built.properties.tombstone_count, 1);
        assert_eq!(built.properties.range_del_count, 1);
        assert_eq!(built.properties.min_seq, 10);
        assert_eq!(built.properties.max_seq, 13);
        assert_eq!(built.properties.smallest_user_key, b"a");
        assert_eq!(built.properties.largest_user_key, b"z");

        let reader = TableReader::open(&path, 1, None).unwrap();
        assert_eq!(reader.properties, built.properties);
        assert_eq!(reader.range_dels().len(), 1);
        assert_eq!(reader.range_dels()[0].start, b"x");
        assert_eq!(reader.file_size(), built.file_size);
    }

    #[test]
    fn test_empty_build_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(table_file_name(1));
        let res = TableBuilder::new(&path, 4096, 10).build(&BytewiseComparator, &[], &[], &[]);
        assert!(matches!(res, Err(TableError::Corrupt(_))));
    }

    #[test]
    fn test_range_key_block_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(table_file_name(4));

        let rkeys = vec![RangeKeyRecord {
            kind: ValueKind::RangeKeySet,
            start: b"a".to_vec(),
            end: b"m".to_vec(),
            seq: 9,
            suffix: b"@1".to_vec(),
            value: b"rv".to_vec(),
        }];
        TableBuilder::new(&path, 4096, 10)
            .build(&BytewiseComparator, &[], &[], &rkeys)
            .unwrap();

        let reader = TableReader::open(&path, 4, None).unwrap();
        assert_eq!(reader.range_keys().len(), 1);
        assert_eq!(reader.range_keys()[0], rkeys[0]);
        assert_eq!(reader.properties.range_key_count, 1);
    }

    #[test]
    fn test_bloom_filters_negative_lookups() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(table_file_name(2));

        let points = sorted(
            (0..100)
                .map(|i| point(format!("key-{i:03}").as_bytes(), i, ValueKind::Set, b"v"))
                .collect(),
        );
        TableBuilder::new(&path, 1024, 10)
            .build(&BytewiseComparator, &points, &[], &[])
            .unwrap();

        let reader = TableReader::open(&path, 2, None).unwrap();
        for i in 0..100 {
            assert!(reader.bloom_may_contain(format!("key-{i:03}").as_bytes()));
        }
        // With 10 bits/key nearly all absent keys must miss.
        let misses = (0..100)
            .filter(|i| !reader.bloom_may_contain(format!("absent-{i:03}").as_bytes()))
            .count();
        assert!(misses > 90, "bloom too weak: {misses}/100 misses");
    }

    #[test]
    fn test_blocks_cut_at_threshold() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(table_file_name(3));

        let points = sorted(
            (0..64)
                .map(|i| {
                    point(
                        format!("{i:04}").as_bytes(),
                        i,
                        ValueKind::Set,
                        &[0u8; 128],
                    )
                })
                .collect(),
        );
        TableBuilder::new(&path, 512, 10)
            .build(&BytewiseComparator, &points, &[], &[])
            .unwrap();

        let reader = TableReader::open(&path, 3, None).unwrap();
        assert!(
            reader.block_count() > 4,
            "expected multiple blocks, got {}",
            reader.block_count()
        );
    }

    #[test]
    fn test_reads_populate_block_cache() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(table_file_name(9));

        let points = sorted(vec![point(b"k", 1, ValueKind::Set, b"v")]);
        TableBuilder::new(&path, 4096, 10)
            .build(&BytewiseComparator, &points, &[], &[])
            .unwrap();

        let cache = Cache::with_shards(1 << 20, 2);
        let handle = Arc::new(cache.new_handle());
        let reader = TableReader::open(&path, 9, Some(Arc::clone(&handle))).unwrap();

        assert_eq!(cache.resident_bytes(), 0);
        reader.read_block(0).unwrap();
        assert!(cache.resident_bytes() > 0, "block not cached");

        // Second read hits the cache (same payload pointer).
        let a = reader.read_block(0).unwrap();
        let b = reader.read_block(0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
