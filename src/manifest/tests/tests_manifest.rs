#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    use tempfile::TempDir;

    use crate::key::{InternalKey, ValueKind};
    use crate::manifest::{Manifest, ManifestError};
    use crate::version::{TableMeta, VersionEdit};

    fn meta(file_num: u64) -> TableMeta {
        TableMeta {
            file_num,
            size: 512,
            smallest: InternalKey::new(b"a".to_vec(), 5, ValueKind::Set),
            largest: InternalKey::new(b"z".to_vec(), 1, ValueKind::Set),
            min_seq: 1,
            max_seq: 5,
        }
    }

    #[test]
    fn test_fresh_manifest_defaults() {
        let tmp = TempDir::new().unwrap();
        let m = Manifest::open(tmp.path()).unwrap();
        assert_eq!(m.last_seq().unwrap(), 0);
        assert_eq!(m.active_wal().unwrap(), 0);
        assert_eq!(m.peek_next_file_num().unwrap(), 1);
        assert!(m.comparator().unwrap().is_empty());
    }

    #[test]
    fn test_mutations_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let m = Manifest::open(tmp.path()).unwrap();
            m.bind_comparator("stratadb.bytewise").unwrap();
            m.set_last_seq(42).unwrap();
            m.set_active_wal(3).unwrap();
            let n = m.allocate_file_num().unwrap();
            assert_eq!(n, 1);
        }
        let m = Manifest::open(tmp.path()).unwrap();
        assert_eq!(m.last_seq().unwrap(), 42);
        assert_eq!(m.active_wal().unwrap(), 3);
        assert_eq!(m.peek_next_file_num().unwrap(), 2);
        assert_eq!(m.comparator().unwrap(), "stratadb.bytewise");
    }

    #[test]
    fn test_last_seq_is_monotonic() {
        let tmp = TempDir::new().unwrap();
        let m = Manifest::open(tmp.path()).unwrap();
        m.set_last_seq(10).unwrap();
        m.set_last_seq(5).unwrap();
        assert_eq!(m.last_seq().unwrap(), 10);
    }

    #[test]
    fn test_comparator_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        let m = Manifest::open(tmp.path()).unwrap();
        m.bind_comparator("stratadb.bytewise").unwrap();
        let res = m.bind_comparator("other.ordering");
        assert!(matches!(res, Err(ManifestError::ComparatorMismatch { .. })));
        // Re-binding the same name is fine.
        m.bind_comparator("stratadb.bytewise").unwrap();
    }

    #[test]
    fn test_apply_edit_roundtrip() {
        let tmp = TempDir::new().unwrap();
        {
            let m = Manifest::open(tmp.path()).unwrap();
            m.apply_edit(
                &VersionEdit {
                    added: vec![(0, meta(7))],
                    ..Default::default()
                },
                Some(8),
            )
            .unwrap();
        }
        let m = Manifest::open(tmp.path()).unwrap();
        let levels = m.levels().unwrap();
        assert_eq!(levels[0].len(), 1);
        assert_eq!(levels[0][0].file_num, 7);
        assert_eq!(m.active_wal().unwrap(), 8);
    }

    #[test]
    fn test_edit_deletion() {
        let tmp = TempDir::new().unwrap();
        let m = Manifest::open(tmp.path()).unwrap();
        m.apply_edit(
            &VersionEdit {
                added: vec![(0, meta(1)), (0, meta(2))],
                ..Default::default()
            },
            None,
        )
        .unwrap();
        m.apply_edit(
            &VersionEdit {
                deleted: vec![(0, 1)],
                ..Default::default()
            },
            None,
        )
        .unwrap();
        let levels = m.levels().unwrap();
        assert_eq!(levels[0].len(), 1);
        assert_eq!(levels[0][0].file_num, 2);
    }

    #[test]
    fn test_checkpoint_then_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let mut m = Manifest::open(tmp.path()).unwrap();
            m.set_last_seq(99).unwrap();
            m.apply_edit(
                &VersionEdit {
                    added: vec![(0, meta(4))],
                    ..Default::default()
                },
                None,
            )
            .unwrap();
            m.checkpoint().unwrap();
            // Post-checkpoint mutations land in the fresh log.
            m.set_last_seq(120).unwrap();
        }
        let m = Manifest::open(tmp.path()).unwrap();
        assert_eq!(m.last_seq().unwrap(), 120);
        assert_eq!(m.levels().unwrap()[0].len(), 1);
    }

    #[test]
    fn test_corrupt_snapshot_falls_back_to_log() {
        let tmp = TempDir::new().unwrap();
        {
            let mut m = Manifest::open(tmp.path()).unwrap();
            m.set_last_seq(7).unwrap();
            m.checkpoint().unwrap();
            m.set_last_seq(9).unwrap();
        }
        // Corrupt the snapshot body.
        let snap = tmp.path().join("MANIFEST-000001");
        let mut f = OpenOptions::new().write(true).open(&snap).unwrap();
        f.seek(SeekFrom::Start(2)).unwrap();
        f.write_all(&[0xFF, 0xFF]).unwrap();
        f.sync_all().unwrap();

        // Open succeeds from the event log alone; the snapshot's
        // state (seq 7) is lost but the post-checkpoint log still
        // replays.
        let m = Manifest::open(tmp.path()).unwrap();
        assert_eq!(m.last_seq().unwrap(), 9);
    }

    #[test]
    fn test_concurrent_file_num_allocation() {
        let tmp = TempDir::new().unwrap();
        let m = std::sync::Arc::new(Manifest::open(tmp.path()).unwrap());
        let mut joins = Vec::new();
        for _ in 0..4 {
            let m = std::sync::Arc::clone(&m);
            joins.push(std::thread::spawn(move || {
                (0..25).map(|_| m.allocate_file_num().unwrap()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<u64> = joins
            .into_iter()
            .flat_map(|j| j.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 100, "duplicate file numbers allocated");
    }
}
