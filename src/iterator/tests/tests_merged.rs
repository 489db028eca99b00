#[cfg(test)]
mod tests {
    use crate::batch::Batch;
    use crate::error::Error;
    use crate::iterator::tests::helpers::{Harness, collect_forward};
    use crate::iterator::user::IterOptions;

    #[test]
    fn test_memtable_and_table_merge() {
        let mut h = Harness::new();
        h.set(b"a", b"1");
        h.set(b"b", b"2");
        h.flush();
        h.set(b"a", b"3");

        let mut it = h.iter(IterOptions::default());
        let got = collect_forward(&mut it);
        assert_eq!(
            got,
            vec![
                (b"a".to_vec(), b"3".to_vec()),
                (b"b".to_vec(), b"2".to_vec())
            ]
        );
    }

    #[test]
    fn test_newest_version_wins_across_sources() {
        let mut h = Harness::new();
        h.set(b"k", b"old");
        h.flush();
        h.set(b"k", b"mid");
        h.flush();
        h.set(b"k", b"new");

        let mut it = h.iter(IterOptions::default());
        let got = collect_forward(&mut it);
        assert_eq!(got, vec![(b"k".to_vec(), b"new".to_vec())]);
    }

    #[test]
    fn test_delete_suppresses_older_versions() {
        let mut h = Harness::new();
        h.set(b"k", b"v");
        h.flush();
        h.delete(b"k");

        let mut it = h.iter(IterOptions::default());
        assert!(collect_forward(&mut it).is_empty());
    }

    #[test]
    fn test_snapshot_hides_later_writes() {
        let mut h = Harness::new();
        let first = h.set(b"k", b"v1");
        h.set(b"k", b"v2");

        let mut it = h.iter_at(first, IterOptions::default());
        let got = collect_forward(&mut it);
        assert_eq!(got, vec![(b"k".to_vec(), b"v1".to_vec())]);
    }

    #[test]
    fn test_snapshot_taken_before_delete_still_reads() {
        let mut h = Harness::new();
        let before = h.set(b"a", b"1");
        h.delete(b"a");

        let mut snap_it = h.iter_at(before, IterOptions::default());
        assert_eq!(
            collect_forward(&mut snap_it),
            vec![(b"a".to_vec(), b"1".to_vec())]
        );

        let mut now_it = h.iter(IterOptions::default());
        assert!(collect_forward(&mut now_it).is_empty());
    }

    #[test]
    fn test_range_delete_masks_older_not_newer() {
        let mut h = Harness::new();
        h.set(b"a", b"keep");
        h.set(b"b", b"dead");
        h.set(b"c", b"dead");
        let mut b = Batch::new();
        b.delete_range(b"b", b"d");
        h.apply(&b);
        h.set(b"c", b"x");

        let mut it = h.iter(IterOptions::default());
        let got = collect_forward(&mut it);
        assert_eq!(
            got,
            vec![
                (b"a".to_vec(), b"keep".to_vec()),
                (b"c".to_vec(), b"x".to_vec())
            ]
        );
    }

    #[test]
    fn test_range_delete_survives_flush() {
        let mut h = Harness::new();
        h.set(b"b", b"dead");
        let mut b = Batch::new();
        b.delete_range(b"a", b"c");
        h.apply(&b);
        h.flush();

        let mut it = h.iter(IterOptions::default());
        assert!(collect_forward(&mut it).is_empty());
    }

    #[test]
    fn test_indexed_batch_overlays_committed_state() {
        let mut h = Harness::new();
        h.set(b"a", b"committed");
        h.set(b"b", b"committed");

        let mut batch = Batch::new_indexed();
        batch.set(b"a", b"uncommitted");
        batch.delete(b"b");
        batch.set(b"c", b"added");

        let mut it = h.iter_with(
            h.next_seq - 1,
            IterOptions::default(),
            Some(&batch),
            None,
        );
        let got = collect_forward(&mut it);
        assert_eq!(
            got,
            vec![
                (b"a".to_vec(), b"uncommitted".to_vec()),
                (b"c".to_vec(), b"added".to_vec())
            ]
        );
    }

    #[test]
    fn test_batch_range_delete_hides_committed() {
        let mut h = Harness::new();
        h.set(b"a", b"1");
        h.set(b"b", b"2");

        let mut batch = Batch::new_indexed();
        batch.delete_range(b"a", b"b");

        let mut it = h.iter_with(
            h.next_seq - 1,
            IterOptions::default(),
            Some(&batch),
            None,
        );
        let got = collect_forward(&mut it);
        assert_eq!(got, vec![(b"b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn test_cancellation_is_sticky_but_reseekable() {
        let mut h = Harness::new();
        h.set(b"a", b"1");
        let cancel = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

        let mut it = h.iter_with(
            h.next_seq - 1,
            IterOptions::default(),
            None,
            Some(std::sync::Arc::clone(&cancel)),
        );
        it.first();
        assert!(it.valid());

        cancel.store(true, std::sync::atomic::Ordering::Release);
        it.next();
        assert!(!it.valid());
        assert!(matches!(it.error(), Some(Error::Canceled)));

        // Clearing the signal and re-seeking recovers the iterator.
        cancel.store(false, std::sync::atomic::Ordering::Release);
        it.first();
        assert!(it.valid());
        assert_eq!(it.key(), b"a");
    }
}

#[cfg(test)]
mod tests_levels {
    use crate::iterator::tests::helpers::{Harness, collect_forward, collect_reverse};
    use crate::iterator::user::IterOptions;

    /// Two disjoint files on level 1 plus newer L0 and memtable data:
    /// the single level iterator must hop files and lose to newer
    /// sources on overlapping keys.
    fn deep_harness() -> Harness {
        let mut h = Harness::new();
        h.set(b"a", b"L1");
        h.set(b"b", b"L1");
        h.flush_to(1);
        h.set(b"m", b"L1");
        h.set(b"n", b"L1");
        h.flush_to(1);
        h.set(b"b", b"L0");
        h.flush();
        h.set(b"n", b"mem");
        h
    }

    #[test]
    fn test_level_iterator_merges_with_upper_sources() {
        let h = deep_harness();
        let mut it = h.iter(IterOptions::default());
        let got = collect_forward(&mut it);
        assert_eq!(
            got,
            vec![
                (b"a".to_vec(), b"L1".to_vec()),
                (b"b".to_vec(), b"L0".to_vec()),
                (b"m".to_vec(), b"L1".to_vec()),
                (b"n".to_vec(), b"mem".to_vec()),
            ]
        );
    }

    #[test]
    fn test_level_iterator_reverse_and_file_hops() {
        let h = deep_harness();
        let mut it = h.iter(IterOptions::default());
        let mut reverse = collect_reverse(&mut it);
        reverse.reverse();
        let mut it = h.iter(IterOptions::default());
        assert_eq!(reverse, collect_forward(&mut it));
    }

    #[test]
    fn test_level_iterator_seek_between_files() {
        let h = deep_harness();
        let mut it = h.iter(IterOptions::default());
        // "c" lies in the gap between the two L1 files.
        it.seek_ge(b"c");
        assert_eq!(it.key(), b"m");
        it.seek_lt(b"m");
        assert_eq!(it.key(), b"b");
    }
}
