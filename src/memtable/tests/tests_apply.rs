#[cfg(test)]
mod tests {
    use crate::batch::Batch;
    use crate::key::ValueKind;
    use crate::memtable::{Memtable, MemtableError, MemtableState};

    #[test]
    fn test_apply_assigns_sequential_seqnums() {
        let mem = Memtable::new(1, 1 << 20);
        let mut b = Batch::new();
        b.set(b"a", b"1");
        b.set(b"b", b"2");
        b.delete(b"a");
        mem.apply(&b, 100).unwrap();

        assert_eq!(mem.max_seq(), 102);
        assert_eq!(mem.point_count(), 3);
    }

    #[test]
    fn test_versions_order_newest_first() {
        let mem = std::sync::Arc::new(Memtable::new(1, 1 << 20));
        let mut b1 = Batch::new();
        b1.set(b"k", b"old");
        mem.apply(&b1, 10).unwrap();
        let mut b2 = Batch::new();
        b2.set(b"k", b"new");
        mem.apply(&b2, 20).unwrap();

        let mut it = mem.iter();
        it.first();
        let (k, v) = it.current().unwrap();
        assert_eq!(k.seq, 20);
        assert_eq!(v, b"new");
        it.next();
        let (k, v) = it.current().unwrap();
        assert_eq!(k.seq, 10);
        assert_eq!(v, b"old");
    }

    #[test]
    fn test_tombstones_are_entries_not_removals() {
        let mem = Memtable::new(1, 1 << 20);
        let mut b = Batch::new();
        b.set(b"k", b"v");
        b.delete(b"k");
        b.single_delete(b"s");
        mem.apply(&b, 1).unwrap();
        // Three point entries: Set, Delete, SingleDelete.
        assert_eq!(mem.point_count(), 3);
    }

    #[test]
    fn test_range_tombstone_storage() {
        let mem = Memtable::new(1, 1 << 20);
        let mut b = Batch::new();
        b.delete_range(b"b", b"d");
        mem.apply(&b, 5).unwrap();

        let dels = mem.range_tombstones().unwrap();
        assert_eq!(dels.len(), 1);
        assert_eq!(dels[0].start, b"b");
        assert_eq!(dels[0].end, b"d");
        assert_eq!(dels[0].seq, 5);
    }

    #[test]
    fn test_empty_range_delete_is_noop_but_consumes_seq() {
        let mem = Memtable::new(1, 1 << 20);
        let mut b = Batch::new();
        b.delete_range(b"x", b"x");
        b.set(b"k", b"v");
        mem.apply(&b, 5).unwrap();

        assert!(mem.range_tombstones().unwrap().is_empty());
        // The Set landed at seq 6, after the consumed no-op seqnum.
        assert_eq!(mem.max_seq(), 6);
    }

    #[test]
    fn test_range_key_records_roundtrip() {
        let mem = Memtable::new(1, 1 << 20);
        let mut b = Batch::new();
        b.range_key_set(b"a", b"m", b"@7", b"payload");
        b.range_key_unset(b"a", b"f", b"@7");
        b.range_key_delete(b"f", b"m");
        mem.apply(&b, 1).unwrap();

        let records = mem.range_key_records().unwrap();
        assert_eq!(records.len(), 3);
        let set = records.iter().find(|r| r.kind == ValueKind::RangeKeySet).unwrap();
        assert_eq!(set.suffix, b"@7");
        assert_eq!(set.value, b"payload");
        assert_eq!(set.end, b"m");
    }

    #[test]
    fn test_log_data_leaves_no_entry_but_consumes_seq() {
        let mem = Memtable::new(1, 1 << 20);
        let mut b = Batch::new();
        b.log_data(b"marker");
        b.set(b"k", b"v");
        mem.apply(&b, 1).unwrap();
        assert_eq!(mem.point_count(), 1);
        assert_eq!(mem.max_seq(), 2);
    }

    #[test]
    fn test_frozen_memtable_still_accepts_paired_applies() {
        let mem = Memtable::new(1, 1 << 20);
        mem.mark_frozen();
        assert_eq!(mem.state(), MemtableState::Frozen);
        let mut b = Batch::new();
        b.set(b"k", b"v");
        // A batch paired before rotation may land after the freeze.
        mem.apply(&b, 1).unwrap();
        assert_eq!(mem.point_count(), 1);
    }

    #[test]
    fn test_flushing_memtable_rejects_apply() {
        let mem = Memtable::new(1, 1 << 20);
        mem.mark_flushing();
        let mut b = Batch::new();
        b.set(b"k", b"v");
        assert!(matches!(mem.apply(&b, 1), Err(MemtableError::NotMutable)));
    }

    #[test]
    fn test_applier_quiescence_counter() {
        let mem = Memtable::new(1, 1 << 20);
        assert!(mem.quiesced());
        mem.begin_applies(2);
        assert!(!mem.quiesced());
        mem.finish_apply();
        mem.finish_apply();
        assert!(mem.quiesced());
    }

    #[test]
    fn test_rotation_threshold() {
        let mem = Memtable::new(1, 256);
        assert!(!mem.should_rotate(1024), "empty memtable never rotates");
        let mut b = Batch::new();
        b.set(b"key", &[0u8; 128]);
        mem.apply(&b, 1).unwrap();
        assert!(mem.should_rotate(128));
        assert!(!mem.should_rotate(0) || mem.approximate_size() > 256);
    }

    #[test]
    fn test_flush_entries_complete_and_nondestructive() {
        let mem = Memtable::new(1, 1 << 20);
        let mut b = Batch::new();
        b.set(b"a", b"1");
        b.delete(b"b");
        b.delete_range(b"c", b"e");
        b.range_key_set(b"f", b"g", b"", b"rk");
        mem.apply(&b, 1).unwrap();

        let (points, dels, rkeys) = mem.flush_entries().unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(dels.len(), 1);
        assert_eq!(rkeys.len(), 1);
        // State untouched.
        assert_eq!(mem.point_count(), 2);
    }
}
