#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::batch::Batch;
    use crate::key::{InternalKey, MAX_SEQ_NUM, ValueKind};
    use crate::memtable::Memtable;

    fn filled() -> Arc<Memtable> {
        let mem = Arc::new(Memtable::new(1, 1 << 20));
        let mut b = Batch::new();
        b.set(b"a", b"1");
        b.set(b"c", b"3");
        b.set(b"e", b"5");
        mem.apply(&b, 10).unwrap();
        mem
    }

    #[test]
    fn test_seek_ge_lands_on_equal_key() {
        let mem = filled();
        let mut it = mem.iter();
        it.seek_ge(&InternalKey::bound_before(b"c".to_vec()));
        let (k, v) = it.current().unwrap();
        assert_eq!(k.user_key, b"c");
        assert_eq!(v, b"3");
    }

    #[test]
    fn test_seek_ge_skips_to_next_key() {
        let mem = filled();
        let mut it = mem.iter();
        it.seek_ge(&InternalKey::bound_before(b"b".to_vec()));
        assert_eq!(it.current().unwrap().0.user_key, b"c");
    }

    #[test]
    fn test_seek_ge_past_everything_is_exhausted() {
        let mem = filled();
        let mut it = mem.iter();
        it.seek_ge(&InternalKey::bound_before(b"z".to_vec()));
        assert!(it.current().is_none());
    }

    #[test]
    fn test_seek_lt_before_everything_is_exhausted() {
        let mem = filled();
        let mut it = mem.iter();
        it.seek_lt(&InternalKey::bound_before(b"a".to_vec()));
        assert!(it.current().is_none());
    }

    #[test]
    fn test_forward_walk() {
        let mem = filled();
        let mut it = mem.iter();
        it.first();
        let mut keys = Vec::new();
        while let Some((k, _)) = it.current() {
            keys.push(k.user_key.clone());
            it.next();
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec(), b"e".to_vec()]);
    }

    #[test]
    fn test_backward_walk() {
        let mem = filled();
        let mut it = mem.iter();
        it.last();
        let mut keys = Vec::new();
        while let Some((k, _)) = it.current() {
            keys.push(k.user_key.clone());
            it.prev();
        }
        assert_eq!(keys, vec![b"e".to_vec(), b"c".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_seek_lt_lands_on_previous_key() {
        let mem = filled();
        let mut it = mem.iter();
        // bound_before("e") sorts ahead of every "e" version, so
        // seek_lt lands on the last "c" version.
        it.seek_lt(&InternalKey::bound_before(b"e".to_vec()));
        assert_eq!(it.current().unwrap().0.user_key, b"c");
    }

    #[test]
    fn test_iterator_sees_all_versions_in_order() {
        let mem = Arc::new(Memtable::new(1, 1 << 20));
        for (seq, val) in [(10u64, b"v1"), (20u64, b"v2"), (30u64, b"v3")] {
            let mut b = Batch::new();
            b.set(b"k", val);
            mem.apply(&b, seq).unwrap();
        }
        let mut it = mem.iter();
        it.seek_ge(&InternalKey::new(b"k".to_vec(), MAX_SEQ_NUM, ValueKind::MAX));
        let mut seqs = Vec::new();
        while let Some((k, _)) = it.current() {
            seqs.push(k.seq);
            it.next();
        }
        assert_eq!(seqs, vec![30, 20, 10]);
    }
}
