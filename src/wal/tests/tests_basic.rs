#[cfg(test)]
mod tests {
    use crate::wal::{Wal, WalError, segment_file_name};
    use tempfile::TempDir;

    #[test]
    fn test_append_and_replay() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(segment_file_name(0));
        let wal: Wal<Vec<u8>> = Wal::open(&path, None).unwrap();

        wal.append(&b"first".to_vec(), true).unwrap();
        wal.append(&b"second".to_vec(), true).unwrap();

        let records: Vec<Vec<u8>> = wal.replay_iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn test_append_group_single_lock_hold() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(segment_file_name(3));
        let wal: Wal<Vec<u8>> = Wal::open(&path, None).unwrap();

        let group = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        wal.append_group(&group, true).unwrap();

        let records: Vec<Vec<u8>> = wal.replay_iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records, group);
    }

    #[test]
    fn test_reopen_preserves_records() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(segment_file_name(7));
        {
            let wal: Wal<Vec<u8>> = Wal::open(&path, None).unwrap();
            wal.append(&b"durable".to_vec(), true).unwrap();
        }
        let wal: Wal<Vec<u8>> = Wal::open(&path, None).unwrap();
        assert_eq!(wal.segment(), 7);
        let records: Vec<Vec<u8>> = wal.replay_iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records, vec![b"durable".to_vec()]);
    }

    #[test]
    fn test_unsynced_append_is_still_written() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(segment_file_name(1));
        let wal: Wal<Vec<u8>> = Wal::open(&path, None).unwrap();
        wal.append(&b"lazy".to_vec(), false).unwrap();
        let records: Vec<Vec<u8>> = wal.replay_iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records, vec![b"lazy".to_vec()]);
    }

    #[test]
    fn test_record_too_large_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(segment_file_name(0));
        let wal: Wal<Vec<u8>> = Wal::open(&path, Some(16)).unwrap();
        let res = wal.append(&vec![0u8; 64], false);
        assert!(matches!(res, Err(WalError::RecordTooLarge(_))));
    }

    #[test]
    fn test_truncate_clears_records() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(segment_file_name(0));
        let mut wal: Wal<Vec<u8>> = Wal::open(&path, None).unwrap();
        wal.append(&b"gone".to_vec(), true).unwrap();
        wal.truncate().unwrap();
        assert_eq!(wal.replay_iter().unwrap().count(), 0);
    }

    #[test]
    fn test_bad_file_name_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("not-a-wal.log");
        let res: Result<Wal<Vec<u8>>, _> = Wal::open(&path, None);
        assert!(res.is_err());
    }

    #[test]
    fn test_segment_parse() {
        use std::path::Path;
        assert_eq!(
            Wal::<Vec<u8>>::parse_segment_from_path(Path::new("/x/wal-000042.log")),
            Some(42)
        );
        assert_eq!(
            Wal::<Vec<u8>>::parse_segment_from_path(Path::new("/x/wal-junk.log")),
            None
        );
    }
}
