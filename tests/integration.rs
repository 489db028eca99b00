//! End-to-end tests through the public API.

use stratadb::{Batch, Engine, IterOptions, IterValidity, KeyTypes, Options, SyncMode};
use tempfile::TempDir;

fn open(tmp: &TempDir) -> Engine {
    Engine::open(tmp.path(), Options::default()).unwrap()
}

fn scan(engine: &Engine) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut it = engine.new_iter(IterOptions::default()).unwrap();
    let mut out = Vec::new();
    it.first();
    while it.valid() {
        out.push((it.key().to_vec(), it.value().get().to_vec()));
        it.next();
    }
    out
}

#[test]
fn test_full_write_read_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let engine = open(&tmp);

    engine.set(b"fruit/apple", b"red").unwrap();
    engine.set(b"fruit/banana", b"yellow").unwrap();
    engine.set(b"veg/carrot", b"orange").unwrap();
    engine.delete(b"fruit/banana").unwrap();

    assert_eq!(engine.get(b"fruit/apple").unwrap(), Some(b"red".to_vec()));
    assert_eq!(engine.get(b"fruit/banana").unwrap(), None);

    let mut it = engine
        .new_iter(IterOptions {
            lower_bound: Some(b"fruit/".to_vec()),
            upper_bound: Some(b"fruit/\xff".to_vec()),
            ..Default::default()
        })
        .unwrap();
    it.first();
    assert!(it.valid());
    assert_eq!(it.key(), b"fruit/apple");
    it.next();
    assert_eq!(it.validity(), IterValidity::Exhausted);

    engine.close().unwrap();
}

#[test]
fn test_flush_and_reopen_cycle() {
    let tmp = TempDir::new().unwrap();
    {
        let engine = open(&tmp);
        for i in 0..200u32 {
            engine
                .set(format!("key-{i:05}").as_bytes(), format!("val-{i}").as_bytes())
                .unwrap();
            if i % 50 == 49 {
                engine.flush().unwrap();
            }
        }
        engine.close().unwrap();
    }
    let engine = open(&tmp);
    for i in 0..200u32 {
        assert_eq!(
            engine.get(format!("key-{i:05}").as_bytes()).unwrap(),
            Some(format!("val-{i}").into_bytes()),
            "key-{i:05} lost across reopen"
        );
    }
    assert_eq!(scan(&engine).len(), 200);
    engine.close().unwrap();
}

#[test]
fn test_crash_before_flush_recovers_from_wal() {
    let tmp = TempDir::new().unwrap();
    {
        let engine = Engine::open(
            tmp.path(),
            Options {
                wal_sync: SyncMode::PerBatch,
                ..Options::default()
            },
        )
        .unwrap();
        engine.set(b"k", b"v").unwrap();
        drop(engine); // crash: no close, no flush
    }
    let engine = open(&tmp);
    assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
    engine.close().unwrap();
}

#[test]
fn test_batch_atomicity_across_restart() {
    let tmp = TempDir::new().unwrap();
    {
        let engine = Engine::open(
            tmp.path(),
            Options {
                wal_sync: SyncMode::PerBatch,
                ..Options::default()
            },
        )
        .unwrap();
        let mut batch = Batch::new();
        batch.set(b"acct/a", b"90");
        batch.set(b"acct/b", b"110");
        batch.log_data(b"transfer 10 a->b");
        engine.apply(&mut batch, None).unwrap();
        drop(engine);
    }
    let engine = open(&tmp);
    assert_eq!(engine.get(b"acct/a").unwrap(), Some(b"90".to_vec()));
    assert_eq!(engine.get(b"acct/b").unwrap(), Some(b"110".to_vec()));
    engine.close().unwrap();
}

#[test]
fn test_snapshot_isolation_through_public_api() {
    let tmp = TempDir::new().unwrap();
    let engine = open(&tmp);

    engine.set(b"a", b"1").unwrap();
    let snap = engine.new_snapshot().unwrap();
    engine.delete(b"a").unwrap();
    engine.set(b"b", b"2").unwrap();

    assert_eq!(snap.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(snap.get(b"b").unwrap(), None);
    assert_eq!(engine.get(b"a").unwrap(), None);
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));

    engine.close().unwrap();
}

#[test]
fn test_range_tombstones_and_range_keys_together() {
    let tmp = TempDir::new().unwrap();
    let engine = open(&tmp);

    for k in [b"a", b"b", b"c", b"d", b"e"] {
        engine.set(k, b"v").unwrap();
    }
    engine.delete_range(b"b", b"d").unwrap();
    engine.range_key_set(b"c", b"f", b"", b"annotation").unwrap();
    engine.flush().unwrap();

    let keys: Vec<Vec<u8>> = scan(&engine).into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"d".to_vec(), b"e".to_vec()]);

    let mut it = engine
        .new_iter(IterOptions {
            key_types: KeyTypes::PointsAndRanges,
            ..Default::default()
        })
        .unwrap();
    it.seek_ge(b"d");
    assert!(it.valid());
    assert_eq!(it.key(), b"d");
    assert_eq!(it.range_keys().len(), 1, "span covering d not reported");

    engine.close().unwrap();
}

#[test]
fn test_mixed_workload_consistency() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(
        tmp.path(),
        Options {
            memtable_size: 8 << 10,
            ..Options::default()
        },
    )
    .unwrap();

    // A model map mirrors every mutation; the engine must agree.
    let mut model = std::collections::BTreeMap::new();
    for i in 0..1500u32 {
        let key = format!("k{:04}", i % 300);
        match i % 7 {
            0 | 1 | 2 | 3 => {
                let value = format!("v{i}");
                engine.set(key.as_bytes(), value.as_bytes()).unwrap();
                model.insert(key.into_bytes(), value.into_bytes());
            }
            4 => {
                engine.delete(key.as_bytes()).unwrap();
                model.remove(key.as_bytes());
            }
            5 => {
                let value = format!("+{i}");
                engine.merge(key.as_bytes(), value.as_bytes()).unwrap();
                model
                    .entry(key.into_bytes())
                    .and_modify(|v: &mut Vec<u8>| v.extend_from_slice(value.as_bytes()))
                    .or_insert_with(|| value.clone().into_bytes());
            }
            _ => {
                if i % 100 == 6 {
                    engine.flush().unwrap();
                }
            }
        }
    }

    let expected: Vec<(Vec<u8>, Vec<u8>)> =
        model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    assert_eq!(scan(&engine), expected);
    engine.close().unwrap();
}
