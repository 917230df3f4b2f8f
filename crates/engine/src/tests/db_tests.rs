use std::sync::atomic::Ordering;

use anyhow::Result;
use tempfile::tempdir;

use crate::tests::helpers::{rand_value, test_key, test_options};
use crate::{Engine, Error, IndexType, Options};

// --------------------- open ---------------------

#[test]
fn open_creates_missing_directory() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("nested").join("db");
    let engine = Engine::open(test_options(&path))?;
    assert!(path.is_dir());
    assert_eq!(engine.stat()?.key_num, 0);
    Ok(())
}

#[test]
fn open_rejects_invalid_options() {
    let mut opts = Options::default();
    opts.dir_path = "".into();
    assert!(matches!(Engine::open(opts), Err(Error::InvalidConfig(_))));

    let dir = tempdir().unwrap();
    let mut opts = test_options(dir.path());
    opts.data_file_size = 0;
    assert!(matches!(Engine::open(opts), Err(Error::InvalidConfig(_))));

    let mut opts = test_options(dir.path());
    opts.data_file_merge_ratio = 1.5;
    assert!(matches!(Engine::open(opts), Err(Error::InvalidConfig(_))));
}

#[test]
fn second_open_of_same_directory_fails() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(test_options(dir.path()))?;
    engine.put(b"k", b"v")?;

    assert!(matches!(
        Engine::open(test_options(dir.path())),
        Err(Error::DatabaseIsUsing)
    ));

    // releasing the first instance lets the next open succeed
    drop(engine);
    let engine = Engine::open(test_options(dir.path()))?;
    assert_eq!(engine.get(b"k")?, b"v");
    Ok(())
}

// --------------------- put / get ---------------------

#[test]
fn put_get_overwrite_delete_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(test_options(dir.path()))?;

    engine.put(b"k1", b"v1")?;
    assert_eq!(engine.get(b"k1")?, b"v1");

    engine.put(b"k1", b"v2")?;
    assert_eq!(engine.get(b"k1")?, b"v2");

    engine.delete(b"k1")?;
    assert!(matches!(engine.get(b"k1"), Err(Error::KeyNotFound)));
    Ok(())
}

#[test]
fn empty_key_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(test_options(dir.path()))?;
    assert!(matches!(engine.put(b"", b"v"), Err(Error::KeyIsEmpty)));
    assert!(matches!(engine.get(b""), Err(Error::KeyIsEmpty)));
    assert!(matches!(engine.delete(b""), Err(Error::KeyIsEmpty)));
    Ok(())
}

#[test]
fn empty_value_is_allowed() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(test_options(dir.path()))?;
    engine.put(b"k", b"")?;
    assert_eq!(engine.get(b"k")?, Vec::<u8>::new());
    Ok(())
}

#[test]
fn get_missing_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(test_options(dir.path()))?;
    engine.put(b"present", b"v")?;
    assert!(matches!(engine.get(b"absent"), Err(Error::KeyNotFound)));
    Ok(())
}

#[test]
fn delete_missing_key_succeeds_without_io() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(test_options(dir.path()))?;
    engine.delete(b"never-written")?;
    assert_eq!(engine.stat()?.key_num, 0);
    Ok(())
}

// --------------------- rotation ---------------------

#[test]
fn small_file_size_rotates_and_stays_readable() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = test_options(dir.path());
    opts.data_file_size = 256;
    let engine = Engine::open(opts)?;

    for i in 0..100 {
        engine.put(&test_key(i), &rand_value(32))?;
    }

    let stat = engine.stat()?;
    assert!(
        stat.data_file_num >= 3,
        "expected at least 3 data files, got {}",
        stat.data_file_num
    );
    assert_eq!(stat.key_num, 100);

    for i in 0..100 {
        assert!(engine.get(&test_key(i)).is_ok(), "key {} unreadable", i);
    }
    Ok(())
}

// --------------------- restart recovery ---------------------

#[test]
fn restart_preserves_all_data() -> Result<()> {
    let dir = tempdir()?;
    let mut values = Vec::new();
    {
        let engine = Engine::open(test_options(dir.path()))?;
        for i in 0..100 {
            let value = rand_value(24);
            engine.put(&test_key(i), &value)?;
            values.push(value);
        }
    }

    let engine = Engine::open(test_options(dir.path()))?;
    for (i, value) in values.iter().enumerate() {
        assert_eq!(&engine.get(&test_key(i))?, value);
    }
    // no batches ran, so the sequence counter stays at zero
    assert_eq!(engine.seq_no.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn restart_replays_overwrites_and_deletes() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(test_options(dir.path()))?;
        engine.put(b"kept", b"one")?;
        engine.put(b"overwritten", b"old")?;
        engine.put(b"overwritten", b"new")?;
        engine.put(b"dropped", b"soon")?;
        engine.delete(b"dropped")?;
    }

    let engine = Engine::open(test_options(dir.path()))?;
    assert_eq!(engine.get(b"kept")?, b"one");
    assert_eq!(engine.get(b"overwritten")?, b"new");
    assert!(matches!(engine.get(b"dropped"), Err(Error::KeyNotFound)));
    assert!(engine.stat()?.reclaimable_size > 0);
    Ok(())
}

#[test]
fn restart_without_mmap_startup() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = test_options(dir.path());
    opts.mmap_at_startup = false;
    {
        let engine = Engine::open(opts.clone())?;
        engine.put(b"plain", b"io")?;
    }
    let engine = Engine::open(opts)?;
    assert_eq!(engine.get(b"plain")?, b"io");
    Ok(())
}

#[test]
fn writes_continue_after_restart() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(test_options(dir.path()))?;
        engine.put(b"before", b"restart")?;
    }
    let engine = Engine::open(test_options(dir.path()))?;
    engine.put(b"after", b"restart")?;
    assert_eq!(engine.get(b"before")?, b"restart");
    assert_eq!(engine.get(b"after")?, b"restart");
    Ok(())
}

// --------------------- corruption ---------------------

#[test]
fn flipped_value_byte_fails_crc() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(test_options(dir.path()))?;
    engine.put(b"fragile", b"payload-bytes")?;
    engine.sync()?;

    // flip the final byte on disk: the tail of the value
    let path = data::DataFile::file_name(dir.path(), 0);
    let mut bytes = std::fs::read(&path)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&path, bytes)?;

    assert!(matches!(engine.get(b"fragile"), Err(Error::InvalidCrc)));

    // recovery treats the same corruption as fatal
    drop(engine);
    assert!(matches!(
        Engine::open(test_options(dir.path())),
        Err(Error::InvalidCrc)
    ));
    Ok(())
}

// --------------------- sync / close / stat ---------------------

#[test]
fn explicit_sync_and_close() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(test_options(dir.path()))?;
    engine.put(b"k", b"v")?;
    engine.sync()?;
    engine.close()?;

    // close released the directory lock, so a second open works even while
    // the first instance is still alive
    let reopened = Engine::open(test_options(dir.path()))?;
    assert_eq!(reopened.get(b"k")?, b"v");
    Ok(())
}

#[test]
fn sync_writes_and_bytes_per_sync_policies() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = test_options(dir.path());
    opts.sync_writes = true;
    {
        let engine = Engine::open(opts)?;
        engine.put(b"synced", b"every-write")?;
    }

    let dir2 = tempdir()?;
    let mut opts = test_options(dir2.path());
    opts.bytes_per_sync = 64;
    let engine = Engine::open(opts)?;
    for i in 0..16 {
        engine.put(&test_key(i), b"threshold")?;
    }
    assert_eq!(engine.get(&test_key(15))?, b"threshold");
    Ok(())
}

#[test]
fn stat_reports_counts_and_sizes() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(test_options(dir.path()))?;
    for i in 0..10 {
        engine.put(&test_key(i), &rand_value(16))?;
    }
    engine.put(&test_key(0), b"overwrite")?;
    engine.delete(&test_key(1))?;

    let stat = engine.stat()?;
    assert_eq!(stat.key_num, 9);
    assert_eq!(stat.data_file_num, 1);
    assert!(stat.reclaimable_size > 0);
    assert!(stat.disk_size > 0);
    Ok(())
}

// --------------------- list_keys / fold ---------------------

#[test]
fn list_keys_is_sorted_and_complete() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(test_options(dir.path()))?;
    for i in (0..5).rev() {
        engine.put(&test_key(i), b"v")?;
    }
    let keys = engine.list_keys();
    let expected: Vec<Vec<u8>> = (0..5).map(test_key).collect();
    assert_eq!(keys, expected);
    Ok(())
}

#[test]
fn fold_visits_pairs_and_stops_early() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(test_options(dir.path()))?;
    for i in 0..5 {
        engine.put(&test_key(i), format!("value-{}", i).as_bytes())?;
    }

    let mut seen = Vec::new();
    engine.fold(|key, value| {
        seen.push((key.to_vec(), value.to_vec()));
        seen.len() < 3
    })?;
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].0, test_key(0));
    assert_eq!(seen[2].1, b"value-2");
    Ok(())
}

// --------------------- index variants ---------------------

#[test]
fn art_index_end_to_end() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = test_options(dir.path());
    opts.index_type = IndexType::Art;
    {
        let engine = Engine::open(opts.clone())?;
        for i in 0..50 {
            engine.put(&test_key(i), format!("art-{}", i).as_bytes())?;
        }
        engine.delete(&test_key(7))?;
    }

    let engine = Engine::open(opts)?;
    assert_eq!(engine.get(&test_key(3))?, b"art-3");
    assert!(matches!(engine.get(&test_key(7)), Err(Error::KeyNotFound)));
    assert_eq!(engine.stat()?.key_num, 49);
    Ok(())
}

#[test]
fn bptree_index_skips_replay_and_restores_seq_no() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = test_options(dir.path());
    opts.index_type = IndexType::BPlusTree;
    opts.mmap_at_startup = false;
    {
        let engine = Engine::open(opts.clone())?;
        for i in 0..20 {
            engine.put(&test_key(i), format!("bpt-{}", i).as_bytes())?;
        }
        engine.delete(&test_key(4))?;

        // one committed batch pushes the sequence counter to 1
        let batch = engine.new_write_batch(crate::WriteBatchOptions::default());
        batch.put(b"batched", b"yes")?;
        batch.commit()?;

        engine.close()?;
    }

    let engine = Engine::open(opts)?;
    assert_eq!(engine.seq_no.load(Ordering::SeqCst), 1);
    assert_eq!(engine.get(&test_key(11))?, b"bpt-11");
    assert_eq!(engine.get(b"batched")?, b"yes");
    assert!(matches!(engine.get(&test_key(4)), Err(Error::KeyNotFound)));

    // the seq-no file must not survive the load
    assert!(!dir.path().join(data::SEQ_NO_FILE_NAME).is_file());

    engine.put(b"after", b"reopen")?;
    assert_eq!(engine.get(b"after")?, b"reopen");
    Ok(())
}
