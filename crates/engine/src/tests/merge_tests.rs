use anyhow::Result;
use tempfile::tempdir;

use crate::db::merge_path;
use crate::tests::helpers::{rand_value, test_key, test_options};
use crate::{Engine, Error};

#[test]
fn merge_on_empty_database_is_a_no_op() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(test_options(dir.path()))?;
    engine.merge()?;
    Ok(())
}

#[test]
fn merge_below_ratio_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = test_options(dir.path());
    opts.data_file_merge_ratio = 0.9;
    let engine = Engine::open(opts)?;

    // fresh keys only: nothing is reclaimable yet
    for i in 0..50 {
        engine.put(&test_key(i), &rand_value(16))?;
    }
    assert!(matches!(engine.merge(), Err(Error::MergeRatioUnreached)));
    Ok(())
}

#[test]
fn merge_drops_dead_records_and_survives_restart() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = test_options(dir.path());
    opts.data_file_size = 4 * 1024;
    {
        let engine = Engine::open(opts.clone())?;
        for i in 0..500 {
            engine.put(&test_key(i), &rand_value(32))?;
        }
        // overwrite and delete to create garbage across several files
        for i in 0..250 {
            engine.put(&test_key(i), b"fresh")?;
        }
        for i in 400..500 {
            engine.delete(&test_key(i))?;
        }

        let before = engine.stat()?;
        assert!(before.data_file_num > 1);
        assert!(before.reclaimable_size > 0);

        engine.merge()?;
        // merge output waits in the sibling directory until the next open
        assert!(merge_path(dir.path()).is_dir());
    }

    let engine = Engine::open(opts)?;
    assert!(!merge_path(dir.path()).is_dir(), "merge dir must be consumed");
    assert!(
        dir.path().join(data::HINT_FILE_NAME).is_file(),
        "hint file must be retained for fast recovery"
    );

    for i in 0..250 {
        assert_eq!(engine.get(&test_key(i))?, b"fresh");
    }
    for i in 250..400 {
        assert!(engine.get(&test_key(i)).is_ok());
    }
    for i in 400..500 {
        assert!(matches!(engine.get(&test_key(i)), Err(Error::KeyNotFound)));
    }
    assert_eq!(engine.stat()?.key_num, 400);
    Ok(())
}

#[test]
fn writes_during_and_after_merge_survive() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = test_options(dir.path());
    opts.data_file_size = 4 * 1024;
    {
        let engine = Engine::open(opts.clone())?;
        for i in 0..200 {
            engine.put(&test_key(i), &rand_value(32))?;
        }
        for i in 0..200 {
            engine.put(&test_key(i), b"again")?;
        }
        engine.merge()?;

        // the merge rotated the active file; these land above the cutoff
        for i in 200..220 {
            engine.put(&test_key(i), b"post-merge")?;
        }
    }

    let engine = Engine::open(opts)?;
    for i in 0..200 {
        assert_eq!(engine.get(&test_key(i))?, b"again");
    }
    for i in 200..220 {
        assert_eq!(engine.get(&test_key(i))?, b"post-merge");
    }
    Ok(())
}

#[test]
fn interrupted_merge_directory_is_discarded() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(test_options(dir.path()))?;
        engine.put(b"safe", b"value")?;
    }

    // fabricate a merge directory with no finished marker
    let merge_dir = merge_path(dir.path());
    std::fs::create_dir_all(&merge_dir)?;
    std::fs::write(merge_dir.join("000000000.data"), b"half-written junk")?;

    let engine = Engine::open(test_options(dir.path()))?;
    assert!(!merge_dir.is_dir(), "interrupted merge must be removed");
    assert_eq!(engine.get(b"safe")?, b"value");
    Ok(())
}

#[test]
fn concurrent_merge_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(test_options(dir.path()))?;
    engine.put(b"k", b"v")?;

    engine
        .is_merging
        .store(true, std::sync::atomic::Ordering::SeqCst);
    assert!(matches!(engine.merge(), Err(Error::MergeInProgress)));
    engine
        .is_merging
        .store(false, std::sync::atomic::Ordering::SeqCst);
    Ok(())
}
