use super::helpers::{count_sst_files, leveled_config, open_db, single_level_config};
use crate::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

// --------------------- Basic put / get / delete ---------------------

#[test]
fn put_and_get() -> Result<()> {
    let dir = tempdir()?;
    let mut db = open_db(dir.path(), DbConfig::default())?;

    db.put(7, 700)?;
    assert_eq!(db.get(7)?, 700);
    Ok(())
}

#[test]
fn get_missing_key() -> Result<()> {
    let dir = tempdir()?;
    let db = open_db(dir.path(), DbConfig::default())?;

    assert_eq!(db.get(42)?, INVALID_VALUE);
    Ok(())
}

#[test]
fn delete_removes_key() -> Result<()> {
    let dir = tempdir()?;
    let mut db = open_db(dir.path(), DbConfig::default())?;

    db.put(1, 10)?;
    db.delete(1)?;
    assert_eq!(db.get(1)?, INVALID_VALUE);

    // Deleting a key that never existed still leaves a tombstone.
    db.delete(2)?;
    assert_eq!(db.get(2)?, INVALID_VALUE);
    assert_eq!(db.memtable_len(), 2);
    Ok(())
}

#[test]
fn overwrite_key() -> Result<()> {
    let dir = tempdir()?;
    let mut db = open_db(dir.path(), DbConfig::default())?;

    db.put(1, 10)?;
    db.put(1, 20)?;
    assert_eq!(db.get(1)?, 20);
    db.update(1, 30)?;
    assert_eq!(db.get(1)?, 30);
    assert_eq!(db.memtable_len(), 1);
    Ok(())
}

#[test]
fn put_after_delete_resurrects() -> Result<()> {
    let dir = tempdir()?;
    let mut db = open_db(dir.path(), DbConfig::default())?;

    db.put(3, 1)?;
    db.delete(3)?;
    db.put(3, 2)?;
    assert_eq!(db.get(3)?, 2);
    Ok(())
}

#[test]
fn extreme_keys_are_ordinary() -> Result<()> {
    let dir = tempdir()?;
    let mut db = open_db(dir.path(), DbConfig::default())?;

    db.put(0, 1)?;
    db.put(u64::MAX, 2)?;
    db.force_flush()?;
    assert_eq!(db.get(0)?, 1);
    assert_eq!(db.get(u64::MAX)?, 2);
    Ok(())
}

// --------------------- Validation ---------------------

#[test]
fn reserved_values_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let mut db = open_db(dir.path(), DbConfig::default())?;

    db.put(1, 10)?;
    assert!(db.put(1, INVALID_VALUE).is_err());
    assert!(db.put(1, DELETED_KEY_VALUE).is_err());
    assert!(db.update(1, INVALID_VALUE).is_err());
    assert!(db.update(1, DELETED_KEY_VALUE).is_err());

    // The rejected writes changed nothing.
    assert_eq!(db.get(1)?, 10);
    assert_eq!(db.memtable_len(), 1);

    // The largest storable value round-trips.
    db.put(2, u64::MAX - 2)?;
    assert_eq!(db.get(2)?, u64::MAX - 2);
    Ok(())
}

#[test]
fn operations_before_open_fail() -> Result<()> {
    let mut db = Db::new(DbConfig::default())?;
    assert!(!db.is_open());
    assert!(db.path().is_none());

    let err = db.put(1, 1).unwrap_err();
    assert!(err.to_string().contains("not open"), "{}", err);
    assert!(db.delete(1).is_err());
    assert!(db.get(1).is_err());
    assert!(db.force_flush().is_err());
    assert!(db.compact().is_err());

    let mut out = vec![(9, 9)];
    assert!(db.scan(0, 10, &mut out).is_err());
    assert!(out.is_empty());
    assert_eq!(db.memtable_len(), 0);
    Ok(())
}

#[test]
fn open_twice_fails() -> Result<()> {
    let dir = tempdir()?;
    let mut db = open_db(dir.path(), DbConfig::default())?;

    let err = db.open(dir.path().join("other")).unwrap_err();
    assert!(err.to_string().contains("already open"), "{}", err);
    assert_eq!(db.path(), Some(dir.path().join("db").as_path()));
    Ok(())
}

#[test]
fn invalid_config_is_rejected() {
    assert!(Db::new(DbConfig::default().with_buffer_pool(8, 4)).is_err());
    assert!(Db::new(DbConfig::default().with_memtable_capacity(8)).is_err());
    assert!(Db::new(DbConfig::default().with_size_ratio(1)).is_err());
    assert!(Db::new(DbConfig::default().with_max_levels(0)).is_err());
}

// --------------------- Flush ---------------------

#[test]
fn full_memtable_flushes_before_write() -> Result<()> {
    let dir = tempdir()?;
    let config = DbConfig::default().with_memtable_capacity(2 * KV_BYTE_SIZE);
    let mut db = open_db(dir.path(), config)?;

    db.put(1, 10)?;
    db.put(2, 20)?;
    assert_eq!((db.memtable_len(), db.sst_count()), (2, 0));

    // Overwriting a resident key never flushes.
    db.put(2, 21)?;
    assert_eq!((db.memtable_len(), db.sst_count()), (2, 0));

    // A third distinct key does.
    db.put(3, 30)?;
    assert_eq!((db.memtable_len(), db.sst_count()), (1, 1));
    assert_eq!(db.level_sst_counts()[0], 1);

    assert_eq!(db.get(1)?, 10);
    assert_eq!(db.get(2)?, 21);
    assert_eq!(db.get(3)?, 30);
    Ok(())
}

#[test]
fn delete_of_new_key_can_trigger_flush() -> Result<()> {
    let dir = tempdir()?;
    let config = DbConfig::default().with_memtable_capacity(2 * KV_BYTE_SIZE);
    let mut db = open_db(dir.path(), config)?;

    db.put(1, 10)?;
    db.put(2, 20)?;
    db.delete(1)?;
    assert_eq!(db.sst_count(), 0);

    db.delete(5)?;
    assert_eq!(db.sst_count(), 1);
    assert_eq!(db.get(1)?, INVALID_VALUE);
    assert_eq!(db.get(2)?, 20);
    assert_eq!(db.get(5)?, INVALID_VALUE);
    Ok(())
}

#[test]
fn force_flush_on_empty_memtable_is_noop() -> Result<()> {
    let dir = tempdir()?;
    let mut db = open_db(dir.path(), DbConfig::default())?;

    db.force_flush()?;
    assert_eq!(db.sst_count(), 0);
    assert_eq!(count_sst_files(&dir.path().join("db")), 0);
    Ok(())
}

#[test]
fn force_flush_writes_level0_file() -> Result<()> {
    let dir = tempdir()?;
    let mut db = open_db(dir.path(), DbConfig::default())?;

    for k in 0..100u64 {
        db.put(k, k + 1)?;
    }
    db.force_flush()?;

    assert_eq!(db.memtable_len(), 0);
    assert_eq!(db.sst_count(), 1);
    assert!(dir.path().join("db").join("level0").is_dir());
    assert_eq!(count_sst_files(&dir.path().join("db")), 1);
    for k in 0..100u64 {
        assert_eq!(db.get(k)?, k + 1);
    }
    Ok(())
}

#[test]
fn single_level_mode_keeps_every_run_in_level0() -> Result<()> {
    let dir = tempdir()?;
    let mut db = open_db(dir.path(), single_level_config())?;

    for k in 1..=20u64 {
        db.put(k, k * 10)?;
    }

    assert_eq!(db.level_sst_counts(), vec![4, 0, 0]);
    assert_eq!(db.memtable_len(), 4);
    assert_eq!(count_sst_files(&dir.path().join("db")), 4);
    let lsm = db.lsm_tree().unwrap();
    assert!(lsm.level(0).iter().all(|sst| !sst.has_bloom()));
    for k in 1..=20u64 {
        assert_eq!(db.get(k)?, k * 10);
    }
    Ok(())
}

#[test]
fn leveled_mode_writes_bloom_filters() -> Result<()> {
    let dir = tempdir()?;
    let mut db = open_db(dir.path(), leveled_config())?;

    for k in 1..=5u64 {
        db.put(k, k)?;
    }
    let lsm = db.lsm_tree().unwrap();
    assert_eq!(lsm.sst_count(), 1);
    assert!(lsm.level(0)[0].has_bloom());
    Ok(())
}

#[test]
fn sst_ids_increase_with_every_flush() -> Result<()> {
    let dir = tempdir()?;
    let mut db = open_db(dir.path(), single_level_config())?;

    for k in 1..=13u64 {
        db.put(k, k)?;
    }
    let ids: Vec<u64> = db.lsm_tree().unwrap().level(0).iter().map(|sst| sst.id()).collect();
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] > w[1]), "level 0 must be newest first: {:?}", ids);
    Ok(())
}

#[test]
fn debug_output_shows_layout() -> Result<()> {
    let dir = tempdir()?;
    let mut db = open_db(dir.path(), single_level_config())?;
    db.put(1, 1)?;

    let s = format!("{:?}", db);
    assert!(s.contains("Db"));
    assert!(s.contains("memtable_entries: 1"));
    assert!(s.contains("level_sst_counts"));
    Ok(())
}

#[test]
fn failed_flush_leaves_no_file_and_keeps_memtable() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");
    let mut db = Db::open_with(&path, DbConfig::default())?;
    db.put(1, 10)?;

    // A directory in the way makes the manifest rewrite fail.
    fs::create_dir_all(path.join("MANIFEST.tmp"))?;
    assert!(db.force_flush().is_err());
    assert_eq!(db.memtable_len(), 1);
    assert_eq!(db.sst_count(), 0);
    assert_eq!(count_sst_files(&path), 0);

    fs::remove_dir(path.join("MANIFEST.tmp"))?;
    db.force_flush()?;
    assert_eq!(db.sst_count(), 1);
    assert_eq!(count_sst_files(&path), 1);
    assert_eq!(db.get(1)?, 10);
    Ok(())
}
