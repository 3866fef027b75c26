use super::*;
use anyhow::anyhow;
use memtable::DELETED_KEY_VALUE;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tempfile::tempdir;

fn source(entries: Vec<Entry>) -> MergeSource<'static> {
    Box::new(entries.into_iter().map(Ok::<Entry, anyhow::Error>))
}

// -------------------- Basic merge --------------------

#[test]
fn merge_single_source() -> Result<()> {
    let mut merge = MergeIterator::new(vec![source(vec![(1, 1), (2, 2), (3, 3)])]);
    assert_eq!(merge.collect_all()?, vec![(1, 1), (2, 2), (3, 3)]);
    Ok(())
}

#[test]
fn merge_disjoint_sources_interleaves() -> Result<()> {
    let merged: Vec<Entry> = MergeIterator::new(vec![
        source(vec![(2, 20), (4, 40)]),
        source(vec![(1, 10), (3, 30), (5, 50)]),
    ])
    .collect::<Result<_>>()?;
    assert_eq!(merged, vec![(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)]);
    Ok(())
}

#[test]
fn newest_source_wins_on_duplicate_keys() -> Result<()> {
    let merged: Vec<Entry> = MergeIterator::new(vec![
        source(vec![(2, 200)]),
        source(vec![(1, 10), (2, 20), (3, 30)]),
        source(vec![(2, 2), (3, 3), (4, 4)]),
    ])
    .collect::<Result<_>>()?;
    assert_eq!(merged, vec![(1, 10), (2, 200), (3, 30), (4, 4)]);
    Ok(())
}

#[test]
fn tombstones_pass_through() -> Result<()> {
    let merged: Vec<Entry> = MergeIterator::new(vec![
        source(vec![(1, DELETED_KEY_VALUE)]),
        source(vec![(1, 10), (2, 20)]),
    ])
    .collect::<Result<_>>()?;
    assert_eq!(merged, vec![(1, DELETED_KEY_VALUE), (2, 20)]);
    Ok(())
}

#[test]
fn empty_sources_are_ignored() -> Result<()> {
    let mut merge = MergeIterator::new(vec![source(vec![]), source(vec![(7, 7)]), source(vec![])]);
    assert_eq!(merge.collect_all()?, vec![(7, 7)]);

    let mut none = MergeIterator::new(Vec::new());
    assert!(none.collect_all()?.is_empty());
    Ok(())
}

// -------------------- Errors --------------------

#[test]
fn source_error_is_surfaced_once() {
    let failing: MergeSource<'static> =
        Box::new(vec![Ok((1, 1)), Err(anyhow!("bad page")), Ok((9, 9))].into_iter());
    let mut merge = MergeIterator::new(vec![source(vec![(2, 2)]), failing]);

    assert_eq!(merge.next().map(|r| r.ok()), Some(Some((1, 1))));
    assert!(matches!(merge.next(), Some(Err(_))));
    assert!(merge.next().is_none());
}

#[test]
fn error_while_priming_is_yielded_first() {
    let failing: MergeSource<'static> = Box::new(std::iter::once(Err(anyhow!("cannot open"))));
    let mut merge = MergeIterator::new(vec![failing, source(vec![(1, 1)])]);
    assert!(matches!(merge.next(), Some(Err(_))));
    assert!(merge.next().is_none());
}

// -------------------- Model check --------------------

#[test]
fn matches_newest_first_model() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let mut sources = Vec::new();
    let mut model: BTreeMap<u64, u64> = BTreeMap::new();

    // Build oldest first so later inserts into the model win, then reverse.
    let mut runs: Vec<Vec<Entry>> = Vec::new();
    for run in 0..6u64 {
        let mut keys: Vec<u64> = (0..200).map(|_| rng.gen_range(0..500)).collect();
        keys.sort_unstable();
        keys.dedup();
        let entries: Vec<Entry> = keys.into_iter().map(|k| (k, run * 1_000 + k)).collect();
        for &(k, v) in &entries {
            model.insert(k, v);
        }
        runs.push(entries);
    }
    for run in runs.into_iter().rev() {
        sources.push(source(run));
    }

    let merged = MergeIterator::new(sources).collect_all()?;
    assert_eq!(merged, model.into_iter().collect::<Vec<_>>());
    Ok(())
}

// -------------------- Over SSTables --------------------

#[test]
fn merge_sstable_range_iters() -> Result<()> {
    let dir = tempdir()?;
    let newer = write_and_open(dir.path(), 2, SearchType::BTreeSearch, 8, &[(5, 500), (600, DELETED_KEY_VALUE)])?;
    let older = write_and_open(dir.path(), 1, SearchType::BinarySearch, 8, &stepped(1_000, 1))?;
    let pool = pool()?;

    let sources: Vec<MergeSource<'_>> = vec![
        Box::new(newer.range_iter(0, 700, &pool)),
        Box::new(older.range_iter(0, 700, &pool)),
    ];
    let merged = MergeIterator::new(sources).collect_all()?;

    assert_eq!(merged.len(), 701);
    assert_eq!(merged[5], (5, 500));
    assert_eq!(merged[600], (600, DELETED_KEY_VALUE));
    assert_eq!(merged[700], (700, 701));
    Ok(())
}
