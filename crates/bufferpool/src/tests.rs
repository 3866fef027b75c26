use super::*;
use anyhow::{anyhow, Result};
use config::EvictionPolicyType;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::Cell;

fn pid(n: u64) -> PageId {
    PageId::new(1, n)
}

fn page(id: PageId) -> Page {
    Page::new(id, vec![(id.page_no * 10, id.page_no)])
}

/// Fetches `id`, counting loader invocations in `loads`.
fn fetch(pool: &BufferPool, id: PageId, loads: &Cell<usize>) -> Result<std::sync::Arc<Page>> {
    pool.get_page(id, || {
        loads.set(loads.get() + 1);
        Ok(page(id))
    })
}

// -------------------- Page --------------------

#[test]
fn page_search_helpers() {
    let p = Page::new(pid(0), vec![(10, 1), (20, 2), (30, 3)]);
    assert_eq!(p.get(20), Some(2));
    assert_eq!(p.get(25), None);
    assert_eq!(p.first_key(), Some(10));
    assert_eq!(p.last_key(), Some(30));
    assert_eq!(p.lower_bound(15), 1);
    assert_eq!(p.lower_bound(31), 3);
    assert_eq!(p.floor_index(25), Some(1));
    assert_eq!(p.floor_index(5), None);
}

// -------------------- LRU policy --------------------

#[test]
fn lru_evicts_least_recently_used() {
    let mut lru = LruPolicy::new(2);
    lru.insert(0); // A
    lru.insert(1); // B
    lru.touch(0);
    assert_eq!(lru.evict(), Some(1));
    lru.insert(1); // C
    assert_eq!(lru.iter_mru().collect::<Vec<_>>(), vec![1, 0]);
}

#[test]
fn lru_remove_unlinks_middle() {
    let mut lru = LruPolicy::new(4);
    for f in 0..4 {
        lru.insert(f);
    }
    assert!(lru.remove(2));
    assert!(!lru.remove(2));
    assert_eq!(lru.iter_mru().collect::<Vec<_>>(), vec![3, 1, 0]);
    assert_eq!(lru.evict(), Some(0));
    assert_eq!(lru.evict(), Some(1));
    assert_eq!(lru.evict(), Some(3));
    assert_eq!(lru.evict(), None);
}

// -------------------- Clock policy --------------------

#[test]
fn clock_sweeps_then_gives_second_chance() {
    let mut clock = ClockPolicy::new(3);
    clock.insert(0); // A
    clock.insert(1); // B
    clock.insert(2); // C

    // Every bit is set, so one full sweep clears them and A goes.
    assert_eq!(clock.evict(), Some(0));
    assert_eq!(clock.is_referenced(1), Some(false));

    clock.insert(0); // D reuses A's slot
    clock.touch(1);
    assert_eq!(clock.evict(), Some(2));
    assert_eq!(clock.is_referenced(1), Some(false));
    assert_eq!(clock.is_referenced(0), Some(true));
}

#[test]
fn clock_remove_leaves_hole_that_insert_fills() {
    let mut clock = ClockPolicy::new(3);
    for f in 0..3 {
        clock.insert(f);
    }
    assert!(clock.remove(1));
    assert!(!clock.contains(1));
    clock.insert(7);
    assert!(clock.contains(7));
    assert_eq!(EvictionPolicy::Clock(clock).len(), 3);
}

// -------------------- BufferPool --------------------

#[test]
fn rejects_invalid_bounds() {
    assert!(BufferPool::new(0, 4, EvictionPolicyType::Lru).is_err());
    assert!(BufferPool::new(5, 4, EvictionPolicyType::Lru).is_err());
    assert!(BufferPool::new(4, 4, EvictionPolicyType::Clock).is_ok());
}

#[test]
fn hit_does_not_reload() -> Result<()> {
    let pool = BufferPool::new(1, 4, EvictionPolicyType::Lru)?;
    let loads = Cell::new(0);

    let a = fetch(&pool, pid(1), &loads)?;
    let b = fetch(&pool, pid(1), &loads)?;
    assert_eq!(loads.get(), 1);
    assert_eq!(a, b);

    let stats = pool.stats();
    assert_eq!((stats.hits, stats.misses, stats.evictions), (1, 1, 0));
    assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    Ok(())
}

#[test]
fn lru_pool_scenario() -> Result<()> {
    let pool = BufferPool::new(1, 2, EvictionPolicyType::Lru)?;
    let loads = Cell::new(0);

    fetch(&pool, pid(1), &loads)?; // A
    fetch(&pool, pid(2), &loads)?; // B
    fetch(&pool, pid(1), &loads)?; // touch A
    fetch(&pool, pid(3), &loads)?; // C evicts B

    assert!(pool.contains(pid(1)));
    assert!(!pool.contains(pid(2)));
    assert!(pool.contains(pid(3)));
    assert_eq!(pool.stats().evictions, 1);
    assert!(pool.is_consistent());
    Ok(())
}

#[test]
fn clock_pool_scenario() -> Result<()> {
    let pool = BufferPool::new(1, 3, EvictionPolicyType::Clock)?;
    let loads = Cell::new(0);

    for n in 1..=3 {
        fetch(&pool, pid(n), &loads)?;
    }
    fetch(&pool, pid(4), &loads)?; // sweep clears all bits, A goes
    assert!(!pool.contains(pid(1)));

    fetch(&pool, pid(2), &loads)?; // B gets its bit back
    fetch(&pool, pid(5), &loads)?; // C goes, B survives
    assert!(pool.contains(pid(2)));
    assert!(!pool.contains(pid(3)));
    assert!(pool.contains(pid(4)));
    assert!(pool.contains(pid(5)));
    assert!(pool.is_consistent());
    Ok(())
}

#[test]
fn one_past_capacity_evicts_exactly_once() -> Result<()> {
    for policy in [EvictionPolicyType::Lru, EvictionPolicyType::Clock] {
        let pool = BufferPool::new(2, 8, policy)?;
        let loads = Cell::new(0);
        for n in 0..9 {
            fetch(&pool, pid(n), &loads)?;
        }
        assert_eq!(pool.len(), 8, "{}", policy);
        assert_eq!(pool.stats().evictions, 1, "{}", policy);
        assert!(pool.is_consistent());
    }
    Ok(())
}

#[test]
fn failed_load_caches_nothing() -> Result<()> {
    let pool = BufferPool::new(1, 2, EvictionPolicyType::Lru)?;
    let err = pool.get_page(pid(9), || Err(anyhow!("disk on fire")));
    assert!(err.is_err());
    assert!(pool.is_empty());
    assert!(pool.is_consistent());
    Ok(())
}

#[test]
fn loader_returning_wrong_page_is_rejected() -> Result<()> {
    let pool = BufferPool::new(1, 2, EvictionPolicyType::Lru)?;
    let res = pool.get_page(pid(1), || Ok(page(pid(2))));
    assert!(res.is_err());
    assert!(pool.is_empty());
    Ok(())
}

#[test]
fn reset_drops_pages_and_switches_policy() -> Result<()> {
    let pool = BufferPool::new(2, 4, EvictionPolicyType::Lru)?;
    let loads = Cell::new(0);
    for n in 0..4 {
        fetch(&pool, pid(n), &loads)?;
    }

    pool.reset(1, 2, EvictionPolicyType::Clock)?;
    assert!(pool.is_empty());
    assert_eq!(pool.policy_type(), EvictionPolicyType::Clock);
    assert_eq!((pool.min_size(), pool.max_size()), (1, 2));
    assert_eq!(pool.stats(), BufferPoolStats::default());

    for n in 0..3 {
        fetch(&pool, pid(n), &loads)?;
    }
    assert_eq!(pool.len(), 2);

    assert!(pool.reset(3, 2, EvictionPolicyType::Lru).is_err());
    assert_eq!(pool.max_size(), 2);
    Ok(())
}

#[test]
fn invalidate_sst_frees_only_its_pages() -> Result<()> {
    let pool = BufferPool::new(1, 6, EvictionPolicyType::Lru)?;
    for sst in 1..=2u64 {
        for n in 0..3 {
            let id = PageId::new(sst, n);
            pool.get_page(id, || Ok(page(id)))?;
        }
    }

    assert_eq!(pool.invalidate_sst(1)?, 3);
    assert_eq!(pool.invalidate_sst(1)?, 0);
    assert_eq!(pool.len(), 3);
    assert!(!pool.contains(PageId::new(1, 0)));
    assert!(pool.contains(PageId::new(2, 0)));
    assert!(pool.is_consistent());

    // Freed frames are reused without evicting.
    for n in 0..3 {
        let id = PageId::new(3, n);
        pool.get_page(id, || Ok(page(id)))?;
    }
    assert_eq!(pool.len(), 6);
    assert_eq!(pool.stats().evictions, 0);
    Ok(())
}

#[test]
fn random_access_keeps_index_and_policy_in_lock_step() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    for policy in [EvictionPolicyType::Lru, EvictionPolicyType::Clock] {
        let pool = BufferPool::new(4, 16, policy)?;
        let loads = Cell::new(0);
        for step in 0..5_000 {
            let id = PageId::new(rng.gen_range(0..3), rng.gen_range(0..20));
            let got = fetch(&pool, id, &loads)?;
            assert_eq!(got.id(), id);
            assert!(pool.len() <= 16);
            if step % 997 == 0 {
                pool.invalidate_sst(rng.gen_range(0..3))?;
            }
        }
        assert!(pool.is_consistent(), "{}", policy);
        let s = pool.stats();
        assert_eq!(s.misses as usize, loads.get());
    }
    Ok(())
}

#[test]
fn debug_output_mentions_policy() -> Result<()> {
    let pool = BufferPool::new(1, 2, EvictionPolicyType::Clock)?;
    let s = format!("{:?}", pool);
    assert!(s.contains("BufferPool"));
    assert!(s.contains("Clock"));
    Ok(())
}

#[test]
fn clear_forgets_all_frames() {
    for kind in [EvictionPolicyType::Lru, EvictionPolicyType::Clock] {
        let mut p = EvictionPolicy::new(kind, 4);
        for f in 0..4 {
            p.insert(f);
        }
        p.clear();
        assert!(p.is_empty());
        assert_eq!(p.get_page_to_evict(), None);
        p.insert(2);
        assert_eq!(p.get_page_to_evict(), Some(2));
    }
}

#[test]
fn invalidation_between_misses_stays_in_lock_step() -> Result<()> {
    for policy in [EvictionPolicyType::Lru, EvictionPolicyType::Clock] {
        let pool = BufferPool::new(2, 8, policy)?;
        let loads = Cell::new(0);
        for step in 0..200u64 {
            fetch(&pool, PageId::new(step % 4, step % 7), &loads)?;
            assert!(pool.is_consistent(), "{} after miss at step {}", policy, step);
            if step % 5 == 4 {
                pool.invalidate_sst(step % 4)?;
                assert!(pool.is_consistent(), "{} after invalidate at step {}", policy, step);
            }
        }
        assert!(pool.len() <= 8);
    }
    Ok(())
}
