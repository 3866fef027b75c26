use anyhow::{anyhow, ensure, Result};
use config::EvictionPolicyType;
use hashtable::{ExtendibleHashtable, DEFAULT_BUCKET_CAPACITY};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use crate::{EvictionPolicy, Page, PageId};

/// Hit/miss/eviction counters since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl BufferPoolStats {
    /// Fraction of `get_page` calls served from memory.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct PoolState {
    min_size: usize,
    max_size: usize,
    /// PageId -> frame index.
    index: ExtendibleHashtable<PageId, usize>,
    /// Frame arena; `None` marks a free frame.
    frames: Vec<Option<Arc<Page>>>,
    free: Vec<usize>,
    policy: EvictionPolicy,
    stats: BufferPoolStats,
}

impl PoolState {
    fn new(min_size: usize, max_size: usize, policy: EvictionPolicyType) -> Self {
        // Pre-size the directory for `min_size` pages.
        let buckets = (min_size / DEFAULT_BUCKET_CAPACITY).max(1);
        let depth = usize::BITS - 1 - buckets.leading_zeros();
        Self {
            min_size,
            max_size,
            index: ExtendibleHashtable::with_capacity(depth, DEFAULT_BUCKET_CAPACITY),
            frames: Vec::with_capacity(min_size),
            free: Vec::new(),
            policy: EvictionPolicy::new(policy, max_size),
            stats: BufferPoolStats::default(),
        }
    }

    /// Frees a frame for a new page, evicting if the pool is full.
    fn claim_frame(&mut self) -> Result<usize> {
        if self.index.len() >= self.max_size {
            let victim = self.policy.get_page_to_evict();
            debug_assert!(victim.is_some(), "eviction policy empty while pool is full");
            let victim = victim.ok_or_else(|| {
                anyhow!(
                    "buffer pool desync: eviction policy empty while {} pages are resident",
                    self.index.len()
                )
            })?;
            let old = self.frames[victim]
                .take()
                .ok_or_else(|| anyhow!("buffer pool desync: victim frame {} is empty", victim))?;
            self.index.remove(&old.id());
            self.stats.evictions += 1;
            trace!(page = ?old.id(), frame = victim, "evicted page");
            return Ok(victim);
        }

        Ok(match self.free.pop() {
            Some(frame) => frame,
            None => {
                self.frames.push(None);
                self.frames.len() - 1
            }
        })
    }

    fn in_lock_step(&self) -> bool {
        self.index.len() == self.policy.len()
            && self.index.iter().all(|(id, &frame)| {
                self.policy.contains(frame)
                    && self.frames[frame].as_ref().map(|p| p.id()) == Some(*id)
            })
    }
}

/// Fixed-capacity page cache with a pluggable replacement policy.
///
/// Residency is tracked twice: an [`ExtendibleHashtable`] maps page ids to
/// frames, and the [`EvictionPolicy`] orders frames for replacement. Both are
/// updated together under one mutex, so a `get_page` call is a single atomic
/// "check cache, maybe read, maybe evict, insert" step and the two views
/// never disagree.
pub struct BufferPool {
    state: Mutex<PoolState>,
}

impl BufferPool {
    /// Creates an empty pool holding at most `max_size` pages.
    ///
    /// # Errors
    ///
    /// Returns an error if `min_size` is 0 or larger than `max_size`.
    pub fn new(min_size: usize, max_size: usize, policy: EvictionPolicyType) -> Result<Self> {
        validate_bounds(min_size, max_size)?;
        Ok(Self {
            state: Mutex::new(PoolState::new(min_size, max_size, policy)),
        })
    }

    /// Returns the cached page `id`, loading it with `load` on a miss.
    ///
    /// A hit refreshes the page in the eviction policy. A miss calls `load`
    /// exactly once and, if the pool is full, evicts exactly one victim.
    ///
    /// # Errors
    ///
    /// Propagates `load` failures (nothing is cached then) and reports
    /// internal desynchronization between index and policy.
    pub fn get_page<F>(&self, id: PageId, load: F) -> Result<Arc<Page>>
    where
        F: FnOnce() -> Result<Page>,
    {
        let mut guard = self.lock()?;
        let st = &mut *guard;

        if let Some(&frame) = st.index.get(&id) {
            st.policy.update_page_access_status(frame);
            st.stats.hits += 1;
            return st.frames[frame]
                .clone()
                .ok_or_else(|| anyhow!("buffer pool desync: frame {} for {:?} is empty", frame, id));
        }

        st.stats.misses += 1;
        let page = load()?;
        ensure!(
            page.id() == id,
            "loader returned page {:?} for request {:?}",
            page.id(),
            id
        );
        let page = Arc::new(page);

        let frame = st.claim_frame()?;
        st.frames[frame] = Some(Arc::clone(&page));
        st.index.insert(id, frame);
        st.policy.insert(frame);

        debug_assert!(st.index.len() <= st.max_size);
        debug_assert!(st.in_lock_step(), "index and policy diverged after caching {:?}", id);
        Ok(page)
    }

    /// Drops every cached page and installs a fresh `policy` with new bounds.
    pub fn reset(&self, min_size: usize, max_size: usize, policy: EvictionPolicyType) -> Result<()> {
        validate_bounds(min_size, max_size)?;
        let mut guard = self.lock()?;
        let dropped = guard.index.len();
        *guard = PoolState::new(min_size, max_size, policy);
        debug!(min_size, max_size, %policy, dropped, "buffer pool reset");
        Ok(())
    }

    /// Drops every cached page that belongs to `sst_id`. Returns how many.
    pub fn invalidate_sst(&self, sst_id: u64) -> Result<usize> {
        let mut guard = self.lock()?;
        let st = &mut *guard;
        let mut dropped = 0;
        for frame in 0..st.frames.len() {
            let stale = matches!(&st.frames[frame], Some(p) if p.id().sst_id == sst_id);
            if !stale {
                continue;
            }
            if let Some(page) = st.frames[frame].take() {
                st.index.remove(&page.id());
                st.policy.remove(frame);
                st.free.push(frame);
                dropped += 1;
            }
        }
        debug_assert!(st.in_lock_step(), "index and policy diverged after invalidating sst {}", sst_id);
        if dropped > 0 {
            debug!(sst_id, dropped, "invalidated cached pages");
        }
        Ok(dropped)
    }

    /// `true` if page `id` is resident. Does not count as an access.
    #[must_use]
    pub fn contains(&self, id: PageId) -> bool {
        self.state().index.contains_key(&id)
    }

    /// Number of resident pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn min_size(&self) -> usize {
        self.state().min_size
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.state().max_size
    }

    #[must_use]
    pub fn policy_type(&self) -> EvictionPolicyType {
        self.state().policy.kind()
    }

    #[must_use]
    pub fn stats(&self) -> BufferPoolStats {
        self.state().stats
    }

    /// `true` when index and eviction policy agree on every resident page.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.state().in_lock_step()
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState>> {
        self.state
            .lock()
            .map_err(|e| anyhow!("buffer pool lock poisoned: {}", e))
    }

    /// Read-only access; a poisoned lock still holds consistent counters.
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state();
        f.debug_struct("BufferPool")
            .field("min_size", &st.min_size)
            .field("max_size", &st.max_size)
            .field("policy", &st.policy.kind())
            .field("resident", &st.index.len())
            .field("stats", &st.stats)
            .finish()
    }
}

fn validate_bounds(min_size: usize, max_size: usize) -> Result<()> {
    ensure!(min_size >= 1, "buffer pool min size must be >= 1");
    ensure!(
        min_size <= max_size,
        "buffer pool min size {} exceeds max size {}",
        min_size,
        max_size
    );
    Ok(())
}
