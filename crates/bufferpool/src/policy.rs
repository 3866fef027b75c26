//! Page replacement strategies.
//!
//! Policies never see pages. They track **frame indices** handed out by the
//! [`BufferPool`](crate::BufferPool), which owns the frames themselves, so
//! both structures are flat arrays instead of pointer-linked lists.

use config::EvictionPolicyType;

const NIL: usize = usize::MAX;

/// The replacement strategy installed in a buffer pool.
///
/// A closed enum: there are two strategies and dispatch is a `match`.
#[derive(Debug, Clone)]
pub enum EvictionPolicy {
    Lru(LruPolicy),
    Clock(ClockPolicy),
}

impl EvictionPolicy {
    /// Creates an empty policy of the given kind sized for `capacity` frames.
    pub fn new(kind: EvictionPolicyType, capacity: usize) -> Self {
        match kind {
            EvictionPolicyType::Lru => EvictionPolicy::Lru(LruPolicy::new(capacity)),
            EvictionPolicyType::Clock => EvictionPolicy::Clock(ClockPolicy::new(capacity)),
        }
    }

    #[must_use]
    pub fn kind(&self) -> EvictionPolicyType {
        match self {
            EvictionPolicy::Lru(_) => EvictionPolicyType::Lru,
            EvictionPolicy::Clock(_) => EvictionPolicyType::Clock,
        }
    }

    /// Starts tracking a newly cached frame.
    pub fn insert(&mut self, frame: usize) {
        match self {
            EvictionPolicy::Lru(p) => p.insert(frame),
            EvictionPolicy::Clock(p) => p.insert(frame),
        }
    }

    /// Records a cache hit on `frame`.
    pub fn update_page_access_status(&mut self, frame: usize) {
        match self {
            EvictionPolicy::Lru(p) => p.touch(frame),
            EvictionPolicy::Clock(p) => p.touch(frame),
        }
    }

    /// Picks a victim and stops tracking it. `None` only when nothing is
    /// tracked, which callers must treat as a bug.
    pub fn get_page_to_evict(&mut self) -> Option<usize> {
        match self {
            EvictionPolicy::Lru(p) => p.evict(),
            EvictionPolicy::Clock(p) => p.evict(),
        }
    }

    /// Stops tracking `frame` without choosing it as a victim.
    pub fn remove(&mut self, frame: usize) -> bool {
        match self {
            EvictionPolicy::Lru(p) => p.remove(frame),
            EvictionPolicy::Clock(p) => p.remove(frame),
        }
    }

    /// Forgets every tracked frame.
    pub fn clear(&mut self) {
        match self {
            EvictionPolicy::Lru(p) => p.clear(),
            EvictionPolicy::Clock(p) => p.clear(),
        }
    }

    #[must_use]
    pub fn contains(&self, frame: usize) -> bool {
        match self {
            EvictionPolicy::Lru(p) => p.contains(frame),
            EvictionPolicy::Clock(p) => p.contains(frame),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            EvictionPolicy::Lru(p) => p.len,
            EvictionPolicy::Clock(p) => p.len,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// LRU
// ---------------------------------------------------------------------------

/// Least-recently-used ordering as an index-linked list.
///
/// `head` is the most recently used frame, `tail` the least recently used.
#[derive(Debug, Clone)]
pub struct LruPolicy {
    prev: Vec<usize>,
    next: Vec<usize>,
    linked: Vec<bool>,
    head: usize,
    tail: usize,
    len: usize,
}

impl LruPolicy {
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.min(1 << 16);
        Self {
            prev: Vec::with_capacity(cap),
            next: Vec::with_capacity(cap),
            linked: Vec::with_capacity(cap),
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    pub fn insert(&mut self, frame: usize) {
        self.ensure_slot(frame);
        debug_assert!(!self.linked[frame], "frame {} inserted twice into LRU", frame);
        if self.linked[frame] {
            self.unlink(frame);
        }
        self.push_front(frame);
    }

    pub fn touch(&mut self, frame: usize) {
        if self.contains(frame) {
            self.unlink(frame);
            self.push_front(frame);
        }
    }

    pub fn evict(&mut self) -> Option<usize> {
        if self.tail == NIL {
            return None;
        }
        let victim = self.tail;
        self.unlink(victim);
        Some(victim)
    }

    pub fn remove(&mut self, frame: usize) -> bool {
        if !self.contains(frame) {
            return false;
        }
        self.unlink(frame);
        true
    }

    pub fn clear(&mut self) {
        self.prev.clear();
        self.next.clear();
        self.linked.clear();
        self.head = NIL;
        self.tail = NIL;
        self.len = 0;
    }

    #[must_use]
    pub fn contains(&self, frame: usize) -> bool {
        self.linked.get(frame).copied().unwrap_or(false)
    }

    /// Frames from most to least recently used.
    pub fn iter_mru(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            if cur == NIL {
                return None;
            }
            let frame = cur;
            cur = self.next[frame];
            Some(frame)
        })
    }

    fn ensure_slot(&mut self, frame: usize) {
        if frame >= self.linked.len() {
            self.prev.resize(frame + 1, NIL);
            self.next.resize(frame + 1, NIL);
            self.linked.resize(frame + 1, false);
        }
    }

    fn push_front(&mut self, frame: usize) {
        self.prev[frame] = NIL;
        self.next[frame] = self.head;
        if self.head != NIL {
            self.prev[self.head] = frame;
        }
        self.head = frame;
        if self.tail == NIL {
            self.tail = frame;
        }
        self.linked[frame] = true;
        self.len += 1;
    }

    fn unlink(&mut self, frame: usize) {
        let (p, n) = (self.prev[frame], self.next[frame]);
        if p != NIL {
            self.next[p] = n;
        } else {
            self.head = n;
        }
        if n != NIL {
            self.prev[n] = p;
        } else {
            self.tail = p;
        }
        self.prev[frame] = NIL;
        self.next[frame] = NIL;
        self.linked[frame] = false;
        self.len -= 1;
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct ClockSlot {
    frame: usize,
    referenced: bool,
}

/// Second-chance replacement over a ring of slots with one reference bit
/// each.
///
/// The ring grows up to `capacity` slots as frames arrive. The hand rests on
/// the slot of the last victim, so the next insert lands exactly there.
#[derive(Debug, Clone)]
pub struct ClockPolicy {
    ring: Vec<Option<ClockSlot>>,
    /// frame -> ring position.
    position: Vec<Option<usize>>,
    hand: usize,
    capacity: usize,
    len: usize,
}

impl ClockPolicy {
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.min(1 << 16);
        Self {
            ring: Vec::with_capacity(cap),
            position: Vec::with_capacity(cap),
            hand: 0,
            capacity: capacity.max(1),
            len: 0,
        }
    }

    pub fn insert(&mut self, frame: usize) {
        if frame >= self.position.len() {
            self.position.resize(frame + 1, None);
        }
        debug_assert!(self.position[frame].is_none(), "frame {} inserted twice into clock", frame);
        if self.position[frame].is_some() {
            self.remove(frame);
        }

        let slot = ClockSlot {
            frame,
            referenced: true,
        };

        let idx = if self.len < self.ring.len() {
            // A hole exists; the first one at or after the hand.
            let n = self.ring.len();
            let idx = (0..n)
                .map(|step| (self.hand + step) % n)
                .find(|&i| self.ring[i].is_none())
                .unwrap_or(n);
            if idx == n {
                self.ring.push(Some(slot));
            } else {
                self.ring[idx] = Some(slot);
            }
            idx
        } else {
            debug_assert!(
                self.ring.len() < self.capacity,
                "clock ring over capacity {}",
                self.capacity
            );
            self.ring.push(Some(slot));
            self.ring.len() - 1
        };

        self.position[frame] = Some(idx);
        self.hand = idx + 1;
        self.len += 1;
    }

    pub fn touch(&mut self, frame: usize) {
        if let Some(Some(idx)) = self.position.get(frame) {
            if let Some(slot) = self.ring[*idx].as_mut() {
                slot.referenced = true;
            }
        }
    }

    pub fn evict(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        // Terminates within two sweeps: the first clears every bit.
        loop {
            if self.hand >= self.ring.len() {
                self.hand = 0;
            }
            let idx = self.hand;
            let victim = match self.ring[idx].as_mut() {
                Some(slot) if !slot.referenced => Some(slot.frame),
                Some(slot) => {
                    slot.referenced = false;
                    None
                }
                None => None,
            };
            if let Some(frame) = victim {
                self.ring[idx] = None;
                self.position[frame] = None;
                self.len -= 1;
                return Some(frame);
            }
            self.hand += 1;
        }
    }

    pub fn remove(&mut self, frame: usize) -> bool {
        match self.position.get_mut(frame).and_then(Option::take) {
            Some(idx) => {
                self.ring[idx] = None;
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.ring.clear();
        self.position.clear();
        self.hand = 0;
        self.len = 0;
    }

    #[must_use]
    pub fn contains(&self, frame: usize) -> bool {
        matches!(self.position.get(frame), Some(Some(_)))
    }

    /// Reference bit of `frame`, if tracked.
    #[must_use]
    pub fn is_referenced(&self, frame: usize) -> Option<bool> {
        let idx = (*self.position.get(frame)?)?;
        self.ring[idx].map(|s| s.referenced)
    }
}
