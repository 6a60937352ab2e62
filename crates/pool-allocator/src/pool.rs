//! The pool itself: an MRU victim cache in front of three slab occupancy
//! lists.
//!
//! Terminology note (carried straight from the source, because inverting it
//! would make every call site read backwards): a slab is **empty** when its
//! free bitmap is empty — i.e. every slot is *outstanding* — and **full**
//! when its free bitmap is full — i.e. every slot is *free*. A slab with
//! both live and free slots is **partial**.

use core::mem::MaybeUninit;
use core::ptr::NonNull;

#[cfg(feature = "debug-live-set")]
use std::collections::HashSet;

use crate::error::PoolError;
use crate::list::SlabList;
use crate::mru::MruCache;
use crate::page::{PageSource, SystemPageSource};
use crate::slab::Slab;
use crate::{PAGE_SIZE, SLOTS_PER_SLAB};

/// Upper clamp for the advisory streak counters. Matches the source's
/// `inc_if_below_max`.
const STREAK_MAX: u32 = 21;

fn inc_streak(v: u32) -> u32 {
    if v < STREAK_MAX {
        v + 1
    } else {
        v
    }
}

/// Which of the three occupancy lists a slab currently sits on.
///
/// Exposed for introspection (`Pool::stats`) and tests; the pool never asks
/// a caller to supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlabState {
    /// Free bitmap is empty: every slot outstanding.
    Empty,
    /// Some slots free, some outstanding.
    Partial,
    /// Free bitmap is full: every slot free, the slab is reclaimable.
    Full,
}

/// A snapshot of pool occupancy and the advisory streak counters, for
/// logging or diagnostics. Never consulted by the pool's own logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub empty_slabs: usize,
    pub partial_slabs: usize,
    pub full_slabs: usize,
    pub alloc_streak: u32,
    pub evict_streak: u32,
    pub load_streak: u32,
}

/// A compacting fixed-size object pool over `T`.
///
/// `Pool<T>` hands out `NonNull<MaybeUninit<T>>` slots; it never reads,
/// writes, constructs, or drops a `T` itself. Constructing and destructing
/// the value at a slot is entirely the caller's responsibility — this
/// mirrors the source, which deals exclusively in `void*`.
///
/// Single-owner, `!Sync`, no internal locking. Wrap a whole `Pool` in a
/// `Mutex` at the call site if more than one thread needs it.
pub struct Pool<T, P: PageSource = SystemPageSource> {
    mru: MruCache<T>,
    empty_slabs: SlabList<T>,
    partial_slabs: SlabList<T>,
    full_slabs: SlabList<T>,
    page_source: P,
    alloc_streak: u32,
    evict_streak: u32,
    load_streak: u32,
    #[cfg(feature = "debug-live-set")]
    live: HashSet<usize>,
}

impl<T> Pool<T, SystemPageSource> {
    /// Builds a pool backed by the global allocator.
    pub fn new(page_source: SystemPageSource) -> Result<Self, PoolError> {
        Self::with_page_source(page_source)
    }
}

impl<T, P: PageSource> Pool<T, P> {
    /// Builds a pool over a caller-supplied [`PageSource`] — for `no_std`
    /// embeddings or tests that want to control page allocation directly.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ObjectTooLarge`] if a `Slab<T>` (the slot array
    /// plus its bitmap and list linkage) would not fit in one
    /// [`PAGE_SIZE`]-byte page, or if `T`'s alignment exceeds `PAGE_SIZE`
    /// (a slab's base address is only ever aligned to `PAGE_SIZE`).
    pub fn with_page_source(page_source: P) -> Result<Self, PoolError> {
        let footprint = Slab::<T>::footprint();
        if footprint > PAGE_SIZE || core::mem::align_of::<T>() > PAGE_SIZE {
            return Err(PoolError::ObjectTooLarge {
                size: core::mem::size_of::<T>(),
                align: core::mem::align_of::<T>(),
                slots: SLOTS_PER_SLAB,
                page_size: PAGE_SIZE,
            });
        }
        Ok(Pool {
            mru: MruCache::new(),
            empty_slabs: SlabList::new(),
            partial_slabs: SlabList::new(),
            full_slabs: SlabList::new(),
            page_source,
            alloc_streak: 0,
            evict_streak: 0,
            load_streak: 0,
            #[cfg(feature = "debug-live-set")]
            live: HashSet::new(),
        })
    }

    /// Allocates one object slot, growing the pool with a fresh slab if
    /// every existing one is exhausted.
    ///
    /// Returns `None` only if the underlying [`PageSource`] fails to supply
    /// a new page.
    pub fn alloc(&mut self) -> Option<NonNull<MaybeUninit<T>>> {
        self.alloc_streak = inc_streak(self.alloc_streak);
        let p = match self.mru.pop() {
            Some(p) => Some(p),
            None => match self.get_from_slab_list() {
                Some(p) => Some(p),
                None => self.new_slab(),
            },
        };
        #[cfg(feature = "debug-live-set")]
        if let Some(p) = p {
            self.track_alloc(p);
        }
        p
    }

    /// Allocates without ever growing the pool: answers from the MRU cache
    /// or an already-resident slab only, returning `None` rather than
    /// requesting a new page.
    pub fn try_alloc(&mut self) -> Option<NonNull<MaybeUninit<T>>> {
        self.alloc_streak = inc_streak(self.alloc_streak);
        let p = self.mru.pop().or_else(|| self.get_from_slab_list());
        #[cfg(feature = "debug-live-set")]
        if let Some(p) = p {
            self.track_alloc(p);
        }
        p
    }

    /// Returns a previously allocated slot to the pool.
    ///
    /// # Safety contract
    ///
    /// `p` must have come from a prior `alloc`/`try_alloc` on this same
    /// pool and must not already have been freed. Violating this corrupts
    /// the slab bitmap silently unless the `debug-live-set` feature is
    /// enabled, in which case it panics.
    pub fn free(&mut self, p: NonNull<MaybeUninit<T>>) {
        #[cfg(feature = "debug-live-set")]
        self.track_free(p);

        if let Some(evicted) = self.mru.push(p) {
            unsafe { self.evict_item(evicted) };
        }
    }

    /// Flushes every pointer currently resident in the MRU cache back to
    /// its owning slab's bitmap, possibly moving slabs between occupancy
    /// lists (and promoting some to `full`, which `clean` can then
    /// release). Does not touch any slab-resident free slot.
    pub fn clear_cache(&mut self) {
        let drained = self.mru.drain();
        for p in drained {
            unsafe { self.evict_item(p) };
        }
    }

    /// Releases every slab that is currently full of free slots (i.e. has
    /// zero outstanding allocations) back to the page source.
    ///
    /// Slabs on the `empty`/`partial` lists are left alone regardless of
    /// how long they've been idle — `clean` only ever reclaims slabs with
    /// zero live allocations.
    pub fn clean(&mut self) {
        while let Some(slab) = self.full_slabs.pop_front() {
            log::debug!("pool: releasing fully-free slab at {:p}", slab.as_ptr());
            unsafe { self.release_slab(slab) };
        }
    }

    /// A point-in-time snapshot of list occupancy and the advisory streak
    /// counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            empty_slabs: self.empty_slabs.iter().count(),
            partial_slabs: self.partial_slabs.iter().count(),
            full_slabs: self.full_slabs.iter().count(),
            alloc_streak: self.alloc_streak,
            evict_streak: self.evict_streak,
            load_streak: self.load_streak,
        }
    }

    /// Takes one free slot from the first available donor slab (partial
    /// preferred over full, matching the source's reload order), bulk-
    /// loading the rest of that donor's free slots into the MRU cache and
    /// moving the donor to `empty_slabs`.
    fn get_from_slab_list(&mut self) -> Option<NonNull<MaybeUninit<T>>> {
        let (from, donor) = if let Some(s) = self.partial_slabs.head() {
            (SlabState::Partial, s)
        } else if let Some(s) = self.full_slabs.head() {
            (SlabState::Full, s)
        } else {
            return None;
        };

        let rval = unsafe { Slab::take_free_slot(donor) };
        let remaining = unsafe { (*donor.as_ptr()).open_bitmask };
        if remaining != 0 {
            self.load_streak = inc_streak(self.load_streak);
            let drain = unsafe { Slab::drain_free(donor) };
            self.mru.bulk_load(drain);
        }

        match from {
            SlabState::Partial => unsafe { self.partial_slabs.unlink(donor) },
            SlabState::Full => unsafe { self.full_slabs.unlink(donor) },
            SlabState::Empty => unreachable!("donor is never already empty"),
        }
        unsafe { self.empty_slabs.push_front(donor) };

        Some(rval)
    }

    /// Grows the pool by one slab: allocates a fresh page, reserves slot 0
    /// for the caller, bulk-loads the remaining 63 free slots into the MRU
    /// cache (which is necessarily empty — this path only runs after both
    /// the cache and every existing slab missed), and links the new slab
    /// onto `empty_slabs`.
    fn new_slab(&mut self) -> Option<NonNull<MaybeUninit<T>>> {
        let page = self.page_source.alloc_page()?;
        let slab = unsafe { Slab::<T>::init_fresh(page) };
        log::trace!("pool: grew by one slab at {:p}", slab.as_ptr());

        unsafe { self.empty_slabs.push_front(slab) };
        let first = Slab::first_slot(slab);
        let drain = unsafe { Slab::drain_free(slab) };
        self.mru.bulk_load(drain);
        self.load_streak = inc_streak(self.load_streak);

        Some(first)
    }

    /// Returns `p` to its owning slab's bitmap and moves that slab between
    /// occupancy lists if this free crossed an `empty -> partial` or
    /// `partial -> full` boundary.
    ///
    /// A slab newly becoming partial is appended to the *tail* of
    /// `partial_slabs`, not the head: `get_from_slab_list`'s next donor
    /// choice always reads the head, so this keeps a slab that's been
    /// partial for a while (and so is more likely to be fully drainable)
    /// preferred over one that was just vacated a moment ago.
    ///
    /// # Safety
    ///
    /// `p` must have been handed out by this pool and not already be free.
    unsafe fn evict_item(&mut self, p: NonNull<MaybeUninit<T>>) {
        self.evict_streak = inc_streak(self.evict_streak);

        let s = unsafe { Slab::of(p) };
        let was_empty = unsafe { (*s.as_ptr()).is_empty_of_free_slots() };
        unsafe { Slab::return_slot(s, p) };
        let now_full = unsafe { (*s.as_ptr()).is_full_of_free_slots() };

        if was_empty {
            unsafe {
                self.empty_slabs.unlink(s);
                self.partial_slabs.push_back(s);
            }
            log::trace!("pool: slab {:p} empty -> partial", s.as_ptr());
        } else if now_full {
            unsafe {
                self.partial_slabs.unlink(s);
                self.full_slabs.push_front(s);
            }
            log::trace!("pool: slab {:p} partial -> full", s.as_ptr());
        }
    }

    unsafe fn release_slab(&mut self, slab: NonNull<Slab<T>>) {
        unsafe { self.page_source.free_page(slab.cast()) };
    }

    #[cfg(feature = "debug-live-set")]
    fn track_alloc(&mut self, p: NonNull<MaybeUninit<T>>) {
        let addr = p.as_ptr() as usize;
        assert!(
            self.live.insert(addr),
            "pool: address {addr:#x} allocated twice without an intervening free"
        );
    }

    #[cfg(feature = "debug-live-set")]
    fn track_free(&mut self, p: NonNull<MaybeUninit<T>>) {
        let addr = p.as_ptr() as usize;
        assert!(
            self.live.remove(&addr),
            "pool: double-free or free of a foreign pointer at {addr:#x}"
        );
    }
}

impl<T, P: PageSource> Drop for Pool<T, P> {
    /// Flushes the MRU cache, then releases every slab on all three lists
    /// back to the page source unconditionally. Slabs on `empty_slabs` or
    /// `partial_slabs` at drop time still have outstanding allocations by
    /// definition — the pool does not know whether those slots hold live
    /// `T` values (it never looks), so it cannot run their destructors.
    /// Dropping a pool with outstanding allocations is a caller-contract
    /// leak, logged here as a diagnostic, not treated as an error.
    fn drop(&mut self) {
        self.clear_cache();

        let mut leaked = 0usize;
        while let Some(slab) = self.empty_slabs.pop_front() {
            leaked += 1;
            unsafe { self.release_slab(slab) };
        }
        while let Some(slab) = self.partial_slabs.pop_front() {
            leaked += 1;
            unsafe { self.release_slab(slab) };
        }
        if leaked > 0 {
            log::warn!(
                "pool dropped with {leaked} slab(s) still holding outstanding allocations"
            );
        }

        while let Some(slab) = self.full_slabs.pop_front() {
            unsafe { self.release_slab(slab) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_objects_too_large_for_a_slab() {
        struct Huge([u8; PAGE_SIZE]);
        let result = Pool::<Huge>::new(SystemPageSource);
        assert!(matches!(result, Err(PoolError::ObjectTooLarge { .. })));
    }

    #[test]
    fn single_slab_lifecycle() {
        let mut pool: Pool<u64> = Pool::new(SystemPageSource).unwrap();
        let p = pool.alloc().unwrap();
        pool.free(p);
        let stats = pool.stats();
        assert_eq!(stats.empty_slabs + stats.partial_slabs + stats.full_slabs, 1);
    }

    #[test]
    fn mru_cache_hit_returns_the_same_slot() {
        let mut pool: Pool<u64> = Pool::new(SystemPageSource).unwrap();
        let a = pool.alloc().unwrap();
        pool.free(a);
        let b = pool.alloc().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn try_alloc_fails_once_every_slab_and_the_cache_are_exhausted() {
        let mut pool: Pool<u64> = Pool::new(SystemPageSource).unwrap();
        // try_alloc must never grow the pool, so an empty pool yields None.
        assert!(pool.try_alloc().is_none());

        let p = pool.alloc().unwrap();
        // Now the rest of that slab's 63 slots are parked in the cache.
        assert!(pool.try_alloc().is_some());
        pool.free(p);
    }

    #[test]
    fn freeing_past_mru_capacity_evicts_into_the_slab_and_reuses_it() {
        let mut pool: Pool<u64> = Pool::new(SystemPageSource).unwrap();
        let allocs: Vec<_> = (0..crate::MRU_CAPACITY + 2)
            .filter_map(|_| pool.alloc())
            .collect();
        assert_eq!(allocs.len(), crate::MRU_CAPACITY + 2);
        for p in allocs {
            pool.free(p);
        }
        let stats = pool.stats();
        assert!(stats.full_slabs + stats.partial_slabs + stats.empty_slabs >= 1);
    }

    #[test]
    fn clean_releases_only_fully_free_slabs() {
        let mut pool: Pool<u64> = Pool::new(SystemPageSource).unwrap();
        let p = pool.alloc().unwrap();
        pool.free(p);
        pool.clear_cache();
        let before = pool.stats();
        assert!(before.full_slabs >= 1);
        pool.clean();
        let after = pool.stats();
        assert_eq!(after.full_slabs, 0);
    }

    #[test]
    fn donor_preference_favors_partial_slabs_over_full_ones() {
        let mut pool: Pool<u64> = Pool::new(SystemPageSource).unwrap();

        // Exhaust the first slab completely (64 outstanding, 0 free).
        let mut first_slab: Vec<_> = (0..SLOTS_PER_SLAB).map(|_| pool.alloc().unwrap()).collect();
        // Two more allocations force a second slab into existence; keep
        // both of its outstanding slots live.
        let second_slab_a = pool.alloc().unwrap();
        let second_slab_b = pool.alloc().unwrap();

        // Free every slot of the first slab. clear_cache's flush is order
        // independent per slab (each pointer resolves to its own slab via
        // address masking), so after it the first slab is provably full
        // of free slots and the second provably partial.
        for p in first_slab.drain(..) {
            pool.free(p);
        }
        pool.clear_cache();

        let before = pool.stats();
        assert_eq!(before.full_slabs, 1, "first slab should be full of free slots");
        assert_eq!(before.partial_slabs, 1, "second slab should be partial");

        // The next allocation must come from the partial slab, leaving the
        // full slab undisturbed.
        let reused = pool.alloc().unwrap();
        let after = pool.stats();
        assert_eq!(after.full_slabs, 1, "the full slab must be left alone");
        assert_eq!(after.empty_slabs, 1, "the donor slab becomes empty of free slots");

        pool.free(reused);
        pool.free(second_slab_a);
        pool.free(second_slab_b);
    }

    // No test exercises the debug-live-set double-free panic directly: the
    // workspace profile runs with panic = "abort", so a panicking test
    // would take the whole harness down with it rather than being caught
    // as a normal test failure. debug_live_set_tracks_allocations below
    // covers the bookkeeping path without triggering the panic.

    #[cfg(feature = "debug-live-set")]
    #[test]
    fn debug_live_set_tracks_allocations() {
        let mut pool: Pool<u64> = Pool::new(SystemPageSource).unwrap();
        let p = pool.alloc().unwrap();
        assert!(pool.live.contains(&(p.as_ptr() as usize)));
        pool.free(p);
        assert!(!pool.live.contains(&(p.as_ptr() as usize)));
    }
}
