//! Slab layer: a page-aligned block of `SLOTS_PER_SLAB` fixed-size slots
//! plus a bitmap of which slots are free.
//!
//! Mirrors `struct slab` in the source's `pool.hpp`: `members[bits_per_size]`
//! followed by `open_bitmask` and the `prev`/`next` list links. The layout
//! here is `#[repr(C)]` for the same reason the source cares about layout —
//! `slab_of` recovers the header from a slot pointer by address masking,
//! so the header and the slot array must share one page-aligned page.

use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::bitmap::{set_bit, take_first};
use crate::{PAGE_SIZE, SLOTS_PER_SLAB};

/// Bit 0 of a fresh slab is always pre-cleared: `new_slab` hands slot 0
/// straight to the caller without routing it through the MRU cache (see
/// the "why bit 0 is pre-cleared" note in the allocation fast path).
const FRESH_SLAB_BITMASK: u64 = u64::MAX ^ 1;

/// A page-aligned slab of `SLOTS_PER_SLAB` slots of `T`, plus its free
/// bitmap and list linkage.
///
/// Every `Slab<T>` lives at the base of a page obtained from a
/// [`PageSource`](crate::page::PageSource); this struct's layout must fit
/// within [`PAGE_SIZE`] bytes, which [`Pool::new`](crate::pool::Pool::new)
/// verifies before any slab is ever allocated.
#[repr(C)]
pub(crate) struct Slab<T> {
    pub(crate) members: [MaybeUninit<T>; SLOTS_PER_SLAB],
    /// Bit `i` set iff `members[i]` is free (owned by this slab, not
    /// handed to the caller and not resident in the MRU cache).
    pub(crate) open_bitmask: u64,
    pub(crate) prev: Option<NonNull<Slab<T>>>,
    pub(crate) next: Option<NonNull<Slab<T>>>,
}

impl<T> Slab<T> {
    /// The number of bytes a `Slab<T>` occupies, for the construction-time
    /// page-fit check.
    pub(crate) const fn footprint() -> usize {
        core::mem::size_of::<Self>()
    }

    /// Initializes a freshly-allocated page as a `Slab<T>` header with
    /// slot 0 reserved (see [`FRESH_SLAB_BITMASK`]) and every other slot
    /// free, unlinked from any list.
    ///
    /// # Safety
    ///
    /// `page` must point to a writable region of at least
    /// `Slab::<T>::footprint()` bytes, aligned to at least
    /// `align_of::<Slab<T>>()`, that nothing else is using.
    pub(crate) unsafe fn init_fresh(page: NonNull<u8>) -> NonNull<Slab<T>> {
        let slab_ptr = page.cast::<Slab<T>>();
        unsafe {
            // members[] is an array of MaybeUninit<T>: leaving it
            // uninitialized is exactly what we want, we only need to set
            // up the bitmap and linkage fields.
            core::ptr::addr_of_mut!((*slab_ptr.as_ptr()).open_bitmask)
                .write(FRESH_SLAB_BITMASK);
            core::ptr::addr_of_mut!((*slab_ptr.as_ptr()).prev).write(None);
            core::ptr::addr_of_mut!((*slab_ptr.as_ptr()).next).write(None);
        }
        slab_ptr
    }

    pub(crate) fn is_empty_of_free_slots(&self) -> bool {
        self.open_bitmask == 0
    }

    pub(crate) fn is_full_of_free_slots(&self) -> bool {
        self.open_bitmask == u64::MAX
    }

    /// Slot 0 of a freshly initialized slab — the one slot `init_fresh`
    /// reserved rather than leaving free.
    pub(crate) fn first_slot(this: NonNull<Slab<T>>) -> NonNull<MaybeUninit<T>> {
        unsafe {
            let members = core::ptr::addr_of_mut!((*this.as_ptr()).members);
            NonNull::new_unchecked((members as *mut MaybeUninit<T>).add(0))
        }
    }

    /// Takes one free slot out of the bitmap.
    ///
    /// # Safety
    ///
    /// `this.open_bitmask` must be non-zero.
    pub(crate) unsafe fn take_free_slot(this: NonNull<Slab<T>>) -> NonNull<MaybeUninit<T>> {
        unsafe {
            let slab = &mut *this.as_ptr();
            let i = take_first(&mut slab.open_bitmask);
            let members = core::ptr::addr_of_mut!(slab.members) as *mut MaybeUninit<T>;
            NonNull::new_unchecked(members.add(i as usize))
        }
    }

    /// Returns `p` to this slab's free bitmap.
    ///
    /// # Safety
    ///
    /// `p` must point inside `this.members[0..SLOTS_PER_SLAB]` and must not
    /// currently be marked free (a double-free).
    pub(crate) unsafe fn return_slot(this: NonNull<Slab<T>>, p: NonNull<MaybeUninit<T>>) {
        unsafe {
            let slab = &mut *this.as_ptr();
            let members = core::ptr::addr_of_mut!(slab.members) as *mut MaybeUninit<T>;
            let offset = p.as_ptr().offset_from(members);
            debug_assert!(
                (0..SLOTS_PER_SLAB as isize).contains(&offset),
                "pointer does not belong to this slab"
            );
            slab.open_bitmask = set_bit(slab.open_bitmask, offset as u32);
        }
    }

    /// Recovers the owning slab header from any slot pointer it handed
    /// out, by masking the pointer down to its containing page.
    ///
    /// # Safety
    ///
    /// `p` must have been obtained from a `Slab<T>` allocated by this
    /// crate (i.e. it really does sit at the start of a `PAGE_SIZE`-aligned
    /// page).
    pub(crate) unsafe fn of(p: NonNull<MaybeUninit<T>>) -> NonNull<Slab<T>> {
        let addr = p.as_ptr() as usize & !(PAGE_SIZE - 1);
        unsafe { NonNull::new_unchecked(addr as *mut Slab<T>) }
    }

    /// Drains every currently-free slot of this slab, one at a time,
    /// touching each before yielding it (a discarded volatile read, to
    /// warm its cache line). Leaves `open_bitmask` at 0 once exhausted,
    /// regardless of how many items the caller actually consumes.
    ///
    /// # Safety
    ///
    /// `this.open_bitmask` must be non-zero when first called.
    pub(crate) unsafe fn drain_free(this: NonNull<Slab<T>>) -> SlabDrain<T> {
        let available = unsafe {
            let slab = &mut *this.as_ptr();
            debug_assert!(slab.open_bitmask != 0, "drain_free called on an empty slab");
            core::mem::replace(&mut slab.open_bitmask, 0)
        };
        SlabDrain { slab: this, available }
    }
}

/// Iterator returned by [`Slab::drain_free`].
pub(crate) struct SlabDrain<T> {
    slab: NonNull<Slab<T>>,
    available: u64,
}

impl<T> Iterator for SlabDrain<T> {
    type Item = NonNull<MaybeUninit<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.available == 0 {
            return None;
        }
        let i = take_first(&mut self.available);
        let p = unsafe {
            let members =
                core::ptr::addr_of_mut!((*self.slab.as_ptr()).members) as *mut MaybeUninit<T>;
            NonNull::new_unchecked(members.add(i as usize))
        };
        // Prefetch touch: discarded, best-effort, no semantic meaning.
        unsafe {
            core::ptr::read_volatile(p.as_ptr() as *const u8);
        }
        Some(p)
    }
}
