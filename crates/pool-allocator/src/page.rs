//! Page-aligned backing storage for slabs.
//!
//! The underlying allocator assumes an OS primitive
//! `aligned_alloc(align = PAGE, size)` / `aligned_free`. This crate
//! expresses that assumption as a trait instead of a bare function pair,
//! the same way `crates/kernel/src/mm/slab.rs` sits on top of its own
//! `mm::alloc_page` rather than calling a global allocator directly — it
//! lets a kernel build supply its own page allocator while a plain `std`
//! build (and this crate's own test suite) gets a working default for
//! free.

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::PAGE_SIZE;

/// Supplies and reclaims page-aligned, page-sized regions of memory.
///
/// Implementations must return addresses aligned to [`PAGE_SIZE`] and of
/// exactly that size; [`Slab::of`](crate::slab::Slab) relies on this to
/// recover a slab's header from any slot pointer by masking low bits.
pub trait PageSource {
    /// Allocates one fresh page. Returns `None` on allocation failure.
    fn alloc_page(&mut self) -> Option<NonNull<u8>>;

    /// Releases a page previously returned by `alloc_page` on `self`.
    ///
    /// # Safety
    ///
    /// `page` must have been obtained from this same `PageSource` and not
    /// already released.
    unsafe fn free_page(&mut self, page: NonNull<u8>);
}

fn page_layout() -> Layout {
    Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).expect("PAGE_SIZE is a valid power-of-two layout")
}

/// The default [`PageSource`], backed by the ambient global allocator via
/// `std::alloc`. Suitable for hosted builds; a `no_std` embedding (e.g. a
/// kernel) supplies its own `PageSource` instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPageSource;

impl PageSource for SystemPageSource {
    fn alloc_page(&mut self) -> Option<NonNull<u8>> {
        // SAFETY: `page_layout()` always has non-zero size.
        let ptr = unsafe { std::alloc::alloc(page_layout()) };
        NonNull::new(ptr)
    }

    unsafe fn free_page(&mut self, page: NonNull<u8>) {
        unsafe { std::alloc::dealloc(page.as_ptr(), page_layout()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_page_source_returns_page_aligned_memory() {
        let mut src = SystemPageSource;
        let page = src.alloc_page().expect("allocation should succeed");
        assert_eq!(page.as_ptr() as usize % PAGE_SIZE, 0);
        unsafe { src.free_page(page) };
    }

    #[test]
    fn system_page_source_round_trips_many_pages() {
        let mut src = SystemPageSource;
        let pages: Vec<_> = (0..32).map(|_| src.alloc_page().unwrap()).collect();
        for p in &pages {
            assert_eq!(p.as_ptr() as usize % PAGE_SIZE, 0);
        }
        for p in pages {
            unsafe { src.free_page(p) };
        }
    }
}
