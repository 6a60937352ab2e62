//! Error types.
//!
//! Out-of-memory is not modeled as an `Err` anywhere in this crate —
//! `alloc`/`try_alloc` return `None` for that. The only fallible, typed
//! path is construction, where a `T` too large for a single slab page is
//! rejected up front rather than discovered on first allocation.

use thiserror::Error;

/// Errors returned by [`Pool::new`](crate::pool::Pool::new).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// `size_of::<T>() * 64 + size_of::<SlabHeader>()` would exceed one
    /// page, so no slab could ever hold a single `T`.
    #[error(
        "object of size {size} / align {align} does not fit a {slots}-slot, {page_size}-byte slab"
    )]
    ObjectTooLarge {
        size: usize,
        align: usize,
        slots: usize,
        page_size: usize,
    },
}
