//! A compacting, fixed-object-size pool allocator.
//!
//! Two layers, leaves first:
//!
//! 1. A **slab** layer (`slab` module): page-aligned regions of 64 fixed
//!    slots tracked by a 64-bit free bitmap, held on one of three
//!    occupancy lists (`empty` / `partial` / `full` — see [`pool`] for the
//!    source's terminology inversion).
//! 2. A **most-recently-used cache** (`mru` module) sitting in front of
//!    the slab layer: a small bounded ring of recently-freed pointers that
//!    keeps hot objects from being scrambled back into allocation order by
//!    a plain freelist.
//!
//! [`Pool<T>`](pool::Pool) ties the two together. It is a single-owner
//! value type with no internal locking: wrap a whole `Pool` in a `Mutex`
//! at the call site if cross-thread sharing is ever needed.
//!
//! # Example
//!
//! ```
//! use sis_pool_allocator::{Pool, SystemPageSource};
//!
//! let mut pool: Pool<[u8; 16]> = Pool::new(SystemPageSource).unwrap();
//! let a = pool.alloc().unwrap();
//! pool.free(a);
//! let b = pool.alloc().unwrap();
//! assert_eq!(a, b, "freeing into a non-full MRU cache reallocates the same slot");
//! pool.clear_cache();
//! pool.clean();
//! ```

mod bitmap;
mod error;
mod list;
mod mru;
mod page;
mod pool;
#[cfg(all(test, feature = "property-based-tests"))]
mod proptests;
mod slab;

pub use error::PoolError;
pub use mru::MRU_CAPACITY;
pub use page::{PageSource, SystemPageSource};
pub use pool::{Pool, SlabState};

/// Alignment unit used both for slab backing storage and for recovering a
/// slab's header from any slot pointer by address masking. Baked into
/// [`slab::Slab::of`] — changing it means changing the mask, not a config
/// value.
pub const PAGE_SIZE: usize = 4096;

/// Number of slots per slab: the bit width of the free bitmap word.
pub const SLOTS_PER_SLAB: usize = u64::BITS as usize;

static_assertions::const_assert_eq!(SLOTS_PER_SLAB, 64);
static_assertions::const_assert!(PAGE_SIZE.is_power_of_two());
