//! Property-based invariant checks over random alloc/free/clear_cache/clean
//! interleavings.
//!
//! Gated behind the `property-based-tests` feature, mirroring how
//! `crates/testing` gates its own proptest suite in this workspace — these
//! runs explore a lot more state space than the unit tests and are slower,
//! so they're opt-in.

use std::collections::HashSet;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use proptest::prelude::*;

use crate::{Pool, SystemPageSource};

#[derive(Debug, Clone, Copy)]
enum Op {
    Alloc,
    Free(usize),
    ClearCache,
    Clean,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Alloc),
        3 => (0usize..256).prop_map(Op::Free),
        1 => Just(Op::ClearCache),
        1 => Just(Op::Clean),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// No address handed out by `alloc` while outstanding is ever handed
    /// out again, across any interleaving of alloc/free/clear_cache/clean.
    #[test]
    fn alloc_never_aliases_a_live_slot(ops in prop::collection::vec(op_strategy(), 1..500)) {
        let mut pool: Pool<[u8; 8]> = Pool::new(SystemPageSource).unwrap();
        let mut live: Vec<NonNull<MaybeUninit<[u8; 8]>>> = Vec::new();
        let mut live_addrs: HashSet<usize> = HashSet::new();

        for op in ops {
            match op {
                Op::Alloc => {
                    let p = pool.alloc().expect("system allocator should not fail in a test");
                    let addr = p.as_ptr() as usize;
                    prop_assert!(live_addrs.insert(addr), "address {:#x} aliases a live allocation", addr);
                    live.push(p);
                }
                Op::Free(idx) => {
                    if !live.is_empty() {
                        let p = live.swap_remove(idx % live.len());
                        live_addrs.remove(&(p.as_ptr() as usize));
                        pool.free(p);
                    }
                }
                Op::ClearCache => pool.clear_cache(),
                Op::Clean => pool.clean(),
            }
        }

        for p in live {
            pool.free(p);
        }
    }

    /// Once every outstanding allocation is freed and the cache is flushed,
    /// no slab can be left `empty` or `partial` — conservation of slots
    /// means a fully-freed pool is entirely `full` slabs.
    #[test]
    fn fully_freed_pool_has_no_empty_or_partial_slabs(ops in prop::collection::vec(op_strategy(), 1..300)) {
        let mut pool: Pool<[u8; 8]> = Pool::new(SystemPageSource).unwrap();
        let mut live: Vec<NonNull<MaybeUninit<[u8; 8]>>> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc => live.push(pool.alloc().expect("system allocator should not fail in a test")),
                Op::Free(idx) => {
                    if !live.is_empty() {
                        pool.free(live.swap_remove(idx % live.len()));
                    }
                }
                Op::ClearCache => pool.clear_cache(),
                Op::Clean => pool.clean(),
            }
        }

        for p in live {
            pool.free(p);
        }
        pool.clear_cache();

        let stats = pool.stats();
        prop_assert_eq!(stats.empty_slabs, 0);
        prop_assert_eq!(stats.partial_slabs, 0);
    }
}
