//! Randomized alloc/shuffle/free sequences: any multiset of legal sizes,
//! freed in any order, must leave each allocator able to destroy cleanly.

use proptest::prelude::*;
use tessera::{CoalescingAllocator, FixedSizePool, SegregatedAllocator};

/// A vector of request sizes plus a random permutation of its indices,
/// used as the free order.
fn sizes_with_order(
    sizes: core::ops::RangeInclusive<usize>,
    max_len: usize,
) -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    proptest::collection::vec(sizes, 1..max_len).prop_flat_map(|sizes| {
        let order: Vec<usize> = (0..sizes.len()).collect();
        (Just(sizes), Just(order).prop_shuffle())
    })
}

proptest! {
    #[test]
    fn pool_survives_any_release_order((sizes, order) in sizes_with_order(1..=30, 64)) {
        let mut pool = FixedSizePool::<64>::new();
        pool.init();

        let ptrs: Vec<*mut u8> = sizes.iter().map(|&s| pool.alloc(s)).collect();
        for &i in &order {
            pool.free(ptrs[i]);
        }

        prop_assert_eq!(pool.stats().allocated_slots, 0);
        pool.destroy();
    }

    #[test]
    fn coalescing_survives_any_release_order((sizes, order) in sizes_with_order(1..=30, 64)) {
        let mut heap = CoalescingAllocator::new();
        heap.init();

        let ptrs: Vec<*mut u8> = sizes.iter().map(|&s| heap.alloc(s)).collect();
        heap.validate();
        for &i in &order {
            heap.free(ptrs[i]);
            heap.validate();
        }

        // Every page has fused back into its single initial block.
        for page in heap.physical_blocks() {
            prop_assert_eq!(page.len(), 1);
        }
        heap.destroy();
    }

    #[test]
    fn dispatcher_survives_any_release_order((sizes, order) in sizes_with_order(1..=4096, 48)) {
        let mut allocator = SegregatedAllocator::new();
        allocator.init();

        let ptrs: Vec<*mut u8> = sizes.iter().map(|&s| allocator.alloc(s)).collect();
        for &i in &order {
            allocator.free(ptrs[i]);
        }

        let stats = allocator.stats();
        prop_assert!(stats.pools.iter().all(|p| p.allocated_slots == 0));
        prop_assert_eq!(stats.coalescing.allocated_blocks, 0);
        allocator.destroy();
    }

    #[test]
    fn dispatcher_pairs_every_alloc_with_its_class((sizes, order) in sizes_with_order(1..=2048, 32)) {
        let mut allocator = SegregatedAllocator::new();
        allocator.init();

        let ptrs: Vec<*mut u8> = sizes.iter().map(|&s| allocator.alloc(s)).collect();
        for &i in &order {
            allocator.free(ptrs[i]);
        }

        // Ownership recovery: every sub-allocator saw exactly as many frees
        // as allocs, i.e. each pointer went back where it came from.
        let stats = allocator.stats();
        for pool in &stats.pools {
            prop_assert_eq!(pool.alloc_calls, pool.free_calls);
        }
        prop_assert_eq!(stats.coalescing.alloc_calls, stats.coalescing.free_calls);
        allocator.destroy();
    }
}
