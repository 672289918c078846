use tessera::coalesce::{BLOCK_HEADER_SIZE, INITIAL_BLOCK_SIZE};
use tessera::CoalescingAllocator;

#[test]
fn shuffled_frees_coalesce_back_to_one_block() {
    let mut heap = CoalescingAllocator::new();
    heap.init();

    let mut ptrs: Vec<*mut u8> = (1..=30usize).map(|s| heap.alloc(s)).collect();
    // Deterministic shuffle.
    for i in 0..ptrs.len() {
        let j = (i * 17 + 5) % ptrs.len();
        ptrs.swap(i, j);
    }

    for p in ptrs {
        heap.free(p);
        heap.validate();
    }

    let pages = heap.physical_blocks();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0], vec![(INITIAL_BLOCK_SIZE, true)]);

    heap.destroy();
}

#[test]
fn freeing_the_middle_bridges_both_neighbors() {
    let mut heap = CoalescingAllocator::new();
    heap.init();

    let a = heap.alloc(64);
    let b = heap.alloc(64);
    let c = heap.alloc(64);
    heap.validate();

    heap.free(a);
    heap.validate();
    heap.free(c);
    heap.validate();
    // c merged with the trailing remainder; a is an island. Freeing b must
    // fuse everything back into the single initial block.
    heap.free(b);
    heap.validate();

    assert_eq!(heap.physical_blocks()[0], vec![(INITIAL_BLOCK_SIZE, true)]);
    heap.destroy();
}

#[test]
fn exact_fit_reuses_the_freed_block_in_place() {
    let mut heap = CoalescingAllocator::new();
    heap.init();

    // Pin the tail so the freed block stays an island instead of merging
    // with the page remainder.
    let guard = heap.alloc(32);
    let p = heap.alloc(100);
    let tail = heap.alloc(32);
    heap.free(p);
    heap.validate();

    // 100 rounds to 104; 50 rounds to 56. The 104-byte hole is the first
    // fit and the leftover 48 bytes cannot hold a header, so the whole
    // hole is handed back.
    let q = heap.alloc(50);
    assert_eq!(p, q);
    heap.validate();

    for ptr in [guard, q, tail] {
        heap.free(ptr);
    }
    heap.validate();
    heap.destroy();
}

#[test]
fn split_pushes_the_remainder_onto_the_free_list() {
    let mut heap = CoalescingAllocator::new();
    heap.init();

    let guard = heap.alloc(32);
    let p = heap.alloc(512);
    let tail = heap.alloc(32);
    heap.free(p);
    heap.validate();

    // An 8-byte request splits the 512-byte hole: allocation in front, a
    // free remainder behind it.
    let q = heap.alloc(8);
    assert_eq!(p, q);
    heap.validate();

    let blocks = &heap.physical_blocks()[0];
    // guard | q(8) | remainder | tail | page remainder
    assert_eq!(blocks[1], (8, false));
    assert_eq!(blocks[2], (512 - 8 - BLOCK_HEADER_SIZE, true));

    for ptr in [guard, q, tail] {
        heap.free(ptr);
    }
    heap.validate();
    heap.destroy();
}

#[test]
fn oversized_request_opens_a_new_page() {
    let mut heap = CoalescingAllocator::new();
    heap.init();

    // Consume the entire first page in one block.
    let whole = heap.alloc(INITIAL_BLOCK_SIZE);
    assert_eq!(heap.stats().pages, 1);

    // Nothing is left in page one; the next request must open page two.
    let p = heap.alloc(8);
    let stats = heap.stats();
    assert_eq!(stats.pages, 2);
    heap.validate();

    heap.free(p);
    heap.free(whole);
    heap.validate();

    let pages = heap.physical_blocks();
    assert_eq!(pages[0], vec![(INITIAL_BLOCK_SIZE, true)]);
    assert_eq!(pages[1], vec![(INITIAL_BLOCK_SIZE, true)]);

    heap.destroy();
}

#[test]
fn free_never_leaves_adjacent_free_blocks() {
    let mut heap = CoalescingAllocator::new();
    heap.init();

    let ptrs: Vec<*mut u8> = (0..20).map(|_| heap.alloc(64)).collect();
    // Free every other block, then the rest; validate checks the adjacency
    // invariant after each step.
    for p in ptrs.iter().step_by(2) {
        heap.free(*p);
        heap.validate();
    }
    for p in ptrs.iter().skip(1).step_by(2) {
        heap.free(*p);
        heap.validate();
    }

    heap.destroy();
}

#[test]
fn payloads_are_word_aligned() {
    let mut heap = CoalescingAllocator::new();
    heap.init();

    let ptrs: Vec<*mut u8> = (1..40usize).map(|s| heap.alloc(s)).collect();
    for &p in &ptrs {
        assert_eq!(p as usize % 8, 0);
    }
    for p in ptrs {
        heap.free(p);
    }
    heap.destroy();
}
