//! # `tessera` - Segregated User-Space Memory Allocator
//!
//! A general-purpose allocator that serves requests from memory mapped
//! directly from the OS, never delegating a request to the standard
//! allocator. Small requests land in fixed-width pools, mid-size requests
//! in a coalescing heap, and anything above 10MB gets a dedicated mapping.
//!
//! ## Key Pieces
//!
//! - **Fixed-size pools**: bump-then-freelist pages for widths 16..512;
//!   allocated slots remember their own index, so `free` recovers the page
//!   arithmetically.
//! - **Coalescing heap**: boundary-tag blocks on 11MB pages, first-fit
//!   split on alloc, immediate merge with free neighbors on free.
//! - **Tagged dispatch**: a 4-byte tag behind every payload routes `free`
//!   in O(1) from the pointer alone.
//!
//! ## Example
//!
//! ```rust
//! use tessera::SegregatedAllocator;
//!
//! let mut allocator = SegregatedAllocator::new();
//! allocator.init();
//!
//! let p = allocator.alloc(24);
//! assert_eq!(p as usize % 8, 0);
//!
//! allocator.free(p);
//! allocator.destroy();
//! ```
//!
//! The allocator is single-threaded by design: every operation takes
//! `&mut self`, and no synchronization is performed.

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap, clippy::cast_ptr_alignment)]

pub mod coalesce;
pub mod constants;
pub mod dispatch;
pub mod pool;
pub mod stats;
pub mod vm;

pub use coalesce::CoalescingAllocator;
pub use dispatch::SegregatedAllocator;
pub use pool::FixedSizePool;
pub use stats::{AllocatorStats, CoalescingStats, LiveBlock, PoolStats};

// Compile-time geometry checks. Slot strides keep payloads word-aligned in
// every size class, and each page fits at least one slot of its width.
const _: () = {
    assert!(FixedSizePool::<16>::STRIDE % 8 == 0);
    assert!(FixedSizePool::<32>::STRIDE % 8 == 0);
    assert!(FixedSizePool::<64>::STRIDE % 8 == 0);
    assert!(FixedSizePool::<128>::STRIDE % 8 == 0);
    assert!(FixedSizePool::<256>::STRIDE % 8 == 0);
    assert!(FixedSizePool::<512>::STRIDE % 8 == 0);

    assert!(FixedSizePool::<512>::SLOTS_PER_PAGE >= 1);

    // The dispatch ceiling leaves room for page and block bookkeeping
    // inside a single coalescing page.
    assert!(constants::COALESCING_MAX <= coalesce::INITIAL_BLOCK_SIZE);
};
