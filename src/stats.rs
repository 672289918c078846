//! Statistics snapshots for the diagnostic surface.
//!
//! Each allocator produces a point-in-time snapshot by walking its pages;
//! the snapshot types serialize so embedders can export them (the demo
//! driver prints them as JSON).

use serde::Serialize;

/// Snapshot of one fixed-size pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Slot payload width served by this pool.
    pub width: usize,
    /// Pages currently reserved from the OS.
    pub pages: usize,
    /// Slot capacity across all pages.
    pub total_slots: usize,
    /// Slots never handed out (still in the bump region).
    pub uninitialized_slots: usize,
    /// Slots sitting on a free list.
    pub free_slots: usize,
    /// Slots currently owned by callers.
    pub allocated_slots: usize,
    /// Lifetime `alloc` calls.
    pub alloc_calls: usize,
    /// Lifetime `free` calls.
    pub free_calls: usize,
}

/// Snapshot of the coalescing allocator.
#[derive(Debug, Clone, Serialize)]
pub struct CoalescingStats {
    /// Pages currently reserved from the OS.
    pub pages: usize,
    /// Blocks across every page's physical list.
    pub total_blocks: usize,
    /// Blocks currently free.
    pub free_blocks: usize,
    /// Blocks currently owned by callers.
    pub allocated_blocks: usize,
    /// Payload bytes held by free blocks.
    pub free_bytes: usize,
    /// Lifetime `alloc` calls.
    pub alloc_calls: usize,
    /// Lifetime `free` calls.
    pub free_calls: usize,
}

/// Snapshot of the whole dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct AllocatorStats {
    /// Per-pool snapshots, ascending width (16 through 512).
    pub pools: Vec<PoolStats>,
    /// Coalescing-heap snapshot.
    pub coalescing: CoalescingStats,
    /// Live dedicated mappings (requests above the coalescing ceiling).
    pub raw_mappings: usize,
    /// Bytes held by those mappings, headers included.
    pub raw_bytes: usize,
}

/// One live allocation, as enumerated by `dump_blocks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveBlock {
    /// Payload size: the recorded request in debug builds, the block's
    /// capacity otherwise.
    pub size: usize,
    /// Payload pointer as handed to the caller.
    pub ptr: *mut u8,
}
