//! Request dispatcher: size-class routing and tagged O(1) free.
//!
//! The dispatcher owns six fixed-size pools (16 through 512 bytes), one
//! coalescing allocator for anything up to 10MB, and hands bigger requests
//! a dedicated mapping. Every sub-allocator leaves a 4-byte tag field
//! directly before the payload; the dispatcher writes a routing tag there
//! after `alloc` and reads it back in `free`, so releasing a pointer needs
//! no lookup structure at all.

use core::mem::size_of;

use crate::coalesce::CoalescingAllocator;
use crate::constants::COALESCING_MAX;
use crate::pool::FixedSizePool;
use crate::stats::{AllocatorStats, LiveBlock};
use crate::vm;

/// Header of a dedicated mapping (requests above [`COALESCING_MAX`]).
///
/// `len` records the full mapping length for release; `tag` must remain
/// the final field, directly before the payload.
#[repr(C)]
struct RawHeader {
    len: usize,
    _reserved: u32,
    tag: i32,
}

const _: () = {
    assert!(size_of::<RawHeader>() % 8 == 0);
    assert!(core::mem::offset_of!(RawHeader, tag) + 4 == size_of::<RawHeader>());
};

const TAG_POOL16: i32 = 1;
const TAG_POOL32: i32 = 2;
const TAG_POOL64: i32 = 3;
const TAG_POOL128: i32 = 4;
const TAG_POOL256: i32 = 5;
const TAG_POOL512: i32 = 6;
const TAG_COALESCING: i32 = 7;
const TAG_RAW: i32 = 8;

/// General-purpose allocator front end.
///
/// Single-threaded; every operation takes `&mut self`. Instances are
/// independent, any number may coexist.
pub struct SegregatedAllocator {
    pool16: FixedSizePool<16>,
    pool32: FixedSizePool<32>,
    pool64: FixedSizePool<64>,
    pool128: FixedSizePool<128>,
    pool256: FixedSizePool<256>,
    pool512: FixedSizePool<512>,
    coalescing: CoalescingAllocator,
    raw_mappings: usize,
    raw_bytes: usize,
    #[cfg(debug_assertions)]
    initialized: bool,
    #[cfg(debug_assertions)]
    destroyed: bool,
}

impl SegregatedAllocator {
    /// Creates an uninitialized allocator. No VM activity until
    /// [`init`](Self::init).
    pub const fn new() -> Self {
        Self {
            pool16: FixedSizePool::new(),
            pool32: FixedSizePool::new(),
            pool64: FixedSizePool::new(),
            pool128: FixedSizePool::new(),
            pool256: FixedSizePool::new(),
            pool512: FixedSizePool::new(),
            coalescing: CoalescingAllocator::new(),
            raw_mappings: 0,
            raw_bytes: 0,
            #[cfg(debug_assertions)]
            initialized: false,
            #[cfg(debug_assertions)]
            destroyed: false,
        }
    }

    /// Initializes every sub-allocator (one page each). Calling twice is a
    /// usage error.
    pub fn init(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(!self.initialized, "double init of allocator");
            self.initialized = true;
        }
        self.pool16.init();
        self.pool32.init();
        self.pool64.init();
        self.pool128.init();
        self.pool256.init();
        self.pool512.init();
        self.coalescing.init();
        tracing::debug!("allocator initialized");
    }

    /// Returns an 8-aligned pointer to at least `size` bytes, routed to the
    /// smallest sub-allocator that fits the request.
    pub fn alloc(&mut self, size: usize) -> *mut u8 {
        #[cfg(debug_assertions)]
        assert!(
            self.initialized && !self.destroyed,
            "allocator used outside its init/destroy window"
        );

        let (ptr, tag) = if size <= 16 {
            (self.pool16.alloc(size), TAG_POOL16)
        } else if size <= 32 {
            (self.pool32.alloc(size), TAG_POOL32)
        } else if size <= 64 {
            (self.pool64.alloc(size), TAG_POOL64)
        } else if size <= 128 {
            (self.pool128.alloc(size), TAG_POOL128)
        } else if size <= 256 {
            (self.pool256.alloc(size), TAG_POOL256)
        } else if size <= 512 {
            (self.pool512.alloc(size), TAG_POOL512)
        } else if size <= COALESCING_MAX {
            (self.coalescing.alloc(size), TAG_COALESCING)
        } else {
            (self.alloc_raw(size), TAG_RAW)
        };

        unsafe {
            Self::write_tag(ptr, tag);
        }
        ptr
    }

    /// Releases a pointer previously returned by [`alloc`](Self::alloc),
    /// routing it by the tag stored behind the payload.
    pub fn free(&mut self, p: *mut u8) {
        #[cfg(debug_assertions)]
        assert!(
            self.initialized && !self.destroyed,
            "allocator used outside its init/destroy window"
        );

        match unsafe { Self::read_tag(p) } {
            TAG_POOL16 => self.pool16.free(p),
            TAG_POOL32 => self.pool32.free(p),
            TAG_POOL64 => self.pool64.free(p),
            TAG_POOL128 => self.pool128.free(p),
            TAG_POOL256 => self.pool256.free(p),
            TAG_POOL512 => self.pool512.free(p),
            TAG_COALESCING => self.coalescing.free(p),
            TAG_RAW => unsafe {
                let base = p.sub(size_of::<RawHeader>());
                let len = (*base.cast::<RawHeader>()).len;
                self.raw_mappings -= 1;
                self.raw_bytes -= len;
                vm::release(base, len);
                tracing::debug!(len, "raw mapping released");
            },
            other => debug_assert!(false, "pointer carries unknown allocator tag {other}"),
        }
    }

    /// Destroys every sub-allocator, releasing all pages. Debug builds
    /// assert that no allocation (raw mappings included) is still live.
    pub fn destroy(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(
                self.initialized && !self.destroyed,
                "destroy outside the allocator's init window"
            );
            self.destroyed = true;
            assert_eq!(
                self.raw_mappings, 0,
                "allocator destroyed while raw mappings are live"
            );
        }
        self.pool16.destroy();
        self.pool32.destroy();
        self.pool64.destroy();
        self.pool128.destroy();
        self.pool256.destroy();
        self.pool512.destroy();
        self.coalescing.destroy();
        tracing::debug!("allocator destroyed");
    }

    /// Snapshots every sub-allocator.
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            pools: vec![
                self.pool16.stats(),
                self.pool32.stats(),
                self.pool64.stats(),
                self.pool128.stats(),
                self.pool256.stats(),
                self.pool512.stats(),
            ],
            coalescing: self.coalescing.stats(),
            raw_mappings: self.raw_mappings,
            raw_bytes: self.raw_bytes,
        }
    }

    /// Prints a page summary followed by each sub-allocator's statistics.
    pub fn dump_stat(&self) {
        let stats = self.stats();
        let pool_pages: usize = stats.pools.iter().map(|p| p.pages).sum();
        println!("pages: {} pool, {} coalescing", pool_pages, stats.coalescing.pages);
        self.pool16.dump_stat();
        self.pool32.dump_stat();
        self.pool64.dump_stat();
        self.pool128.dump_stat();
        self.pool256.dump_stat();
        self.pool512.dump_stat();
        self.coalescing.dump_stat();
        println!(
            "raw mappings: {} ({} bytes)",
            stats.raw_mappings, stats.raw_bytes
        );
    }

    /// Enumerates live allocations across the pools and the coalescing
    /// heap. Dedicated mappings are not tracked individually and are not
    /// listed.
    pub fn dump_blocks(&self) -> Vec<LiveBlock> {
        let mut live = Vec::new();
        live.extend(self.pool16.dump_blocks());
        live.extend(self.pool32.dump_blocks());
        live.extend(self.pool64.dump_blocks());
        live.extend(self.pool128.dump_blocks());
        live.extend(self.pool256.dump_blocks());
        live.extend(self.pool512.dump_blocks());
        live.extend(self.coalescing.dump_blocks());
        live
    }

    fn alloc_raw(&mut self, size: usize) -> *mut u8 {
        let len = size + size_of::<RawHeader>();
        let base = vm::reserve_or_abort(len);
        self.raw_mappings += 1;
        self.raw_bytes += len;
        tracing::debug!(len, "raw mapping reserved");
        unsafe {
            base.cast::<RawHeader>().write(RawHeader {
                len,
                _reserved: 0,
                tag: 0,
            });
            base.add(size_of::<RawHeader>())
        }
    }

    /// Writes the routing tag into the four bytes directly before the
    /// payload; every sub-allocator header ends with that field.
    unsafe fn write_tag(p: *mut u8, tag: i32) {
        p.sub(size_of::<i32>()).cast::<i32>().write(tag);
    }

    unsafe fn read_tag(p: *mut u8) -> i32 {
        p.sub(size_of::<i32>()).cast::<i32>().read()
    }
}

impl Default for SegregatedAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_ladder_picks_the_smallest_fitting_class() {
        let mut allocator = SegregatedAllocator::new();
        allocator.init();

        let boundary = allocator.alloc(512);
        let above = allocator.alloc(513);
        let stats = allocator.stats();
        assert_eq!(stats.pools[5].alloc_calls, 1);
        assert_eq!(stats.coalescing.alloc_calls, 1);

        allocator.free(above);
        allocator.free(boundary);
        allocator.destroy();
    }
}
