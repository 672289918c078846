//! Fixed-size pool allocator.
//!
//! One pool serves a single compile-time payload width. Pages come whole
//! from the VM and are carved into uniform slots: an index-linked intrusive
//! free list recycles released slots, and a bump counter hands out
//! never-used slots once the list is empty. While a slot is allocated its
//! header stores the slot's own index, which is what lets `free` recover
//! the owning page from the payload pointer with pure arithmetic, no
//! external table.

use core::mem::size_of;
use core::ptr;

#[cfg(debug_assertions)]
use crate::constants::HEADER_SENTINEL;
use crate::constants::POOL_PAGE_SIZE;
use crate::stats::{LiveBlock, PoolStats};
use crate::vm;

/// Page header, at offset 0 of every pool page.
#[repr(C)]
struct PoolPage {
    next_page: *mut PoolPage,
    /// Index of the first free slot, or -1.
    free_head: i32,
    /// Slots ever handed out of the bump region. Never decreases.
    initialized_slots: i32,
}

/// Per-slot header, immediately preceding the slot payload.
///
/// `tag` must remain the final field: the dispatcher addresses it as the
/// four bytes directly before the payload.
#[repr(C)]
struct SlotHeader {
    #[cfg(debug_assertions)]
    magic: u64,
    #[cfg(debug_assertions)]
    requested: usize,
    /// Free: index of the next free slot, or -1.
    /// Allocated: this slot's own index.
    link: i32,
    /// Dispatcher tag, written after `alloc` returns.
    tag: i32,
}

const _: () = {
    // The payload must start word-aligned and the tag must occupy the four
    // bytes directly before it.
    assert!(size_of::<SlotHeader>() % 8 == 0);
    assert!(size_of::<PoolPage>() % 8 == 0);
    assert!(core::mem::offset_of!(SlotHeader, tag) + 4 == size_of::<SlotHeader>());
};

/// Pool allocator for payloads of at most `WIDTH` bytes.
///
/// Single-threaded; every operation takes `&mut self`. Pages are appended
/// on demand and only released by [`destroy`](Self::destroy).
pub struct FixedSizePool<const WIDTH: usize> {
    first_page: *mut PoolPage,
    alloc_calls: usize,
    free_calls: usize,
    #[cfg(debug_assertions)]
    initialized: bool,
    #[cfg(debug_assertions)]
    destroyed: bool,
}

impl<const WIDTH: usize> FixedSizePool<WIDTH> {
    /// Bytes from one slot header to the next.
    pub const STRIDE: usize = size_of::<SlotHeader>() + WIDTH;

    /// Slots carved out of one page.
    pub const SLOTS_PER_PAGE: usize = (POOL_PAGE_SIZE - size_of::<PoolPage>()) / Self::STRIDE;

    /// Creates an uninitialized pool. No VM activity until [`init`](Self::init).
    pub const fn new() -> Self {
        Self {
            first_page: ptr::null_mut(),
            alloc_calls: 0,
            free_calls: 0,
            #[cfg(debug_assertions)]
            initialized: false,
            #[cfg(debug_assertions)]
            destroyed: false,
        }
    }

    /// Reserves the first page. Calling twice is a usage error.
    pub fn init(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(!self.initialized, "double init of fixed-size pool");
            self.initialized = true;
        }
        self.first_page = Self::reserve_page();
        tracing::debug!(width = WIDTH, "fixed-size pool initialized");
    }

    /// Returns an 8-aligned pointer to a `WIDTH`-byte payload region.
    /// `size` must not exceed `WIDTH`.
    pub fn alloc(&mut self, size: usize) -> *mut u8 {
        #[cfg(debug_assertions)]
        {
            assert!(
                self.initialized && !self.destroyed,
                "pool used outside its init/destroy window"
            );
            assert!(size <= WIDTH, "request exceeds the pool width");
        }
        self.alloc_calls += 1;

        let mut page = self.first_page;
        let mut tail: *mut PoolPage = ptr::null_mut();
        while !page.is_null() {
            unsafe {
                if (*page).free_head != -1 {
                    return Self::pop_free_slot(page, size);
                }
                if ((*page).initialized_slots as usize) < Self::SLOTS_PER_PAGE {
                    return Self::carve_slot(page, size);
                }
                tail = page;
                page = (*page).next_page;
            }
        }

        // Every page is full; chain a fresh one after the tail.
        let page = Self::reserve_page();
        tracing::debug!(width = WIDTH, "fixed-size pool page appended");
        unsafe {
            if !tail.is_null() {
                (*tail).next_page = page;
            }
            Self::carve_slot(page, size)
        }
    }

    /// Returns a payload pointer previously obtained from this pool.
    /// Foreign pointers and double frees are usage errors; debug builds
    /// check the header sentinel.
    pub fn free(&mut self, p: *mut u8) {
        #[cfg(debug_assertions)]
        assert!(
            self.initialized && !self.destroyed,
            "pool used outside its init/destroy window"
        );
        self.free_calls += 1;

        unsafe {
            let slot = p.sub(size_of::<SlotHeader>()).cast::<SlotHeader>();
            #[cfg(debug_assertions)]
            assert_eq!(
                (*slot).magic,
                HEADER_SENTINEL,
                "freed pointer does not carry a live pool header"
            );

            // Allocated slots store their own index in `link`.
            let index = (*slot).link;
            let page = slot
                .cast::<u8>()
                .sub(Self::STRIDE * index as usize)
                .sub(size_of::<PoolPage>())
                .cast::<PoolPage>();

            (*slot).link = (*page).free_head;
            (*page).free_head = index;
        }
    }

    /// Releases every page. Debug builds first assert that each page's free
    /// list accounts for every initialized slot, i.e. nothing leaked.
    pub fn destroy(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(
                self.initialized && !self.destroyed,
                "destroy outside the pool's init window"
            );
            self.destroyed = true;

            unsafe {
                let mut page = self.first_page;
                while !page.is_null() {
                    let mut free_slots = 0;
                    let mut index = (*page).free_head;
                    while index != -1 {
                        free_slots += 1;
                        index = (*Self::slot_ptr(page, index)).link;
                    }
                    assert_eq!(
                        (*page).initialized_slots,
                        free_slots,
                        "pool destroyed while allocations are live"
                    );
                    page = (*page).next_page;
                }
            }
        }

        unsafe {
            let mut page = self.first_page;
            while !page.is_null() {
                let next = (*page).next_page;
                vm::release(page.cast::<u8>(), POOL_PAGE_SIZE);
                page = next;
            }
        }
        self.first_page = ptr::null_mut();
        tracing::debug!(width = WIDTH, "fixed-size pool destroyed");
    }

    /// Walks every page and snapshots slot accounting.
    pub fn stats(&self) -> PoolStats {
        let mut pages = 0;
        let mut free_slots = 0;
        let mut uninitialized = 0;

        unsafe {
            let mut page = self.first_page;
            while !page.is_null() {
                pages += 1;
                uninitialized += Self::SLOTS_PER_PAGE - (*page).initialized_slots as usize;

                let mut index = (*page).free_head;
                while index != -1 {
                    free_slots += 1;
                    index = (*Self::slot_ptr(page, index)).link;
                }
                page = (*page).next_page;
            }
        }

        let total_slots = Self::SLOTS_PER_PAGE * pages;
        PoolStats {
            width: WIDTH,
            pages,
            total_slots,
            uninitialized_slots: uninitialized,
            free_slots,
            allocated_slots: total_slots - free_slots - uninitialized,
            alloc_calls: self.alloc_calls,
            free_calls: self.free_calls,
        }
    }

    /// Prints a one-line summary of [`stats`](Self::stats) to stdout.
    pub fn dump_stat(&self) {
        let s = self.stats();
        println!(
            "pool {:>4}: pages {}, blocks {}, allocated {}, freed {}, uninitialized {}",
            s.width, s.pages, s.total_slots, s.allocated_slots, s.free_slots, s.uninitialized_slots
        );
    }

    /// Enumerates live allocations. Sizes are the recorded request in debug
    /// builds and `WIDTH` otherwise.
    pub fn dump_blocks(&self) -> Vec<LiveBlock> {
        let mut live = Vec::new();
        unsafe {
            let mut page = self.first_page;
            while !page.is_null() {
                for index in 0..(*page).initialized_slots {
                    let slot = Self::slot_ptr(page, index);
                    // Allocated slots store their own index in `link`; free
                    // slots can never point at themselves.
                    if (*slot).link == index {
                        #[cfg(debug_assertions)]
                        let size = (*slot).requested;
                        #[cfg(not(debug_assertions))]
                        let size = WIDTH;
                        live.push(LiveBlock {
                            size,
                            ptr: slot.cast::<u8>().add(size_of::<SlotHeader>()),
                        });
                    }
                }
                page = (*page).next_page;
            }
        }
        live
    }

    fn reserve_page() -> *mut PoolPage {
        let page = vm::reserve_or_abort(POOL_PAGE_SIZE).cast::<PoolPage>();
        // Pages arrive zeroed; only the free-list sentinel needs writing.
        unsafe {
            (*page).next_page = ptr::null_mut();
            (*page).free_head = -1;
            (*page).initialized_slots = 0;
        }
        page
    }

    unsafe fn slot_ptr(page: *mut PoolPage, index: i32) -> *mut SlotHeader {
        page.cast::<u8>()
            .add(size_of::<PoolPage>() + Self::STRIDE * index as usize)
            .cast::<SlotHeader>()
    }

    /// Hands out the next never-used slot of `page`.
    unsafe fn carve_slot(page: *mut PoolPage, size: usize) -> *mut u8 {
        #[cfg(not(debug_assertions))]
        let _ = size;

        let index = (*page).initialized_slots;
        let slot = Self::slot_ptr(page, index);
        ptr::write(
            slot,
            SlotHeader {
                #[cfg(debug_assertions)]
                magic: HEADER_SENTINEL,
                #[cfg(debug_assertions)]
                requested: size,
                link: index,
                tag: 0,
            },
        );
        (*page).initialized_slots += 1;

        slot.cast::<u8>().add(size_of::<SlotHeader>())
    }

    /// Pops the head of `page`'s free list.
    unsafe fn pop_free_slot(page: *mut PoolPage, size: usize) -> *mut u8 {
        #[cfg(not(debug_assertions))]
        let _ = size;

        let index = (*page).free_head;
        let slot = Self::slot_ptr(page, index);
        (*page).free_head = (*slot).link;
        // The slot flips from free-list node to allocated: `link` switches
        // from next-free to own-index.
        (*slot).link = index;
        #[cfg(debug_assertions)]
        {
            (*slot).magic = HEADER_SENTINEL;
            (*slot).requested = size;
        }

        slot.cast::<u8>().add(size_of::<SlotHeader>())
    }
}

impl<const WIDTH: usize> Default for FixedSizePool<WIDTH> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const WIDTH: usize> Drop for FixedSizePool<WIDTH> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(
            !self.initialized || self.destroyed,
            "pool dropped without destroy"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_geometry() {
        // 4KB page minus the 16-byte header, divided by header + payload.
        assert_eq!(
            FixedSizePool::<16>::SLOTS_PER_PAGE,
            (POOL_PAGE_SIZE - 16) / FixedSizePool::<16>::STRIDE
        );
        assert!(FixedSizePool::<512>::SLOTS_PER_PAGE >= 1);
        assert_eq!(FixedSizePool::<16>::STRIDE % 8, 0);
    }

    #[test]
    fn bump_region_hands_out_ascending_slots() {
        let mut pool = FixedSizePool::<32>::new();
        pool.init();
        let a = pool.alloc(32) as usize;
        let b = pool.alloc(32) as usize;
        assert_eq!(b - a, FixedSizePool::<32>::STRIDE);
        pool.free(b as *mut u8);
        pool.free(a as *mut u8);
        pool.destroy();
    }
}
