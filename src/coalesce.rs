//! Coalescing allocator for mid-size requests.
//!
//! Pages are large (11MB) and carry two intrusive lists: every block sits
//! in a doubly-linked physical list ordered by address, and free blocks
//! additionally sit in a doubly-linked free list rooted at the page header.
//! Allocation is first-fit over the free list with a trailing split;
//! deallocation merges with whichever physical neighbors are free, so no
//! two adjacent blocks are ever both free.

use core::mem::size_of;
use core::ptr;

#[cfg(debug_assertions)]
use crate::constants::HEADER_SENTINEL;
use crate::constants::{align_up, COALESCING_PAGE_SIZE, PAYLOAD_ALIGN};
use crate::stats::{CoalescingStats, LiveBlock};
use crate::vm;

/// Page header, at offset 0 of every coalescing page.
#[repr(C)]
struct CoalPage {
    next_page: *mut CoalPage,
    free_head: *mut BlockHeader,
}

/// Block header, immediately preceding each payload.
///
/// `prev_free`/`next_free` are meaningful only while `freed` is set. `tag`
/// must remain the final field: the dispatcher addresses it as the four
/// bytes directly before the payload.
#[repr(C)]
struct BlockHeader {
    #[cfg(debug_assertions)]
    red_zone: u64,
    next_free: *mut BlockHeader,
    prev_free: *mut BlockHeader,
    next_phys: *mut BlockHeader,
    prev_phys: *mut BlockHeader,
    page: *mut CoalPage,
    /// Payload bytes; excludes this header.
    size: usize,
    freed: bool,
    /// Dispatcher tag, written after `alloc` returns.
    tag: i32,
}

/// Bytes of bookkeeping preceding every payload.
pub const BLOCK_HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Bytes of bookkeeping at the start of every page.
pub const PAGE_HEADER_SIZE: usize = size_of::<CoalPage>();

/// Payload capacity of the single block covering a fresh page.
pub const INITIAL_BLOCK_SIZE: usize = COALESCING_PAGE_SIZE - PAGE_HEADER_SIZE - BLOCK_HEADER_SIZE;

const _: () = {
    // Headers stay word-aligned as long as requests are rounded to 8, and
    // the tag occupies the four bytes directly before the payload.
    assert!(BLOCK_HEADER_SIZE % 8 == 0);
    assert!(PAGE_HEADER_SIZE % 8 == 0);
    assert!(core::mem::offset_of!(BlockHeader, tag) + 4 == BLOCK_HEADER_SIZE);
};

/// Variable-size allocator with immediate coalescing.
///
/// Single-threaded; every operation takes `&mut self`. Pages are appended
/// on demand and only released by [`destroy`](Self::destroy).
pub struct CoalescingAllocator {
    first_page: *mut CoalPage,
    alloc_calls: usize,
    free_calls: usize,
    #[cfg(debug_assertions)]
    initialized: bool,
    #[cfg(debug_assertions)]
    destroyed: bool,
}

impl CoalescingAllocator {
    /// Creates an uninitialized allocator. No VM activity until
    /// [`init`](Self::init).
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
            assert!(!self.initialized, "double init of coalescing allocator");
            self.initialized = true;
        }
        self.first_page = Self::reserve_page();
        tracing::debug!("coalescing allocator initialized");
    }

    /// Returns an 8-aligned pointer to at least `size` payload bytes.
    ///
    /// Requests are rounded up to a multiple of 8 so every embedded header
    /// stays word-aligned; that rounded size is the block's capacity.
    pub fn alloc(&mut self, size: usize) -> *mut u8 {
        #[cfg(debug_assertions)]
        {
            assert!(
                self.initialized && !self.destroyed,
                "coalescing allocator used outside its init/destroy window"
            );
            assert!(
                size <= INITIAL_BLOCK_SIZE,
                "request exceeds a coalescing page"
            );
        }
        self.alloc_calls += 1;

        let size = align_up(size, PAYLOAD_ALIGN);

        unsafe {
            let mut page = self.first_page;
            let mut tail: *mut CoalPage = ptr::null_mut();
            while !page.is_null() {
                // First fit over this page's free list.
                let mut block = (*page).free_head;
                while !block.is_null() {
                    if (*block).size >= size {
                        return Self::alloc_block(page, block, size);
                    }
                    block = (*block).next_free;
                }
                tail = page;
                page = (*page).next_page;
            }

            // No page can serve the request; chain a fresh one.
            let page = Self::reserve_page();
            tracing::debug!("coalescing page appended");
            if !tail.is_null() {
                (*tail).next_page = page;
            }
            let block = (*page).free_head;
            Self::alloc_block(page, block, size)
        }
    }

    /// Returns a payload pointer previously obtained from this allocator,
    /// merging the block with any free physical neighbor. Never allocates.
    pub fn free(&mut self, p: *mut u8) {
        #[cfg(debug_assertions)]
        assert!(
            self.initialized && !self.destroyed,
            "coalescing allocator used outside its init/destroy window"
        );
        self.free_calls += 1;

        unsafe {
            let block = p.sub(BLOCK_HEADER_SIZE).cast::<BlockHeader>();
            #[cfg(debug_assertions)]
            {
                assert_eq!(
                    (*block).red_zone,
                    HEADER_SENTINEL,
                    "freed pointer does not carry a live block header"
                );
                assert!(!(*block).freed, "double free of coalescing block");
            }

            let page = (*block).page;
            let prev = (*block).prev_phys;
            let next = (*block).next_phys;
            let prev_freed = !prev.is_null() && (*prev).freed;
            let next_freed = !next.is_null() && (*next).freed;

            match (prev_freed, next_freed) {
                (false, false) => {
                    Self::flist_push_head(page, block);
                    (*block).freed = true;
                }
                (false, true) => {
                    // Absorb the successor; the dying block inherits its
                    // free-list position.
                    (*block).size += BLOCK_HEADER_SIZE + (*next).size;
                    Self::flist_replace(page, next, block);
                    Self::plist_splice_out(next);
                    (*block).freed = true;
                }
                (true, false) => {
                    // Fold into the already-free predecessor; it stays on
                    // the free list where it was.
                    (*prev).size += BLOCK_HEADER_SIZE + (*block).size;
                    Self::plist_splice_out(block);
                }
                (true, true) => {
                    // Predecessor swallows both the block and its
                    // successor; the successor leaves the free list.
                    (*prev).size += 2 * BLOCK_HEADER_SIZE + (*block).size + (*next).size;
                    Self::flist_remove(page, next);
                    Self::plist_splice_out(block);
                    Self::plist_splice_out(next);
                }
            }
        }
    }

    /// Releases every page. Debug builds first assert that each page has
    /// coalesced back to its single initial block, i.e. nothing leaked.
    pub fn destroy(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(
                self.initialized && !self.destroyed,
                "destroy outside the allocator's init window"
            );
            self.destroyed = true;

            unsafe {
                let mut page = self.first_page;
                while !page.is_null() {
                    let block = Self::first_block(page);
                    assert!(
                        (*block).freed && (*block).next_phys.is_null(),
                        "coalescing allocator destroyed while allocations are live"
                    );
                    page = (*page).next_page;
                }
            }
        }

        unsafe {
            let mut page = self.first_page;
            while !page.is_null() {
                let next = (*page).next_page;
                vm::release(page.cast::<u8>(), COALESCING_PAGE_SIZE);
                page = next;
            }
        }
        self.first_page = ptr::null_mut();
        tracing::debug!("coalescing allocator destroyed");
    }

    /// Walks every page and snapshots block accounting.
    pub fn stats(&self) -> CoalescingStats {
        let mut pages = 0;
        let mut total_blocks = 0;
        let mut free_blocks = 0;
        let mut free_bytes = 0;

        unsafe {
            let mut page = self.first_page;
            while !page.is_null() {
                pages += 1;
                let mut block = Self::first_block(page);
                while !block.is_null() {
                    total_blocks += 1;
                    if (*block).freed {
                        free_blocks += 1;
                        free_bytes += (*block).size;
                    }
                    block = (*block).next_phys;
                }
                page = (*page).next_page;
            }
        }

        CoalescingStats {
            pages,
            total_blocks,
            free_blocks,
            allocated_blocks: total_blocks - free_blocks,
            free_bytes,
            alloc_calls: self.alloc_calls,
            free_calls: self.free_calls,
        }
    }

    /// Prints a one-line summary of [`stats`](Self::stats) to stdout.
    pub fn dump_stat(&self) {
        let s = self.stats();
        println!(
            "coalescing: pages {}, blocks {}, allocated {}, freed {} ({} bytes reusable)",
            s.pages, s.total_blocks, s.allocated_blocks, s.free_blocks, s.free_bytes
        );
    }

    /// Enumerates live allocations with their block capacities.
    pub fn dump_blocks(&self) -> Vec<LiveBlock> {
        let mut live = Vec::new();
        unsafe {
            let mut page = self.first_page;
            while !page.is_null() {
                let mut block = Self::first_block(page);
                while !block.is_null() {
                    if !(*block).freed {
                        live.push(LiveBlock {
                            size: (*block).size,
                            ptr: block.cast::<u8>().add(BLOCK_HEADER_SIZE),
                        });
                    }
                    block = (*block).next_phys;
                }
                page = (*page).next_page;
            }
        }
        live
    }

    /// Returns `(capacity, freed)` for every block of every page, in page
    /// order and physical order. Diagnostic support for dumps and tests.
    pub fn physical_blocks(&self) -> Vec<Vec<(usize, bool)>> {
        let mut pages = Vec::new();
        unsafe {
            let mut page = self.first_page;
            while !page.is_null() {
                let mut blocks = Vec::new();
                let mut block = Self::first_block(page);
                while !block.is_null() {
                    blocks.push(((*block).size, (*block).freed));
                    block = (*block).next_phys;
                }
                pages.push(blocks);
                page = (*page).next_page;
            }
        }
        pages
    }

    /// Walks every page and panics unless the structural invariants hold:
    /// physical blocks tile the page exactly, back-links mirror forward
    /// links, no two physical neighbors are both free, and the free list
    /// contains exactly the freed blocks, without duplicates.
    pub fn validate(&self) {
        unsafe {
            let mut page = self.first_page;
            while !page.is_null() {
                let mut covered = PAGE_HEADER_SIZE;
                let mut freed_set: Vec<usize> = Vec::new();
                let mut prev: *mut BlockHeader = ptr::null_mut();
                let mut prev_freed = false;
                let mut block = Self::first_block(page);
                while !block.is_null() {
                    assert_eq!(
                        block as usize,
                        page as usize + covered,
                        "physical list does not tile the page"
                    );
                    assert_eq!((*block).prev_phys, prev, "broken physical back-link");
                    assert_eq!((*block).page, page, "block points at a foreign page");
                    if (*block).freed {
                        assert!(!prev_freed, "adjacent free blocks survived coalescing");
                        freed_set.push(block as usize);
                    }
                    covered += BLOCK_HEADER_SIZE + (*block).size;
                    prev_freed = (*block).freed;
                    prev = block;
                    block = (*block).next_phys;
                }
                assert_eq!(covered, COALESCING_PAGE_SIZE, "blocks do not cover the page");

                let mut flist: Vec<usize> = Vec::new();
                let mut prev_free: *mut BlockHeader = ptr::null_mut();
                let mut cursor = (*page).free_head;
                while !cursor.is_null() {
                    assert!((*cursor).freed, "allocated block on the free list");
                    assert_eq!((*cursor).prev_free, prev_free, "broken free-list back-link");
                    assert!(
                        !flist.contains(&(cursor as usize)),
                        "cycle in the free list"
                    );
                    flist.push(cursor as usize);
                    prev_free = cursor;
                    cursor = (*cursor).next_free;
                }
                flist.sort_unstable();
                freed_set.sort_unstable();
                assert_eq!(flist, freed_set, "free list diverges from the freed set");

                page = (*page).next_page;
            }
        }
    }

    fn reserve_page() -> *mut CoalPage {
        let page = vm::reserve_or_abort(COALESCING_PAGE_SIZE).cast::<CoalPage>();
        unsafe {
            (*page).next_page = ptr::null_mut();
            let block = page.cast::<u8>().add(PAGE_HEADER_SIZE).cast::<BlockHeader>();
            ptr::write(
                block,
                BlockHeader {
                    #[cfg(debug_assertions)]
                    red_zone: HEADER_SENTINEL,
                    next_free: ptr::null_mut(),
                    prev_free: ptr::null_mut(),
                    next_phys: ptr::null_mut(),
                    prev_phys: ptr::null_mut(),
                    page,
                    size: INITIAL_BLOCK_SIZE,
                    freed: true,
                    tag: 0,
                },
            );
            (*page).free_head = block;
        }
        page
    }

    unsafe fn first_block(page: *mut CoalPage) -> *mut BlockHeader {
        page.cast::<u8>().add(PAGE_HEADER_SIZE).cast::<BlockHeader>()
    }

    /// Carves `size` bytes out of the free `block`, splitting off a
    /// trailing free remainder when one fits a header plus payload.
    unsafe fn alloc_block(page: *mut CoalPage, block: *mut BlockHeader, size: usize) -> *mut u8 {
        let spare = (*block).size - size;
        if spare > BLOCK_HEADER_SIZE {
            let rest = block
                .cast::<u8>()
                .add(BLOCK_HEADER_SIZE + size)
                .cast::<BlockHeader>();
            ptr::write(
                rest,
                BlockHeader {
                    #[cfg(debug_assertions)]
                    red_zone: HEADER_SENTINEL,
                    next_free: ptr::null_mut(),
                    prev_free: ptr::null_mut(),
                    next_phys: (*block).next_phys,
                    prev_phys: block,
                    page,
                    size: spare - BLOCK_HEADER_SIZE,
                    freed: true,
                    tag: 0,
                },
            );
            if !(*rest).next_phys.is_null() {
                (*(*rest).next_phys).prev_phys = rest;
            }
            (*block).next_phys = rest;
            Self::flist_push_head(page, rest);
            (*block).size = size;
        }
        // Otherwise the whole block is consumed; the few spare bytes ride
        // along as internal fragmentation and return at coalesce time.

        (*block).freed = false;
        Self::flist_remove(page, block);

        block.cast::<u8>().add(BLOCK_HEADER_SIZE)
    }

    /// Pushes `block` onto the head of its page's free list.
    unsafe fn flist_push_head(page: *mut CoalPage, block: *mut BlockHeader) {
        let head = (*page).free_head;
        (*block).prev_free = ptr::null_mut();
        (*block).next_free = head;
        if !head.is_null() {
            (*head).prev_free = block;
        }
        (*page).free_head = block;
    }

    /// Unlinks `block` from its page's free list.
    unsafe fn flist_remove(page: *mut CoalPage, block: *mut BlockHeader) {
        let prev = (*block).prev_free;
        let next = (*block).next_free;
        if prev.is_null() {
            (*page).free_head = next;
        } else {
            (*prev).next_free = next;
        }
        if !next.is_null() {
            (*next).prev_free = prev;
        }
    }

    /// Substitutes `new` for `old` in the free list; `new` inherits `old`'s
    /// links and position.
    unsafe fn flist_replace(page: *mut CoalPage, old: *mut BlockHeader, new: *mut BlockHeader) {
        let prev = (*old).prev_free;
        let next = (*old).next_free;
        (*new).prev_free = prev;
        (*new).next_free = next;
        if prev.is_null() {
            (*page).free_head = new;
        } else {
            (*prev).next_free = new;
        }
        if !next.is_null() {
            (*next).prev_free = new;
        }
    }

    /// Removes `block` from the physical list, joining its neighbors.
    unsafe fn plist_splice_out(block: *mut BlockHeader) {
        let prev = (*block).prev_phys;
        let next = (*block).next_phys;
        if !prev.is_null() {
            (*prev).next_phys = next;
        }
        if !next.is_null() {
            (*next).prev_phys = prev;
        }
    }
}

impl Default for CoalescingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CoalescingAllocator {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(
            !self.initialized || self.destroyed,
            "coalescing allocator dropped without destroy"
        );
    }
}
