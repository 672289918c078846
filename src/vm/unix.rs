#![cfg(unix)]

//! `mmap`-backed page reservation.

use core::ptr::{self, NonNull};
use libc::{c_void, mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};

/// Reserves and commits `len` bytes of zeroed, writable memory.
/// Returns the page-aligned base address, or `None` if the OS refuses.
///
/// # Safety
/// `len` must be non-zero.
pub unsafe fn reserve_commit(len: usize) -> Option<NonNull<u8>> {
    let ptr = mmap(
        ptr::null_mut(),
        len,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS,
        -1,
        0,
    );

    if ptr == MAP_FAILED {
        None
    } else {
        NonNull::new(ptr.cast::<u8>())
    }
}

/// Releases a mapping obtained from [`reserve_commit`].
///
/// # Safety
/// `base` and `len` must describe exactly one prior `reserve_commit` call.
pub unsafe fn release(base: *mut u8, len: usize) {
    munmap(base.cast::<c_void>(), len);
}
