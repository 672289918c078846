#![cfg(windows)]

//! `VirtualAlloc`-backed page reservation.

use core::ptr::{self, NonNull};
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};

/// Reserves and commits `len` bytes of zeroed, writable memory.
/// Returns the page-aligned base address, or `None` if the OS refuses.
///
/// # Safety
/// `len` must be non-zero.
pub unsafe fn reserve_commit(len: usize) -> Option<NonNull<u8>> {
    let ptr = VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE);
    NonNull::new(ptr.cast::<u8>())
}

/// Releases a mapping obtained from [`reserve_commit`].
/// `MEM_RELEASE` frees the entire reservation; the size argument must be 0.
///
/// # Safety
/// `base` must be the base address of exactly one prior `reserve_commit`
/// call.
pub unsafe fn release(base: *mut u8, _len: usize) {
    VirtualFree(base.cast(), 0, MEM_RELEASE);
}
