//! Raw virtual-memory reservation, one submodule per OS.
//!
//! Both operations work on whole regions: `reserve_commit` hands back a
//! zeroed, writable, page-aligned mapping and `release` returns the entire
//! mapping to the OS. Sub-allocators subdivide the region themselves.

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use unix::*;

#[cfg(windows)]
pub use windows::*;

use core::alloc::Layout;
use std::alloc::handle_alloc_error;

use crate::constants::PAYLOAD_ALIGN;

/// Reserves `len` bytes or terminates the process: allocation either
/// succeeds or aborts, there is no recoverable failure path.
pub(crate) fn reserve_or_abort(len: usize) -> *mut u8 {
    // Safety: len is a whole-page request built from the crate's constants.
    match unsafe { reserve_commit(len) } {
        Some(page) => page.as_ptr(),
        None => {
            // Safety: PAYLOAD_ALIGN is a power of two and len came from a
            // checked page-size computation.
            let layout = unsafe { Layout::from_size_align_unchecked(len, PAYLOAD_ALIGN) };
            handle_alloc_error(layout)
        }
    }
}
