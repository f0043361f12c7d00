//! Low-level address arithmetic shared by the arena and the platform
//! providers.
//!
//! All alignments handled here are non-zero powers of two; callers check
//! that before getting this far.

#![allow(unsafe_code)]

use std::ptr::{self, NonNull};

/// Round `value` up to the next multiple of `align`, or `None` on overflow.
#[inline]
pub(crate) fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    let mask = align - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

/// Round `value` down to a multiple of `align`.
#[inline]
pub(crate) fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// A non-null, well-aligned pointer with no provenance, for zero-length
/// allocations.
#[inline]
pub(crate) fn dangling(align: usize) -> NonNull<u8> {
    debug_assert!(align.is_power_of_two());
    // SAFETY: a power of two is never zero.
    unsafe { NonNull::new_unchecked(ptr::without_provenance_mut(align)) }
}

/// Widen `[addr, addr + size)` to whole pages. Used for commits, where
/// touching an extra already-committed page is harmless.
#[inline]
pub(crate) fn pages_covering(addr: usize, size: usize, page: usize) -> (usize, usize) {
    let start = align_down(addr, page);
    let end = align_up(addr + size, page).unwrap_or(usize::MAX);
    (start, end - start)
}

/// Narrow `[addr, addr + size)` to the whole pages it contains. Used for
/// decommits, which must never take a page that still holds live bytes.
#[inline]
pub(crate) fn pages_within(addr: usize, size: usize, page: usize) -> (usize, usize) {
    let end = align_down(addr + size, page);
    match align_up(addr, page) {
        Some(start) if start < end => (start, end - start),
        _ => (addr, 0),
    }
}
