// SPDX-License-Identifier: Apache-2.0

//! Utility functions for pointers and address ranges

use core::mem::align_of;
use core::ops::Range;

/// Validates that `ptr` is aligned and non-null
///
/// Returns `Some(ptr)`, if so and `None` if not.
pub fn is_aligned_non_null<T>(ptr: usize) -> Option<usize> {
    if ptr == 0 || ptr % align_of::<T>() != 0 {
        return None;
    }
    Some(ptr)
}

/// Returns the range `[addr, addr + len)`, or `None` if it wraps around.
pub fn span(addr: usize, len: usize) -> Option<Range<usize>> {
    Some(addr..addr.checked_add(len)?)
}

/// Whether `[addr, addr + len)` lies entirely outside of `protected`
///
/// A range that wraps around the address space is never outside. An empty
/// range is outside unless its address lies within `protected`.
pub fn is_outside(addr: usize, len: usize, protected: &Range<usize>) -> bool {
    let range = match span(addr, len) {
        Some(range) => range,
        None => return false,
    };

    if range.is_empty() {
        return !protected.contains(&range.start);
    }

    range.end <= protected.start || range.start >= protected.end
}

/// Whether `[addr, addr + len)` lies entirely within `protected`
pub fn is_within(addr: usize, len: usize, protected: &Range<usize>) -> bool {
    match span(addr, len) {
        Some(range) => range.start >= protected.start && range.end <= protected.end,
        None => false,
    }
}
