// SPDX-License-Identifier: Apache-2.0

//! Validation of addresses handed over by the host
//!
//! The host is a separate, untrusted party: every pointer it hands to the
//! enclave must reference memory entirely outside of the enclave's protected
//! range before it is dereferenced. A violation is never reported back to the
//! host. The process is aborted instead.

use std::ops::Range;
use std::ptr;

use log::error;
use wicket::util::ptr::{is_aligned_non_null, is_outside};

/// Terminates the process after a boundary violation.
#[cold]
pub fn violation(what: &str) -> ! {
    error!("boundary violation: {}", what);
    std::process::abort()
}

/// The enclave's protected address range
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Boundary {
    range: Range<usize>,
}

impl Boundary {
    /// Creates a boundary around `range`.
    pub fn new(range: Range<usize>) -> Self {
        Self { range }
    }

    /// The protected range
    pub fn range(&self) -> &Range<usize> {
        &self.range
    }

    /// Aborts unless `[addr, addr + len)` lies entirely outside the
    /// protected range.
    #[inline]
    pub fn check(&self, addr: usize, len: usize, what: &str) {
        if !is_outside(addr, len, &self.range) {
            violation(what);
        }
    }

    /// Copies a `T` from untrusted memory.
    ///
    /// Aborts unless `ptr` is non-null, aligned and the whole object lies
    /// outside the protected range.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads if it passes validation.
    pub unsafe fn read<T: Copy>(&self, ptr: *const T, what: &str) -> T {
        let addr = match is_aligned_non_null::<T>(ptr as usize) {
            Some(addr) => addr,
            None => violation(what),
        };

        self.check(addr, std::mem::size_of::<T>(), what);
        ptr::read_volatile(ptr)
    }

    /// Writes a `T` to untrusted memory.
    ///
    /// Aborts under the same conditions as [`Boundary::read`].
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes if it passes validation.
    pub unsafe fn write<T: Copy>(&self, ptr: *mut T, value: T, what: &str) {
        let addr = match is_aligned_non_null::<T>(ptr as usize) {
            Some(addr) => addr,
            None => violation(what),
        };

        self.check(addr, std::mem::size_of::<T>(), what);
        ptr::write_volatile(ptr, value)
    }

    /// Copies `len` bytes from untrusted memory into the enclave.
    ///
    /// A null pointer is accepted only with a zero length.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len` bytes if it passes validation.
    pub unsafe fn copy_in(&self, ptr: *const u8, len: u64, what: &str) -> Vec<u8> {
        let len = match usize::try_from(len) {
            Ok(len) => len,
            Err(_) => violation(what),
        };

        if ptr.is_null() {
            if len != 0 {
                violation(what);
            }
            return Vec::new();
        }

        self.check(ptr as usize, len, what);
        std::slice::from_raw_parts(ptr, len).to_vec()
    }

    /// Copies `bytes` out of the enclave into untrusted memory at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes of `bytes.len()` bytes if it passes
    /// validation.
    pub unsafe fn copy_out(&self, ptr: *mut u8, bytes: &[u8], what: &str) {
        if ptr.is_null() {
            violation(what);
        }

        self.check(ptr as usize, bytes.len(), what);
        ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted() {
        let protected = [0u8; 64];
        let start = protected.as_ptr() as usize;
        let boundary = Boundary::new(start..start + protected.len());

        let outside = 0x5a5au32;
        let value = unsafe { boundary.read(&outside, "test") };
        assert_eq!(value, 0x5a5a);

        let bytes = [1u8, 2, 3];
        let copy = unsafe { boundary.copy_in(bytes.as_ptr(), 3, "test") };
        assert_eq!(copy, vec![1, 2, 3]);

        let empty = unsafe { boundary.copy_in(ptr::null(), 0, "test") };
        assert!(empty.is_empty());

        let mut out = [0u8; 3];
        unsafe { boundary.copy_out(out.as_mut_ptr(), &bytes, "test") };
        assert_eq!(out, bytes);
    }
}
