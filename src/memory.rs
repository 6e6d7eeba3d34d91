// SPDX-License-Identifier: Apache-2.0

//! Untrusted memory shared with the enclave

use crate::{Error, Result};

use std::ptr::NonNull;
use std::slice;

use wicket::message::Writer;

/// Allocator for memory both sides of the gate can reach
///
/// The enclave allocates its output buffers through the same allocator the
/// host uses to free them.
pub trait UntrustedMemory: Send + Sync {
    /// Allocates `size` bytes. Returns null on failure.
    fn allocate(&self, size: usize) -> *mut u8;

    /// Releases memory obtained from [`UntrustedMemory::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`UntrustedMemory::allocate`] of this allocator,
    /// with the same `size`, and must not be used afterwards.
    unsafe fn free(&self, ptr: *mut u8, size: usize);
}

/// The C library's `malloc` and `free`
#[derive(Copy, Clone, Debug, Default)]
pub struct LibcMemory;

impl UntrustedMemory for LibcMemory {
    fn allocate(&self, size: usize) -> *mut u8 {
        unsafe { libc::malloc(size) as *mut u8 }
    }

    unsafe fn free(&self, ptr: *mut u8, _size: usize) {
        libc::free(ptr as *mut libc::c_void)
    }
}

/// A buffer in untrusted memory, released exactly once when dropped
pub struct OwnedBuffer<'a> {
    ptr: NonNull<u8>,
    len: usize,
    memory: &'a dyn UntrustedMemory,
}

impl<'a> OwnedBuffer<'a> {
    /// Allocates `len` bytes, which must be non-zero.
    pub fn allocate(memory: &'a dyn UntrustedMemory, len: usize) -> Result<Self> {
        debug_assert!(len > 0);

        let ptr = NonNull::new(memory.allocate(len)).ok_or(Error::Allocation(len))?;
        Ok(Self { ptr, len, memory })
    }

    /// Serializes `writer` into a new buffer; `None` for an empty message.
    pub fn serialize(memory: &'a dyn UntrustedMemory, writer: &Writer) -> Result<Option<Self>> {
        let size = writer.message_size();
        if size == 0 {
            return Ok(None);
        }

        let mut buffer = Self::allocate(memory, size)?;
        writer.serialize(buffer.as_mut_slice())?;
        Ok(Some(buffer))
    }

    /// Takes ownership of a buffer allocated by the enclave.
    ///
    /// Returns `None` for a null pointer. A non-null pointer is owned even
    /// with a zero length, so it is released as well.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must have been allocated by `memory` with `len`
    /// bytes and must not be owned by anything else.
    pub unsafe fn adopt(memory: &'a dyn UntrustedMemory, ptr: *mut u8, len: u64) -> Option<Self> {
        let ptr = NonNull::new(ptr)?;
        Some(Self {
            ptr,
            len: len as usize,
            memory,
        })
    }

    /// Gives up ownership without releasing the buffer.
    pub fn into_raw(self) -> (*mut u8, usize) {
        let raw = (self.ptr.as_ptr(), self.len);
        std::mem::forget(self);
        raw
    }

    /// Address of the buffer
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The buffer contents
    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The buffer contents, mutably
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for OwnedBuffer<'_> {
    fn drop(&mut self) {
        unsafe { self.memory.free(self.ptr.as_ptr(), self.len) }
    }
}
