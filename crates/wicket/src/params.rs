// SPDX-License-Identifier: Apache-2.0

//! Structures passed through the call gate

use core::ptr::{null, null_mut};

/// Call Parameters Block
///
/// Lives on the caller's stack for the duration of one call. The input
/// buffer belongs to the caller. The output buffer is allocated by the
/// callee in untrusted memory and its ownership passes to the caller.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CallParams {
    /// Serialized input message, or null
    pub input: *const u8,

    /// Size of the input in bytes
    pub input_size: u64,

    /// Serialized output message, or null; set by the callee
    pub output: *mut u8,

    /// Size of the output in bytes; set by the callee
    pub output_size: u64,
}

impl Default for CallParams {
    fn default() -> Self {
        Self {
            input: null(),
            input_size: 0,
            output: null_mut(),
            output_size: 0,
        }
    }
}

/// Arguments of every gate entry
///
/// `selector` is only meaningful for [`CallIndex::Dispatch`](crate::CallIndex::Dispatch)
/// and is zero otherwise. `retval` is the logical result written by the
/// trusted side; its meaning depends on the call index.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GateArgs {
    /// Logical return value, written by the callee
    pub retval: i32,

    /// Dispatch selector
    pub selector: u64,

    /// Parameters block of this call
    pub buffer: *mut CallParams,
}

impl GateArgs {
    /// Creates arguments for an entry with the given selector and block.
    pub fn new(selector: u64, buffer: *mut CallParams) -> Self {
        Self {
            retval: 0,
            selector,
            buffer,
        }
    }
}
