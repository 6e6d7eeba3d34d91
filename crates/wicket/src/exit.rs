// SPDX-License-Identifier: Apache-2.0

//! Selectors of outward calls, from the enclave to the host
//!
//! Exit calls use the same [message](crate::message) convention as entry
//! calls, in reverse: the trusted side writes the input, the host allocates
//! and fills the output.

use crate::Selector;

/// Allocates `count: u64` buffers of `size: u64` bytes in untrusted memory.
///
/// Replies with `count` buffer addresses (`u64`).
pub const ALLOCATE_BUFFERS: Selector = Selector(1);

/// Frees untrusted buffers of `size: u64` bytes, given as the addresses
/// (`u64`) that follow the size.
pub const DEALLOCATE_FREE_LIST: Selector = Selector(2);

/// Prints `message: str` on the host's standard error.
pub const DEBUG_PUTS: Selector = Selector(3);

/// Yields the calling host thread. Replies with `ret: i32`.
pub const SCHED_YIELD: Selector = Selector(4);

/// Checks whether `fd: i32` is a terminal. Replies with `ret: i32, errno: i32`.
pub const ISATTY: Selector = Selector(5);

/// Sleeps for `usec: u32` microseconds. Replies with `ret: i32, errno: i32`.
pub const USLEEP: Selector = Selector(6);

/// First exit selector available to applications
pub const USER_BASE: Selector = Selector::USER_BASE;

/// Result codes of an exit call
pub mod code {
    /// The handler succeeded; the output holds its reply.
    pub const OK: i32 = 0;

    /// The handler failed; the output holds an encoded
    /// [`Status`](crate::status::Status).
    pub const FAILED: i32 = 1;

    /// No handler is registered for the selector.
    pub const UNKNOWN_SELECTOR: i32 = 2;
}
