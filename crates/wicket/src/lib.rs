// SPDX-License-Identifier: Apache-2.0

//! Wire types for the host/enclave call bridge
//!
//! `wicket` is a protocol crate shared by the untrusted host and the trusted
//! runtime of an enclave. A [wicket](https://en.wikipedia.org/wiki/Wicket_gate)
//! is the small door cut into a larger gate: the only way through while the
//! gate itself stays shut.
//!
//! # Mechanism of action
//!
//! The host enters the enclave synchronously through a single gate. Every
//! entry carries a [call index](CallIndex) naming the entry point and a
//! pointer to [`GateArgs`](params::GateArgs). The gate arguments point at a
//! [`CallParams`](params::CallParams) block which in turn references an input
//! buffer owned by the caller and an output buffer allocated by the callee in
//! untrusted memory.
//!
//! Both buffers hold a [message](message): an ordered sequence of extents.
//!
//! # Message format
//!
//! A message is zero or more extents, concatenated without padding. Each
//! extent is:
//!
//! * len: `u64` (native endian)
//! * data: `[u8; len]`
//!
//! Scalars are stored as their native-endian bytes in their native width,
//! byte strings and UTF-8 strings as their raw bytes. Messages are not
//! self-describing: writer and reader agree on the order and types of values
//! per [`Selector`].
//!
//! ## Call indices
//!
//! * `DISPATCH`: `0`
//! * `DELIVER_SIGNAL`: `1`
//! * `TAKE_SNAPSHOT`: `2`
//! * `TRANSFER_SECURE_SNAPSHOT_KEY`: `4`
//!
//! Both sides must agree on this table. The trusted side answers
//! [`Selector::VERSION`] with [`ABI_VERSION`] and [`table_digest()`] so that
//! a mismatched build is detected when the enclave is loaded.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(clippy::all)]
#![deny(missing_docs)]

extern crate alloc;

pub mod call;
pub mod config;
pub mod exit;
pub mod message;
pub mod params;
pub mod signal;
pub mod snapshot;
pub mod status;
pub mod util;

pub use call::{table_digest, CallIndex, Selector, ABI_VERSION};

/// The wicket version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
