// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]
#![deny(clippy::all)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod backend;
pub mod client;
pub mod config;
pub mod exit;
pub mod memory;
pub mod registry;
pub mod signal;

mod error;

pub use client::{Client, LoadOptions, Source, MAX_CREATE_ATTEMPTS};
pub use error::{Error, Result, SignalError};
pub use exit::ExitCallProvider;
pub use memory::{LibcMemory, UntrustedMemory};
pub use registry::Manager;
