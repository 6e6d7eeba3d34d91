// SPDX-License-Identifier: Apache-2.0

//! Trusted side of the postern call bridge
//!
//! An [`Enclave`] owns a trusted [`Application`] and serves the four gate
//! entry points defined by [`wicket::CallIndex`]:
//!
//! * dispatch of application and runtime [selectors](wicket::Selector),
//! * re-delivery of host signals into the [`SignalManager`],
//! * snapshots for secure fork,
//! * the snapshot key exchange between fork parent and child.
//!
//! Outward calls go through [`HostCalls`]. Every address received from the
//! host is checked against the enclave's protected range first; see
//! [`validate`].

#![deny(clippy::all)]
#![deny(missing_docs)]

pub mod app;
pub mod enclave;
pub mod host;
pub mod signal;
pub mod validate;

pub use app::{Application, Context, Entry, Snapshot};
pub use enclave::{Enclave, Lifecycle};
pub use host::{Host, HostCalls};
pub use signal::SignalManager;
