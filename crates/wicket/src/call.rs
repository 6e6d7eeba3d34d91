// SPDX-License-Identifier: Apache-2.0

//! Call indices and selectors

use core::fmt;

/// Version of the call index table and the record encodings.
///
/// Bump this whenever an index is added, removed or renumbered, or whenever
/// the encoding of a record in this crate changes.
pub const ABI_VERSION: u32 = 1;

/// Entry points of the call gate
///
/// The numbering is part of the ABI and MUST be identical on both sides of
/// the gate. Index `3` is retired and must not be reused.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CallIndex {
    /// Selector-based request/response dispatch
    Dispatch = 0,

    /// Re-delivery of a host-observed signal
    DeliverSignal = 1,

    /// Snapshot of the enclave state for a forked sibling
    TakeSnapshot = 2,

    /// Key exchange between the parent and child of a secure fork
    TransferSecureSnapshotKey = 4,
}

impl CallIndex {
    /// Every call index, in ascending order
    pub const ALL: [CallIndex; 4] = [
        Self::Dispatch,
        Self::DeliverSignal,
        Self::TakeSnapshot,
        Self::TransferSecureSnapshotKey,
    ];
}

impl From<CallIndex> for u32 {
    #[inline]
    fn from(index: CallIndex) -> Self {
        index as u32
    }
}

impl TryFrom<u32> for CallIndex {
    type Error = u32;

    #[inline]
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Dispatch,
            1 => Self::DeliverSignal,
            2 => Self::TakeSnapshot,
            4 => Self::TransferSecureSnapshotKey,
            _ => return Err(value),
        })
    }
}

/// FNV-1a digest over the call index table and [`ABI_VERSION`].
pub const fn table_digest() -> u64 {
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut words = [0u32; CallIndex::ALL.len() + 1];
    words[0] = ABI_VERSION;

    let mut i = 0;
    while i < CallIndex::ALL.len() {
        words[i + 1] = CallIndex::ALL[i] as u32;
        i += 1;
    }

    let mut i = 0;
    while i < words.len() {
        let bytes = words[i].to_le_bytes();
        let mut j = 0;
        while j < bytes.len() {
            hash ^= bytes[j] as u64;
            hash = hash.wrapping_mul(PRIME);
            j += 1;
        }
        i += 1;
    }

    hash
}

/// Identifier of an entry point reachable through [`CallIndex::Dispatch`]
///
/// Selectors below [`Selector::USER_BASE`] are reserved for the runtime.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Selector(pub u64);

impl Selector {
    /// ABI handshake; replies with [`ABI_VERSION`] and [`table_digest()`]
    pub const VERSION: Self = Self(1);

    /// Hands the enclave configuration to the trusted runtime
    pub const INITIALIZE: Self = Self(2);

    /// Last call made before the enclave is destroyed
    pub const FINALIZE: Self = Self(3);

    /// First selector available to applications
    pub const USER_BASE: Self = Self(0x100);

    /// Creates an application selector, offset from [`Selector::USER_BASE`].
    #[inline]
    pub const fn user(offset: u64) -> Self {
        Self(Self::USER_BASE.0 + offset)
    }

    /// Whether this selector is reserved for the runtime
    #[inline]
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::USER_BASE.0
    }
}

impl From<u64> for Selector {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Selector> for u64 {
    #[inline]
    fn from(selector: Selector) -> Self {
        selector.0
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::VERSION => f.write_str("VERSION"),
            Self::INITIALIZE => f.write_str("INITIALIZE"),
            Self::FINALIZE => f.write_str("FINALIZE"),
            Self(n) => write!(f, "{:#x}", n),
        }
    }
}
