// SPDX-License-Identifier: Apache-2.0

//! Signal records and delivery result codes
//!
//! Signals cross the gate with their own numbering so that the trusted side
//! never depends on the host's libc.

use crate::message::{Error, Reader, Writer};

/// Signal numbers as seen by the trusted side
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Signal {
    Hup = 1,
    Int = 2,
    Quit = 3,
    Ill = 4,
    Trap = 5,
    Abrt = 6,
    Bus = 7,
    Fpe = 8,
    Kill = 9,
    Usr1 = 10,
    Segv = 11,
    Usr2 = 12,
    Pipe = 13,
    Alrm = 14,
    Term = 15,
    Chld = 17,
    Cont = 18,
    Stop = 19,
    Tstp = 20,
    Ttin = 21,
    Ttou = 22,
    Urg = 23,
    Xcpu = 24,
    Xfsz = 25,
    Vtalrm = 26,
    Prof = 27,
    Winch = 28,
    Io = 29,
    Sys = 31,
}

impl Signal {
    /// Every bridge signal
    pub const ALL: [Signal; 29] = [
        Self::Hup,
        Self::Int,
        Self::Quit,
        Self::Ill,
        Self::Trap,
        Self::Abrt,
        Self::Bus,
        Self::Fpe,
        Self::Kill,
        Self::Usr1,
        Self::Segv,
        Self::Usr2,
        Self::Pipe,
        Self::Alrm,
        Self::Term,
        Self::Chld,
        Self::Cont,
        Self::Stop,
        Self::Tstp,
        Self::Ttin,
        Self::Ttou,
        Self::Urg,
        Self::Xcpu,
        Self::Xfsz,
        Self::Vtalrm,
        Self::Prof,
        Self::Winch,
        Self::Io,
        Self::Sys,
    ];

    /// Bit of this signal in a [`SignalSet`]
    #[inline]
    pub const fn bit(self) -> u64 {
        1 << (self as i32 as u64)
    }
}

impl TryFrom<i32> for Signal {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|s| *s as i32 == value)
            .ok_or(value)
    }
}

/// A set of bridge signals
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SignalSet(pub u64);

impl SignalSet {
    /// The empty set
    pub const EMPTY: Self = Self(0);

    /// Whether `signal` is a member
    #[inline]
    pub const fn contains(self, signal: Signal) -> bool {
        self.0 & signal.bit() != 0
    }

    /// Adds `signal`.
    #[inline]
    pub fn insert(&mut self, signal: Signal) {
        self.0 |= signal.bit();
    }

    /// Removes `signal`.
    #[inline]
    pub fn remove(&mut self, signal: Signal) {
        self.0 &= !signal.bit();
    }

    /// Union of both sets
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Members of `self` not in `other`
    #[inline]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl FromIterator<Signal> for SignalSet {
    fn from_iter<I: IntoIterator<Item = Signal>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for signal in iter {
            set.insert(signal);
        }
        set
    }
}

/// Description of a signal occurrence, forwarded from the host
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SigInfo {
    /// Bridge signal number
    pub signum: i32,
    /// Signal code (`si_code`)
    pub code: i32,
}

impl SigInfo {
    /// Appends the record to a message as `signum: i32, code: i32`.
    pub fn encode(&self, writer: &mut Writer) {
        writer.push(self.signum);
        writer.push(self.code);
    }

    /// Reads a record written with [`SigInfo::encode`].
    pub fn decode(reader: &mut Reader) -> Result<Self, Error> {
        Ok(Self {
            signum: reader.next()?,
            code: reader.next()?,
        })
    }
}

/// Result codes of [`CallIndex::DeliverSignal`](crate::CallIndex::DeliverSignal)
pub mod delivery {
    /// The signal was handled.
    pub const HANDLED: i32 = 0;

    /// No handler is registered for the signal.
    pub const UNREGISTERED: i32 = 1;

    /// The enclave cannot handle signals in its current state.
    pub const BAD_STATE: i32 = 2;

    /// The signal is blocked inside the enclave and was queued.
    pub const BLOCKED: i32 = -1;
}
