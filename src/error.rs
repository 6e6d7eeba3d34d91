// SPDX-License-Identifier: Apache-2.0

//! Errors of the host side of the bridge

use crate::backend::PlatformStatus;

use displaydoc::Display;
use wicket::status::Status;

/// Failure of a signal re-delivery, as reported from inside the enclave
#[derive(Display, Copy, Clone, Debug, PartialEq, Eq)]
pub enum SignalError {
    /// no signal handler is registered for this signal in the enclave
    Unregistered,

    /// enclave is unable to handle signals in its current state
    BadState,

    /// signal is blocked inside the enclave
    Blocked,

    /// unexpected signal delivery result {0}
    Unexpected(i32),
}

impl SignalError {
    /// Maps a non-zero in-enclave return code.
    pub fn from_code(code: i32) -> Self {
        match code {
            wicket::signal::delivery::UNREGISTERED => Self::Unregistered,
            wicket::signal::delivery::BAD_STATE => Self::BadState,
            wicket::signal::delivery::BLOCKED => Self::Blocked,
            code => Self::Unexpected(code),
        }
    }

    /// Whether retrying later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Blocked | Self::BadState)
    }
}

/// Errors of the host side of the bridge
#[derive(Display, Debug)]
pub enum Error {
    /// failed to create enclave: {0}
    Create(PlatformStatus),

    /// enclave has been destroyed
    Closed,

    /// failed to enter enclave: {0}
    Transport(PlatformStatus),

    /// {0}
    Internal(&'static str),

    /// failed to deliver signal: {0}
    Signal(SignalError),

    /// enclave reported failure: {0}
    Enclave(Status),

    /// invalid argument: {0}
    InvalidArgument(String),

    /// malformed message: {0}
    Message(wicket::message::Error),

    /// failed to destroy enclave: {0}
    Destroy(PlatformStatus),

    /// failed to reserve enclave address range: {0}
    Reserve(std::io::Error),

    /// failed to read enclave image: {0}
    Image(String),

    /// untrusted allocation of {0} bytes failed
    Allocation(usize),

    /// ABI mismatch: host has version {host_version} ({host_digest:x}), enclave has {enclave_version} ({enclave_digest:x})
    AbiMismatch {
        /// ABI version of the host
        host_version: u32,
        /// Call table digest of the host
        host_digest: u64,
        /// ABI version reported by the enclave
        enclave_version: u32,
        /// Call table digest reported by the enclave
        enclave_digest: u64,
    },

    /// an enclave named {0:?} is already loaded
    AlreadyExists(String),

    /// no enclave named {0:?} is loaded
    NotFound(String),

    /// failed to register exit handler: {0}
    Registration(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Reserve(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wicket::message::Error> for Error {
    fn from(e: wicket::message::Error) -> Self {
        Self::Message(e)
    }
}

/// Result type of this crate
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_codes() {
        assert_eq!(SignalError::from_code(1), SignalError::Unregistered);
        assert_eq!(SignalError::from_code(2), SignalError::BadState);
        assert_eq!(SignalError::from_code(-1), SignalError::Blocked);
        assert_eq!(SignalError::from_code(3), SignalError::Unexpected(3));

        assert!(SignalError::Blocked.is_transient());
        assert!(!SignalError::Unregistered.is_transient());
        assert!(!SignalError::Unexpected(3).is_transient());
    }

    #[test]
    fn display() {
        assert_eq!(Error::Closed.to_string(), "enclave has been destroyed");
        assert_eq!(
            Error::Create(PlatformStatus::ENCLAVE_CREATE_INTERRUPTED).to_string(),
            "failed to create enclave: ENCLAVE_CREATE_INTERRUPTED (0xf001)"
        );
        assert_eq!(
            Error::Internal("no output from enclave").to_string(),
            "no output from enclave"
        );
    }
}
