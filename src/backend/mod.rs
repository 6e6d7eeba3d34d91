// SPDX-License-Identifier: Apache-2.0

//! Platform primitives that create, enter and destroy enclaves

#[cfg(feature = "backend-sim")]
pub mod sim;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use postern_shim::Host;
use wicket::params::GateArgs;
use wicket::CallIndex;

/// Status code returned by a platform primitive
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct PlatformStatus(pub u32);

macro_rules! statuses {
    ($($name:ident = $value:literal,)*) => {
        impl PlatformStatus {
            $(
                #[allow(missing_docs)]
                pub const $name: Self = Self($value);
            )*

            /// Symbolic name of a known status
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some(stringify!($name)),)*
                    _ => None,
                }
            }
        }
    };
}

statuses! {
    SUCCESS = 0x0000,
    UNEXPECTED = 0x0001,
    INVALID_PARAMETER = 0x0002,
    OUT_OF_MEMORY = 0x0003,
    ENCLAVE_LOST = 0x0004,
    INVALID_STATE = 0x0005,
    INVALID_FUNCTION = 0x1001,
    OUT_OF_TCS = 0x1003,
    ENCLAVE_CRASHED = 0x1006,
    INVALID_ENCLAVE_ID = 0x2002,
    ENCLAVE_FILE_ACCESS = 0x200f,
    ENCLAVE_CREATE_INTERRUPTED = 0xf001,
}

impl PlatformStatus {
    /// Whether this is [`PlatformStatus::SUCCESS`]
    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl fmt::Display for PlatformStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({:#x})", name, self.0),
            None => write!(f, "unknown status ({:#x})", self.0),
        }
    }
}

impl fmt::Debug for PlatformStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Opaque identifier of a created enclave
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

/// Where the enclave image comes from
#[derive(Copy, Clone, Debug)]
pub enum Image<'a> {
    /// A signed image file, opened by the platform
    Path(&'a Path),

    /// An image already in memory
    Bytes(&'a [u8]),
}

/// Everything a platform needs to create one enclave
#[derive(Clone)]
pub struct CreateRequest<'a> {
    /// The enclave image
    pub image: Image<'a>,

    /// Requested base address, or zero to let the platform choose
    pub base_address: usize,

    /// Requested size, or zero to take it from the image
    pub size: usize,

    /// Number of thread control structures
    pub tcs_count: usize,

    /// Whether to create a debug enclave
    pub debug: bool,

    /// Untrusted services reachable from inside the enclave
    pub host: Arc<dyn Host>,
}

/// A successfully created enclave
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Created {
    /// Platform handle
    pub handle: Handle,

    /// Address the enclave was mapped at
    pub base_address: usize,
}

/// A platform able to host enclaves
pub trait Backend: Send + Sync {
    /// The name of the backend
    fn name(&self) -> &'static str;

    /// Whether or not the platform has support for this backend
    fn have(&self) -> bool {
        self.data().iter().all(|d| d.pass)
    }

    /// The tests that show platform support for the backend
    fn data(&self) -> Vec<Datum>;

    /// Creates an enclave.
    fn create(&self, request: &CreateRequest<'_>) -> Result<Created, PlatformStatus>;

    /// Destroys an enclave.
    fn destroy(&self, handle: Handle) -> Result<(), PlatformStatus>;

    /// Size of the enclave's address range in bytes
    fn enclave_size(&self, handle: Handle) -> usize;

    /// Whether any thread control structure of the enclave is in use
    fn is_tcs_active(&self, handle: Handle) -> bool;

    /// Informs the enclave that it now belongs to the calling process.
    fn set_process_id(&self, _handle: Handle) {}

    /// Enters the enclave synchronously through the call gate.
    ///
    /// # Safety
    ///
    /// `args` must point to valid [`GateArgs`] whose parameters block stays
    /// valid for the duration of the call.
    unsafe fn ecall(
        &self,
        handle: Handle,
        index: CallIndex,
        args: *mut GateArgs,
    ) -> Result<(), PlatformStatus>;
}

/// A probe result shown by `postern info`
#[derive(Clone, Debug, Serialize)]
pub struct Datum {
    /// The name of this datum.
    pub name: String,

    /// Whether the datum indicates support for the platform or not.
    pub pass: bool,

    /// Short additional information to display to the user.
    pub info: Option<String>,

    /// Longer explanatory message on how to resolve problems.
    pub mesg: Option<String>,
}

impl Serialize for dyn Backend {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut backend = serializer.serialize_struct("Backend", 3)?;
        backend.serialize_field("name", self.name())?;
        backend.serialize_field("have", &self.have())?;
        backend.serialize_field("data", &self.data())?;
        backend.end()
    }
}

/// Backends compiled into this build
pub static BACKENDS: Lazy<Vec<Arc<dyn Backend>>> = Lazy::new(|| {
    #[allow(unused_mut)]
    let mut backends: Vec<Arc<dyn Backend>> = Vec::new();

    #[cfg(feature = "backend-sim")]
    backends.push(Arc::new(sim::Simulator::demo()));

    backends
});
