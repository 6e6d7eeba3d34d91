// SPDX-License-Identifier: Apache-2.0

//! Gate entry points of the trusted runtime

use crate::app::{Application, Context};
use crate::host::{Host, HostCalls};
use crate::signal::SignalManager;
use crate::validate::Boundary;

use std::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use log::{debug, trace, warn};
use wicket::config::InitConfig;
use wicket::message::{Reader, Writer};
use wicket::params::{CallParams, GateArgs};
use wicket::signal::{delivery, SigInfo};
use wicket::snapshot::{EnclaveOutput, ForkHandshakeConfig};
use wicket::status::{Code, Status};
use wicket::{table_digest, CallIndex, Selector, ABI_VERSION};

/// Logical return value of a successful entry
pub const RETVAL_OK: i32 = 0;

/// Logical return value of a failed entry
pub const RETVAL_FAILED: i32 = 1;

/// Lifecycle of the trusted runtime
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Loaded, waiting for [`Selector::INITIALIZE`]
    Uninitialized = 0,
    /// Serving entry calls
    Running = 1,
    /// Torn down by [`Selector::FINALIZE`]
    Finalized = 2,
}

impl From<u8> for Lifecycle {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Running,
            _ => Self::Finalized,
        }
    }
}

/// The trusted runtime of one enclave
pub struct Enclave {
    boundary: Boundary,
    host: Arc<dyn Host>,
    app: Application,
    signals: SignalManager,
    config: RwLock<Option<InitConfig>>,
    state: AtomicU8,
}

impl Enclave {
    /// Creates the runtime of an enclave occupying `protected`.
    pub fn new(protected: Range<usize>, host: Arc<dyn Host>, app: Application) -> Self {
        Self {
            boundary: Boundary::new(protected),
            host,
            app,
            signals: SignalManager::new(),
            config: RwLock::new(None),
            state: AtomicU8::new(Lifecycle::Uninitialized as u8),
        }
    }

    /// The current lifecycle state
    pub fn lifecycle(&self) -> Lifecycle {
        self.state.load(Ordering::SeqCst).into()
    }

    /// The enclave's signal handlers and masks
    pub fn signals(&self) -> &SignalManager {
        &self.signals
    }

    /// The protected address range
    pub fn protected(&self) -> &Range<usize> {
        self.boundary.range()
    }

    fn with_context<T>(&self, f: impl FnOnce(&Context<'_>) -> T) -> T {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        let ctx = Context {
            host: HostCalls::new(&*self.host, &self.boundary),
            signals: &self.signals,
            protected: self.boundary.range(),
            config: config.as_ref(),
        };
        f(&ctx)
    }

    /// Handles one gate entry.
    ///
    /// Every address reachable from `args` is validated before use; a
    /// violation aborts the process.
    ///
    /// # Safety
    ///
    /// `args` must point to a [`GateArgs`] whose parameters block and input
    /// buffer are valid for the duration of the call, as long as they pass
    /// validation.
    pub unsafe fn enter(&self, index: CallIndex, args: *mut GateArgs) {
        let gate = self.boundary.read(args, "gate arguments");
        let params = self.boundary.read(gate.buffer, "call parameters block");
        let input = self
            .boundary
            .copy_in(params.input, params.input_size, "input buffer");

        trace!("enter {:?} with {} bytes", index, input.len());

        let retval = match index {
            CallIndex::Dispatch => self.dispatch(Selector(gate.selector), &input, gate.buffer),
            CallIndex::DeliverSignal => self.deliver_signal(&input),
            CallIndex::TakeSnapshot => {
                let output = self.take_snapshot();
                self.respond(&output, gate.buffer)
            }
            CallIndex::TransferSecureSnapshotKey => {
                let output = self.transfer_secure_snapshot_key(&input);
                self.respond(&output, gate.buffer)
            }
        };

        let retval_ptr = std::ptr::addr_of_mut!((*args).retval);
        self.boundary.write(retval_ptr, retval, "gate return value");
    }

    /// Allocates the output in untrusted memory and publishes it through the
    /// parameters block.
    unsafe fn publish(&self, bytes: &[u8], buffer: *mut CallParams) -> i32 {
        if bytes.is_empty() {
            return RETVAL_OK;
        }

        let ptr = self.host.allocate(bytes.len());
        if ptr.is_null() {
            warn!("untrusted allocation of {} bytes failed", bytes.len());
            return RETVAL_FAILED;
        }

        self.boundary.copy_out(ptr, bytes, "output buffer");

        let output = std::ptr::addr_of_mut!((*buffer).output);
        let output_size = std::ptr::addr_of_mut!((*buffer).output_size);
        self.boundary.write(output, ptr, "output pointer");
        self.boundary
            .write(output_size, bytes.len() as u64, "output size");

        RETVAL_OK
    }

    unsafe fn respond(&self, output: &EnclaveOutput, buffer: *mut CallParams) -> i32 {
        let mut writer = Writer::new();
        output.encode(&mut writer);
        self.publish(&writer.to_vec(), buffer)
    }

    unsafe fn dispatch(&self, selector: Selector, input: &[u8], buffer: *mut CallParams) -> i32 {
        let mut reader = match Reader::deserialize(input) {
            Ok(reader) => reader,
            Err(e) => {
                warn!("malformed input for selector {}: {}", selector, e);
                return RETVAL_FAILED;
            }
        };

        match self.run(selector, &mut reader) {
            Ok(writer) => self.publish(&writer.to_vec(), buffer),
            Err(status) => {
                debug!("selector {} failed: {}", selector, status);
                RETVAL_FAILED
            }
        }
    }

    fn run(&self, selector: Selector, input: &mut Reader) -> Result<Writer, Status> {
        match selector {
            Selector::VERSION => {
                let mut writer = Writer::new();
                writer.push(ABI_VERSION);
                writer.push(table_digest());
                Ok(writer)
            }

            Selector::INITIALIZE => self.initialize(input).map(|_| Writer::new()),
            Selector::FINALIZE => self.finalize().map(|_| Writer::new()),

            selector => {
                if self.lifecycle() != Lifecycle::Running {
                    return Err(Status::new(
                        Code::FailedPrecondition,
                        format!("enclave is {:?}", self.lifecycle()),
                    ));
                }

                let entry = self.app.entries.get(&selector).ok_or_else(|| {
                    Status::new(Code::NotFound, format!("no handler for selector {}", selector))
                })?;

                self.with_context(|ctx| entry.call(ctx, input))
            }
        }
    }

    fn initialize(&self, input: &mut Reader) -> Result<(), Status> {
        let config = InitConfig::decode(input).map_err(|e| Status::new(Code::InvalidArgument, e))?;

        self.state
            .compare_exchange(
                Lifecycle::Uninitialized as u8,
                Lifecycle::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|s| {
                Status::new(
                    Code::FailedPrecondition,
                    format!("cannot initialize: enclave is {:?}", Lifecycle::from(s)),
                )
            })?;

        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Some(config);
        debug!("enclave initialized");

        match &self.app.initialize {
            Some(hook) => self.with_context(|ctx| hook(ctx)),
            None => Ok(()),
        }
    }

    fn finalize(&self) -> Result<(), Status> {
        let previous = Lifecycle::from(self.state.swap(Lifecycle::Finalized as u8, Ordering::SeqCst));
        if previous == Lifecycle::Finalized {
            return Err(Status::new(Code::FailedPrecondition, "enclave already finalized"));
        }

        let result = match (&self.app.finalize, previous) {
            (Some(hook), Lifecycle::Running) => self.with_context(|ctx| hook(ctx)),
            _ => Ok(()),
        };

        // A failed hook leaves the enclave serving, so FINALIZE can be retried.
        match &result {
            Ok(()) => debug!("enclave finalized"),
            Err(status) => {
                warn!("finalization failed: {}", status);
                self.state.store(previous as u8, Ordering::SeqCst);
            }
        }

        result
    }

    fn deliver_signal(&self, input: &[u8]) -> i32 {
        let info = match Reader::deserialize(input).and_then(|mut r| SigInfo::decode(&mut r)) {
            Ok(info) => info,
            Err(e) => {
                warn!("malformed signal record: {}", e);
                return delivery::UNREGISTERED;
            }
        };

        if self.lifecycle() != Lifecycle::Running {
            return delivery::BAD_STATE;
        }

        self.signals.deliver(info)
    }

    fn fork_enabled(&self) -> Result<(), Status> {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        match config.as_ref() {
            Some(config) if config.enable_fork => Ok(()),
            _ => Err(Status::new(Code::FailedPrecondition, "secure fork is disabled")),
        }
    }

    fn take_snapshot(&self) -> EnclaveOutput {
        let result = self.fork_enabled().and_then(|_| match &self.app.snapshot {
            Some(snapshot) => self.with_context(|ctx| snapshot.take(ctx)),
            None => Err(Status::new(Code::Unimplemented, "application does not support snapshots")),
        });

        match result {
            Ok(layout) => EnclaveOutput {
                status: Status::ok(),
                snapshot: Some(layout),
            },
            Err(status) => EnclaveOutput {
                status,
                snapshot: None,
            },
        }
    }

    fn transfer_secure_snapshot_key(&self, input: &[u8]) -> EnclaveOutput {
        let config = Reader::deserialize(input)
            .and_then(|mut r| ForkHandshakeConfig::decode(&mut r))
            .map_err(|e| Status::new(Code::InvalidArgument, e));

        let result = config.and_then(|config| {
            self.fork_enabled()?;
            match &self.app.snapshot {
                Some(snapshot) => self.with_context(|ctx| snapshot.transfer_key(ctx, &config)),
                None => Err(Status::new(Code::Unimplemented, "application does not support snapshots")),
            }
        });

        EnclaveOutput {
            status: result.err().unwrap_or_default(),
            snapshot: None,
        }
    }
}
