// SPDX-License-Identifier: Apache-2.0

//! The host's handle on one enclave

pub mod image;

use crate::backend::{Backend, CreateRequest, Handle, Image, PlatformStatus};
use crate::config::EnclaveConfig;
use crate::error::SignalError;
use crate::exit::{ExitCallProvider, HostBridge};
use crate::memory::{OwnedBuffer, UntrustedMemory};
use crate::{Error, Result};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};
use wicket::message::{Reader, Writer};
use wicket::params::{CallParams, GateArgs};
use wicket::snapshot::{EnclaveOutput, ForkHandshakeConfig, SnapshotLayout};
use wicket::{table_digest, CallIndex, Selector, ABI_VERSION};

/// How many times creation is attempted while the platform reports
/// [`PlatformStatus::ENCLAVE_CREATE_INTERRUPTED`]
pub const MAX_CREATE_ATTEMPTS: usize = 5;

/// Where to find the enclave image
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    /// A signed image file
    Path(PathBuf),

    /// A section of the running executable, by name
    Section(String),

    /// An image already in memory
    Bytes(Vec<u8>),
}

/// Parameters of [`Client::load`]
#[derive(Clone, Debug)]
pub struct LoadOptions {
    /// Human-readable name of the enclave
    pub name: String,

    /// Requested base address, or zero to let the platform choose
    pub base_address: usize,

    /// Requested size, or zero to take it from the image
    pub size: usize,

    /// The enclave image
    pub source: Source,

    /// Runtime configuration
    pub config: EnclaveConfig,

    /// Create a debug enclave, whatever the configuration says
    pub debug: bool,
}

impl LoadOptions {
    /// Options for `source` with default placement and configuration.
    pub fn new(name: impl Into<String>, source: Source) -> Self {
        Self {
            name: name.into(),
            base_address: 0,
            size: 0,
            source,
            config: EnclaveConfig::default(),
            debug: false,
        }
    }
}

/// Lifecycle state of a [`Client`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Calls may be issued
    Active,

    /// The enclave has been torn down
    Destroyed,
}

/// A loaded enclave
///
/// Calls are synchronous. Several threads may call concurrently, up to the
/// number of thread control structures of the enclave.
pub struct Client {
    name: String,
    handle: Handle,
    base_address: usize,
    size: usize,
    config: EnclaveConfig,
    destroyed: AtomicBool,
    backend: Arc<dyn Backend>,
    memory: Arc<dyn UntrustedMemory>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .field("handle", &self.handle)
            .field("base_address", &format_args!("{:#x}", self.base_address))
            .field("size", &format_args!("{:#x}", self.size))
            .field("state", &self.state())
            .finish()
    }
}

impl Client {
    /// Creates an enclave.
    ///
    /// Exit calls of the enclave are served by `exits`; buffers crossing the
    /// boundary come from `memory`.
    pub fn load(
        backend: Arc<dyn Backend>,
        options: LoadOptions,
        exits: ExitCallProvider,
        memory: Arc<dyn UntrustedMemory>,
    ) -> Result<Self> {
        let host = Arc::new(HostBridge::new(memory.clone(), Arc::new(exits)));

        let mut reservation = None;
        let bytes = match &options.source {
            Source::Path(_) => None,
            Source::Bytes(bytes) => Some(bytes.clone()),
            Source::Section(name) => {
                if options.base_address != 0 && options.size != 0 {
                    reservation = Some(image::Reservation::new(
                        options.base_address,
                        options.size,
                    )?);
                }

                let path = std::path::Path::new(image::SELF_EXE);
                Some(image::read_section(path, name)?)
            }
        };

        let image = match (&options.source, &bytes) {
            (Source::Path(path), _) => Image::Path(path),
            (_, Some(bytes)) => Image::Bytes(bytes),
            (_, None) => return Err(Error::Image("no image".into())),
        };

        let request = CreateRequest {
            image,
            base_address: options.base_address,
            size: options.size,
            tcs_count: options.config.tcs_count,
            debug: options.debug || options.config.debug,
            host,
        };

        // The range is free again from here until the platform maps it.
        drop(reservation);

        let mut attempt = 0;
        let created = loop {
            attempt += 1;

            match backend.create(&request) {
                Ok(created) => break created,
                Err(status) if status == PlatformStatus::ENCLAVE_CREATE_INTERRUPTED => {
                    warn!(
                        "creation of enclave {:?} interrupted (attempt {} of {})",
                        options.name, attempt, MAX_CREATE_ATTEMPTS
                    );

                    if attempt >= MAX_CREATE_ATTEMPTS {
                        return Err(Error::Create(status));
                    }
                }
                Err(status) => {
                    warn!("failed to create enclave {:?}: {}", options.name, status);
                    return Err(Error::Create(status));
                }
            }
        };

        let size = backend.enclave_size(created.handle);
        debug!(
            "loaded enclave {:?} on {} at {:#x} ({:#x} bytes)",
            options.name,
            backend.name(),
            created.base_address,
            size
        );

        Ok(Self {
            name: options.name,
            handle: created.handle,
            base_address: created.base_address,
            size,
            config: options.config,
            destroyed: AtomicBool::new(false),
            backend,
            memory,
        })
    }

    fn ensure_active(&self) -> Result<()> {
        match self.destroyed.load(Ordering::Acquire) {
            true => Err(Error::Closed),
            false => Ok(()),
        }
    }

    /// Enters the enclave once. Returns the logical return value and the
    /// output buffer, if the enclave produced one.
    fn enter(
        &self,
        index: CallIndex,
        selector: Selector,
        input: Option<&Writer>,
    ) -> Result<(i32, Option<OwnedBuffer<'_>>)> {
        self.ensure_active()?;

        let memory = &*self.memory;
        let input = match input {
            Some(writer) => OwnedBuffer::serialize(memory, writer)?,
            None => None,
        };

        let mut params = CallParams::default();
        if let Some(input) = &input {
            params.input = input.as_ptr();
            params.input_size = input.len() as u64;
        }

        let mut args = GateArgs::new(selector.0, &mut params);
        trace!(
            "entering {:?} via {:?} with selector {} ({} input bytes)",
            self.name,
            index,
            selector,
            params.input_size
        );

        let result = unsafe { self.backend.ecall(self.handle, index, &mut args) };
        drop(input);

        let output = unsafe { OwnedBuffer::adopt(memory, params.output, params.output_size) };
        result.map_err(Error::Transport)?;

        trace!(
            "left {:?} with {} ({} output bytes)",
            self.name,
            args.retval,
            output.as_ref().map(|o| o.len()).unwrap_or(0)
        );

        Ok((args.retval, output))
    }

    /// Calls the entry point behind `selector`.
    pub fn call(&self, selector: Selector, input: Option<&Writer>) -> Result<Reader> {
        let (retval, output) = self.enter(CallIndex::Dispatch, selector, input)?;
        if retval != 0 {
            return Err(Error::Internal("enclave call failed inside enclave"));
        }

        match output {
            Some(output) => Ok(Reader::deserialize(output.as_slice())?),
            None => Ok(Reader::default()),
        }
    }

    /// Checks that both sides of the gate agree on the call table.
    pub fn verify_abi(&self) -> Result<()> {
        let mut reply = self.call(Selector::VERSION, None)?;
        let enclave_version = reply.next::<u32>()?;
        let enclave_digest = reply.next::<u64>()?;

        if enclave_version != ABI_VERSION || enclave_digest != table_digest() {
            return Err(Error::AbiMismatch {
                host_version: ABI_VERSION,
                host_digest: table_digest(),
                enclave_version,
                enclave_digest,
            });
        }

        Ok(())
    }

    /// Hands the configuration to the trusted runtime.
    pub fn initialize(&self) -> Result<()> {
        let mut input = Writer::new();
        self.config.to_init_config().encode(&mut input);
        self.call(Selector::INITIALIZE, Some(&input))?;
        debug!("initialized enclave {:?}", self.name);
        Ok(())
    }

    /// Tears the enclave down.
    ///
    /// The trusted side gets one last call with [`Selector::FINALIZE`]. If
    /// that call fails, the enclave is left in place.
    pub fn destroy(&self) -> Result<()> {
        self.call(Selector::FINALIZE, None)?;
        self.backend
            .destroy(self.handle)
            .map_err(Error::Destroy)?;

        self.destroyed.store(true, Ordering::Release);
        debug!("destroyed enclave {:?}", self.name);
        Ok(())
    }

    /// Re-raises a host signal inside the enclave.
    ///
    /// `input` carries an encoded [`SigInfo`](wicket::signal::SigInfo).
    pub fn deliver_signal(&self, input: &Writer) -> Result<()> {
        let (retval, _) = self.enter(CallIndex::DeliverSignal, Selector(0), Some(input))?;
        match retval {
            0 => Ok(()),
            code => Err(Error::Signal(SignalError::from_code(code))),
        }
    }

    fn structured(&self, index: CallIndex, input: Option<&Writer>) -> Result<EnclaveOutput> {
        let (retval, output) = self.enter(index, Selector(0), input)?;
        let output = match (retval, output) {
            (0, Some(output)) if !output.is_empty() => output,
            _ => return Err(Error::Internal("no output from enclave")),
        };

        let mut reader = Reader::deserialize(output.as_slice())?;
        let output = EnclaveOutput::decode(&mut reader)?;
        match output.status.is_ok() {
            true => Ok(output),
            false => Err(Error::Enclave(output.status)),
        }
    }

    /// Captures the enclave state for a forked sibling.
    pub fn take_snapshot(&self) -> Result<SnapshotLayout> {
        self.structured(CallIndex::TakeSnapshot, None)?
            .snapshot
            .ok_or(Error::Internal("no snapshot in enclave output"))
    }

    /// Runs one side of the snapshot key exchange with a forked sibling.
    pub fn transfer_secure_snapshot_key(&self, config: &ForkHandshakeConfig) -> Result<()> {
        let mut input = Writer::new();
        config
            .encode(&mut input)
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;

        self.structured(CallIndex::TransferSecureSnapshotKey, Some(&input))?;
        Ok(())
    }

    pub(crate) fn stamp_process(&self) {
        self.backend.set_process_id(self.handle);
    }

    /// Platform handle
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Size of the enclave in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Address the enclave is mapped at
    pub fn base_address(&self) -> usize {
        self.base_address
    }

    /// Human-readable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration the enclave was loaded with
    pub fn config(&self) -> &EnclaveConfig {
        &self.config
    }

    /// Whether a thread is currently inside the enclave
    pub fn is_tcs_active(&self) -> bool {
        !self.is_closed() && self.backend.is_tcs_active(self.handle)
    }

    /// Lifecycle state
    pub fn state(&self) -> State {
        match self.is_closed() {
            true => State::Destroyed,
            false => State::Active,
        }
    }

    /// Whether [`Client::destroy`] has completed
    pub fn is_closed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}
