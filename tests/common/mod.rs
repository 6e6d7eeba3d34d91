// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use postern::backend::{Backend, CreateRequest, Created, Datum, Handle, PlatformStatus};
use postern::{LibcMemory, UntrustedMemory};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use postern_shim::Host;
use wicket::message::Writer;
use wicket::params::GateArgs;
use wicket::snapshot::EnclaveOutput;
use wicket::status::Status;
use wicket::{table_digest, CallIndex, Selector, ABI_VERSION};

/// Untrusted memory recording every live allocation
#[derive(Default)]
pub struct TrackingMemory {
    live: Mutex<HashMap<usize, usize>>,
    pub allocs: AtomicUsize,
    pub frees: AtomicUsize,
}

impl TrackingMemory {
    pub fn live(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

impl UntrustedMemory for TrackingMemory {
    fn allocate(&self, size: usize) -> *mut u8 {
        let ptr = LibcMemory.allocate(size);
        self.allocs.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().insert(ptr as usize, size);
        ptr
    }

    unsafe fn free(&self, ptr: *mut u8, size: usize) {
        let recorded = self.live.lock().unwrap().remove(&(ptr as usize));
        assert_eq!(recorded, Some(size), "double free or size mismatch");
        self.frees.fetch_add(1, Ordering::SeqCst);
        LibcMemory.free(ptr, size)
    }
}

/// What the scripted enclave answers to one entry
#[derive(Clone, Debug, Default)]
pub struct Reply {
    pub transport: Option<PlatformStatus>,
    pub retval: i32,
    pub output: Option<Vec<u8>>,
}

impl Reply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn retval(retval: i32) -> Self {
        Self {
            retval,
            ..Default::default()
        }
    }

    pub fn output(writer: &Writer) -> Self {
        Self {
            output: Some(writer.to_vec()),
            ..Default::default()
        }
    }

    pub fn transport(status: PlatformStatus) -> Self {
        Self {
            transport: Some(status),
            ..Default::default()
        }
    }

    pub fn enclave_output(output: &EnclaveOutput) -> Self {
        let mut writer = Writer::new();
        output.encode(&mut writer);
        Self::output(&writer)
    }

    pub fn status(status: Status) -> Self {
        Self::enclave_output(&EnclaveOutput {
            status,
            snapshot: None,
        })
    }
}

type Script = dyn Fn(CallIndex, Selector, &[u8]) -> Reply + Send + Sync;

/// A backend whose creation results and gate replies are scripted
pub struct Scripted {
    create: Mutex<VecDeque<PlatformStatus>>,
    script: Box<Script>,
    host: Mutex<Option<Arc<dyn Host>>>,
    pub attempts: AtomicUsize,
    pub ecalls: AtomicUsize,
    pub destroyed: AtomicBool,
    pub inputs: Mutex<Vec<(CallIndex, Selector, Vec<u8>)>>,
}

impl Scripted {
    /// Fails creation with each of `failures` in turn, then succeeds.
    pub fn new(
        failures: impl IntoIterator<Item = PlatformStatus>,
        script: impl Fn(CallIndex, Selector, &[u8]) -> Reply + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            create: Mutex::new(failures.into_iter().collect()),
            script: Box::new(script),
            host: Mutex::default(),
            attempts: AtomicUsize::new(0),
            ecalls: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
            inputs: Mutex::default(),
        })
    }

    /// Answers the handshake correctly and every other call with `Reply::ok`.
    pub fn healthy() -> Arc<Self> {
        Self::new([], |index, selector, _| handshake(index, selector))
    }
}

/// The reply of a well-behaved enclave to the reserved selectors
pub fn handshake(index: CallIndex, selector: Selector) -> Reply {
    match (index, selector) {
        (CallIndex::Dispatch, Selector::VERSION) => {
            let mut writer = Writer::new();
            writer.push(ABI_VERSION);
            writer.push(table_digest());
            Reply::output(&writer)
        }
        _ => Reply::ok(),
    }
}

impl Backend for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn data(&self) -> Vec<Datum> {
        vec![]
    }

    fn create(&self, request: &CreateRequest<'_>) -> Result<Created, PlatformStatus> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.create.lock().unwrap().pop_front() {
            return Err(status);
        }

        *self.host.lock().unwrap() = Some(request.host.clone());
        Ok(Created {
            handle: Handle(7),
            base_address: 0x10_0000,
        })
    }

    fn destroy(&self, handle: Handle) -> Result<(), PlatformStatus> {
        assert_eq!(handle, Handle(7));
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn enclave_size(&self, _: Handle) -> usize {
        0x1000
    }

    fn is_tcs_active(&self, _: Handle) -> bool {
        false
    }

    unsafe fn ecall(
        &self,
        handle: Handle,
        index: CallIndex,
        args: *mut GateArgs,
    ) -> Result<(), PlatformStatus> {
        assert_eq!(handle, Handle(7));
        self.ecalls.fetch_add(1, Ordering::SeqCst);

        let args = &mut *args;
        let params = &mut *args.buffer;
        let selector = Selector(args.selector);

        let input = match params.input.is_null() {
            true => Vec::new(),
            false => std::slice::from_raw_parts(params.input, params.input_size as usize).to_vec(),
        };
        let reply = (self.script)(index, selector, &input);
        self.inputs.lock().unwrap().push((index, selector, input));

        if let Some(output) = reply.output {
            let host = self.host.lock().unwrap().clone().unwrap();
            let ptr = host.allocate(output.len());
            std::ptr::copy_nonoverlapping(output.as_ptr(), ptr, output.len());
            params.output = ptr;
            params.output_size = output.len() as u64;
        }

        args.retval = reply.retval;
        match reply.transport {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }
}
