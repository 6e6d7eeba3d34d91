// SPDX-License-Identifier: Apache-2.0

//! Handlers of calls leaving the enclave

use crate::memory::{OwnedBuffer, UntrustedMemory};
use crate::{Error, Result};

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use log::{debug, trace, warn};
use postern_shim::Host;
use wicket::message::{Reader, Writer};
use wicket::params::CallParams;
use wicket::status::{Code, Status};
use wicket::{exit, Selector};

/// Handler of one exit selector
pub trait ExitHandler: Send + Sync {
    /// Runs the handler with the decoded input.
    fn handle(&self, input: &mut Reader) -> std::result::Result<Writer, Status>;
}

impl<F> ExitHandler for F
where
    F: Fn(&mut Reader) -> std::result::Result<Writer, Status> + Send + Sync,
{
    fn handle(&self, input: &mut Reader) -> std::result::Result<Writer, Status> {
        self(input)
    }
}

/// Registry of exit handlers, keyed by selector
///
/// Built before the enclave is loaded and handed to
/// [`Client::load`](crate::Client::load).
#[derive(Default)]
pub struct ExitCallProvider {
    handlers: HashMap<Selector, Box<dyn ExitHandler>>,
}

impl ExitCallProvider {
    /// Creates a provider without any handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider with the runtime's host calls registered.
    ///
    /// Buffers handed out by [`exit::ALLOCATE_BUFFERS`] come from `memory`.
    pub fn with_host_calls(memory: Arc<dyn UntrustedMemory>) -> Self {
        let mut provider = Self::new();
        for (selector, handler) in host_calls(memory) {
            provider.handlers.insert(selector, handler);
        }
        provider
    }

    /// Registers the function handling `selector`.
    pub fn register(
        &mut self,
        selector: Selector,
        handler: impl Fn(&mut Reader) -> std::result::Result<Writer, Status> + Send + Sync + 'static,
    ) -> Result<()> {
        self.register_handler(selector, handler)
    }

    /// Registers the [`ExitHandler`] implementation handling `selector`.
    pub fn register_handler(
        &mut self,
        selector: Selector,
        handler: impl ExitHandler + 'static,
    ) -> Result<()> {
        if self.handlers.contains_key(&selector) {
            return Err(Error::Registration(format!(
                "selector {} is already registered",
                selector
            )));
        }

        self.handlers.insert(selector, Box::new(handler));
        Ok(())
    }

    /// Whether a handler is registered for `selector`
    pub fn contains(&self, selector: Selector) -> bool {
        self.handlers.contains_key(&selector)
    }

    /// Runs the handler of `selector`; `None` if there is none.
    pub fn invoke(
        &self,
        selector: Selector,
        input: &mut Reader,
    ) -> Option<std::result::Result<Writer, Status>> {
        let handler = self.handlers.get(&selector)?;
        trace!("exit call {} with {} values", selector, input.len());
        Some(handler.handle(input))
    }
}

type Boxed = Box<dyn ExitHandler>;

fn host_calls(memory: Arc<dyn UntrustedMemory>) -> Vec<(Selector, Boxed)> {
    fn internal(e: wicket::message::Error) -> Status {
        Status::new(Code::InvalidArgument, e)
    }

    fn errno() -> i32 {
        std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
    }

    let alloc = memory.clone();
    let allocate_buffers = move |input: &mut Reader| {
        let count = input.next::<u64>().map_err(internal)?;
        let size = input.next::<u64>().map_err(internal)? as usize;
        if size == 0 {
            return Err(Status::new(Code::InvalidArgument, "zero sized buffers"));
        }

        let mut buffers = Vec::new();
        for _ in 0..count {
            let ptr = alloc.allocate(size);
            if ptr.is_null() {
                for ptr in buffers {
                    unsafe { alloc.free(ptr, size) };
                }
                return Err(Status::new(Code::ResourceExhausted, "out of memory"));
            }
            buffers.push(ptr);
        }

        let mut writer = Writer::new();
        for ptr in buffers {
            writer.push(ptr as u64);
        }
        Ok(writer)
    };

    let deallocate_free_list = move |input: &mut Reader| {
        let size = input.next::<u64>().map_err(internal)? as usize;
        while input.has_next() {
            let ptr = input.next::<u64>().map_err(internal)? as *mut u8;
            if !ptr.is_null() {
                unsafe { memory.free(ptr, size) };
            }
        }
        Ok(Writer::new())
    };

    let debug_puts = |input: &mut Reader| {
        let message = input.next_string().map_err(internal)?;
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(message.as_bytes());
        let _ = stderr.flush();
        Ok(Writer::new())
    };

    let sched_yield = |_: &mut Reader| {
        let mut writer = Writer::new();
        writer.push(unsafe { libc::sched_yield() });
        Ok(writer)
    };

    let isatty = |input: &mut Reader| {
        let fd = input.next::<i32>().map_err(internal)?;
        let ret = unsafe { libc::isatty(fd) };
        let mut writer = Writer::new();
        writer.push(ret);
        writer.push(if ret == 1 { 0 } else { errno() });
        Ok(writer)
    };

    let usleep = |input: &mut Reader| {
        let usec = input.next::<u32>().map_err(internal)?;
        let ret = unsafe { libc::usleep(usec as libc::useconds_t) };
        let mut writer = Writer::new();
        writer.push(ret);
        writer.push(if ret < 0 { errno() } else { 0 });
        Ok(writer)
    };

    vec![
        (exit::ALLOCATE_BUFFERS, boxed(allocate_buffers)),
        (exit::DEALLOCATE_FREE_LIST, boxed(deallocate_free_list)),
        (exit::DEBUG_PUTS, boxed(debug_puts)),
        (exit::SCHED_YIELD, boxed(sched_yield)),
        (exit::ISATTY, boxed(isatty)),
        (exit::USLEEP, boxed(usleep)),
    ]
}

fn boxed(
    f: impl Fn(&mut Reader) -> std::result::Result<Writer, Status> + Send + Sync + 'static,
) -> Boxed {
    Box::new(f)
}

/// Host services exposed to the enclave: the untrusted allocator and the
/// exit handlers
pub struct HostBridge {
    memory: Arc<dyn UntrustedMemory>,
    exits: Arc<ExitCallProvider>,
}

impl HostBridge {
    /// Combines an allocator and a set of exit handlers.
    pub fn new(memory: Arc<dyn UntrustedMemory>, exits: Arc<ExitCallProvider>) -> Self {
        Self { memory, exits }
    }

    fn publish(&self, params: &mut CallParams, writer: &Writer) -> bool {
        match OwnedBuffer::serialize(&*self.memory, writer) {
            Ok(Some(buffer)) => {
                let (ptr, len) = buffer.into_raw();
                params.output = ptr;
                params.output_size = len as u64;
                true
            }
            Ok(None) => true,
            Err(e) => {
                warn!("failed to publish exit call output: {}", e);
                false
            }
        }
    }
}

impl Host for HostBridge {
    fn allocate(&self, size: usize) -> *mut u8 {
        self.memory.allocate(size)
    }

    unsafe fn free(&self, ptr: *mut u8, size: usize) {
        self.memory.free(ptr, size)
    }

    unsafe fn exit(
        &self,
        selector: Selector,
        params: &mut CallParams,
    ) -> std::result::Result<i32, u32> {
        let input = match params.input.is_null() {
            true => &[][..],
            false => std::slice::from_raw_parts(params.input, params.input_size as usize),
        };

        let result = match Reader::deserialize(input) {
            Ok(mut reader) => self.exits.invoke(selector, &mut reader),
            Err(e) => Some(Err(Status::new(Code::InvalidArgument, e))),
        };

        let (code, writer) = match result {
            None => {
                debug!("no exit handler for selector {}", selector);
                return Ok(exit::code::UNKNOWN_SELECTOR);
            }
            Some(Ok(writer)) => (exit::code::OK, writer),
            Some(Err(status)) => {
                let mut writer = Writer::new();
                status.encode(&mut writer);
                (exit::code::FAILED, writer)
            }
        };

        match self.publish(params, &writer) {
            true => Ok(code),
            false => Ok(exit::code::FAILED),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::LibcMemory;

    #[test]
    fn duplicate_registration() {
        let mut provider = ExitCallProvider::new();
        let selector = Selector::user(1);

        provider.register(selector, |_| Ok(Writer::new())).unwrap();
        assert!(matches!(
            provider.register(selector, |_| Ok(Writer::new())),
            Err(Error::Registration(_))
        ));
        assert!(provider.contains(selector));
    }

    #[test]
    fn invoke() {
        let mut provider = ExitCallProvider::new();
        provider
            .register(Selector::user(1), |input| {
                let value = input
                    .next::<u32>()
                    .map_err(|e| Status::new(Code::InvalidArgument, e))?;
                let mut writer = Writer::new();
                writer.push(value * 2);
                Ok(writer)
            })
            .unwrap();

        let mut input = Writer::new();
        input.push(21u32);
        let mut reader = Reader::deserialize(&input.to_vec()).unwrap();

        let output = provider
            .invoke(Selector::user(1), &mut reader)
            .unwrap()
            .unwrap();
        let mut output = Reader::deserialize(&output.to_vec()).unwrap();
        assert_eq!(output.next::<u32>(), Ok(42));

        assert!(provider
            .invoke(Selector::user(2), &mut Reader::default())
            .is_none());
    }

    #[test]
    fn bridge_statuses() {
        let memory: Arc<dyn UntrustedMemory> = Arc::new(LibcMemory);
        let mut provider = ExitCallProvider::with_host_calls(memory.clone());
        provider
            .register(Selector::user(1), |_| {
                Err(Status::new(Code::PermissionDenied, "nope"))
            })
            .unwrap();
        let bridge = HostBridge::new(memory, Arc::new(provider));

        let mut params = CallParams::default();
        let code = unsafe { bridge.exit(Selector::user(1), &mut params) };
        assert_eq!(code, Ok(exit::code::FAILED));

        let output = unsafe {
            OwnedBuffer::adopt(&LibcMemory, params.output, params.output_size).unwrap()
        };
        let mut reader = Reader::deserialize(output.as_slice()).unwrap();
        let status = Status::decode(&mut reader).unwrap();
        assert_eq!(status.code, Code::PermissionDenied);

        let mut params = CallParams::default();
        let code = unsafe { bridge.exit(Selector::user(9), &mut params) };
        assert_eq!(code, Ok(exit::code::UNKNOWN_SELECTOR));
        assert!(params.output.is_null());

        let mut params = CallParams::default();
        let code = unsafe { bridge.exit(exit::SCHED_YIELD, &mut params) };
        assert_eq!(code, Ok(exit::code::OK));
        let output = unsafe {
            OwnedBuffer::adopt(&LibcMemory, params.output, params.output_size).unwrap()
        };
        let mut reader = Reader::deserialize(output.as_slice()).unwrap();
        assert_eq!(reader.next::<i32>(), Ok(0));
    }
}
