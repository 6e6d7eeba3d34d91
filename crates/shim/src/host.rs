// SPDX-License-Identifier: Apache-2.0

//! Services the host provides to the enclave, and outward calls

use crate::validate::{violation, Boundary};

use log::trace;
use wicket::message::{Reader, Writer};
use wicket::params::CallParams;
use wicket::status::{Code, Status};
use wicket::{exit, Selector};

/// Host side of the exit gate
///
/// Memory returned by [`Host::allocate`] is untrusted and must be validated
/// by the caller before use.
pub trait Host: Send + Sync {
    /// Allocates `size` bytes of untrusted memory. Returns null on failure.
    fn allocate(&self, size: usize) -> *mut u8;

    /// Releases memory obtained from [`Host::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Host::allocate`] with the same `size` and must
    /// not be used afterwards.
    unsafe fn free(&self, ptr: *mut u8, size: usize);

    /// Leaves the enclave to run the host handler of `selector`.
    ///
    /// Returns one of the [`exit::code`] values, or `Err` with a platform
    /// status if the exit itself failed.
    ///
    /// # Safety
    ///
    /// `params.input` must be valid for `params.input_size` bytes.
    unsafe fn exit(&self, selector: Selector, params: &mut CallParams) -> Result<i32, u32>;
}

/// Outward calls, made from inside the enclave
pub struct HostCalls<'a> {
    host: &'a dyn Host,
    boundary: &'a Boundary,
}

impl<'a> HostCalls<'a> {
    pub(crate) fn new(host: &'a dyn Host, boundary: &'a Boundary) -> Self {
        Self { host, boundary }
    }

    /// Allocates untrusted memory and copies `bytes` into it.
    fn stage(&self, bytes: &[u8]) -> Result<*mut u8, Status> {
        if bytes.is_empty() {
            return Ok(std::ptr::null_mut());
        }

        let ptr = self.host.allocate(bytes.len());
        if ptr.is_null() {
            return Err(Status::new(Code::ResourceExhausted, "untrusted allocation failed"));
        }

        unsafe { self.boundary.copy_out(ptr, bytes, "exit call input buffer") };
        Ok(ptr)
    }

    /// Calls the host handler of `selector` with `input`.
    ///
    /// Aborts if the exit itself fails or the host answers with memory
    /// inside the enclave.
    pub fn call(&self, selector: Selector, input: &Writer) -> Result<Reader, Status> {
        let bytes = input.to_vec();
        let staged = self.stage(&bytes)?;

        let mut params = CallParams {
            input: staged,
            input_size: bytes.len() as u64,
            ..Default::default()
        };

        trace!("exit {} with {} bytes", selector, bytes.len());
        let result = unsafe { self.host.exit(selector, &mut params) };

        if !staged.is_null() {
            unsafe { self.host.free(staged, bytes.len()) };
        }

        let code = match result {
            Ok(code) => code,
            Err(status) => violation(&format!("exit call {} failed: {:#x}", selector, status)),
        };

        let output = unsafe {
            self.boundary
                .copy_in(params.output, params.output_size, "exit call output buffer")
        };
        if !params.output.is_null() {
            unsafe { self.host.free(params.output, output.len()) };
        }

        let mut reader = Reader::deserialize(&output)
            .map_err(|e| Status::new(Code::Internal, format!("malformed exit reply: {}", e)))?;

        match code {
            exit::code::OK => Ok(reader),
            exit::code::FAILED => Err(Status::decode(&mut reader).unwrap_or_else(|e| {
                Status::new(Code::Internal, format!("malformed exit status: {}", e))
            })),
            exit::code::UNKNOWN_SELECTOR => Err(Status::new(
                Code::NotFound,
                format!("no host handler for selector {}", selector),
            )),
            n => violation(&format!("exit call {} returned {}", selector, n)),
        }
    }

    /// Allocates `count` untrusted buffers of `size` bytes each.
    ///
    /// Every returned buffer is checked to lie outside the enclave.
    pub fn allocate_buffers(&self, count: usize, size: usize) -> Result<Vec<*mut u8>, Status> {
        let mut input = Writer::new();
        input.push(count as u64);
        input.push(size as u64);

        let mut reply = self.call(exit::ALLOCATE_BUFFERS, &input)?;
        if reply.remaining() != count {
            return Err(Status::new(
                Code::Internal,
                format!("expected {} buffers, got {}", count, reply.remaining()),
            ));
        }

        let mut buffers = Vec::with_capacity(count);
        for _ in 0..count {
            let addr = reply.next::<u64>().map_err(|e| Status::new(Code::Internal, e))?;
            let addr = usize::try_from(addr).unwrap_or_else(|_| violation("buffer address"));
            if addr == 0 {
                violation("null untrusted buffer");
            }

            self.boundary.check(addr, size, "untrusted buffer");
            buffers.push(addr as *mut u8);
        }

        Ok(buffers)
    }

    /// Returns buffers from [`HostCalls::allocate_buffers`] to the host.
    pub fn deallocate_free_list(&self, buffers: &[*mut u8], size: usize) -> Result<(), Status> {
        let mut input = Writer::new();
        input.push(size as u64);
        for buffer in buffers {
            input.push(*buffer as u64);
        }

        self.call(exit::DEALLOCATE_FREE_LIST, &input).map(drop)
    }

    /// Prints `message` on the host's standard error.
    pub fn debug_puts(&self, message: &str) -> Result<(), Status> {
        let mut input = Writer::new();
        input.push_str(message);
        self.call(exit::DEBUG_PUTS, &input).map(drop)
    }

    /// Yields the host thread.
    pub fn sched_yield(&self) -> Result<i32, Status> {
        let mut reply = self.call(exit::SCHED_YIELD, &Writer::new())?;
        reply.next().map_err(|e| Status::new(Code::Internal, e))
    }

    /// Whether `fd` is a terminal on the host
    pub fn isatty(&self, fd: i32) -> Result<bool, Status> {
        let mut input = Writer::new();
        input.push(fd);
        let (ret, _) = self.errno_reply(exit::ISATTY, &input)?;
        Ok(ret == 1)
    }

    /// Sleeps on the host for `usec` microseconds.
    ///
    /// The inner error is the host's errno.
    pub fn usleep(&self, usec: u32) -> Result<Result<(), i32>, Status> {
        let mut input = Writer::new();
        input.push(usec);
        let (ret, errno) = self.errno_reply(exit::USLEEP, &input)?;
        Ok(if ret < 0 { Err(errno) } else { Ok(()) })
    }

    fn errno_reply(&self, selector: Selector, input: &Writer) -> Result<(i32, i32), Status> {
        let mut reply = self.call(selector, input)?;
        let internal = |e: wicket::message::Error| Status::new(Code::Internal, e);
        let ret = reply.next::<i32>().map_err(internal)?;
        let errno = reply.next::<i32>().map_err(internal)?;
        Ok((ret, errno))
    }
}
