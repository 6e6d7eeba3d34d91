// SPDX-License-Identifier: Apache-2.0

//! An in-process enclave for development and testing
//!
//! The trusted runtime runs in the host process. Its protected range is an
//! anonymous mapping without any access rights, so the boundary checks of
//! the runtime behave as they would on hardware while nothing actually
//! isolates the enclave.

use super::{Backend, CreateRequest, Created, Datum, Handle, Image, PlatformStatus};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};

use log::{debug, error, trace, warn};
use mmarinus::{perms, Map};
use postern_shim::{Application, Context, Enclave, Snapshot};
use wicket::message::{Reader, Writer};
use wicket::params::GateArgs;
use wicket::signal::{Signal, SignalSet};
use wicket::snapshot::{ForkHandshakeConfig, Region, RegionKind, SnapshotLayout};
use wicket::status::{Code, Status};
use wicket::{table_digest, CallIndex, Selector};

/// Size of the protected range when the request does not name one
pub const DEFAULT_SIZE: usize = 1 << 20;

/// Builds the trusted application from the bytes of an enclave image.
pub type Factory = dyn Fn(&[u8]) -> Result<Application, Status> + Send + Sync;

struct Reservation(Map<perms::None>);

// The mapping is never accessed; it only keeps the address range taken.
unsafe impl Send for Reservation {}
unsafe impl Sync for Reservation {}

struct Keep {
    enclave: Enclave,
    base: usize,
    size: usize,
    tcs: Mutex<usize>,
    tcs_total: usize,
    freed: Condvar,
    pid: AtomicU32,
    _reservation: Reservation,
}

impl Keep {
    fn free_tcs(&self) -> MutexGuard<'_, usize> {
        self.tcs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Takes a thread control structure, waiting until one is free.
    fn acquire(&self) -> Thread<'_> {
        let mut free = self.free_tcs();
        while *free == 0 {
            trace!("all {} TCS busy, waiting", self.tcs_total);
            free = self.freed.wait(free).unwrap_or_else(|e| e.into_inner());
        }

        *free -= 1;
        Thread { keep: self }
    }
}

struct Thread<'a> {
    keep: &'a Keep,
}

impl Drop for Thread<'_> {
    fn drop(&mut self) {
        *self.keep.free_tcs() += 1;
        self.keep.freed.notify_one();
    }
}

/// Backend hosting enclaves in the calling process
pub struct Simulator {
    factory: Box<Factory>,
    next: AtomicU64,
    keeps: RwLock<HashMap<u64, Arc<Keep>>>,
}

impl Simulator {
    /// Creates a simulator building its applications with `factory`.
    pub fn new(
        factory: impl Fn(&[u8]) -> Result<Application, Status> + Send + Sync + 'static,
    ) -> Self {
        Self {
            factory: Box::new(factory),
            next: AtomicU64::new(1),
            keeps: RwLock::default(),
        }
    }

    /// A simulator running the [`demo`] application for any image.
    pub fn demo() -> Self {
        Self::new(|_| demo::application())
    }

    fn keep(&self, handle: Handle) -> Option<Arc<Keep>> {
        self.keeps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle.0)
            .cloned()
    }

    fn reserve(base: usize, size: usize) -> Result<Reservation, PlatformStatus> {
        let map = match base {
            0 => Map::bytes(size)
                .anywhere()
                .anonymously()
                .with(perms::None),
            base => Map::bytes(size)
                .at(base)
                .anonymously()
                .with(perms::None),
        };

        map.map(Reservation).map_err(|e| {
            warn!("failed to map protected range: {}", e.err);
            PlatformStatus::OUT_OF_MEMORY
        })
    }
}

impl Backend for Simulator {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn data(&self) -> Vec<Datum> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

        vec![
            Datum {
                name: "In-process simulation".into(),
                pass: true,
                info: Some("no hardware isolation".into()),
                mesg: None,
            },
            Datum {
                name: "Anonymous mappings".into(),
                pass: page > 0,
                info: (page > 0).then(|| format!("page size {}", page)),
                mesg: None,
            },
        ]
    }

    fn create(&self, request: &CreateRequest<'_>) -> Result<Created, PlatformStatus> {
        if request.tcs_count == 0 {
            return Err(PlatformStatus::INVALID_PARAMETER);
        }

        let image = match request.image {
            Image::Bytes(bytes) => bytes.to_vec(),
            Image::Path(path) => std::fs::read(path).map_err(|e| {
                warn!("failed to read {}: {}", path.display(), e);
                PlatformStatus::ENCLAVE_FILE_ACCESS
            })?,
        };

        let app = (self.factory)(&image).map_err(|status| {
            error!("enclave image rejected: {}", status);
            PlatformStatus::INVALID_PARAMETER
        })?;

        let size = match request.size {
            0 => DEFAULT_SIZE,
            size => size,
        };

        let reservation = Self::reserve(request.base_address, size)?;
        let base = reservation.0.addr();
        let enclave = Enclave::new(base..base + size, request.host.clone(), app);

        let keep = Arc::new(Keep {
            enclave,
            base,
            size,
            tcs: Mutex::new(request.tcs_count),
            tcs_total: request.tcs_count,
            freed: Condvar::new(),
            pid: AtomicU32::new(std::process::id()),
            _reservation: reservation,
        });

        let handle = Handle(self.next.fetch_add(1, Ordering::Relaxed));
        self.keeps
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.0, keep);

        debug!(
            "created simulated enclave {} at {:#x} ({:#x} bytes, {} TCS)",
            handle.0, base, size, request.tcs_count
        );

        Ok(Created {
            handle,
            base_address: base,
        })
    }

    fn destroy(&self, handle: Handle) -> Result<(), PlatformStatus> {
        let keep = self
            .keeps
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.0)
            .ok_or(PlatformStatus::INVALID_ENCLAVE_ID)?;

        debug!(
            "destroyed simulated enclave {} at {:#x}",
            handle.0, keep.base
        );
        Ok(())
    }

    fn enclave_size(&self, handle: Handle) -> usize {
        self.keep(handle).map(|k| k.size).unwrap_or(0)
    }

    fn is_tcs_active(&self, handle: Handle) -> bool {
        self.keep(handle)
            .map(|k| *k.free_tcs() < k.tcs_total)
            .unwrap_or(false)
    }

    fn set_process_id(&self, handle: Handle) {
        if let Some(keep) = self.keep(handle) {
            let pid = std::process::id();
            let old = keep.pid.swap(pid, Ordering::SeqCst);
            debug!("enclave {} moved from pid {} to {}", handle.0, old, pid);
        }
    }

    unsafe fn ecall(
        &self,
        handle: Handle,
        index: CallIndex,
        args: *mut GateArgs,
    ) -> Result<(), PlatformStatus> {
        let keep = self
            .keep(handle)
            .ok_or(PlatformStatus::INVALID_ENCLAVE_ID)?;

        // Signals interrupt whatever thread is inside.
        let _thread = match index {
            CallIndex::DeliverSignal => None,
            _ => Some(keep.acquire()),
        };

        keep.enclave.enter(index, args);
        Ok(())
    }
}

/// The application behind [`Simulator::demo`]
pub mod demo {
    use super::*;

    /// Returns every byte string of the input in order.
    pub const ECHO: Selector = Selector::user(0);

    /// Returns the number of signals handled so far as a `u64`.
    pub const SIGNALS: Selector = Selector::user(1);

    struct Fork;

    impl Snapshot for Fork {
        fn take(&self, ctx: &Context<'_>) -> Result<SnapshotLayout, Status> {
            let protected = ctx.protected();
            Ok(SnapshotLayout {
                regions: vec![Region {
                    kind: RegionKind::Heap,
                    base: protected.start as u64,
                    size: (protected.end - protected.start) as u64,
                }],
                mac: table_digest().to_le_bytes().to_vec(),
            })
        }

        fn transfer_key(
            &self,
            _: &Context<'_>,
            config: &ForkHandshakeConfig,
        ) -> Result<(), Status> {
            match config.is_parent {
                true => Ok(()),
                false => Err(Status::new(Code::Unavailable, "no snapshot key to receive")),
            }
        }
    }

    fn echo(_: &Context<'_>, input: &mut Reader) -> Result<Writer, Status> {
        let mut output = Writer::new();
        while input.has_next() {
            let bytes = input
                .next_bytes()
                .map_err(|e| Status::new(Code::InvalidArgument, e))?;
            output.push_bytes(bytes);
        }
        Ok(output)
    }

    /// Builds the demo application.
    ///
    /// It registers a handler for [`Signal::Usr1`] when initialized.
    pub fn application() -> Result<Application, Status> {
        Application::builder()
            .entry(ECHO, echo)
            .entry(SIGNALS, |ctx, _| {
                let mut output = Writer::new();
                output.push(ctx.signals().delivered());
                Ok(output)
            })
            .on_initialize(|ctx| {
                ctx.signals()
                    .register(Signal::Usr1, SignalSet::EMPTY, |info| {
                        trace!("demo enclave handled signal {}", info.signum)
                    });
                Ok(())
            })
            .snapshot(Fork)
            .build()
    }
}
