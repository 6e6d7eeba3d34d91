// SPDX-License-Identifier: Apache-2.0

//! Signal handling inside the enclave
//!
//! Handlers are registered per bridge [`Signal`] together with a mask of
//! signals that stay blocked while the handler runs. Signals that arrive
//! while blocked are queued and delivered as soon as they are unblocked.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::{debug, trace};
use wicket::signal::{delivery, SigInfo, Signal, SignalSet};

/// A signal handler
pub type Handler = Arc<dyn Fn(&SigInfo) + Send + Sync>;

#[derive(Clone)]
struct Registration {
    handler: Handler,
    mask: SignalSet,
}

#[derive(Default)]
struct State {
    blocked: SignalSet,
    pending: VecDeque<SigInfo>,
}

/// Registered handlers, the blocked set and the pending queue
#[derive(Default)]
pub struct SignalManager {
    handlers: RwLock<BTreeMap<Signal, Registration>>,
    state: Mutex<State>,
    delivered: AtomicU64,
}

impl SignalManager {
    /// Creates a manager without handlers and with nothing blocked.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `handler` for `signal`, replacing any previous handler.
    ///
    /// Signals in `mask`, and `signal` itself, are blocked while the handler
    /// runs.
    pub fn register(
        &self,
        signal: Signal,
        mask: SignalSet,
        handler: impl Fn(&SigInfo) + Send + Sync + 'static,
    ) {
        let registration = Registration {
            handler: Arc::new(handler),
            mask,
        };

        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(signal, registration);
    }

    /// Removes the handler of `signal`. Returns whether one was registered.
    pub fn unregister(&self, signal: Signal) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&signal)
            .is_some()
    }

    /// Adds `set` to the blocked signals.
    pub fn block(&self, set: SignalSet) {
        let mut state = self.state();
        state.blocked = state.blocked.union(set);
    }

    /// Removes `set` from the blocked signals and delivers what was pending.
    pub fn unblock(&self, set: SignalSet) {
        let ready = {
            let mut state = self.state();
            state.blocked = state.blocked.difference(set);
            Self::take_ready(&mut state)
        };

        self.redeliver(ready);
    }

    /// The currently blocked signals
    pub fn blocked(&self) -> SignalSet {
        self.state().blocked
    }

    /// Signals queued while blocked, in arrival order
    pub fn pending(&self) -> Vec<SigInfo> {
        self.state().pending.iter().copied().collect()
    }

    /// Number of handler invocations so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Delivers `info`, returning one of the [`delivery`] codes.
    pub fn deliver(&self, info: SigInfo) -> i32 {
        let signal = match Signal::try_from(info.signum) {
            Ok(signal) => signal,
            Err(signum) => {
                debug!("signal {} has no bridge number", signum);
                return delivery::UNREGISTERED;
            }
        };

        let registration = match self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&signal)
        {
            Some(registration) => registration.clone(),
            None => return delivery::UNREGISTERED,
        };

        let added = {
            let mut state = self.state();
            if state.blocked.contains(signal) {
                trace!("signal {:?} blocked, queued", signal);
                state.pending.push_back(info);
                return delivery::BLOCKED;
            }

            let mut mask = registration.mask;
            mask.insert(signal);
            let added = mask.difference(state.blocked);
            state.blocked = state.blocked.union(added);
            added
        };

        trace!("running handler of {:?}", signal);
        (registration.handler)(&info);
        self.delivered.fetch_add(1, Ordering::Relaxed);

        let ready = {
            let mut state = self.state();
            state.blocked = state.blocked.difference(added);
            Self::take_ready(&mut state)
        };

        self.redeliver(ready);
        delivery::HANDLED
    }

    fn take_ready(state: &mut State) -> Vec<SigInfo> {
        let blocked = state.blocked;
        let (ready, still): (VecDeque<_>, VecDeque<_>) =
            state.pending.drain(..).partition(|info| {
                Signal::try_from(info.signum)
                    .map(|s| !blocked.contains(s))
                    .unwrap_or(true)
            });

        state.pending = still;
        ready.into_iter().collect()
    }

    fn redeliver(&self, ready: Vec<SigInfo>) {
        for info in ready {
            self.deliver(info);
        }
    }
}
