// SPDX-License-Identifier: Apache-2.0

//! Trusted application: entry handlers and optional hooks

use crate::host::HostCalls;
use crate::signal::SignalManager;

use std::collections::BTreeMap;
use std::ops::Range;

use wicket::config::InitConfig;
use wicket::message::{Reader, Writer};
use wicket::snapshot::{ForkHandshakeConfig, SnapshotLayout};
use wicket::status::{Code, Status};
use wicket::Selector;

/// What an entry handler can reach while it runs
pub struct Context<'a> {
    pub(crate) host: HostCalls<'a>,
    pub(crate) signals: &'a SignalManager,
    pub(crate) protected: &'a Range<usize>,
    pub(crate) config: Option<&'a InitConfig>,
}

impl<'a> Context<'a> {
    /// Outward calls to the host
    pub fn host(&self) -> &HostCalls<'a> {
        &self.host
    }

    /// The enclave's signal handlers and masks
    pub fn signals(&self) -> &SignalManager {
        self.signals
    }

    /// The enclave's protected address range
    pub fn protected(&self) -> &Range<usize> {
        self.protected
    }

    /// The configuration received at initialization, if any
    pub fn config(&self) -> Option<&InitConfig> {
        self.config
    }
}

/// Handler of one dispatch selector
pub trait Entry: Send + Sync {
    /// Runs the entry point with the decoded input.
    fn call(&self, ctx: &Context<'_>, input: &mut Reader) -> Result<Writer, Status>;
}

impl<F> Entry for F
where
    F: Fn(&Context<'_>, &mut Reader) -> Result<Writer, Status> + Send + Sync,
{
    fn call(&self, ctx: &Context<'_>, input: &mut Reader) -> Result<Writer, Status> {
        self(ctx, input)
    }
}

/// Secure fork support of an application
pub trait Snapshot: Send + Sync {
    /// Captures the enclave state for a forked sibling.
    fn take(&self, ctx: &Context<'_>) -> Result<SnapshotLayout, Status>;

    /// Runs one side of the snapshot key exchange.
    fn transfer_key(&self, ctx: &Context<'_>, config: &ForkHandshakeConfig) -> Result<(), Status>;
}

type Hook = Box<dyn Fn(&Context<'_>) -> Result<(), Status> + Send + Sync>;

/// A trusted application, as run by an [`Enclave`](crate::Enclave)
pub struct Application {
    pub(crate) entries: BTreeMap<Selector, Box<dyn Entry>>,
    pub(crate) snapshot: Option<Box<dyn Snapshot>>,
    pub(crate) initialize: Option<Hook>,
    pub(crate) finalize: Option<Hook>,
}

impl Application {
    /// Starts building an application.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Selectors with a registered handler
    pub fn selectors(&self) -> impl Iterator<Item = Selector> + '_ {
        self.entries.keys().copied()
    }
}

/// Builder for [`Application`]
#[derive(Default)]
pub struct Builder {
    entries: Vec<(Selector, Box<dyn Entry>)>,
    snapshot: Option<Box<dyn Snapshot>>,
    initialize: Option<Hook>,
    finalize: Option<Hook>,
}

impl Builder {
    /// Registers the function handling `selector`.
    pub fn entry(
        self,
        selector: Selector,
        entry: impl Fn(&Context<'_>, &mut Reader) -> Result<Writer, Status> + Send + Sync + 'static,
    ) -> Self {
        self.handler(selector, entry)
    }

    /// Registers the [`Entry`] implementation handling `selector`.
    pub fn handler(mut self, selector: Selector, entry: impl Entry + 'static) -> Self {
        self.entries.push((selector, Box::new(entry)));
        self
    }

    /// Enables secure fork through `snapshot`.
    pub fn snapshot(mut self, snapshot: impl Snapshot + 'static) -> Self {
        self.snapshot = Some(Box::new(snapshot));
        self
    }

    /// Runs `hook` once the configuration has been received.
    pub fn on_initialize(
        mut self,
        hook: impl Fn(&Context<'_>) -> Result<(), Status> + Send + Sync + 'static,
    ) -> Self {
        self.initialize = Some(Box::new(hook));
        self
    }

    /// Runs `hook` on the last call before the enclave is destroyed.
    pub fn on_finalize(
        mut self,
        hook: impl Fn(&Context<'_>) -> Result<(), Status> + Send + Sync + 'static,
    ) -> Self {
        self.finalize = Some(Box::new(hook));
        self
    }

    /// Builds the application.
    ///
    /// Fails if a selector is reserved or registered twice.
    pub fn build(self) -> Result<Application, Status> {
        let mut entries = BTreeMap::new();

        for (selector, entry) in self.entries {
            if selector.is_reserved() {
                return Err(Status::new(
                    Code::InvalidArgument,
                    format!("selector {} is reserved", selector),
                ));
            }

            if entries.insert(selector, entry).is_some() {
                return Err(Status::new(
                    Code::AlreadyExists,
                    format!("selector {} registered twice", selector),
                ));
            }
        }

        Ok(Application {
            entries,
            snapshot: self.snapshot,
            initialize: self.initialize,
            finalize: self.finalize,
        })
    }
}
