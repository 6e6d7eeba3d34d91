// SPDX-License-Identifier: Apache-2.0

//! Loaded enclaves of a process, by name

use crate::backend::Backend;
use crate::client::{Client, LoadOptions};
use crate::exit::ExitCallProvider;
use crate::memory::UntrustedMemory;
use crate::{Error, Result};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, error, info};

struct Entry {
    client: Arc<Client>,
    pid: u32,
}

/// Loads enclaves on one backend and keeps track of them by name
pub struct Manager {
    backend: Arc<dyn Backend>,
    memory: Arc<dyn UntrustedMemory>,
    entries: RwLock<BTreeMap<String, Entry>>,
    loading: Mutex<BTreeSet<String>>,
}

impl Manager {
    /// Creates an empty registry.
    pub fn new(backend: Arc<dyn Backend>, memory: Arc<dyn UntrustedMemory>) -> Self {
        Self {
            backend,
            memory,
            entries: RwLock::default(),
            loading: Mutex::default(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Entry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Entry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Loads an enclave, checks its call table and initializes it.
    ///
    /// An enclave failing the check or the initialization is destroyed
    /// again before the error is returned. The name stays reserved while
    /// the enclave is prepared.
    pub fn load(&self, options: LoadOptions, exits: ExitCallProvider) -> Result<Arc<Client>> {
        let name = options.name.clone();
        {
            let entries = self.write();
            let mut loading = self.loading.lock().unwrap_or_else(|e| e.into_inner());
            if entries.contains_key(&name) || !loading.insert(name.clone()) {
                return Err(Error::AlreadyExists(name));
            }
        }

        let prepared = self.prepare(options, exits);

        let mut entries = self.write();
        self.loading
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&name);

        let client = Arc::new(prepared?);
        entries.insert(
            name,
            Entry {
                client: client.clone(),
                pid: std::process::id(),
            },
        );

        info!("enclave {:?} is ready", client.name());
        Ok(client)
    }

    fn prepare(&self, options: LoadOptions, exits: ExitCallProvider) -> Result<Client> {
        let client = Client::load(self.backend.clone(), options, exits, self.memory.clone())?;

        if let Err(e) = client.verify_abi().and_then(|_| client.initialize()) {
            if let Err(d) = client.destroy() {
                error!("failed to clean up enclave {:?}: {}", client.name(), d);
            }
            return Err(e);
        }

        Ok(client)
    }

    /// The enclave named `name`
    pub fn get(&self, name: &str) -> Result<Arc<Client>> {
        self.read()
            .get(name)
            .map(|e| e.client.clone())
            .ok_or_else(|| Error::NotFound(name.into()))
    }

    /// Destroys the enclave named `name` and forgets it.
    ///
    /// The enclave stays registered if destruction fails.
    pub fn destroy(&self, name: &str) -> Result<()> {
        let client = self.get(name)?;
        client.destroy()?;

        let mut entries = self.write();
        if matches!(entries.get(name), Some(e) if Arc::ptr_eq(&e.client, &client)) {
            entries.remove(name);
        }
        Ok(())
    }

    /// Names of the loaded enclaves, sorted
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// The process that loaded, or last adopted, the enclave named `name`
    pub fn process_id(&self, name: &str) -> Option<u32> {
        self.read().get(name).map(|e| e.pid)
    }

    /// Adopts every enclave into the calling process.
    ///
    /// To be called in the child after a fork.
    pub fn after_fork(&self) {
        let pid = std::process::id();
        for (name, entry) in self.write().iter_mut() {
            debug!("enclave {:?}: pid {} -> {}", name, entry.pid, pid);
            entry.pid = pid;
            entry.client.stamp_process();
        }
    }
}
