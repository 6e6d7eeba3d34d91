// SPDX-License-Identifier: Apache-2.0

use super::BackendOptions;

use postern::backend::sim::demo;
use postern::config::EnclaveConfig;
use postern::{Error, ExitCallProvider, LibcMemory, LoadOptions, Manager, Source, UntrustedMemory};

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Args;
use log::info;
use wicket::message::Writer;
use wicket::snapshot::ForkHandshakeConfig;
use wicket::status::Code;

const NAME: &str = "selftest";

/// Load the demo enclave and exercise every kind of call
#[derive(Args, Debug)]
pub struct Options {
    #[clap(flatten)]
    backend: BackendOptions,

    /// Path of the enclave configuration file
    #[clap(long)]
    config: Option<PathBuf>,
}

impl Options {
    pub fn execute(self) -> anyhow::Result<()> {
        let config = match self.config {
            Some(ref path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                EnclaveConfig::from_toml_str(&text)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            None => EnclaveConfig::default(),
        };

        let backend = self.backend.pick()?;
        let memory: Arc<dyn UntrustedMemory> = Arc::new(LibcMemory);
        let manager = Manager::new(backend.clone(), memory.clone());

        let options = LoadOptions {
            config: config.clone(),
            ..LoadOptions::new(NAME, Source::Bytes(NAME.as_bytes().to_vec()))
        };
        let client = manager
            .load(options, ExitCallProvider::with_host_calls(memory))
            .with_context(|| format!("failed to load enclave on {}", backend.name()))?;
        info!("loaded {:?}", client);

        let mut input = Writer::new();
        input.push_bytes(b"hello");
        input.push_bytes(b"");
        let mut reply = client.call(demo::ECHO, Some(&input)).context("echo failed")?;
        if reply.next_bytes()? != b"hello" || !reply.next_bytes()?.is_empty() {
            bail!("echo returned the wrong bytes");
        }
        info!("echo: ok");

        postern::signal::forward(&client, libc::SIGUSR1, 0).context("signal delivery failed")?;
        let delivered = client.call(demo::SIGNALS, None)?.next::<u64>()?;
        if delivered != 1 {
            bail!("enclave handled {} signals instead of 1", delivered);
        }
        info!("signal: ok");

        match (config.enable_fork, client.take_snapshot()) {
            (true, Ok(layout)) => {
                info!("snapshot: {} regions", layout.regions.len());
                client
                    .transfer_secure_snapshot_key(&ForkHandshakeConfig {
                        is_parent: true,
                        socket: 0,
                    })
                    .context("snapshot key transfer failed")?;
                info!("snapshot key transfer: ok");
            }
            (false, Err(Error::Enclave(status))) if status.code == Code::FailedPrecondition => {
                info!("snapshot: refused as configured");
            }
            (_, result) => bail!("unexpected snapshot result: {:?}", result),
        }

        manager.destroy(NAME).context("teardown failed")?;
        if !client.is_closed() {
            bail!("enclave still open after teardown");
        }
        info!("teardown: ok");

        println!("selftest passed on backend {}", backend.name());
        Ok(())
    }
}
