// SPDX-License-Identifier: Apache-2.0

//! Configuration of a loaded enclave

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use wicket::config::InitConfig;

/// Configuration file template
pub const CONFIG_TEMPLATE: &str = r#"## Configuration for an enclave loaded through postern

## Allow snapshots and snapshot key transfer for secure fork
# enable_fork = false

## Number of threads that may be inside the enclave at once
# tcs_count = 1

## Create a debug enclave
# debug = false

## Host name reported to the enclave
# host_name = "localhost"

## Environment variables
# [environment]
# VAR1 = "var1"
# VAR2 = "var2"
"#;

const fn default_tcs_count() -> usize {
    1
}

fn default_host_name() -> String {
    "localhost".into()
}

/// The configuration of one enclave
///
/// This struct can be used with any serde deserializer.
///
/// # Examples
///
/// ```
/// use postern::config::EnclaveConfig;
/// const CONFIG: &str = r#"
/// enable_fork = true
/// tcs_count = 4
///
/// [environment]
/// HOME = "/"
/// "#;
///
/// let config = EnclaveConfig::from_toml_str(CONFIG).unwrap();
/// assert_eq!(config.tcs_count, 4);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnclaveConfig {
    /// Whether secure fork is permitted
    #[serde(default)]
    pub enable_fork: bool,

    /// Number of thread control structures
    #[serde(default = "default_tcs_count")]
    pub tcs_count: usize,

    /// Whether to create a debug enclave
    #[serde(default)]
    pub debug: bool,

    /// Host name reported to the enclave
    #[serde(default = "default_host_name")]
    pub host_name: String,

    /// Environment variables of the enclave
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl Default for EnclaveConfig {
    fn default() -> Self {
        Self {
            enable_fork: false,
            tcs_count: default_tcs_count(),
            debug: false,
            host_name: default_host_name(),
            environment: BTreeMap::new(),
        }
    }
}

impl EnclaveConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml)
    }

    /// The part of the configuration sent to the trusted side
    pub fn to_init_config(&self) -> InitConfig {
        InitConfig {
            enable_fork: self.enable_fork,
            host_name: self.host_name.clone(),
            environment: self
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}
