// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration handed to the enclave at initialization

use crate::message::{Error, Reader, Writer};

use alloc::string::String;
use alloc::vec::Vec;

/// Settings passed with [`Selector::INITIALIZE`](crate::Selector::INITIALIZE)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitConfig {
    /// Whether secure fork is permitted
    pub enable_fork: bool,

    /// Host name reported to the application
    pub host_name: String,

    /// Environment variables, in order
    pub environment: Vec<(String, String)>,
}

impl InitConfig {
    /// Appends the config to a message.
    pub fn encode(&self, writer: &mut Writer) {
        writer.push(self.enable_fork);
        writer.push_str(&self.host_name);
        writer.push(self.environment.len() as u64);
        for (key, value) in &self.environment {
            writer.push_str(key);
            writer.push_str(value);
        }
    }

    /// Reads a config written with [`InitConfig::encode`].
    pub fn decode(reader: &mut Reader) -> Result<Self, Error> {
        let enable_fork = reader.next()?;
        let host_name = reader.next_string()?;

        let count = reader.next::<u64>()?;
        if count > reader.remaining() as u64 / 2 {
            return Err(Error::Exhausted);
        }

        let mut environment = Vec::with_capacity(count as usize);
        for _ in 0..count {
            environment.push((reader.next_string()?, reader.next_string()?));
        }

        Ok(Self {
            enable_fork,
            host_name,
            environment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_order() {
        let config = InitConfig {
            enable_fork: true,
            host_name: "keep".into(),
            environment: vec![("B".into(), "2".into()), ("A".into(), "1".into())],
        };

        let mut writer = Writer::new();
        config.encode(&mut writer);

        let mut reader = Reader::deserialize(&writer.to_vec()).unwrap();
        assert_eq!(InitConfig::decode(&mut reader), Ok(config));
    }
}
