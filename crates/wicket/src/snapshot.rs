// SPDX-License-Identifier: Apache-2.0

//! Secure fork records
//!
//! All records are encoded field by field, in declaration order, with the
//! [message](crate::message) writer.

use crate::message::{Error, Reader, Writer};
use crate::status::Status;

use alloc::vec::Vec;

/// Kind of enclave memory captured in a snapshot region
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Initialized data section
    Data = 0,
    /// Zero-initialized data section
    Bss = 1,
    /// Heap
    Heap = 2,
    /// Thread-local data
    Thread = 3,
    /// Stack of the forking thread
    Stack = 4,
}

impl TryFrom<u32> for RegionKind {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Data,
            1 => Self::Bss,
            2 => Self::Heap,
            3 => Self::Thread,
            4 => Self::Stack,
            _ => return Err(Error::InvalidTag(value.into())),
        })
    }
}

/// One encrypted region of a snapshot
///
/// The ciphertext lives in untrusted memory; the record only locates it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    /// What the region holds
    pub kind: RegionKind,
    /// Address of the ciphertext in untrusted memory
    pub base: u64,
    /// Size of the ciphertext in bytes
    pub size: u64,
}

/// Layout of a snapshot taken for a forked sibling
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotLayout {
    /// Encrypted regions, in restore order
    pub regions: Vec<Region>,
    /// Authentication tag over all regions
    pub mac: Vec<u8>,
}

impl SnapshotLayout {
    /// Appends the layout to a message.
    pub fn encode(&self, writer: &mut Writer) {
        writer.push(self.regions.len() as u64);
        for region in &self.regions {
            writer.push(region.kind as u32);
            writer.push(region.base);
            writer.push(region.size);
        }
        writer.push_bytes(&self.mac);
    }

    /// Reads a layout written with [`SnapshotLayout::encode`].
    pub fn decode(reader: &mut Reader) -> Result<Self, Error> {
        let count = reader.next::<u64>()?;
        if count > reader.remaining() as u64 {
            return Err(Error::Exhausted);
        }

        let mut regions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            regions.push(Region {
                kind: RegionKind::try_from(reader.next::<u32>()?)?,
                base: reader.next()?,
                size: reader.next()?,
            });
        }

        let mac = reader.next_bytes()?;
        Ok(Self { regions, mac })
    }
}

/// Output of the snapshot and key transfer entry points
///
/// Carries the trusted side's status and, for snapshots, the layout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnclaveOutput {
    /// Status of the operation inside the enclave
    pub status: Status,
    /// Snapshot layout, present on a successful snapshot
    pub snapshot: Option<SnapshotLayout>,
}

impl EnclaveOutput {
    /// Appends the output to a message.
    pub fn encode(&self, writer: &mut Writer) {
        self.status.encode(writer);
        writer.push(self.snapshot.is_some());
        if let Some(snapshot) = &self.snapshot {
            snapshot.encode(writer);
        }
    }

    /// Reads an output written with [`EnclaveOutput::encode`].
    pub fn decode(reader: &mut Reader) -> Result<Self, Error> {
        let status = Status::decode(reader)?;
        let snapshot = match reader.next::<bool>()? {
            true => Some(SnapshotLayout::decode(reader)?),
            false => None,
        };
        Ok(Self { status, snapshot })
    }
}

/// Configuration of one side of the fork key handshake
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ForkHandshakeConfig {
    /// Whether this side is the parent of the fork
    pub is_parent: bool,
    /// Host socket connecting parent and child
    pub socket: i32,
}

/// invalid handshake socket {0}
#[derive(Copy, Clone, Debug, PartialEq, Eq, displaydoc::Display)]
pub struct InvalidSocket(pub i32);

impl ForkHandshakeConfig {
    /// Appends the config to a message.
    pub fn encode(&self, writer: &mut Writer) -> Result<(), InvalidSocket> {
        if self.socket < 0 {
            return Err(InvalidSocket(self.socket));
        }

        writer.push(self.is_parent);
        writer.push(self.socket);
        Ok(())
    }

    /// Reads a config written with [`ForkHandshakeConfig::encode`].
    pub fn decode(reader: &mut Reader) -> Result<Self, Error> {
        Ok(Self {
            is_parent: reader.next()?,
            socket: reader.next()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;

    fn layout() -> SnapshotLayout {
        SnapshotLayout {
            regions: vec![
                Region {
                    kind: RegionKind::Data,
                    base: 0x1000,
                    size: 0x200,
                },
                Region {
                    kind: RegionKind::Stack,
                    base: 0x8000,
                    size: 0x1000,
                },
            ],
            mac: vec![0xaa; 16],
        }
    }

    #[test]
    fn output_with_snapshot() {
        let output = EnclaveOutput {
            status: Status::ok(),
            snapshot: Some(layout()),
        };

        let mut writer = Writer::new();
        output.encode(&mut writer);

        let mut reader = Reader::deserialize(&writer.to_vec()).unwrap();
        assert_eq!(EnclaveOutput::decode(&mut reader), Ok(output));
        assert!(!reader.has_next());
    }

    #[test]
    fn output_status_only() {
        let output = EnclaveOutput {
            status: Status::new(Code::FailedPrecondition, "fork is disabled"),
            snapshot: None,
        };

        let mut writer = Writer::new();
        output.encode(&mut writer);

        let mut reader = Reader::deserialize(&writer.to_vec()).unwrap();
        assert_eq!(EnclaveOutput::decode(&mut reader), Ok(output));
    }

    #[test]
    fn oversized_region_count() {
        let mut writer = Writer::new();
        writer.push(1000u64);
        writer.push_bytes(b"");

        let mut reader = Reader::deserialize(&writer.to_vec()).unwrap();
        assert_eq!(SnapshotLayout::decode(&mut reader), Err(Error::Exhausted));
    }

    #[test]
    fn handshake_socket() {
        let mut writer = Writer::new();
        let bad = ForkHandshakeConfig {
            is_parent: true,
            socket: -1,
        };
        assert_eq!(bad.encode(&mut writer), Err(InvalidSocket(-1)));
        assert!(writer.is_empty());

        let good = ForkHandshakeConfig {
            is_parent: false,
            socket: 5,
        };
        good.encode(&mut writer).unwrap();
        let mut reader = Reader::deserialize(&writer.to_vec()).unwrap();
        assert_eq!(ForkHandshakeConfig::decode(&mut reader), Ok(good));
    }
}
