// SPDX-License-Identifier: Apache-2.0

//! Enclave images embedded in an ELF section of the running executable

use crate::{Error, Result};

use std::path::Path;

use goblin::elf::section_header::SHT_NOBITS;
use goblin::elf::Elf;
use log::debug;
use mmarinus::{perms, Map};

/// Path of the running executable
pub const SELF_EXE: &str = "/proc/self/exe";

/// Reads the contents of section `name` of the ELF file at `path`.
pub fn read_section(path: &Path, name: &str) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::Image(format!("failed to read {}: {}", path.display(), e)))?;
    section(&bytes, name).map(|s| s.to_vec())
}

/// Finds section `name` in an ELF image.
pub fn section<'a>(bytes: &'a [u8], name: &str) -> Result<&'a [u8]> {
    let elf = Elf::parse(bytes).map_err(|e| Error::Image(format!("invalid ELF file: {}", e)))?;

    let header = elf
        .section_headers
        .iter()
        .find(|sh| elf.shdr_strtab.get_at(sh.sh_name) == Some(name))
        .ok_or_else(|| Error::Image(format!("no section named {:?}", name)))?;

    if header.sh_type == SHT_NOBITS {
        return Err(Error::Image(format!("section {:?} has no contents", name)));
    }

    let start = header.sh_offset as usize;
    let end = start
        .checked_add(header.sh_size as usize)
        .ok_or_else(|| Error::Image(format!("section {:?} is out of bounds", name)))?;

    bytes
        .get(start..end)
        .ok_or_else(|| Error::Image(format!("section {:?} is out of bounds", name)))
}

/// An inaccessible mapping holding an address range until creation
pub struct Reservation(Map<perms::None>);

impl Reservation {
    /// Maps `size` bytes at exactly `base`, without any access rights.
    pub fn new(base: usize, size: usize) -> Result<Self> {
        let map = Map::bytes(size)
            .at(base)
            .anonymously()
            .with(perms::None)
            .map_err(|e| Error::Reserve(e.err))?;

        debug!("reserved {:#x} bytes at {:#x}", size, base);
        Ok(Self(map))
    }

    /// Start of the reserved range
    pub fn addr(&self) -> usize {
        self.0.addr()
    }
}
