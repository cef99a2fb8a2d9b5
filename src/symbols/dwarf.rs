//! In-process resolution from the traced executable's DWARF debug info
//!
//! Alternative to spawning `eu-addr2line`: loads `.debug_line` once with the
//! addr2line crate and answers every lookup from memory. Only meaningful for
//! non-PIE executables, where trace addresses equal link-time addresses.

use super::{Frame, SymbolResolver};
use anyhow::{Context, Result};
use object::{Object, ObjectSection};
use std::fs::File;
use std::path::Path;

/// DWARF debug info context for the traced executable
pub struct DwarfResolver {
    context: addr2line::Context<gimli::EndianRcSlice<gimli::RunTimeEndian>>,
}

impl DwarfResolver {
    /// Load DWARF debug info from an ELF binary
    pub fn load(binary_path: &Path) -> Result<Self> {
        if !binary_path.exists() {
            anyhow::bail!("Executable does not exist: {}", binary_path.display());
        }

        let file = File::open(binary_path)
            .with_context(|| format!("Failed to open executable: {}", binary_path.display()))?;

        // SAFETY: the mapping is read-only and dropped before this function returns;
        // all section data is copied into owned buffers below.
        let mmap = unsafe { memmap2::Mmap::map(&file) }.context("Failed to memory-map executable")?;

        let object = object::File::parse(&*mmap).context("Failed to parse ELF executable")?;

        let endian = if object.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        let load_section = |id: gimli::SectionId| -> Result<gimli::EndianRcSlice<gimli::RunTimeEndian>> {
            let data = object
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or(std::borrow::Cow::Borrowed(&[]));
            let bytes: std::rc::Rc<[u8]> = std::rc::Rc::from(data.into_owned());
            Ok(gimli::EndianRcSlice::new(bytes, endian))
        };

        let dwarf = gimli::Dwarf::load(&load_section)
            .context("Failed to load DWARF sections - executable may not have debug symbols. Compile with -g flag.")?;

        let context =
            addr2line::Context::from_dwarf(dwarf).context("Failed to create DWARF context")?;

        Ok(Self { context })
    }

    /// Look up the source location of a return address
    ///
    /// Return addresses point just past the call instruction, so the byte
    /// before is tried first.
    pub fn lookup(&self, address: u64) -> Result<Option<Frame>> {
        for adjusted in [address.saturating_sub(1), address] {
            let location = match self.context.find_location(adjusted) {
                Ok(Some(loc)) => loc,
                Ok(None) | Err(_) => continue,
            };

            let file = match location.file {
                Some(f) => f,
                None => continue,
            };

            let line = match location.line {
                Some(line) if line > 0 => line,
                _ => continue,
            };

            return Ok(Some(Frame {
                file: file.to_string(),
                line: i64::from(line),
                column: location.column.map(i64::from),
            }));
        }

        Ok(None)
    }
}

impl SymbolResolver for DwarfResolver {
    fn resolve(&mut self, address: u64) -> Result<Option<Frame>> {
        self.lookup(address)
    }
}
