/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! Reading of Mach-O files into a loaded image.
//!
//! The goal is to read the binary exactly once, storing everything later
//! analysis or emulation will need: segments backed in guest memory, a
//! fully resolved symbol table, decoded exports, and the entry point.
//!
//! The format is notably different from ELF and PE: sections are always
//! part of a segment, symbols cannot be categorized by section headers
//! alone, and undefined symbols carry a two-level namespace ordinal naming
//! the library they come from. Symbol resolution therefore happens as a
//! post-pass over the whole image rather than per-table.
//!
//! The structure layouts are bit-exact to Apple's `mach-o/loader.h`:
//! <http://opensource.apple.com/source/xnu/xnu-1228.9.59/EXTERNAL_HEADERS/mach-o/loader.h>

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};

use bitflags::bitflags;
use log::{debug, info, warn};

use crate::arch::{ident_from_cputype, Arch, CPU_ARCH_ABI64};
use crate::binding::{self, Relocation};
use crate::error::{Error, Result};
use crate::exports::{self, Export};
use crate::mem::Mem;
use crate::reader::{cstr_at, read_at, read_uleb, Decoder, Endian};
use crate::segment::{Section, Segment, S_MOD_INIT_FUNC_POINTERS, S_MOD_TERM_FUNC_POINTERS};
use crate::symbol::{Symbol, SymbolType};

pub const MH_MAGIC: u32 = 0xfeedface;
pub const MH_CIGAM: u32 = 0xcefaedfe;
pub const MH_MAGIC_64: u32 = 0xfeedfacf;
pub const MH_CIGAM_64: u32 = 0xcffaedfe;

const LC_SEGMENT: u32 = 0x1;
const LC_SYMTAB: u32 = 0x2;
const LC_UNIXTHREAD: u32 = 0x5;
const LC_LOAD_DYLIB: u32 = 0xc;
const LC_SEGMENT_64: u32 = 0x19;
const LC_ENCRYPTION_INFO: u32 = 0x21;
const LC_DYLD_INFO: u32 = 0x22;
const LC_FUNCTION_STARTS: u32 = 0x26;
const LC_DATA_IN_CODE: u32 = 0x29;
const LC_ENCRYPTION_INFO_64: u32 = 0x2c;
const LC_LOAD_WEAK_DYLIB: u32 = 0x8000_0018;
const LC_REEXPORT_DYLIB: u32 = 0x8000_001c;
const LC_DYLD_INFO_ONLY: u32 = 0x8000_0022;
const LC_MAIN: u32 = 0x8000_0028;

bitflags! {
    /// Mach header flag bits this loader cares about.
    pub struct HeaderFlags: u32 {
        /// Two-level namespace: undefined symbols name their library.
        const TWOLEVEL = 0x80;
        /// Position-independent executable.
        const PIE = 0x0020_0000;
    }
}

/// Base of the reserved range synthesized addresses are assigned from.
fn external_symbol_base(bits: u32) -> u64 {
    if bits == 64 {
        0xff00_0000_0000_0000
    } else {
        0xff00_0000
    }
}

/// A (offset, length, kind) record from `LC_DATA_IN_CODE`, marking a range
/// of a code section that holds data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataInCodeRecord {
    pub offset: u32,
    pub length: u16,
    pub kind: u16,
}

/// A loaded Mach-O image.
///
/// Constructed by [MachO::load]; immutable to callers afterwards. Queries
/// are safe to run from multiple readers once construction returns.
#[derive(Debug)]
pub struct MachO {
    /// Architecture identity derived from `cputype`.
    pub arch: Arch,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    /// Raw mach header flags word.
    pub flags: u32,
    /// Position-independent executable?
    pub pie: bool,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    /// Entry virtual address; 0 if the binary declares no entry point.
    pub entry: u64,
    /// Segments in file order.
    pub segments: Vec<Segment>,
    /// Symbols in symbol table order.
    pub symbols: Vec<Symbol>,
    /// Library names by two-level namespace ordinal. Ordinal 0 is the
    /// image itself.
    pub imported_libraries: Vec<String>,
    /// Exports trie contents keyed by full symbol name.
    pub exports_by_name: HashMap<String, Export>,
    /// Function start addresses from `LC_FUNCTION_STARTS`, in file order.
    pub function_starts: Vec<u64>,
    /// Records from `LC_DATA_IN_CODE`.
    pub data_in_code: Vec<DataInCodeRecord>,
    /// Module initializer pointers, possibly THUMB interworking.
    pub mod_init_func_pointers: Vec<u64>,
    /// Module terminator pointers, possibly THUMB interworking.
    pub mod_term_func_pointers: Vec<u64>,
    /// Binding sites recorded while interpreting the bind blobs.
    pub relocations: Vec<Relocation>,
    /// Raw blobs carved out of `LC_DYLD_INFO`.
    pub rebase_blob: Vec<u8>,
    pub binding_blob: Vec<u8>,
    pub weak_binding_blob: Vec<u8>,
    pub lazy_binding_blob: Vec<u8>,
    pub export_blob: Vec<u8>,
    /// Raw symbol string table.
    pub strtab: Vec<u8>,
    /// Index from resolved address to symbol table position.
    pub symbols_by_addr: HashMap<u64, usize>,

    entryoff: Option<u64>,
    unixthread_pc: Option<u64>,
}

impl MachO {
    /// Parse a Mach-O image from a seekable stream, registering its
    /// mapped segments with `mem`.
    ///
    /// The stream only needs to live for the duration of the call; every
    /// byte the image needs is copied out. No partial image escapes: any
    /// error aborts the whole load.
    pub fn load<R: Read + Seek>(stream: &mut R, mem: &mut Mem) -> Result<MachO> {
        let magic_raw = read_at(stream, 0, 4)?;
        let magic = Endian::host().read_u32(&magic_raw);
        let endian = detect_byteorder(magic)?;

        // Mach header: seven u32s, layout shared between 32 and 64 bit
        // (the 64-bit header adds a reserved word before the commands).
        let header = read_at(stream, 0, 28)?;
        let mut dec = Decoder::new(&header, endian);
        let _magic = dec.u32()?;
        let cputype = dec.u32()?;
        let cpusubtype = dec.u32()?;
        let filetype = dec.u32()?;
        let ncmds = dec.u32()?;
        let sizeofcmds = dec.u32()?;
        let flags = dec.u32()?;

        let pie = HeaderFlags::from_bits_truncate(flags).contains(HeaderFlags::PIE);
        if !HeaderFlags::from_bits_truncate(flags).contains(HeaderFlags::TWOLEVEL) {
            return Err(Error::InvalidBinary(
                "cannot handle non MH_TWOLEVEL binaries".to_string(),
            ));
        }

        let ident = ident_from_cputype(cputype).ok_or_else(|| {
            Error::Compatibility(format!(
                "unsupported architecture: {:#x}:{:#x}",
                cputype, cpusubtype
            ))
        })?;
        let arch = Arch::from_id(ident, endian)?;
        debug_assert_eq!(arch.bits == 64, cputype & CPU_ARCH_ABI64 != 0);
        debug!(
            "detected arch {} ({}-bit, {})",
            arch.ident,
            arch.bits,
            arch.endness.as_str()
        );

        let mut image = MachO {
            arch,
            cputype,
            cpusubtype,
            filetype,
            flags,
            pie,
            ncmds,
            sizeofcmds,
            entry: 0,
            segments: Vec::new(),
            symbols: Vec::new(),
            imported_libraries: vec!["Self".to_string()],
            exports_by_name: HashMap::new(),
            function_starts: Vec::new(),
            data_in_code: Vec::new(),
            mod_init_func_pointers: Vec::new(),
            mod_term_func_pointers: Vec::new(),
            relocations: Vec::new(),
            rebase_blob: Vec::new(),
            binding_blob: Vec::new(),
            weak_binding_blob: Vec::new(),
            lazy_binding_blob: Vec::new(),
            export_blob: Vec::new(),
            strtab: Vec::new(),
            symbols_by_addr: HashMap::new(),
            entryoff: None,
            unixthread_pc: None,
        };

        // Load commands share a common shape: a u32 identifying the
        // command and a u32 with its total size, then command-specific
        // fields. Unknown commands are skipped by size.
        let lc_offset = u64::from(if image.arch.bits == 32 { 7u32 } else { 8 }) * 4;
        let mut count: u32 = 0;
        let mut offset = lc_offset;
        while count < ncmds && (offset - lc_offset) < u64::from(sizeofcmds) {
            count += 1;
            let head = read_at(stream, offset, 8)?;
            let mut dec = Decoder::new(&head, endian);
            let cmd = dec.u32()?;
            let size = dec.u32()?;
            if size < 8 {
                return Err(Error::InvalidBinary(format!(
                    "load command {:#x} at {:#x} declares size {}",
                    cmd, offset, size
                )));
            }

            match cmd {
                LC_SEGMENT | LC_SEGMENT_64 => {
                    debug!("found LC_SEGMENT(_64) @ {:#x}", offset);
                    image.load_segment(stream, offset, size, mem)?;
                }
                LC_SYMTAB => {
                    debug!("found LC_SYMTAB @ {:#x}", offset);
                    image.load_symtab(stream, offset)?;
                }
                LC_DYLD_INFO | LC_DYLD_INFO_ONLY => {
                    debug!("found LC_DYLD_INFO(_ONLY) @ {:#x}", offset);
                    image.load_dyld_info(stream, offset)?;
                }
                LC_LOAD_DYLIB | LC_LOAD_WEAK_DYLIB | LC_REEXPORT_DYLIB => {
                    debug!("found LC_*_DYLIB @ {:#x}", offset);
                    image.load_dylib_info(stream, offset, size)?;
                }
                LC_MAIN => {
                    debug!("found LC_MAIN @ {:#x}", offset);
                    image.load_lc_main(stream, offset)?;
                }
                LC_UNIXTHREAD => {
                    debug!("found LC_UNIXTHREAD @ {:#x}", offset);
                    image.load_lc_unixthread(stream, offset)?;
                }
                LC_FUNCTION_STARTS => {
                    debug!("found LC_FUNCTION_STARTS @ {:#x}", offset);
                    image.load_lc_function_starts(stream, offset)?;
                }
                LC_DATA_IN_CODE => {
                    debug!("found LC_DATA_IN_CODE @ {:#x}", offset);
                    image.load_lc_data_in_code(stream, offset)?;
                }
                LC_ENCRYPTION_INFO | LC_ENCRYPTION_INFO_64 => {
                    debug!("found LC_ENCRYPTION_INFO @ {:#x}", offset);
                    image.assert_unencrypted(stream, offset)?;
                }
                _ => {
                    debug!("skipping load command {:#x} @ {:#x}", cmd, offset);
                }
            }

            offset += u64::from(size);
        }

        // Catches binaries whose command count and byte span disagree.
        if count < ncmds || (offset - lc_offset) < u64::from(sizeofcmds) {
            return Err(Error::InvalidBinary(format!(
                "load commands end early: {} < {} or {:#x} < {:#x}",
                count,
                ncmds,
                offset - lc_offset,
                sizeofcmds
            )));
        }

        // The file is read; populate the derived state.
        image.resolve_entry()?;
        image.resolve_symbols(mem)?;
        image.parse_mod_funcs(mem)?;

        Ok(image)
    }

    /// [MachO::load] over an in-memory buffer.
    pub fn load_from_bytes(bytes: &[u8], mem: &mut Mem) -> Result<MachO> {
        MachO::load(&mut Cursor::new(bytes), mem)
    }

    pub fn is_64bit(&self) -> bool {
        self.arch.bits == 64
    }

    fn load_segment<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        offset: u64,
        size: u32,
        mem: &mut Mem,
    ) -> Result<()> {
        let is64 = self.is_64bit();
        let buf = read_at(stream, offset, size as usize)?;
        let mut dec = Decoder::new(&buf, self.arch.endness);

        let _cmd = dec.u32()?;
        let _cmdsize = dec.u32()?;
        let segname = dec.name16()?;
        let (vmaddr, memsize, fileoff, filesize) = if is64 {
            (dec.u64()?, dec.u64()?, dec.u64()?, dec.u64()?)
        } else {
            (
                u64::from(dec.u32()?),
                u64::from(dec.u32()?),
                u64::from(dec.u32()?),
                u64::from(dec.u32()?),
            )
        };
        let maxprot = dec.u32()?;
        let initprot = dec.u32()?;
        let nsects = dec.u32()?;
        let flags = dec.u32()?;
        debug!("processing segment '{}'", segname);

        if filesize > memsize {
            return Err(Error::InvalidBinary(format!(
                "segment '{}' filesize {:#x} exceeds memsize {:#x}",
                segname, filesize, memsize
            )));
        }

        // Section records immediately follow the segment header.
        let mut sections = Vec::with_capacity(nsects as usize);
        for i in 0..nsects {
            debug!("processing section #{} in '{}'", i + 1, segname);
            let sectname = dec.name16()?;
            let sec_segname = dec.name16()?;
            let (vaddr, vsize) = if is64 {
                (dec.u64()?, dec.u64()?)
            } else {
                (u64::from(dec.u32()?), u64::from(dec.u32()?))
            };
            let sec_offset = dec.u32()?;
            let align = dec.u32()?;
            let reloff = dec.u32()?;
            let nreloc = dec.u32()?;
            let sec_flags = dec.u32()?;
            let reserved1 = dec.u32()?;
            // The 64-bit record has reserved2 and reserved3; they are
            // decoded as one slot.
            let reserved2 = if is64 {
                dec.u64()?
            } else {
                u64::from(dec.u32()?)
            };

            sections.push(Section {
                sectname,
                segname: sec_segname,
                vaddr,
                memsize: vsize,
                offset: sec_offset,
                align,
                reloff,
                nreloc,
                flags: sec_flags,
                reserved1,
                reserved2,
            });
        }

        if segname == "__PAGEZERO" {
            // Several gigabytes of zeroes that are unreadable by design;
            // accesses are supposed to fault, so no backer is registered.
            info!("found __PAGEZERO, skipping backer for memory conservation");
        } else {
            let mut blob = if filesize > 0 {
                read_at(stream, fileoff, filesize as usize)?
            } else {
                Vec::new()
            };
            blob.resize(memsize as usize, 0);
            mem.add_backer(vmaddr, blob);
        }

        self.segments.push(Segment {
            segname,
            vmaddr,
            memsize,
            fileoff,
            filesize,
            maxprot,
            initprot,
            flags,
            sections,
        });
        Ok(())
    }

    fn load_symtab<R: Read + Seek>(&mut self, stream: &mut R, offset: u64) -> Result<()> {
        let buf = read_at(stream, offset, 24)?;
        let mut dec = Decoder::new(&buf, self.arch.endness);
        let _cmd = dec.u32()?;
        let _cmdsize = dec.u32()?;
        let symoff = dec.u32()?;
        let nsyms = dec.u32()?;
        let stroff = dec.u32()?;
        let strsize = dec.u32()?;

        self.strtab = read_at(stream, u64::from(stroff), strsize as usize)?;

        let structsize = if self.is_64bit() { 16 } else { 12 };
        let table = read_at(stream, u64::from(symoff), nsyms as usize * structsize)?;

        for i in 0..nsyms as usize {
            let entry_offset = u64::from(symoff) + (i * structsize) as u64;
            let mut dec = Decoder::new(&table[i * structsize..][..structsize], self.arch.endness);
            let n_strx = dec.u32()?;
            let n_type = dec.u8()?;
            let n_sect = dec.u8()?;
            // n_desc is signed in the 32-bit nlist; the raw bits are kept.
            let (n_desc, n_value) = if self.is_64bit() {
                (dec.u16()?, dec.u64()?)
            } else {
                (dec.i16()? as u16, u64::from(dec.u32()?))
            };
            let name = if n_strx != 0 {
                String::from_utf8_lossy(cstr_at(&self.strtab, n_strx as usize)?).into_owned()
            } else {
                String::new()
            };
            debug!(
                "adding symbol #{} @ {:#x}: {:?} {:#x},{},{:#x},{:#x}",
                i, entry_offset, name, n_type, n_sect, n_desc, n_value
            );
            self.symbols.push(Symbol::new(
                name,
                entry_offset,
                n_type,
                n_sect,
                n_desc,
                n_value,
                self.arch.word_size(),
            ));
        }
        Ok(())
    }

    /// Extracts the rebase/bind/weak-bind/lazy-bind/export blobs. No
    /// interpretation happens here.
    fn load_dyld_info<R: Read + Seek>(&mut self, stream: &mut R, offset: u64) -> Result<()> {
        let buf = read_at(stream, offset, 48)?;
        let mut dec = Decoder::new(&buf, self.arch.endness);
        let _cmd = dec.u32()?;
        let _cmdsize = dec.u32()?;
        let rebase_off = dec.u32()?;
        let rebase_size = dec.u32()?;
        let bind_off = dec.u32()?;
        let bind_size = dec.u32()?;
        let weak_off = dec.u32()?;
        let weak_size = dec.u32()?;
        let lazy_off = dec.u32()?;
        let lazy_size = dec.u32()?;
        let export_off = dec.u32()?;
        let export_size = dec.u32()?;

        self.rebase_blob = read_at(stream, u64::from(rebase_off), rebase_size as usize)?;
        self.binding_blob = read_at(stream, u64::from(bind_off), bind_size as usize)?;
        self.weak_binding_blob = read_at(stream, u64::from(weak_off), weak_size as usize)?;
        self.lazy_binding_blob = read_at(stream, u64::from(lazy_off), lazy_size as usize)?;
        self.export_blob = read_at(stream, u64::from(export_off), export_size as usize)?;
        Ok(())
    }

    fn load_dylib_info<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        offset: u64,
        size: u32,
    ) -> Result<()> {
        let buf = read_at(stream, offset, 24)?;
        let mut dec = Decoder::new(&buf, self.arch.endness);
        let _cmd = dec.u32()?;
        let _cmdsize = dec.u32()?;
        let name_offset = dec.u32()?;
        let _timestamp = dec.u32()?;
        let _current_version = dec.u32()?;
        let _compat_version = dec.u32()?;

        if name_offset >= size {
            return Err(Error::InvalidBinary(format!(
                "dylib name offset {} outside command of size {}",
                name_offset, size
            )));
        }
        let raw = read_at(
            stream,
            offset + u64::from(name_offset),
            (size - name_offset) as usize,
        )?;
        let name = String::from_utf8_lossy(cstr_at(&raw, 0)?).into_owned();
        debug!("adding library '{}'", name);
        self.imported_libraries.push(name);
        Ok(())
    }

    fn load_lc_main<R: Read + Seek>(&mut self, stream: &mut R, offset: u64) -> Result<()> {
        if self.entryoff.is_some() || self.unixthread_pc.is_some() {
            return Err(Error::InvalidBinary(
                "more than one entry point command".to_string(),
            ));
        }
        let buf = read_at(stream, offset, 24)?;
        let mut dec = Decoder::new(&buf, self.arch.endness);
        let _cmd = dec.u32()?;
        let _cmdsize = dec.u32()?;
        let entryoff = dec.u64()?;
        let _stacksize = dec.u64()?;
        debug!("LC_MAIN: entryoff={:#x}", entryoff);
        self.entryoff = Some(entryoff);
        Ok(())
    }

    fn load_lc_unixthread<R: Read + Seek>(&mut self, stream: &mut R, offset: u64) -> Result<()> {
        if self.entryoff.is_some() || self.unixthread_pc.is_some() {
            return Err(Error::InvalidBinary(
                "more than one entry point command".to_string(),
            ));
        }
        let buf = read_at(stream, offset, 16)?;
        let mut dec = Decoder::new(&buf, self.arch.endness);
        let _cmd = dec.u32()?;
        let _cmdsize = dec.u32()?;
        let flavor = dec.u32()?;
        let _long_count = dec.u32()?;

        // ARM_THREAD_STATE(32/64); the program counter is the last
        // register of the state.
        let pc = if flavor == 1 && !self.is_64bit() {
            let regs = read_at(stream, offset + 16, 16 * 4)?;
            let mut dec = Decoder::new(&regs, self.arch.endness);
            let mut pc = 0u32;
            for _ in 0..16 {
                pc = dec.u32()?;
            }
            u64::from(pc)
        } else if flavor == 1 || flavor == 6 {
            let regs = read_at(stream, offset + 16, 33 * 8)?;
            let mut dec = Decoder::new(&regs, self.arch.endness);
            let mut pc = 0u64;
            for _ in 0..33 {
                pc = dec.u64()?;
            }
            pc
        } else {
            return Err(Error::Compatibility(format!(
                "unknown thread flavor: {}",
                flavor
            )));
        };

        debug!("LC_UNIXTHREAD: __pc={:#x}", pc);
        self.unixthread_pc = Some(pc);
        Ok(())
    }

    // The decoding below follows Apple's dyldinfo.cpp; no official
    // documentation of the blob seems to exist.
    fn load_lc_function_starts<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        offset: u64,
    ) -> Result<()> {
        let buf = read_at(stream, offset, 16)?;
        let mut dec = Decoder::new(&buf, self.arch.endness);
        let _cmd = dec.u32()?;
        let _cmdsize = dec.u32()?;
        let dataoff = dec.u32()?;
        let datasize = dec.u32()?;

        let blob = read_at(stream, u64::from(dataoff), datasize as usize)?;

        // Deltas are relative to the first segment actually mapped from
        // the file, not to whatever segment happens to be first.
        let mut address = self
            .segments
            .iter()
            .find(|seg| seg.fileoff == 0 && seg.filesize != 0)
            .map(|seg| seg.vmaddr)
            .ok_or_else(|| {
                Error::InvalidBinary(
                    "could not determine base address for function starts".to_string(),
                )
            })?;
        debug!("located function starts base address: {:#x}", address);

        let mut i = 0usize;
        while i < blob.len() {
            if blob[i] == 0 {
                break; // list is zero-terminated
            }
            let (delta, consumed) = read_uleb(&blob, i)?;
            address = address.wrapping_add(delta);
            self.function_starts.push(address);
            debug!("function start @ {:#x}", address);
            i += consumed;
        }
        Ok(())
    }

    fn load_lc_data_in_code<R: Read + Seek>(&mut self, stream: &mut R, offset: u64) -> Result<()> {
        let buf = read_at(stream, offset, 16)?;
        let mut dec = Decoder::new(&buf, self.arch.endness);
        let _cmd = dec.u32()?;
        let _cmdsize = dec.u32()?;
        let dataoff = dec.u32()?;
        let datasize = dec.u32()?;

        // Whole 8-byte records only; a trailing fragment is ignored.
        let count = datasize as usize / 8;
        let table = read_at(stream, u64::from(dataoff), count * 8)?;
        for record in table.chunks_exact(8) {
            let mut dec = Decoder::new(record, self.arch.endness);
            self.data_in_code.push(DataInCodeRecord {
                offset: dec.u32()?,
                length: dec.u16()?,
                kind: dec.u16()?,
            });
        }
        Ok(())
    }

    fn assert_unencrypted<R: Read + Seek>(&mut self, stream: &mut R, offset: u64) -> Result<()> {
        let buf = read_at(stream, offset, 20)?;
        let mut dec = Decoder::new(&buf, self.arch.endness);
        let _cmd = dec.u32()?;
        let _cmdsize = dec.u32()?;
        let _cryptoff = dec.u32()?;
        let _cryptsize = dec.u32()?;
        let cryptid = dec.u32()?;
        if cryptid > 0 {
            return Err(Error::InvalidBinary(
                "cannot load encrypted binaries".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve_entry(&mut self) -> Result<()> {
        if let Some(entryoff) = self.entryoff {
            let text = self.find_segment_by_name("__TEXT").ok_or_else(|| {
                Error::InvalidBinary("LC_MAIN present but no __TEXT segment".to_string())
            })?;
            self.entry = text.vmaddr + entryoff;
        } else if let Some(pc) = self.unixthread_pc {
            self.entry = pc;
        } else {
            warn!("no entry point found");
            self.entry = 0;
        }
        Ok(())
    }

    /// Resolve all symbols and fill their derived attributes, then drive
    /// binding.
    fn resolve_symbols(&mut self, mem: &mut Mem) -> Result<()> {
        let regular_bias = self.segments.get(1).map(|seg| seg.vmaddr);
        self.exports_by_name = exports::parse_export_trie(&self.export_blob, regular_bias)?;

        // 1-indexed section lookup table; index 0 is NO_SECT.
        let mut section_tab: Vec<Option<(String, String)>> = vec![None];
        for seg in &self.segments {
            for sec in &seg.sections {
                section_tab.push(Some((sec.segname.clone(), sec.sectname.clone())));
            }
        }

        // Symbols with no natural address get one from a reserved range
        // so that every non-stab symbol is addressable.
        let ext_base = external_symbol_base(self.arch.bits);
        let mut ext_cursor = ext_base;

        for sym in &mut self.symbols {
            sym.is_export = self.exports_by_name.contains_key(&sym.name);

            if sym.is_stab() {
                debug!("symbol '{}' is debugging information, skipping", sym.name);
                continue;
            }

            if sym.is_common() {
                debug!("symbol '{}' is common, updating size", sym.name);
                sym.size = sym.n_value;
            }

            if sym.sym_type() == SymbolType::Section {
                if let Some(Some((segname, sectname))) = section_tab.get(sym.n_sect as usize) {
                    sym.segment_name = Some(segname.clone());
                    sym.section_name = Some(sectname.clone());
                }
                sym.addr = Some(sym.n_value);
            } else if sym.is_import() {
                let ordinal = usize::from(sym.library_ordinal());
                let library = self.imported_libraries.get(ordinal).ok_or_else(|| {
                    Error::InvalidBinary(format!(
                        "symbol '{}' references library ordinal {} of {}",
                        sym.name,
                        ordinal,
                        self.imported_libraries.len()
                    ))
                })?;
                debug!("symbol '{}' is imported from '{}'", sym.name, library);
                sym.library_name = Some(library.clone());
            }

            if sym.addr.is_none() {
                debug!(
                    "assigning address {:#x} to symbol '{}'",
                    ext_cursor, sym.name
                );
                sym.addr = Some(ext_cursor);
                ext_cursor += sym.size;
            }
        }

        // The reserved range becomes ordinary zeroed memory.
        if ext_cursor > ext_base {
            mem.add_backer(ext_base, vec![0u8; (ext_cursor - ext_base) as usize]);
        }

        // Perform binding.
        let blob = std::mem::take(&mut self.binding_blob);
        binding::do_normal_bind(self, mem, &blob)?;
        self.binding_blob = blob;
        let blob = std::mem::take(&mut self.lazy_binding_blob);
        binding::do_lazy_bind(self, mem, &blob)?;
        self.lazy_binding_blob = blob;
        if !self.weak_binding_blob.is_empty() {
            info!(
                "found weak binding blob; weak binding is only sensible across \
                 multiple binaries and is skipped"
            );
        }

        // All resolvable symbols have addresses now; index them.
        self.symbols_by_addr.clear();
        for (i, sym) in self.symbols.iter().enumerate() {
            if sym.is_stab() {
                continue;
            }
            match sym.addr {
                Some(addr) => {
                    self.symbols_by_addr.insert(addr, i);
                }
                None => warn!(
                    "non-stab symbol '{}' @ {:#x} has no address",
                    sym.name, sym.symtab_offset
                ),
            }
        }
        Ok(())
    }

    /// Walk init/term pointer sections and decode their pointer arrays
    /// through the memory store.
    fn parse_mod_funcs(&mut self, mem: &Mem) -> Result<()> {
        debug!("parsing module init/term function pointers");
        let word_size = self.arch.word_size();
        let endian = self.arch.endness;

        for seg in &self.segments {
            for sec in &seg.sections {
                let target = match sec.sect_type() {
                    S_MOD_INIT_FUNC_POINTERS => &mut self.mod_init_func_pointers,
                    S_MOD_TERM_FUNC_POINTERS => &mut self.mod_term_func_pointers,
                    _ => continue,
                };
                debug!("section {} contains init/term pointers", sec.sectname);
                let mut vaddr = sec.vaddr;
                let end = sec.vaddr + sec.memsize;
                while vaddr + word_size <= end {
                    let raw = mem.read_bytes(vaddr, word_size as usize)?;
                    let pointer = if word_size == 8 {
                        endian.read_u64(raw)
                    } else {
                        u64::from(endian.read_u32(raw))
                    };
                    target.push(pointer);
                    vaddr += word_size;
                }
            }
        }
        Ok(())
    }

    /// Look up a segment by name.
    pub fn find_segment_by_name(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|seg| seg.segname == name)
    }

    /// All symbols matching `name`. Stab entries can share names with real
    /// symbols, so this always returns a list.
    ///
    /// `fuzzy` replaces the exact match with a contains-style match;
    /// `include_stab` also returns debugging symbols (not recommended).
    pub fn get_symbol(&self, name: &str, include_stab: bool, fuzzy: bool) -> Vec<&Symbol> {
        self.symbols
            .iter()
            .filter(|sym| include_stab || !sym.is_stab())
            .filter(|sym| {
                if fuzzy {
                    sym.name.contains(name)
                } else {
                    sym.name == name
                }
            })
            .collect()
    }

    /// Locate a symbol by checking `address` against its resolved address,
    /// its binding cross-references, and its stub addresses.
    pub fn get_symbol_by_address_fuzzy(&self, address: u64) -> Option<&Symbol> {
        self.symbols.iter().find(|sym| {
            sym.addr == Some(address)
                || sym.bind_xrefs.contains(&address)
                || sym.symbol_stubs.contains(&address)
        })
    }

    /// The symbol whose resolved address is exactly `address`, via the
    /// post-resolution index.
    pub fn symbol_by_addr(&self, address: u64) -> Option<&Symbol> {
        self.symbols_by_addr
            .get(&address)
            .map(|&i| &self.symbols[i])
    }

    /// A pointer with the low bit set on a 32-bit image encodes a
    /// THUMB-mode target.
    pub fn is_thumb_interworking(&self, address: u64) -> bool {
        !self.is_64bit() && address & 1 != 0
    }

    /// Strip the THUMB interworking bit, yielding the instruction address.
    pub fn decode_thumb_interworking(&self, address: u64) -> u64 {
        if self.is_thumb_interworking(address) {
            address & 0xffff_fffe
        } else {
            address
        }
    }
}

/// Syntactic sugar for [MachO::find_segment_by_name]; panics if no such
/// segment exists.
impl std::ops::Index<&str> for MachO {
    type Output = Segment;

    fn index(&self, name: &str) -> &Segment {
        self.find_segment_by_name(name)
            .unwrap_or_else(|| panic!("no segment named {:?}", name))
    }
}

/// Determine the image's byte order from the raw magic, read host-endian.
fn detect_byteorder(magic: u32) -> Result<Endian> {
    debug!("magic is {:#x}", magic);
    let native = [MH_MAGIC, MH_MAGIC_64];
    let swapped = [MH_CIGAM, MH_CIGAM_64];
    let host = Endian::host();
    if native.contains(&magic) {
        Ok(host)
    } else if swapped.contains(&magic) {
        Ok(match host {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        })
    } else {
        Err(Error::Compatibility(format!(
            "not a Mach-O file (magic {:#x})",
            magic
        )))
    }
}
