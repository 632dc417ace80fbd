/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! dyld binding bytecode interpreter.
//!
//! The binding and lazy-binding blobs carved out of `LC_DYLD_INFO` are
//! programs for a small state machine: opcodes update a current (segment,
//! offset, library ordinal, symbol name, type, addend) tuple, and `DO_BIND`
//! commits one binding at the current address. Committing a binding means
//! three things here: the target address is appended to the named symbol's
//! `bind_xrefs`, the symbol's resolved address (plus addend) is written
//! through the memory store, and a [Relocation] is recorded on the image.
//!
//! The interpreter only ever mutates those pre-declared sets; it does not
//! create symbols.

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::image::MachO;
use crate::mem::Mem;
use crate::reader::{cstr_at, read_sleb, read_uleb};
use crate::symbol::Symbol;

const BIND_OPCODE_MASK: u8 = 0xf0;
const BIND_IMMEDIATE_MASK: u8 = 0x0f;

const BIND_OPCODE_DONE: u8 = 0x00;
const BIND_OPCODE_SET_DYLIB_ORDINAL_IMM: u8 = 0x10;
const BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB: u8 = 0x20;
const BIND_OPCODE_SET_DYLIB_SPECIAL_IMM: u8 = 0x30;
const BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM: u8 = 0x40;
const BIND_OPCODE_SET_TYPE_IMM: u8 = 0x50;
const BIND_OPCODE_SET_ADDEND_SLEB: u8 = 0x60;
const BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB: u8 = 0x70;
const BIND_OPCODE_ADD_ADDR_ULEB: u8 = 0x80;
const BIND_OPCODE_DO_BIND: u8 = 0x90;
const BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB: u8 = 0xa0;
const BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED: u8 = 0xb0;
const BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB: u8 = 0xc0;

/// A binding site: the pointer at `target` receives the resolved address
/// of `symbol` (an index into the owning image's symbol table) plus
/// `addend`. The relocation's owner is the image it is stored on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub target: u64,
    pub symbol: usize,
    pub addend: i64,
}

impl Relocation {
    /// The value the binding wrote: the symbol's resolved address plus the
    /// addend, or `None` if the symbol never received an address.
    pub fn value(&self, symbols: &[Symbol]) -> Option<u64> {
        symbols
            .get(self.symbol)?
            .addr
            .map(|addr| addr.wrapping_add(self.addend as u64))
    }
}

/// Interpret the normal binding blob. Terminates at `BIND_OPCODE_DONE`.
pub fn do_normal_bind(image: &mut MachO, mem: &mut Mem, blob: &[u8]) -> Result<()> {
    debug!("binding: interpreting {} bytes of bind opcodes", blob.len());
    run(image, mem, blob, true)
}

/// Interpret the lazy binding blob. Lazy entries are separated by
/// `BIND_OPCODE_DONE`, so it is a record separator here rather than a
/// terminator and the whole blob is consumed.
pub fn do_lazy_bind(image: &mut MachO, mem: &mut Mem, blob: &[u8]) -> Result<()> {
    debug!(
        "binding: interpreting {} bytes of lazy bind opcodes",
        blob.len()
    );
    run(image, mem, blob, false)
}

/// Sign-extend the special dylib ordinal immediates (0 = self image,
/// 0x0e = -2 flat lookup and so on).
fn special_dylib_ordinal(imm: u8) -> i64 {
    if imm == 0 {
        0
    } else {
        i64::from((imm | 0xf0) as i8)
    }
}

fn run(image: &mut MachO, mem: &mut Mem, blob: &[u8], stop_at_done: bool) -> Result<()> {
    let word_size = image.arch.word_size();

    let mut library_ordinal: i64 = 0;
    let mut symbol_name = String::new();
    let mut symbol_flags: u8 = 0;
    let mut bind_type: u8 = 0;
    let mut addend: i64 = 0;
    let mut address: u64 = 0;

    let mut i = 0usize;
    while i < blob.len() {
        let byte = blob[i];
        i += 1;
        let opcode = byte & BIND_OPCODE_MASK;
        let imm = byte & BIND_IMMEDIATE_MASK;

        match opcode {
            BIND_OPCODE_DONE => {
                if stop_at_done {
                    break;
                }
            }
            BIND_OPCODE_SET_DYLIB_ORDINAL_IMM => {
                library_ordinal = i64::from(imm);
            }
            BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB => {
                let (value, consumed) = read_uleb(blob, i)?;
                i += consumed;
                library_ordinal = value as i64;
            }
            BIND_OPCODE_SET_DYLIB_SPECIAL_IMM => {
                library_ordinal = special_dylib_ordinal(imm);
            }
            BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM => {
                let raw = cstr_at(blob, i)?;
                if i + raw.len() >= blob.len() {
                    return Err(Error::InvalidBinary(
                        "unterminated symbol name in bind stream".to_string(),
                    ));
                }
                symbol_name = String::from_utf8_lossy(raw).into_owned();
                i += raw.len() + 1;
                symbol_flags = imm;
            }
            BIND_OPCODE_SET_TYPE_IMM => {
                bind_type = imm;
            }
            BIND_OPCODE_SET_ADDEND_SLEB => {
                let (value, consumed) = read_sleb(blob, i)?;
                i += consumed;
                addend = value;
            }
            BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB => {
                let (offset, consumed) = read_uleb(blob, i)?;
                i += consumed;
                let segment = image.segments.get(usize::from(imm)).ok_or_else(|| {
                    Error::InvalidBinary(format!(
                        "bind stream references segment {} of {}",
                        imm,
                        image.segments.len()
                    ))
                })?;
                address = segment.vmaddr.wrapping_add(offset);
            }
            BIND_OPCODE_ADD_ADDR_ULEB => {
                let (delta, consumed) = read_uleb(blob, i)?;
                i += consumed;
                address = address.wrapping_add(delta);
            }
            BIND_OPCODE_DO_BIND => {
                bind_at(
                    image,
                    mem,
                    address,
                    &symbol_name,
                    symbol_flags,
                    bind_type,
                    library_ordinal,
                    addend,
                )?;
                address = address.wrapping_add(word_size);
            }
            BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB => {
                bind_at(
                    image,
                    mem,
                    address,
                    &symbol_name,
                    symbol_flags,
                    bind_type,
                    library_ordinal,
                    addend,
                )?;
                let (delta, consumed) = read_uleb(blob, i)?;
                i += consumed;
                address = address.wrapping_add(word_size).wrapping_add(delta);
            }
            BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED => {
                bind_at(
                    image,
                    mem,
                    address,
                    &symbol_name,
                    symbol_flags,
                    bind_type,
                    library_ordinal,
                    addend,
                )?;
                address = address
                    .wrapping_add(word_size)
                    .wrapping_add(u64::from(imm) * word_size);
            }
            BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB => {
                let (count, consumed) = read_uleb(blob, i)?;
                i += consumed;
                let (skip, consumed) = read_uleb(blob, i)?;
                i += consumed;
                for _ in 0..count {
                    bind_at(
                        image,
                        mem,
                        address,
                        &symbol_name,
                        symbol_flags,
                        bind_type,
                        library_ordinal,
                        addend,
                    )?;
                    address = address.wrapping_add(word_size).wrapping_add(skip);
                }
            }
            _ => {
                return Err(Error::InvalidBinary(format!(
                    "unknown bind opcode {:#04x} at offset {}",
                    byte,
                    i - 1
                )));
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn bind_at(
    image: &mut MachO,
    mem: &mut Mem,
    target: u64,
    symbol_name: &str,
    _symbol_flags: u8,
    _bind_type: u8,
    library_ordinal: i64,
    addend: i64,
) -> Result<()> {
    let Some(index) = image
        .symbols
        .iter()
        .position(|sym| !sym.is_stab() && sym.name == symbol_name)
    else {
        warn!(
            "bind at {:#x} references unknown symbol '{}' (ordinal {})",
            target, symbol_name, library_ordinal
        );
        return Ok(());
    };

    let sym = &mut image.symbols[index];
    sym.bind_xrefs.push(target);

    // Addresses are assigned before binding runs, so this is always Some
    // for a symbol the table knows about.
    if let Some(addr) = sym.addr {
        let value = addr.wrapping_add(addend as u64);
        let mut buf = [0u8; 8];
        let word = image.arch.word_size() as usize;
        match word {
            8 => image.arch.endness.write_u64(&mut buf, value),
            _ => image.arch.endness.write_u32(&mut buf[..4], value as u32),
        }
        mem.write_bytes(target, &buf[..word])?;
        debug!(
            "bound '{}' -> {:#x} at {:#x}",
            symbol_name, value, target
        );
    }

    image.relocations.push(Relocation {
        target,
        symbol: index,
        addend,
    });
    Ok(())
}
