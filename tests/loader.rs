/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! End-to-end loader tests over synthetic Mach-O images.
//!
//! Each test assembles a little-endian binary byte-for-byte (header, load
//! commands, then payload chunks placed at chosen file offsets) and runs
//! the full load pipeline over it.

use machload::{Error, Export, MachO, Mem};

const MH_EXECUTE: u32 = 0x2;
const MH_TWOLEVEL: u32 = 0x80;
const MH_PIE: u32 = 0x0020_0000;

const CPU_TYPE_ARM: u32 = 0xc;
const CPU_TYPE_ARM64: u32 = 0x0100_000c;

struct ImageBuilder {
    is64: bool,
    cputype: u32,
    flags: u32,
    ncmds_override: Option<u32>,
    commands: Vec<Vec<u8>>,
    chunks: Vec<(usize, Vec<u8>)>,
    min_size: usize,
}

impl ImageBuilder {
    fn new64(cputype: u32, flags: u32) -> ImageBuilder {
        ImageBuilder {
            is64: true,
            cputype,
            flags,
            ncmds_override: None,
            commands: Vec::new(),
            chunks: Vec::new(),
            min_size: 0,
        }
    }

    fn new32(cputype: u32, flags: u32) -> ImageBuilder {
        ImageBuilder {
            is64: false,
            ..ImageBuilder::new64(cputype, flags)
        }
    }

    fn cmd(mut self, bytes: Vec<u8>) -> ImageBuilder {
        self.commands.push(bytes);
        self
    }

    /// Place raw payload bytes at a fixed file offset.
    fn chunk(mut self, offset: usize, bytes: Vec<u8>) -> ImageBuilder {
        self.chunks.push((offset, bytes));
        self
    }

    fn pad_to(mut self, size: usize) -> ImageBuilder {
        self.min_size = size;
        self
    }

    fn build(self) -> Vec<u8> {
        let magic: u32 = if self.is64 { 0xfeedfacf } else { 0xfeedface };
        let sizeofcmds: u32 = self.commands.iter().map(|c| c.len() as u32).sum();
        let ncmds = self
            .ncmds_override
            .unwrap_or(self.commands.len() as u32);

        let mut out = Vec::new();
        w32(&mut out, magic);
        w32(&mut out, self.cputype);
        w32(&mut out, 0); // cpusubtype
        w32(&mut out, MH_EXECUTE);
        w32(&mut out, ncmds);
        w32(&mut out, sizeofcmds);
        w32(&mut out, self.flags);
        if self.is64 {
            w32(&mut out, 0); // reserved
        }
        for command in &self.commands {
            out.extend_from_slice(command);
        }
        for (offset, bytes) in &self.chunks {
            if out.len() < offset + bytes.len() {
                out.resize(offset + bytes.len(), 0);
            }
            out[*offset..*offset + bytes.len()].copy_from_slice(bytes);
        }
        if out.len() < self.min_size {
            out.resize(self.min_size, 0);
        }
        out
    }
}

fn w16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn w32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn w64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn name16(out: &mut Vec<u8>, name: &str) {
    let mut raw = [0u8; 16];
    raw[..name.len()].copy_from_slice(name.as_bytes());
    out.extend_from_slice(&raw);
}

struct SectionSpec {
    sectname: &'static str,
    segname: &'static str,
    vaddr: u64,
    vsize: u64,
    offset: u32,
    flags: u32,
}

fn lc_segment64(
    segname: &str,
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
    sections: &[SectionSpec],
) -> Vec<u8> {
    let mut out = Vec::new();
    w32(&mut out, 0x19); // LC_SEGMENT_64
    w32(&mut out, 72 + 80 * sections.len() as u32);
    name16(&mut out, segname);
    w64(&mut out, vmaddr);
    w64(&mut out, vmsize);
    w64(&mut out, fileoff);
    w64(&mut out, filesize);
    w32(&mut out, 7); // maxprot
    w32(&mut out, 5); // initprot
    w32(&mut out, sections.len() as u32);
    w32(&mut out, 0); // flags
    for sec in sections {
        name16(&mut out, sec.sectname);
        name16(&mut out, sec.segname);
        w64(&mut out, sec.vaddr);
        w64(&mut out, sec.vsize);
        w32(&mut out, sec.offset);
        w32(&mut out, 2); // align
        w32(&mut out, 0); // reloff
        w32(&mut out, 0); // nreloc
        w32(&mut out, sec.flags);
        w32(&mut out, 0); // reserved1
        w32(&mut out, 0); // reserved2
        w32(&mut out, 0); // reserved3
    }
    out
}

fn lc_segment32(
    segname: &str,
    vmaddr: u32,
    vmsize: u32,
    fileoff: u32,
    filesize: u32,
    sections: &[SectionSpec],
) -> Vec<u8> {
    let mut out = Vec::new();
    w32(&mut out, 0x1); // LC_SEGMENT
    w32(&mut out, 56 + 68 * sections.len() as u32);
    name16(&mut out, segname);
    w32(&mut out, vmaddr);
    w32(&mut out, vmsize);
    w32(&mut out, fileoff);
    w32(&mut out, filesize);
    w32(&mut out, 7); // maxprot
    w32(&mut out, 5); // initprot
    w32(&mut out, sections.len() as u32);
    w32(&mut out, 0); // flags
    for sec in sections {
        name16(&mut out, sec.sectname);
        name16(&mut out, sec.segname);
        w32(&mut out, sec.vaddr as u32);
        w32(&mut out, sec.vsize as u32);
        w32(&mut out, sec.offset);
        w32(&mut out, 2); // align
        w32(&mut out, 0); // reloff
        w32(&mut out, 0); // nreloc
        w32(&mut out, sec.flags);
        w32(&mut out, 0); // reserved1
        w32(&mut out, 0); // reserved2
    }
    out
}

fn lc_symtab(symoff: u32, nsyms: u32, stroff: u32, strsize: u32) -> Vec<u8> {
    let mut out = Vec::new();
    w32(&mut out, 0x2); // LC_SYMTAB
    w32(&mut out, 24);
    w32(&mut out, symoff);
    w32(&mut out, nsyms);
    w32(&mut out, stroff);
    w32(&mut out, strsize);
    out
}

fn lc_load_dylib(name: &str) -> Vec<u8> {
    let mut payload = name.as_bytes().to_vec();
    payload.push(0);
    while payload.len() % 4 != 0 {
        payload.push(0);
    }
    let mut out = Vec::new();
    w32(&mut out, 0xc); // LC_LOAD_DYLIB
    w32(&mut out, 24 + payload.len() as u32);
    w32(&mut out, 24); // name offset
    w32(&mut out, 0); // timestamp
    w32(&mut out, 0x10000); // current version
    w32(&mut out, 0x10000); // compat version
    out.extend_from_slice(&payload);
    out
}

fn lc_main(entryoff: u64) -> Vec<u8> {
    let mut out = Vec::new();
    w32(&mut out, 0x8000_0028); // LC_MAIN
    w32(&mut out, 24);
    w64(&mut out, entryoff);
    w64(&mut out, 0); // stacksize
    out
}

fn lc_unixthread64(pc: u64) -> Vec<u8> {
    let mut out = Vec::new();
    w32(&mut out, 0x5); // LC_UNIXTHREAD
    w32(&mut out, 16 + 33 * 8);
    w32(&mut out, 6); // ARM_THREAD_STATE64
    w32(&mut out, 66); // count in u32s
    for _ in 0..32 {
        w64(&mut out, 0);
    }
    w64(&mut out, pc);
    out
}

fn lc_unixthread32(pc: u32) -> Vec<u8> {
    let mut out = Vec::new();
    w32(&mut out, 0x5); // LC_UNIXTHREAD
    w32(&mut out, 16 + 16 * 4);
    w32(&mut out, 1); // ARM_THREAD_STATE
    w32(&mut out, 16); // count in u32s
    for _ in 0..15 {
        w32(&mut out, 0);
    }
    w32(&mut out, pc);
    out
}

fn lc_unixthread_unknown_flavor() -> Vec<u8> {
    let mut out = Vec::new();
    w32(&mut out, 0x5);
    w32(&mut out, 16);
    w32(&mut out, 9); // no such flavor
    w32(&mut out, 0);
    out
}

fn lc_dyld_info(
    bind: (u32, u32),
    weak: (u32, u32),
    lazy: (u32, u32),
    export: (u32, u32),
) -> Vec<u8> {
    let mut out = Vec::new();
    w32(&mut out, 0x22); // LC_DYLD_INFO
    w32(&mut out, 48);
    w32(&mut out, 0); // rebase off
    w32(&mut out, 0); // rebase size
    w32(&mut out, bind.0);
    w32(&mut out, bind.1);
    w32(&mut out, weak.0);
    w32(&mut out, weak.1);
    w32(&mut out, lazy.0);
    w32(&mut out, lazy.1);
    w32(&mut out, export.0);
    w32(&mut out, export.1);
    out
}

fn lc_function_starts(dataoff: u32, datasize: u32) -> Vec<u8> {
    let mut out = Vec::new();
    w32(&mut out, 0x26); // LC_FUNCTION_STARTS
    w32(&mut out, 16);
    w32(&mut out, dataoff);
    w32(&mut out, datasize);
    out
}

fn lc_data_in_code(dataoff: u32, datasize: u32) -> Vec<u8> {
    let mut out = Vec::new();
    w32(&mut out, 0x29); // LC_DATA_IN_CODE
    w32(&mut out, 16);
    w32(&mut out, dataoff);
    w32(&mut out, datasize);
    out
}

fn lc_encryption_info(cryptid: u32) -> Vec<u8> {
    let mut out = Vec::new();
    w32(&mut out, 0x21); // LC_ENCRYPTION_INFO
    w32(&mut out, 20);
    w32(&mut out, 0); // cryptoff
    w32(&mut out, 0); // cryptsize
    w32(&mut out, cryptid);
    out
}

fn nlist64(n_strx: u32, n_type: u8, n_sect: u8, n_desc: u16, n_value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    w32(&mut out, n_strx);
    out.push(n_type);
    out.push(n_sect);
    w16(&mut out, n_desc);
    w64(&mut out, n_value);
    out
}

fn nlist32(n_strx: u32, n_type: u8, n_sect: u8, n_desc: u16, n_value: u32) -> Vec<u8> {
    let mut out = Vec::new();
    w32(&mut out, n_strx);
    out.push(n_type);
    out.push(n_sect);
    w16(&mut out, n_desc);
    w32(&mut out, n_value);
    out
}

fn assert_invalid(result: machload::Result<MachO>) {
    match result {
        Err(Error::InvalidBinary(_)) => {}
        other => panic!("expected InvalidBinary, got {:?}", other.map(|_| ())),
    }
}

fn assert_compat(result: machload::Result<MachO>) {
    match result {
        Err(Error::Compatibility(_)) => {}
        other => panic!("expected Compatibility, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn minimal_arm64_executable() {
    let file = ImageBuilder::new64(CPU_TYPE_ARM64, MH_PIE | MH_TWOLEVEL)
        .cmd(lc_segment64("__PAGEZERO", 0, 0x1_0000_0000, 0, 0, &[]))
        .cmd(lc_segment64(
            "__TEXT",
            0x1_0000_0000,
            0x1000,
            0,
            0x200,
            &[SectionSpec {
                sectname: "__text",
                segname: "__TEXT",
                vaddr: 0x1_0000_0100,
                vsize: 0x100,
                offset: 0x100,
                flags: 0x8000_0400, // S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS
            }],
        ))
        .cmd(lc_main(0x1000))
        .pad_to(0x200)
        .build();

    let mut mem = Mem::new();
    let image = MachO::load_from_bytes(&file, &mut mem).unwrap();

    assert_eq!(image.arch.ident, "aarch");
    assert_eq!(image.arch.bits, 64);
    assert_eq!(image.arch.endness.as_str(), "lsb");
    assert!(image.pie);
    assert_eq!(image.entry, 0x1_0000_1000);
    assert_eq!(image.segments.len(), 2);
    assert_eq!(image.segments[0].segname, "__PAGEZERO");
    assert_eq!(image.segments[1].sections.len(), 1);

    // __PAGEZERO gets no backer; __TEXT is padded to its memory size with
    // the file bytes up front.
    assert!(mem.backer_at(0).is_none());
    let backer = mem.backer_at(0x1_0000_0000).unwrap();
    assert_eq!(backer.len(), 0x1000);
    assert_eq!(&backer[..0x200], &file[..0x200]);
    assert!(backer[0x200..].iter().all(|&b| b == 0));

    // Index-by-name sugar.
    assert_eq!(image["__TEXT"].vmaddr, 0x1_0000_0000);
}

#[test]
fn duplicate_entry_commands_are_rejected() {
    let file = ImageBuilder::new64(CPU_TYPE_ARM64, MH_PIE | MH_TWOLEVEL)
        .cmd(lc_segment64("__PAGEZERO", 0, 0x1_0000_0000, 0, 0, &[]))
        .cmd(lc_segment64("__TEXT", 0x1_0000_0000, 0x1000, 0, 0x200, &[]))
        .cmd(lc_main(0x1000))
        .cmd(lc_unixthread64(0x1_0000_1000))
        .pad_to(0x400)
        .build();

    assert_invalid(MachO::load_from_bytes(&file, &mut Mem::new()));
}

#[test]
fn non_twolevel_binaries_are_rejected() {
    let file = ImageBuilder::new32(CPU_TYPE_ARM, MH_PIE)
        .cmd(lc_segment32("__TEXT", 0x1000, 0x1000, 0, 0x100, &[]))
        .pad_to(0x100)
        .build();

    assert_invalid(MachO::load_from_bytes(&file, &mut Mem::new()));
}

#[test]
fn encrypted_binaries_are_rejected() {
    let file = ImageBuilder::new64(CPU_TYPE_ARM64, MH_TWOLEVEL)
        .cmd(lc_segment64("__TEXT", 0x1_0000_0000, 0x1000, 0, 0x100, &[]))
        .cmd(lc_encryption_info(1))
        .pad_to(0x100)
        .build();

    assert_invalid(MachO::load_from_bytes(&file, &mut Mem::new()));
}

#[test]
fn symbol_resolution_and_external_synthesis() {
    let strtab = b"\0_foo\0_bar\0_qux\0".to_vec();
    let mut symtab = Vec::new();
    // Undefined external import from library ordinal 1 (n_desc high byte).
    symtab.extend_from_slice(&nlist64(1, 0x01, 0, 0x0100, 0));
    // Defined in section 1 of the image.
    symtab.extend_from_slice(&nlist64(6, 0x0f, 1, 0, 0x1_0000_1234));
    // Second import, to observe external address assignment order.
    symtab.extend_from_slice(&nlist64(11, 0x01, 0, 0x0100, 0));

    let file = ImageBuilder::new64(CPU_TYPE_ARM64, MH_PIE | MH_TWOLEVEL)
        .cmd(lc_segment64("__PAGEZERO", 0, 0x1_0000_0000, 0, 0, &[]))
        .cmd(lc_segment64(
            "__TEXT",
            0x1_0000_0000,
            0x2000,
            0,
            0x200,
            &[SectionSpec {
                sectname: "__text",
                segname: "__TEXT",
                vaddr: 0x1_0000_1000,
                vsize: 0x1000,
                offset: 0x100,
                flags: 0x8000_0400,
            }],
        ))
        .cmd(lc_symtab(0x400, 3, 0x440, strtab.len() as u32))
        .cmd(lc_load_dylib("libSystem"))
        .chunk(0x400, symtab)
        .chunk(0x440, strtab)
        .build();

    let mut mem = Mem::new();
    let image = MachO::load_from_bytes(&file, &mut mem).unwrap();

    assert_eq!(image.imported_libraries, ["Self", "libSystem"]);
    // No entry command: warning path, entry stays 0.
    assert_eq!(image.entry, 0);

    let bar = &image.get_symbol("_bar", false, false)[0];
    assert_eq!(bar.addr, Some(0x1_0000_1234));
    assert_eq!(bar.segment_name.as_deref(), Some("__TEXT"));
    assert_eq!(bar.section_name.as_deref(), Some("__text"));

    let foo = &image.get_symbol("_foo", false, false)[0];
    assert!(foo.is_import());
    assert_eq!(foo.library_name.as_deref(), Some("libSystem"));
    assert_eq!(foo.addr, Some(0xff00_0000_0000_0000));

    // The second synthesized address starts where the first one's size
    // ends; both stay in the reserved range.
    let qux = &image.get_symbol("_qux", false, false)[0];
    assert_eq!(qux.addr, Some(0xff00_0000_0000_0000 + foo.size));

    // The external region backs exactly [base, cursor).
    let ext = mem.backer_at(0xff00_0000_0000_0000).unwrap();
    assert_eq!(ext.len() as u64, foo.size + qux.size);
    assert!(ext.iter().all(|&b| b == 0));

    // Address index and fuzzy name lookup.
    assert_eq!(
        image.symbol_by_addr(0x1_0000_1234).map(|s| s.name.as_str()),
        Some("_bar")
    );
    assert_eq!(image.get_symbol("_f", false, true).len(), 1);
    assert!(image.get_symbol("_f", false, false).is_empty());
}

#[test]
fn reexport_trie_entry() {
    // Trie: root with edge "_bar" to a terminal REEXPORT node naming
    // "_baz" in library ordinal 2.
    let trie = vec![
        0x00, 0x01, b'_', b'b', b'a', b'r', 0x00, 0x08, // root
        0x07, 0x08, 0x02, b'_', b'b', b'a', b'z', 0x00, 0x00, // terminal
    ];
    let trie_len = trie.len() as u32;

    let file = ImageBuilder::new64(CPU_TYPE_ARM64, MH_PIE | MH_TWOLEVEL)
        .cmd(lc_segment64("__PAGEZERO", 0, 0x1_0000_0000, 0, 0, &[]))
        .cmd(lc_segment64("__TEXT", 0x1_0000_0000, 0x1000, 0, 0x200, &[]))
        .cmd(lc_dyld_info((0, 0), (0, 0), (0, 0), (0x600, trie_len)))
        .chunk(0x600, trie)
        .pad_to(0x200)
        .build();

    let mut mem = Mem::new();
    let image = MachO::load_from_bytes(&file, &mut mem).unwrap();

    assert_eq!(
        image.exports_by_name.get("_bar"),
        Some(&Export::Reexport {
            flags: 0x08,
            library_ordinal: 2,
            name: "_baz".to_string(),
        })
    );
}

#[test]
fn binding_function_starts_and_mod_funcs() {
    // __DATA payload: two init pointers, one term pointer, and a pointer
    // slot at +0x20 for the binding to fill.
    let mut data = vec![0u8; 0x100];
    data[0..8].copy_from_slice(&0x1_0000_0100u64.to_le_bytes());
    data[8..16].copy_from_slice(&0x1_0000_0200u64.to_le_bytes());
    data[16..24].copy_from_slice(&0x1_0000_0300u64.to_le_bytes());

    let strtab = b"\0_printf\0".to_vec();
    let symtab = nlist64(1, 0x01, 0, 0x0100, 0);

    // Function starts: deltas 0x100 then 0x10, zero-terminated.
    let starts = vec![0x80, 0x02, 0x10, 0x00];

    let mut dice = Vec::new();
    w32(&mut dice, 0x100);
    w16(&mut dice, 4);
    w16(&mut dice, 1);
    w32(&mut dice, 0x200);
    w16(&mut dice, 8);
    w16(&mut dice, 2);

    // SET_DYLIB_ORDINAL_IMM(1); SET_SYMBOL "_printf"; SET_TYPE_IMM(1);
    // SET_SEGMENT_AND_OFFSET_ULEB(seg 1, +0x20); DO_BIND; DONE.
    let mut bind = vec![0x11, 0x40];
    bind.extend_from_slice(b"_printf\0");
    bind.extend_from_slice(&[0x51, 0x71, 0x20, 0x90, 0x00]);
    let bind_len = bind.len() as u32;

    let file = ImageBuilder::new64(CPU_TYPE_ARM64, MH_PIE | MH_TWOLEVEL)
        .cmd(lc_segment64("__TEXT", 0x1_0000_0000, 0x1000, 0, 0x200, &[]))
        .cmd(lc_segment64(
            "__DATA",
            0x1_0000_4000,
            0x100,
            0x400,
            0x100,
            &[
                SectionSpec {
                    sectname: "__mod_init_func",
                    segname: "__DATA",
                    vaddr: 0x1_0000_4000,
                    vsize: 16,
                    offset: 0x400,
                    flags: 0x9, // S_MOD_INIT_FUNC_POINTERS
                },
                SectionSpec {
                    sectname: "__mod_term_func",
                    segname: "__DATA",
                    vaddr: 0x1_0000_4010,
                    vsize: 8,
                    offset: 0x410,
                    flags: 0xa, // S_MOD_TERM_FUNC_POINTERS
                },
            ],
        ))
        .cmd(lc_symtab(0x500, 1, 0x520, strtab.len() as u32))
        .cmd(lc_load_dylib("libSystem.B.dylib"))
        .cmd(lc_function_starts(0x540, starts.len() as u32))
        .cmd(lc_data_in_code(0x550, dice.len() as u32))
        .cmd(lc_dyld_info((0x560, bind_len), (0, 0), (0, 0), (0, 0)))
        .chunk(0x400, data)
        .chunk(0x500, symtab)
        .chunk(0x520, strtab)
        .chunk(0x540, starts)
        .chunk(0x550, dice)
        .chunk(0x560, bind)
        .build();

    let mut mem = Mem::new();
    let image = MachO::load_from_bytes(&file, &mut mem).unwrap();

    // Function starts walk deltas from the first file-mapped segment.
    assert_eq!(
        image.function_starts,
        vec![0x1_0000_0100, 0x1_0000_0110]
    );

    assert_eq!(image.data_in_code.len(), 2);
    assert_eq!(image.data_in_code[0].offset, 0x100);
    assert_eq!(image.data_in_code[0].length, 4);
    assert_eq!(image.data_in_code[0].kind, 1);
    assert_eq!(image.data_in_code[1].offset, 0x200);

    assert_eq!(
        image.mod_init_func_pointers,
        vec![0x1_0000_0100, 0x1_0000_0200]
    );
    assert_eq!(image.mod_term_func_pointers, vec![0x1_0000_0300]);

    // The bind wrote the import's synthesized address into the slot.
    let printf = &image.get_symbol("_printf", false, false)[0];
    let printf_addr = printf.addr.unwrap();
    assert_eq!(printf_addr, 0xff00_0000_0000_0000);
    assert_eq!(printf.bind_xrefs, vec![0x1_0000_4020]);
    let slot = mem.read_bytes(0x1_0000_4020, 8).unwrap();
    assert_eq!(u64::from_le_bytes(slot.try_into().unwrap()), printf_addr);

    assert_eq!(image.relocations.len(), 1);
    assert_eq!(image.relocations[0].target, 0x1_0000_4020);
    assert_eq!(
        image.relocations[0].value(&image.symbols),
        Some(printf_addr)
    );

    // The bind site resolves back to the symbol.
    assert_eq!(
        image
            .get_symbol_by_address_fuzzy(0x1_0000_4020)
            .map(|s| s.name.as_str()),
        Some("_printf")
    );
}

#[test]
fn arm32_unixthread_and_thumb() {
    let strtab = b"\0_go\0_ext\0".to_vec();
    let mut symtab = Vec::new();
    // Sectioned symbol inside __text.
    symtab.extend_from_slice(&nlist32(1, 0x0f, 1, 0, 0x1001));
    // Undefined external with ordinal 0: imported from "Self".
    symtab.extend_from_slice(&nlist32(5, 0x01, 0, 0, 0));

    let file = ImageBuilder::new32(CPU_TYPE_ARM, MH_TWOLEVEL)
        .cmd(lc_segment32(
            "__TEXT",
            0x1000,
            0x1000,
            0,
            0x100,
            &[SectionSpec {
                sectname: "__text",
                segname: "__TEXT",
                vaddr: 0x1000,
                vsize: 0x100,
                offset: 0,
                flags: 0x8000_0400,
            }],
        ))
        .cmd(lc_unixthread32(0x1041))
        .cmd(lc_symtab(0x200, 2, 0x220, strtab.len() as u32))
        .chunk(0x200, symtab)
        .chunk(0x220, strtab)
        .pad_to(0x100)
        .build();

    let mut mem = Mem::new();
    let image = MachO::load_from_bytes(&file, &mut mem).unwrap();

    assert_eq!(image.arch.ident, "arm");
    assert_eq!(image.arch.bits, 32);
    assert!(!image.pie);
    assert_eq!(image.entry, 0x1041);

    assert!(image.is_thumb_interworking(0x1041));
    assert_eq!(image.decode_thumb_interworking(0x1041), 0x1040);
    assert!(!image.is_thumb_interworking(0x1040));
    assert_eq!(image.decode_thumb_interworking(0x1040), 0x1040);

    let go = &image.get_symbol("_go", false, false)[0];
    assert_eq!(go.addr, Some(0x1001));
    assert_eq!(go.section_name.as_deref(), Some("__text"));

    // 32-bit images synthesize external addresses from 0xff000000 and
    // ordinal 0 maps to the image itself.
    let ext = &image.get_symbol("_ext", false, false)[0];
    assert_eq!(ext.library_name.as_deref(), Some("Self"));
    assert_eq!(ext.addr, Some(0xff00_0000));
    let backer = mem.backer_at(0xff00_0000).unwrap();
    assert_eq!(backer.len() as u64, ext.size);
}

#[test]
fn unknown_magic_is_rejected() {
    let mut file = ImageBuilder::new64(CPU_TYPE_ARM64, MH_TWOLEVEL)
        .cmd(lc_segment64("__TEXT", 0x1_0000_0000, 0x1000, 0, 0x100, &[]))
        .pad_to(0x100)
        .build();
    file[..4].copy_from_slice(&0x7f45_4c46u32.to_le_bytes()); // ELF magic

    assert_compat(MachO::load_from_bytes(&file, &mut Mem::new()));
}

#[test]
fn unknown_cputype_is_rejected() {
    let file = ImageBuilder::new64(0x0100_0012, MH_TWOLEVEL) // PowerPC64
        .cmd(lc_segment64("__TEXT", 0x1_0000_0000, 0x1000, 0, 0x100, &[]))
        .pad_to(0x100)
        .build();

    assert_compat(MachO::load_from_bytes(&file, &mut Mem::new()));
}

#[test]
fn unknown_thread_flavor_is_rejected() {
    let file = ImageBuilder::new64(CPU_TYPE_ARM64, MH_TWOLEVEL)
        .cmd(lc_segment64("__TEXT", 0x1_0000_0000, 0x1000, 0, 0x100, &[]))
        .cmd(lc_unixthread_unknown_flavor())
        .pad_to(0x100)
        .build();

    assert_compat(MachO::load_from_bytes(&file, &mut Mem::new()));
}

#[test]
fn short_load_command_table_is_rejected() {
    // Header promises two commands but only one is present.
    let mut builder = ImageBuilder::new64(CPU_TYPE_ARM64, MH_TWOLEVEL)
        .cmd(lc_segment64("__TEXT", 0x1_0000_0000, 0x1000, 0, 0x100, &[]))
        .pad_to(0x100);
    builder.ncmds_override = Some(2);
    let file = builder.build();

    assert_invalid(MachO::load_from_bytes(&file, &mut Mem::new()));
}
