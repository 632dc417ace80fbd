/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! Symbol records decoded from the `nlist` table.
//!
//! A symbol starts out as the raw `nlist` fields plus a name looked up in
//! the string table. The resolution pass after load-command iteration fills
//! in the derived attributes: the address (natural or synthesized), the
//! owning library for imports, and the segment/section names for sectioned
//! symbols. Binding then appends to the cross-reference sets.
//!
//! Reference for the `nlist` encoding: `/usr/include/mach-o/nlist.h`.

/// Mask for the stab (debugging) bits of `n_type`.
pub const N_STAB: u8 = 0xe0;
/// Mask for the type bits of `n_type`.
pub const N_TYPE: u8 = 0x0e;
/// External (visible to the linker) bit of `n_type`.
pub const N_EXT: u8 = 0x01;

/// Symbol type derived from `n_type & N_TYPE`.
///
/// `Other` exists for pattern matching over hostile inputs; never compare
/// against it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    /// `N_UNDF`: undefined, possibly an import or a common symbol.
    Undefined,
    /// `N_ABS`: absolute address in `n_value`.
    Absolute,
    /// `N_INDR`: indirection to the symbol named by `n_value`.
    Indirect,
    /// `N_PBUD`: prebound undefined.
    Prebound,
    /// `N_SECT`: defined in the section indexed by `n_sect`.
    Section,
    /// Reserved type bits not defined by the format.
    Other(u8),
}

/// One entry of the symbol table with its resolution state.
#[derive(Debug, Clone)]
pub struct Symbol {
    /// Name from the string table; empty when `n_strx` is 0.
    pub name: String,
    /// File offset of this entry, kept for diagnostics.
    pub symtab_offset: u64,
    pub n_type: u8,
    pub n_sect: u8,
    /// Raw `n_desc` bits. The high byte carries the two-level namespace
    /// library ordinal for undefined symbols.
    pub n_desc: u16,
    pub n_value: u64,

    /// Absolute virtual address, filled by resolution. Symbols with no
    /// natural address get one synthesized in the external region.
    pub addr: Option<u64>,
    /// Size in bytes: the pointer width unless the symbol is common, in
    /// which case `n_value` carries the real size.
    pub size: u64,
    /// Name of the library this symbol is imported from.
    pub library_name: Option<String>,
    /// Segment name for sectioned symbols.
    pub segment_name: Option<String>,
    /// Section name for sectioned symbols.
    pub section_name: Option<String>,
    /// Whether the name appears in the exports trie.
    pub is_export: bool,
    /// Virtual addresses bound to this symbol by the binding pass.
    pub bind_xrefs: Vec<u64>,
    /// Virtual addresses of stubs referring to this symbol.
    pub symbol_stubs: Vec<u64>,
}

impl Symbol {
    pub fn new(
        name: String,
        symtab_offset: u64,
        n_type: u8,
        n_sect: u8,
        n_desc: u16,
        n_value: u64,
        word_size: u64,
    ) -> Symbol {
        Symbol {
            name,
            symtab_offset,
            n_type,
            n_sect,
            n_desc,
            n_value,
            addr: None,
            size: word_size,
            library_name: None,
            segment_name: None,
            section_name: None,
            is_export: false,
            bind_xrefs: Vec::new(),
            symbol_stubs: Vec::new(),
        }
    }

    pub fn sym_type(&self) -> SymbolType {
        match self.n_type & N_TYPE {
            0x0 => SymbolType::Undefined,
            0x2 => SymbolType::Absolute,
            0xa => SymbolType::Indirect,
            0xc => SymbolType::Prebound,
            0xe => SymbolType::Section,
            other => SymbolType::Other(other),
        }
    }

    /// Debugging (stab) entry; irrelevant to loading.
    pub fn is_stab(&self) -> bool {
        self.n_type & N_STAB != 0
    }

    pub fn is_external(&self) -> bool {
        self.n_type & N_EXT != 0
    }

    /// Common symbol: uninitialized external data whose size rides in
    /// `n_value` and whose storage the loader allocates.
    pub fn is_common(&self) -> bool {
        self.is_external() && self.sym_type() == SymbolType::Undefined && self.n_value != 0
    }

    /// Undefined external resolved against an imported library.
    pub fn is_import(&self) -> bool {
        self.is_external() && self.sym_type() == SymbolType::Undefined && !self.is_common()
    }

    /// Two-level namespace library ordinal from the high byte of `n_desc`.
    /// Ordinal 0 refers to the image itself.
    pub fn library_ordinal(&self) -> u8 {
        (self.n_desc >> 8) as u8
    }
}
