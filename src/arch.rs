/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! Architecture identification.
//!
//! The Mach header's `cputype` selects the architecture; Apple deviates
//! from the standard ABI in places, so identification is by major CPU type
//! only and `cpusubtype` is carried through without interpretation.

use crate::error::{Error, Result};
use crate::reader::Endian;

/// The "is 64-bit" bit in `cputype`.
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;

pub const CPU_TYPE_X86: u32 = 0x7;
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM: u32 = 0xc;
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;

/// Architecture descriptor attached to a loaded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arch {
    /// Registry identifier ("x86", "x64", "arm", "aarch").
    pub ident: &'static str,
    /// Pointer width in bits.
    pub bits: u32,
    /// Byte order of the image.
    pub endness: Endian,
}

impl Arch {
    /// Resolve an architecture descriptor from a registry identifier and an
    /// endianness tag, the way an external arch registry would.
    pub fn from_id(ident: &str, endness: Endian) -> Result<Arch> {
        let (ident, bits) = match ident {
            "x86" => ("x86", 32),
            "x64" => ("x64", 64),
            "arm" => ("arm", 32),
            "aarch" => ("aarch", 64),
            _ => {
                return Err(Error::Compatibility(format!(
                    "unknown architecture identifier {:?}",
                    ident
                )))
            }
        };
        Ok(Arch {
            ident,
            bits,
            endness,
        })
    }

    /// Pointer size in bytes.
    pub fn word_size(&self) -> u64 {
        u64::from(self.bits) / 8
    }
}

/// Map a Mach `cputype` to a registry identifier, or `None` for types this
/// loader does not support.
pub fn ident_from_cputype(cputype: u32) -> Option<&'static str> {
    match cputype {
        CPU_TYPE_X86 => Some("x86"),
        CPU_TYPE_X86_64 => Some("x64"),
        CPU_TYPE_ARM => Some("arm"),
        CPU_TYPE_ARM64 => Some("aarch"),
        _ => None,
    }
}
