/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! Exports trie decoding.
//!
//! Exported symbol names are stored as a prefix tree with ULEB128-encoded
//! node metadata. The walk is iterative with an explicit work list so that
//! adversarial inputs cannot exhaust the call stack.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::reader::{cstr_at, read_uleb};

pub const EXPORT_FLAGS_KIND_MASK: u64 = 0x03;
pub const EXPORT_FLAGS_KIND_REGULAR: u64 = 0x00;
pub const EXPORT_FLAGS_KIND_THREAD_LOCAL: u64 = 0x01;
pub const EXPORT_FLAGS_WEAK_DEFINITION: u64 = 0x04;
pub const EXPORT_FLAGS_REEXPORT: u64 = 0x08;
pub const EXPORT_FLAGS_STUB_AND_RESOLVER: u64 = 0x10;

/// One record of the exports trie, keyed by the full symbol name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Export {
    /// Ordinary export at a virtual address.
    Regular { flags: u64, address: u64 },
    /// Export forwarded from another library.
    Reexport {
        flags: u64,
        library_ordinal: u64,
        name: String,
    },
    /// Export with a lazy stub and a resolver function, both as offsets
    /// from the mach header.
    StubAndResolver {
        flags: u64,
        stub_offset: u64,
        resolver_offset: u64,
    },
}

/// Decode the exports trie blob into name → export records.
///
/// `regular_bias` is the virtual address regular export offsets are
/// relative to (the first mapped segment after `__PAGEZERO`); it is only
/// required if the trie actually contains a regular export.
pub fn parse_export_trie(
    blob: &[u8],
    regular_bias: Option<u64>,
) -> Result<HashMap<String, Export>> {
    let mut exports = HashMap::new();
    if blob.is_empty() {
        debug!("no exports trie");
        return Ok(exports);
    }

    // (node offset, accumulated name prefix)
    let mut nodes_to_do: Vec<(usize, String)> = vec![(0, String::new())];
    // A well-formed trie has at most one node per blob offset; running
    // past that means the node offsets loop.
    let mut node_budget = blob.len() + 1;

    while let Some((index, sym_str)) = nodes_to_do.pop() {
        if node_budget == 0 {
            return Err(Error::InvalidBinary(
                "exports trie does not terminate".to_string(),
            ));
        }
        node_budget -= 1;

        let mut pos = index;
        let mut info_len = u64::from(*blob.get(pos).ok_or_else(|| {
            Error::InvalidBinary(format!("exports trie node offset {:#x} out of range", index))
        })?);
        if info_len > 127 {
            // The terminal info length itself spilled into a multi-byte
            // ULEB128; re-read it as one.
            let (value, consumed) = read_uleb(blob, pos)?;
            info_len = value;
            pos += consumed;
        } else {
            pos += 1;
        }

        if info_len > 0 {
            // This node terminates a complete symbol name.
            let (flags, consumed) = read_uleb(blob, pos)?;
            pos += consumed;
            if flags & EXPORT_FLAGS_REEXPORT != 0 {
                let (library_ordinal, consumed) = read_uleb(blob, pos)?;
                pos += consumed;
                let raw = cstr_at(blob, pos)?;
                pos += raw.len() + 1;
                let name = String::from_utf8_lossy(raw).into_owned();
                info!(
                    "found reexport '{}': {}, '{}'",
                    sym_str, library_ordinal, name
                );
                exports.insert(
                    sym_str.clone(),
                    Export::Reexport {
                        flags,
                        library_ordinal,
                        name,
                    },
                );
            } else if flags & EXPORT_FLAGS_STUB_AND_RESOLVER != 0 {
                warn!("stub-and-resolver export found");
                let (stub_offset, consumed) = read_uleb(blob, pos)?;
                pos += consumed;
                let (resolver_offset, consumed) = read_uleb(blob, pos)?;
                pos += consumed;
                info!(
                    "found stub-and-resolver export '{}': {:#x}, {:#x}",
                    sym_str, stub_offset, resolver_offset
                );
                exports.insert(
                    sym_str.clone(),
                    Export::StubAndResolver {
                        flags,
                        stub_offset,
                        resolver_offset,
                    },
                );
            } else {
                // Regular: offset from the mach header.
                let (symbol_offset, consumed) = read_uleb(blob, pos)?;
                pos += consumed;
                let bias = regular_bias.ok_or_else(|| {
                    Error::InvalidBinary(
                        "regular export found but no mapped segment to bias it".to_string(),
                    )
                })?;
                let address = symbol_offset.wrapping_add(bias);
                info!("found regular export '{}': {:#x}", sym_str, address);
                exports.insert(sym_str.clone(), Export::Regular { flags, address });
            }
        }

        let child_count = *blob.get(pos).ok_or_else(|| {
            Error::InvalidBinary("exports trie truncated at child count".to_string())
        })?;
        pos += 1;
        for _ in 0..child_count {
            let edge = cstr_at(blob, pos)?;
            let mut child_str = sym_str.clone();
            child_str.push_str(&String::from_utf8_lossy(edge));
            pos += edge.len() + 1;
            let (next_node, consumed) = read_uleb(blob, pos)?;
            pos += consumed;
            nodes_to_do.push((next_node as usize, child_str));
        }
    }

    debug!("done parsing exports, {} entries", exports.len());
    Ok(exports)
}
