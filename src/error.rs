/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! Error types surfaced at the loader boundary.

use thiserror::Error;

/// Result type alias using the loader's [Error] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can abort a parse. No partial image is observable after any
/// of these; the whole load fails.
#[derive(Error, Debug)]
pub enum Error {
    /// Structurally valid file that this loader does not support:
    /// unrecognized magic, unknown CPU type, unknown thread flavor.
    #[error("unsupported binary: {0}")]
    Compatibility(String),

    /// Malformed or hostile file: load commands overrunning their declared
    /// bounds, duplicate entry-point commands, encrypted segments, and the
    /// like.
    #[error("invalid binary: {0}")]
    InvalidBinary(String),

    /// Underlying I/O failure while reading the input stream.
    #[error("operation failed: {0}")]
    Operation(#[from] std::io::Error),
}
