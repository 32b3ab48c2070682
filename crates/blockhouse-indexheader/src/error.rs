//! Index-Header Error Types
//!
//! This module defines the errors the index-header subsystem can surface.
//!
//! ## Error Categories
//!
//! ### Format Errors
//! - `Format`: everything the format layer can report — invalid magic,
//!   unsupported versions, checksum mismatches, short reads, corruption,
//!   and `NotFound` for absent names/values/symbols
//!
//! ### I/O Errors
//! - `ObjectStore`: ranged reads against the block's bucket failed
//! - `Io`: local filesystem operations failed
//!
//! ### Build Errors
//! - `Build`: any of the above, tagged with the build phase it happened in
//!   (`"read preamble"`, `"read toc"`, `"copy symbols"`, `"copy postings"`,
//!   `"write toc"`), so a failed header build names the step that died
//!
//! Query paths only ever produce `NotFound` or `Corrupt` (through
//! `Format`); they never perform fallible I/O.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] blockhouse_core::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{phase}: {source}")]
    Build {
        phase: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Tag this error with the build phase it occurred in.
    pub fn in_phase(self, phase: &'static str) -> Error {
        Error::Build {
            phase,
            source: Box::new(self),
        }
    }

    /// Whether this error is (or wraps) a `NotFound` lookup miss.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Format(blockhouse_core::Error::NotFound) => true,
            Error::Build { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
