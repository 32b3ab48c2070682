//! Error Types for BlockHouse Format Code
//!
//! This module defines the errors that can come out of decoding or
//! validating on-disk index data.
//!
//! ## Error Categories
//!
//! ### Data Integrity Errors
//! - `InvalidMagic`: file doesn't start with the index magic number
//! - `InvalidChecksum`: CRC32-Castagnoli mismatch on a checksummed region
//! - `Corrupt`: structurally malformed data (bad varints, impossible
//!   offsets, unexpected key counts)
//!
//! ### Version/Compatibility Errors
//! - `UnsupportedVersion`: index-header format version we don't understand
//! - `UnsupportedIndexVersion`: block index version outside {1, 2}
//!
//! ### Bounds Errors
//! - `ShortRead`: a file or byte range is smaller than a decode requires
//!
//! ### Lookup Errors
//! - `NotFound`: queried label name/value absent; symbol id out of range
//!
//! ## Usage
//! All format-level functions return `Result<T>` which is aliased to
//! `Result<T, Error>`, so callers propagate with `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid magic number {0:#010x}")]
    InvalidMagic(u32),

    #[error("unsupported index-header version: {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported block index version: {0}")]
    UnsupportedIndexVersion(u8),

    #[error("checksum mismatch")]
    InvalidChecksum,

    #[error("short read: need {need} bytes, have {have}")]
    ShortRead { need: usize, have: usize },

    #[error("corrupt index data: {0}")]
    Corrupt(String),

    #[error("not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, Error>;
