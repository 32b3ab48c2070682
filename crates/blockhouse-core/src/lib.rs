//! BlockHouse Core
//!
//! Shared format primitives for BlockHouse — the pieces every crate that
//! touches on-disk index data needs:
//!
//! 1. **Encoding**: bounds-checked big-endian and uvarint codecs over
//!    borrowed byte slices, plus CRC32-Castagnoli
//! 2. **Block index layout**: magic, versions, the TOC tail, and the
//!    postings-offset-table walker
//! 3. **Symbol table view**: id ↔ string resolution over a mapped symbols
//!    section
//! 4. **Errors**: the format-level error taxonomy shared by readers and
//!    builders
//!
//! Everything here is pure: no I/O, no async, no allocation beyond the
//! strings handed back across API boundaries. The index-header subsystem
//! (`blockhouse-indexheader`) composes these against object storage and
//! the local filesystem.

pub mod encoding;
pub mod error;
pub mod index;
pub mod symbols;

pub use error::{Error, Result};
pub use index::{IndexToc, IndexVersion, PostingRange, TableEntry};
pub use symbols::SymbolTable;
