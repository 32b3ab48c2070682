//! BlockHouse Index-Header
//!
//! Every immutable block in object storage carries a large `index` file:
//! a symbol table, per-series posting lists, and a postings offset table
//! mapping (label name, value) to the byte range of its posting list.
//! Answering a query over many blocks must not mean fetching many full
//! indexes — so each block gets a small derived **index-header**, built
//! once from ranged reads and memory-mapped thereafter.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────┐
//! │  Object storage  │  <block ulid>/index
//! └────────┬─────────┘
//!          │ ranged reads (preamble, TOC tail, two sections)
//!          ▼
//! ┌──────────────────┐
//! │     Builder      │  write_header()
//! └────────┬─────────┘
//!          │ <local dir>/<block ulid>/index-header
//!          ▼
//! ┌──────────────────┐
//! │   HeaderReader   │  mmap + sparse in-memory index
//! └────────┬─────────┘
//!          │ label names / label values / postings byte ranges
//!          ▼
//!     query layer
//! ```
//!
//! Build and load are disjoint lifecycles: the reader never talks to
//! object storage, and the builder never reads a header back. The glue is
//! [`HeaderReader::open_or_build`], which maps an existing header and
//! falls back to building it.
//!
//! ## File Format (version 1)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                           │
//! │ - Magic: 0xBAAAD792 (4 bytes BE)                            │
//! │ - Header-format version: 1 (1 byte)                         │
//! │ - Original index version: 1 or 2 (1 byte)                   │
//! │ - Postings-offset-table position in the original index      │
//! │   (8 bytes BE)                                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Symbols section (byte-exact copy from the original index)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Postings offset table (byte-exact copy)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │ TOC (20 bytes)                                              │
//! │ - Symbols start (8 bytes BE)                                │
//! │ - Postings offset table start (8 bytes BE)                  │
//! │ - CRC32-Castagnoli of those 16 bytes (4 bytes BE)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Because the copied sections are byte-identical to the original, every
//! offset embedded inside them still refers to the original index file —
//! query results are ranges into that file, ready for a ranged fetch.

pub mod builder;
pub mod config;
pub mod error;
pub mod reader;

pub use builder::write_header;
pub use config::IndexHeaderConfig;
pub use error::{Error, Result};
pub use reader::HeaderReader;

pub use blockhouse_core::index::{IndexVersion, PostingRange};

/// Name of a block's index object in the bucket.
pub const INDEX_FILENAME: &str = "index";

/// Name of the derived index-header file on local disk.
pub const INDEX_HEADER_FILENAME: &str = "index-header";

/// The one index-header format version this crate reads and writes.
pub const HEADER_FORMAT_V1: u8 = 1;

/// Bytes of scaffolding before the copied symbols section.
pub const HEADER_LEN: usize = 4 + 1 + 1 + 8;

/// Trailing TOC size: two section offsets plus a CRC.
pub const HEADER_TOC_LEN: usize = 2 * 8 + 4;

/// Minimal index lookups served from a block's index-header.
///
/// Implementations are immutable after construction and safe to share
/// across threads without locking.
pub trait Reader: Send + Sync {
    /// Version of the original block index.
    fn index_version(&self) -> IndexVersion;

    /// Byte range of the posting list for `(name, value)` in the original
    /// index file. `NotFound` when the pair is absent.
    fn postings_offset(&self, name: &str, value: &str) -> Result<PostingRange>;

    /// Resolve a symbol id to its string. `NotFound` when out of range.
    fn lookup_symbol(&self, id: u32) -> Result<String>;

    /// All values of `name`, sorted; empty when the name is absent.
    fn label_values(&self, name: &str) -> Result<Vec<String>>;

    /// All label names, sorted, excluding the synthetic all-postings name.
    fn label_names(&self) -> Result<Vec<String>>;
}
