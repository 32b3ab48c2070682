//! Block Index Format
//!
//! The layout constants and section parsers for the per-block `index` file
//! that BlockHouse reads (but never writes in production — blocks are
//! immutable once uploaded).
//!
//! ## File Structure (the parts we touch)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Preamble                                                    │
//! │ - Magic: 0xBAAAD792 (4 bytes BE)                            │
//! │ - Version: 1 or 2 (1 byte)                                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Symbols section                                             │
//! │ - len (4 BE) | count (4 BE) | uvarint-prefixed strings      │
//! │   | crc32c (4 BE)                                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Series, posting lists, ... (opaque to this crate)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Postings offset table                                       │
//! │ - len (4 BE) | count (4 BE) | entries | crc32c (4 BE)       │
//! │ - entry: keyCount(uvarint)=2, name(uvarint bytes),          │
//! │   value(uvarint bytes), offset(uvarint)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │ TOC (52 bytes)                                              │
//! │ - six u64 BE section offsets + crc32c of those 48 bytes     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sort order of the postings offset table depends on the index version:
//! V2 writes entries sorted by (name, value); V1 writes them in insertion
//! order and readers must not binary-search them.

use crate::encoding::Decbuf;
use crate::error::{Error, Result};

/// Magic number at the head of both the block index and the index-header.
pub const INDEX_MAGIC: u32 = 0xBAAA_D792;

/// Bytes fetched to validate an index file's magic and version.
pub const INDEX_PREAMBLE_LEN: usize = 6;

/// Size of the index TOC tail: six u64 section offsets plus a CRC.
pub const INDEX_TOC_LEN: usize = 6 * 8 + 4;

/// Label name of the synthetic all-postings entry. It keys the posting
/// list covering every series and is not a real label.
pub const ALL_POSTINGS_NAME: &str = "";

/// Sparse anchor spacing in the symbol table view.
pub const SYMBOL_FACTOR: usize = 32;

/// Version byte of a block index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexVersion {
    V1,
    V2,
}

impl IndexVersion {
    pub fn as_u8(self) -> u8 {
        match self {
            IndexVersion::V1 => 1,
            IndexVersion::V2 => 2,
        }
    }
}

impl TryFrom<u8> for IndexVersion {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            1 => Ok(IndexVersion::V1),
            2 => Ok(IndexVersion::V2),
            other => Err(Error::UnsupportedIndexVersion(other)),
        }
    }
}

/// Byte range of a posting list inside the original index file.
///
/// `start` addresses the first payload byte (past the 4-byte length
/// prefix). `end` is inclusive; for the final entry of the table it may
/// overshoot the true list end by up to one trailing record, bounded by
/// the last posting byte before the postings offset table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostingRange {
    pub start: u64,
    pub end: u64,
}

/// Section offsets parsed from the 52-byte TOC at the index file tail.
///
/// Only `symbols`, `series` (the symbols section's end) and
/// `postings_table` are consumed by the index-header subsystem; the rest
/// ride along for completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexToc {
    pub symbols: u64,
    pub series: u64,
    pub label_indices: u64,
    pub label_indices_table: u64,
    pub postings: u64,
    pub postings_table: u64,
}

impl IndexToc {
    /// Parse the TOC from its 52-byte tail slice, verifying the CRC.
    pub fn from_tail_bytes(b: &[u8]) -> Result<IndexToc> {
        if b.len() < INDEX_TOC_LEN {
            return Err(Error::ShortRead {
                need: INDEX_TOC_LEN,
                have: b.len(),
            });
        }
        let b = &b[b.len() - INDEX_TOC_LEN..];
        let expected = u32::from_be_bytes(b[INDEX_TOC_LEN - 4..].try_into().unwrap());
        if crate::encoding::crc32c(&b[..INDEX_TOC_LEN - 4]) != expected {
            return Err(Error::InvalidChecksum);
        }

        let mut d = Decbuf::new(&b[..INDEX_TOC_LEN - 4]);
        Ok(IndexToc {
            symbols: d.be64()?,
            series: d.be64()?,
            label_indices: d.be64()?,
            label_indices_table: d.be64()?,
            postings: d.be64()?,
            postings_table: d.be64()?,
        })
    }
}

/// One postings-offset-table entry, borrowed from the table bytes.
#[derive(Debug, Clone, Copy)]
pub struct TableEntry<'a> {
    pub name: &'a [u8],
    pub value: &'a [u8],
    /// Byte offset of the posting list in the original index file.
    pub offset: u64,
    /// Byte offset of this entry within the table's content region.
    pub table_off: usize,
}

/// Walk every entry of the postings offset table starting at `off` in
/// `bs`, in on-disk order.
///
/// `verify_crc` should be set when the table is walked once at load time;
/// query-time rescans of small windows skip it. Each entry must carry
/// exactly two keys (label name and value); anything else is corruption.
pub fn read_offset_table<F>(bs: &[u8], off: usize, verify_crc: bool, mut visit: F) -> Result<()>
where
    F: FnMut(TableEntry<'_>) -> Result<()>,
{
    let mut d = if verify_crc {
        Decbuf::at_checked(bs, off)?
    } else {
        Decbuf::at(bs, off)?
    };

    let count = d.be32()?;
    for _ in 0..count {
        let table_off = d.position();
        let key_count = d.uvarint()?;
        if key_count != 2 {
            return Err(Error::Corrupt(format!(
                "unexpected key count {key_count} in postings offset table"
            )));
        }
        let name = d.uvarint_bytes()?;
        let value = d.uvarint_bytes()?;
        let offset = d.uvarint()?;
        visit(TableEntry {
            name,
            value,
            offset,
            table_off,
        })?;
    }
    Ok(())
}
