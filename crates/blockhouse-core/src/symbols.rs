//! Symbol Table View
//!
//! Read-only view over the symbols section of a block index (or of an
//! index-header, which carries a byte-exact copy of that section). Symbols
//! are the deduplicated label names and values; series records refer to
//! them by id instead of repeating the strings.
//!
//! What an id means depends on the index version:
//! - **V2**: the id is an ordinal into the sorted symbol sequence.
//! - **V1**: the id is a byte offset of the symbol within the section.
//!
//! The view itself stores no bytes — only the section bounds, the symbol
//! count, and one sparse anchor per [`SYMBOL_FACTOR`] symbols so a V2
//! lookup is an array index plus a bounded scan. Callers pass the backing
//! slice (typically the memory map) into each method; it must be the same
//! buffer the view was constructed over.

use crate::encoding::Decbuf;
use crate::error::{Error, Result};
use crate::index::{IndexVersion, SYMBOL_FACTOR};

#[derive(Debug)]
pub struct SymbolTable {
    version: IndexVersion,
    section_off: usize,
    /// Absolute position of every SYMBOL_FACTOR-th symbol (V2 anchors).
    anchors: Vec<usize>,
    count: usize,
    /// Absolute bounds of the string data within the backing slice.
    content_start: usize,
    content_end: usize,
}

impl SymbolTable {
    /// Construct the view over the symbols section at `off` in `b`,
    /// verifying the section checksum and walking every symbol once.
    pub fn new(b: &[u8], version: IndexVersion, off: usize) -> Result<SymbolTable> {
        let mut d = Decbuf::at_checked(b, off)?;
        let count = d.be32()? as usize;
        // Strings begin after the 4-byte length prefix and 4-byte count.
        let strings_base = off + 8;

        let mut anchors = Vec::with_capacity(1 + count / SYMBOL_FACTOR);
        for i in 0..count {
            if i % SYMBOL_FACTOR == 0 {
                // d.position() counts from the content start (the count
                // field), so subtract its 4 bytes.
                anchors.push(strings_base + d.position() - 4);
            }
            d.uvarint_bytes()?;
        }
        let content_end = strings_base + d.position() - 4;

        Ok(SymbolTable {
            version,
            section_off: off,
            anchors,
            count,
            content_start: strings_base,
            content_end,
        })
    }

    /// Number of symbols in the section.
    pub fn symbol_count(&self) -> usize {
        self.count
    }

    /// Resolve a symbol id to its string.
    pub fn lookup(&self, b: &[u8], id: u32) -> Result<String> {
        let pos = match self.version {
            IndexVersion::V2 => {
                let id = id as usize;
                if id >= self.count {
                    return Err(Error::NotFound);
                }
                let mut d = self.decbuf_from(b, self.anchors[id / SYMBOL_FACTOR])?;
                for _ in 0..(id % SYMBOL_FACTOR) {
                    d.uvarint_bytes()?;
                }
                return Ok(d.uvarint_str()?.to_owned());
            }
            IndexVersion::V1 => self.section_off + id as usize,
        };
        if pos < self.content_start || pos >= self.content_end {
            return Err(Error::NotFound);
        }
        let mut d = self.decbuf_from(b, pos)?;
        Ok(d.uvarint_str()?.to_owned())
    }

    /// Map a string back to its symbol id. Used once per label name while
    /// loading an index-header, so V1's linear scan is acceptable.
    pub fn reverse_lookup(&self, b: &[u8], sym: &str) -> Result<u32> {
        match self.version {
            IndexVersion::V2 => self.reverse_lookup_v2(b, sym),
            IndexVersion::V1 => self.reverse_lookup_v1(b, sym),
        }
    }

    fn reverse_lookup_v2(&self, b: &[u8], sym: &str) -> Result<u32> {
        if self.anchors.is_empty() {
            return Err(Error::NotFound);
        }

        // Binary search for the last anchor whose symbol is <= sym. The
        // section is sorted in V2, so the match can only live in that
        // anchor's run.
        let (mut lo, mut hi) = (0usize, self.anchors.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            let mut d = self.decbuf_from(b, self.anchors[mid])?;
            if d.uvarint_bytes()? <= sym.as_bytes() {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == 0 {
            return Err(Error::NotFound);
        }
        let anchor = lo - 1;

        let mut d = self.decbuf_from(b, self.anchors[anchor])?;
        let mut ordinal = anchor * SYMBOL_FACTOR;
        while ordinal < self.count {
            let s = d.uvarint_bytes()?;
            if s == sym.as_bytes() {
                return Ok(ordinal as u32);
            }
            if s > sym.as_bytes() {
                break;
            }
            ordinal += 1;
        }
        Err(Error::NotFound)
    }

    fn reverse_lookup_v1(&self, b: &[u8], sym: &str) -> Result<u32> {
        let mut pos = self.content_start;
        for _ in 0..self.count {
            let mut d = self.decbuf_from(b, pos)?;
            let s = d.uvarint_bytes()?;
            if s == sym.as_bytes() {
                return Ok((pos - self.section_off) as u32);
            }
            pos += d.position();
        }
        Err(Error::NotFound)
    }

    fn decbuf_from<'a>(&self, b: &'a [u8], pos: usize) -> Result<Decbuf<'a>> {
        if pos > self.content_end || self.content_end > b.len() {
            return Err(Error::ShortRead {
                need: self.content_end,
                have: b.len(),
            });
        }
        Ok(Decbuf::new(&b[pos..self.content_end]))
    }
}
