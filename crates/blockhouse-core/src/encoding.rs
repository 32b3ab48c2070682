//! Length-Checked Binary Encoding and Decoding
//!
//! This module provides the low-level codec used by every piece of index
//! data BlockHouse touches:
//!
//! - `Decbuf`: a positioned, zero-copy decoder over a borrowed byte slice.
//!   Fixed-width reads are big-endian; strings and byte blobs are
//!   uvarint-length-prefixed; every read is bounds-checked and returns
//!   `Result` instead of panicking, because the bytes come from disk or the
//!   network and may be arbitrarily truncated or corrupted.
//! - `Encbuf`: a `BytesMut`-backed encode buffer for the small amount of
//!   scaffolding we write ourselves (file headers, TOCs, checksums).
//! - `crc32c`: CRC32 with the Castagnoli polynomial, used for every
//!   checksum in the index and index-header formats.
//!
//! ## Uvarint Encoding
//! Unsigned LEB128: 7 bits of payload per byte, high bit is the
//! continuation flag. Small numbers (0-127) use a single byte. A u64 never
//! needs more than 10 bytes; an 11th continuation byte means the input is
//! corrupt, not merely short.
//!
//! ## Checksummed Regions
//! Several index sections share one shape on disk:
//!
//! ```text
//! len: u32 BE | content: [u8; len] | crc32c(content): u32 BE
//! ```
//!
//! `Decbuf::at` opens the content of such a region; `Decbuf::at_checked`
//! additionally verifies the trailing checksum.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// Maximum number of bytes in the uvarint encoding of a u64.
pub const MAX_VARINT_LEN64: usize = 10;

/// CRC32 with the Castagnoli polynomial over a contiguous region.
pub fn crc32c(data: &[u8]) -> u32 {
    ::crc32c::crc32c(data)
}

/// Positioned decoder over a borrowed byte slice.
///
/// The slice is never copied; `uvarint_bytes` hands back subslices of the
/// input. Position only ever moves forward.
#[derive(Clone)]
pub struct Decbuf<'a> {
    b: &'a [u8],
    pos: usize,
}

impl<'a> Decbuf<'a> {
    /// Decode starting at the beginning of `b`.
    pub fn new(b: &'a [u8]) -> Self {
        Decbuf { b, pos: 0 }
    }

    /// Open the length-prefixed region at `off` within `bs` without
    /// verifying its trailing checksum.
    pub fn at(bs: &'a [u8], off: usize) -> Result<Self> {
        let (content, _crc) = region_at(bs, off)?;
        Ok(Decbuf::new(content))
    }

    /// Open the length-prefixed region at `off` within `bs` and verify its
    /// trailing CRC32-Castagnoli.
    pub fn at_checked(bs: &'a [u8], off: usize) -> Result<Self> {
        let (content, crc) = region_at(bs, off)?;
        if crc32c(content) != crc {
            return Err(Error::InvalidChecksum);
        }
        Ok(Decbuf::new(content))
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.b.len() - self.pos
    }

    /// Current position from the start of the region.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Advance the cursor by `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n)?;
        Ok(())
    }

    pub fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn be32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn be64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes(b.try_into().unwrap()))
    }

    /// Unsigned LEB128 varint.
    pub fn uvarint(&mut self) -> Result<u64> {
        let mut x: u64 = 0;
        let mut shift: u32 = 0;
        for i in 0..MAX_VARINT_LEN64 {
            let byte = self.byte()?;
            if byte < 0x80 {
                if i == MAX_VARINT_LEN64 - 1 && byte > 1 {
                    return Err(Error::Corrupt("uvarint overflows 64 bits".into()));
                }
                return Ok(x | (u64::from(byte) << shift));
            }
            x |= u64::from(byte & 0x7f) << shift;
            shift += 7;
        }
        Err(Error::Corrupt("uvarint overflows 64 bits".into()))
    }

    /// A uvarint length followed by that many bytes, zero-copy.
    pub fn uvarint_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.uvarint()? as usize;
        self.take(len)
    }

    /// A uvarint length followed by that many bytes of UTF-8.
    pub fn uvarint_str(&mut self) -> Result<&'a str> {
        let b = self.uvarint_bytes()?;
        std::str::from_utf8(b).map_err(|_| Error::Corrupt("invalid UTF-8 string".into()))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::ShortRead {
                need: n,
                have: self.remaining(),
            });
        }
        let out = &self.b[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}

/// Split the `len | content | crc` region at `off` into (content, crc).
fn region_at(bs: &[u8], off: usize) -> Result<(&[u8], u32)> {
    if bs.len() < off + 4 {
        return Err(Error::ShortRead {
            need: off + 4,
            have: bs.len(),
        });
    }
    let len = u32::from_be_bytes(bs[off..off + 4].try_into().unwrap()) as usize;
    let content_start = off + 4;
    let need = content_start + len + 4;
    if bs.len() < need {
        return Err(Error::ShortRead {
            need,
            have: bs.len(),
        });
    }
    let content = &bs[content_start..content_start + len];
    let crc = u32::from_be_bytes(
        bs[content_start + len..content_start + len + 4]
            .try_into()
            .unwrap(),
    );
    Ok((content, crc))
}

/// Encode buffer for headers, TOCs, and test fixtures.
#[derive(Default)]
pub struct Encbuf {
    b: BytesMut,
}

impl Encbuf {
    pub fn new() -> Self {
        Encbuf { b: BytesMut::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Encbuf {
            b: BytesMut::with_capacity(cap),
        }
    }

    pub fn reset(&mut self) {
        self.b.clear();
    }

    pub fn len(&self) -> usize {
        self.b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.b.is_empty()
    }

    pub fn get(&self) -> &[u8] {
        &self.b
    }

    pub fn put_byte(&mut self, v: u8) {
        self.b.put_u8(v);
    }

    pub fn put_be32(&mut self, v: u32) {
        self.b.put_u32(v);
    }

    pub fn put_be64(&mut self, v: u64) {
        self.b.put_u64(v);
    }

    pub fn put_uvarint(&mut self, mut v: u64) {
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            self.b.put_u8(byte);
            if v == 0 {
                break;
            }
        }
    }

    /// A uvarint length prefix followed by the bytes themselves.
    pub fn put_uvarint_bytes(&mut self, v: &[u8]) {
        self.put_uvarint(v.len() as u64);
        self.b.put_slice(v);
    }

    pub fn put_slice(&mut self, v: &[u8]) {
        self.b.put_slice(v);
    }

    /// Append the CRC32-Castagnoli of everything currently in the buffer
    /// starting at `from`.
    pub fn put_crc32c(&mut self, from: usize) {
        let crc = crc32c(&self.b[from..]);
        self.b.put_u32(crc);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.b.to_vec()
    }
}
