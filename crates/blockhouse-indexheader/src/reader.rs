//! Index-Header Reader
//!
//! Memory-maps a local index-header file and answers label and
//! postings-offset queries from it. Loading validates everything once —
//! magic, versions, the header TOC checksum, the copied sections' own
//! checksums — and builds a small in-memory index over the postings offset
//! table; queries after that are pure scans over the map plus the
//! pre-built index and cannot fail transiently.
//!
//! ## In-Memory Index
//!
//! The postings offset table can hold one entry per (label name, value)
//! pair in the block — far too many to materialize. For V2 indexes the
//! table is sorted, so the reader keeps only every Nth value of each
//! name's run (plus the first and last) together with the entry's byte
//! offset inside the table. A lookup binary-searches the samples and then
//! rescans at most N table entries. V1 tables are unsorted and small in
//! practice, so they are materialized completely.
//!
//! Offsets returned by queries refer to the ORIGINAL block index file —
//! the copied sections are byte-exact, so the embedded offsets never
//! needed rewriting.
//!
//! ## Thread Safety
//!
//! The reader is immutable after load: no interior mutability, no lazy
//! caches. Any number of threads may query one reader concurrently
//! without locking. Dropping the reader releases the mapping.

use std::collections::HashMap;
use std::path::Path as FilePath;

use memmap2::Mmap;
use object_store::ObjectStore;
use tracing::{debug, warn};
use ulid::Ulid;

use blockhouse_core::encoding::{crc32c, Decbuf};
use blockhouse_core::index::{
    read_offset_table, IndexVersion, PostingRange, ALL_POSTINGS_NAME, INDEX_MAGIC,
};
use blockhouse_core::symbols::SymbolTable;
use blockhouse_core::Error as FormatError;

use crate::builder::write_header;
use crate::config::IndexHeaderConfig;
use crate::error::Result;
use crate::{Reader, HEADER_FORMAT_V1, HEADER_LEN, HEADER_TOC_LEN, INDEX_HEADER_FILENAME};

/// One sampled postings-offset-table entry: a label value and the byte
/// offset of its entry inside the table. The posting offset itself is
/// deliberately not kept — closing a range needs the *neighbor* entry,
/// which only the table offset can reach.
#[derive(Debug)]
struct PostingOffset {
    value: String,
    table_off: usize,
}

/// TOC of the index-header file itself (its trailing 20 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeaderToc {
    symbols: u64,
    postings_table: u64,
}

#[derive(Debug)]
pub struct HeaderReader {
    b: Mmap,
    toc: HeaderToc,

    /// Label name → sampled (value, table offset) run, in on-disk order.
    /// First and last value of every run are always present. For V1 the
    /// runs are empty and only key the name set.
    postings: HashMap<String, Vec<PostingOffset>>,
    /// V1 only: fully materialized name → value → range.
    postings_v1: HashMap<String, HashMap<String, PostingRange>>,

    symbols: SymbolTable,
    /// Label-name symbols resolved up front; names are a small fraction of
    /// the symbol table but roughly half of all lookups.
    name_symbols: HashMap<u32, String>,

    index_version: IndexVersion,
    index_last_posting_end: u64,
    sampling_factor: usize,
}

impl HeaderReader {
    /// Memory-map and validate the index-header at `path`.
    pub fn open(path: &FilePath) -> Result<HeaderReader> {
        Self::open_with_config(path, &IndexHeaderConfig::default())
    }

    pub fn open_with_config(path: &FilePath, config: &IndexHeaderConfig) -> Result<HeaderReader> {
        let file = std::fs::File::open(path)?;
        let b = unsafe { Mmap::map(&file)? };
        Self::load(b, config)
    }

    /// Open the header for block `id` under `local_dir`, building it from
    /// object storage first if the local file is missing or unreadable.
    pub async fn open_or_build(
        store: &dyn ObjectStore,
        local_dir: &FilePath,
        id: Ulid,
        config: &IndexHeaderConfig,
    ) -> Result<HeaderReader> {
        let path = local_dir.join(id.to_string()).join(INDEX_HEADER_FILENAME);
        match Self::open_with_config(&path, config) {
            Ok(reader) => return Ok(reader),
            Err(err) => {
                warn!(
                    block = %id,
                    path = %path.display(),
                    %err,
                    "failed to read index-header from disk; rebuilding"
                );
            }
        }

        write_header(store, id, &path, config).await?;
        debug!(block = %id, path = %path.display(), "built index-header file");

        Self::open_with_config(&path, config)
    }

    /// Release the mapping. Dropping the reader does the same; taking
    /// `self` by value makes a double close unrepresentable.
    pub fn close(self) {}

    fn load(b: Mmap, config: &IndexHeaderConfig) -> Result<HeaderReader> {
        let bytes: &[u8] = &b;
        if bytes.len() < HEADER_LEN {
            return Err(FormatError::ShortRead {
                need: HEADER_LEN,
                have: bytes.len(),
            }
            .into());
        }

        let mut d = Decbuf::new(bytes);
        let magic = d.be32()?;
        if magic != INDEX_MAGIC {
            return Err(FormatError::InvalidMagic(magic).into());
        }
        let version = d.byte()?;
        if version != HEADER_FORMAT_V1 {
            return Err(FormatError::UnsupportedVersion(version).into());
        }
        let index_version = IndexVersion::try_from(d.byte()?)?;

        let index_posting_offset_table = d.be64()?;
        let index_last_posting_end = index_posting_offset_table
            .checked_sub(1)
            .ok_or_else(|| FormatError::Corrupt("postings offset table at offset 0".into()))?;

        let toc = Self::parse_toc(bytes)?;
        if toc.symbols != HEADER_LEN as u64 || toc.postings_table < toc.symbols {
            return Err(FormatError::Corrupt(format!(
                "impossible section offsets in header TOC: {toc:?}"
            ))
            .into());
        }

        let symbols = SymbolTable::new(bytes, index_version, toc.symbols as usize)?;

        let sampling_factor = config.postings_sampling_factor.max(1);
        let mut postings: HashMap<String, Vec<PostingOffset>> = HashMap::new();
        let mut postings_v1: HashMap<String, HashMap<String, PostingRange>> = HashMap::new();

        match index_version {
            IndexVersion::V1 => {
                // The table is not sorted, so sampling cannot work;
                // materialize every range. Each entry's range closes at the
                // next entry's posting offset.
                let mut last: Option<(String, String, u64)> = None;
                read_offset_table(bytes, toc.postings_table as usize, true, |e| {
                    let name = utf8(e.name)?;
                    let value = utf8(e.value)?;
                    if let Some((ln, lv, start)) = last.take() {
                        let end = e.offset.checked_sub(1).ok_or_else(|| {
                            FormatError::Corrupt("posting offset before index start".into())
                        })?;
                        postings_v1.entry(ln).or_default().insert(
                            lv,
                            PostingRange { start, end },
                        );
                    }
                    if !postings_v1.contains_key(name) {
                        postings_v1.insert(name.to_owned(), HashMap::new());
                        // Registered with an empty run so label_names() can
                        // enumerate V1 names too.
                        postings.insert(name.to_owned(), Vec::new());
                    }
                    last = Some((name.to_owned(), value.to_owned(), e.offset));
                    Ok(())
                })?;
                if let Some((ln, lv, start)) = last {
                    postings_v1.entry(ln).or_default().insert(
                        lv,
                        PostingRange {
                            start,
                            end: index_last_posting_end,
                        },
                    );
                }
            }
            IndexVersion::V2 => {
                // Keep every label name but only every Nth value, plus the
                // first and last of each run.
                let mut last_key: Option<(String, String)> = None;
                let mut last_table_off = 0usize;
                let mut value_count = 0usize;
                read_offset_table(bytes, toc.postings_table as usize, true, |e| {
                    let name = utf8(e.name)?;
                    let value = utf8(e.value)?;
                    if !postings.contains_key(name) {
                        // A new run begins; the previous run's final value
                        // becomes its closing sample.
                        postings.insert(name.to_owned(), Vec::new());
                        if let Some((ln, lv)) = last_key.take() {
                            postings.get_mut(&ln).unwrap().push(PostingOffset {
                                value: lv,
                                table_off: last_table_off,
                            });
                        }
                        value_count = 0;
                    }
                    if value_count % sampling_factor == 0 {
                        postings.get_mut(name).unwrap().push(PostingOffset {
                            value: value.to_owned(),
                            table_off: e.table_off,
                        });
                        last_key = None;
                    } else {
                        last_key = Some((name.to_owned(), value.to_owned()));
                        last_table_off = e.table_off;
                    }
                    value_count += 1;
                    Ok(())
                })?;
                if let Some((ln, lv)) = last_key {
                    postings.get_mut(&ln).unwrap().push(PostingOffset {
                        value: lv,
                        table_off: last_table_off,
                    });
                }
                for run in postings.values_mut() {
                    run.shrink_to_fit();
                }
            }
        }

        let mut name_symbols = HashMap::with_capacity(postings.len());
        for name in postings.keys() {
            if name == ALL_POSTINGS_NAME {
                continue;
            }
            let id = symbols.reverse_lookup(bytes, name)?;
            name_symbols.insert(id, name.clone());
        }

        Ok(HeaderReader {
            b,
            toc,
            postings,
            postings_v1,
            symbols,
            name_symbols,
            index_version,
            index_last_posting_end,
            sampling_factor,
        })
    }

    fn parse_toc(b: &[u8]) -> blockhouse_core::Result<HeaderToc> {
        if b.len() < HEADER_TOC_LEN {
            return Err(FormatError::ShortRead {
                need: HEADER_TOC_LEN,
                have: b.len(),
            });
        }
        let t = &b[b.len() - HEADER_TOC_LEN..];
        let expected = u32::from_be_bytes(t[16..20].try_into().unwrap());
        if crc32c(&t[..16]) != expected {
            return Err(FormatError::InvalidChecksum);
        }
        let mut d = Decbuf::new(&t[..16]);
        Ok(HeaderToc {
            symbols: d.be64()?,
            postings_table: d.be64()?,
        })
    }

    /// Version of the original block index this header was derived from.
    pub fn index_version(&self) -> IndexVersion {
        self.index_version
    }

    /// Byte range of the posting list for `(name, value)` in the original
    /// index file.
    ///
    /// `start` is exact. `end` is exact except for the final value of a
    /// name's run, where it is a safe over-estimate bounded by the last
    /// posting byte before the postings offset table.
    pub fn postings_offset(&self, name: &str, value: &str) -> Result<PostingRange> {
        let rngs = self.postings_offsets(name, &[value])?;
        match rngs.as_slice() {
            [rng] => Ok(*rng),
            _ => Err(FormatError::NotFound.into()),
        }
    }

    /// Resolve a sorted list of values for one name in a single pass.
    /// Values absent from the table are skipped, not errors.
    fn postings_offsets(&self, name: &str, values: &[&str]) -> Result<Vec<PostingRange>> {
        let mut rngs = Vec::with_capacity(values.len());

        if self.index_version == IndexVersion::V1 {
            let Some(run) = self.postings_v1.get(name) else {
                return Ok(rngs);
            };
            for v in values {
                if let Some(rng) = run.get(*v) {
                    rngs.push(*rng);
                }
            }
            return Ok(rngs);
        }

        let Some(run) = self.postings.get(name) else {
            return Ok(rngs);
        };
        if run.is_empty() || values.is_empty() {
            return Ok(rngs);
        }
        let b: &[u8] = &self.b;

        let mut skip = 0usize;
        let mut value_index = 0usize;
        // Discard values before the run's first value.
        while value_index < values.len() && values[value_index] < run[0].value.as_str() {
            value_index += 1;
        }

        let mut tmp_rngs: Vec<PostingRange> = Vec::new();
        while value_index < values.len() {
            let mut value = values[value_index];

            let mut i = run.partition_point(|p| p.value.as_str() < value);
            if i == run.len() {
                // Past the end of the run.
                break;
            }
            if i > 0 && run[i].value != value {
                // The entry may lie between this sample and the previous.
                i -= 1;
            }

            // The table checksum was verified at load; query scans skip it.
            let mut d = Decbuf::at(b, self.toc.postings_table as usize)?;
            d.skip(run[i].table_off)?;

            tmp_rngs.clear();
            loop {
                skip_entry_key(&mut d, &mut skip)?;
                let v = d.uvarint_bytes()?;
                let posting_offset = d.uvarint()?;

                while v >= value.as_bytes() {
                    if v == value.as_bytes() {
                        // The posting payload starts past the 4-byte
                        // length prefix.
                        tmp_rngs.push(PostingRange {
                            start: posting_offset + 4,
                            end: 0,
                        });
                    }
                    value_index += 1;
                    if value_index == values.len() {
                        break;
                    }
                    value = values[value_index];
                }

                if i + 1 == run.len() {
                    // Last sample: close everything at the end of the
                    // postings section.
                    for rng in &mut tmp_rngs {
                        rng.end = self.index_last_posting_end;
                    }
                    rngs.extend(tmp_rngs.drain(..));
                    break;
                }

                if value_index == values.len() || value >= run[i + 1].value.as_str() {
                    // The scan window closes; the next entry's posting
                    // offset bounds every range gathered in it.
                    skip_entry_key(&mut d, &mut skip)?;
                    d.uvarint_bytes()?;
                    let next_offset = d.uvarint()?;
                    let end = next_offset.checked_sub(4).ok_or_else(|| {
                        FormatError::Corrupt("posting offset before index start".into())
                    })?;
                    for rng in &mut tmp_rngs {
                        if end < rng.start {
                            return Err(FormatError::Corrupt(
                                "postings offset table not monotonic".into(),
                            )
                            .into());
                        }
                        rng.end = end;
                    }
                    rngs.extend(tmp_rngs.drain(..));
                    break;
                }
            }
        }

        Ok(rngs)
    }

    /// Resolve a symbol id to its string.
    pub fn lookup_symbol(&self, id: u32) -> Result<String> {
        if let Some(s) = self.name_symbols.get(&id) {
            return Ok(s.clone());
        }
        Ok(self.symbols.lookup(&self.b, id)?)
    }

    /// All values of `name` in lexicographic order; empty when the name is
    /// absent.
    pub fn label_values(&self, name: &str) -> Result<Vec<String>> {
        if self.index_version == IndexVersion::V1 {
            let Some(run) = self.postings_v1.get(name) else {
                return Ok(Vec::new());
            };
            let mut values: Vec<String> = run.keys().cloned().collect();
            values.sort_unstable();
            return Ok(values);
        }

        let Some(run) = self.postings.get(name) else {
            return Ok(Vec::new());
        };
        if run.is_empty() {
            return Ok(Vec::new());
        }
        let b: &[u8] = &self.b;

        let mut values = Vec::with_capacity(run.len() * self.sampling_factor);
        let mut d = Decbuf::at(b, self.toc.postings_table as usize)?;
        d.skip(run[0].table_off)?;
        let last_value = run[run.len() - 1].value.as_bytes();

        // The run is contiguous in the table and its last value is known,
        // so scan entry by entry until the sentinel shows up.
        let mut skip = 0usize;
        loop {
            skip_entry_key(&mut d, &mut skip)?;
            let v = d.uvarint_bytes()?;
            values.push(utf8(v)?.to_owned());
            if v == last_value {
                break;
            }
            d.uvarint()?; // posting offset
        }
        Ok(values)
    }

    /// All label names, sorted, excluding the synthetic all-postings name.
    pub fn label_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .postings
            .keys()
            .filter(|name| name.as_str() != ALL_POSTINGS_NAME)
            .cloned()
            .collect();
        names.sort_unstable();
        Ok(names)
    }
}

impl Reader for HeaderReader {
    fn index_version(&self) -> IndexVersion {
        self.index_version()
    }

    fn postings_offset(&self, name: &str, value: &str) -> Result<PostingRange> {
        self.postings_offset(name, value)
    }

    fn lookup_symbol(&self, id: u32) -> Result<String> {
        self.lookup_symbol(id)
    }

    fn label_values(&self, name: &str) -> Result<Vec<String>> {
        self.label_values(name)
    }

    fn label_names(&self) -> Result<Vec<String>> {
        self.label_names()
    }
}

/// Every entry of a run spends the same number of bytes on its key count
/// and label name; parse them once, then byte-skip.
fn skip_entry_key(d: &mut Decbuf<'_>, skip: &mut usize) -> blockhouse_core::Result<()> {
    if *skip == 0 {
        let start = d.position();
        d.uvarint()?; // key count
        d.uvarint_bytes()?; // label name
        *skip = d.position() - start;
    } else {
        d.skip(*skip)?;
    }
    Ok(())
}

fn utf8(b: &[u8]) -> blockhouse_core::Result<&str> {
    std::str::from_utf8(b).map_err(|_| FormatError::Corrupt("invalid UTF-8 in label".into()))
}
