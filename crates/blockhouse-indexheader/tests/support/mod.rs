//! Test support: a minimal block-index writer.
//!
//! Emits wire-valid `index` files — preamble, symbols section, filler
//! series section, posting lists, postings offset table, checksummed TOC —
//! and records the answers a header built from them must give: the symbol
//! iterator, label names and values, and the exact byte range of every
//! posting list.
//!
//! V2 sorts the postings offset table by (name, value); V1 writes it in
//! insertion order, which is how unsorted V1 tables get exercised.

use std::collections::{BTreeMap, BTreeSet};

use blockhouse_core::encoding::Encbuf;
use blockhouse_core::index::{IndexVersion, PostingRange, INDEX_MAGIC};

pub struct IndexWriter {
    version: IndexVersion,
    series: Vec<Vec<(String, String)>>,
}

pub struct BuiltIndex {
    pub bytes: Vec<u8>,
    pub version: IndexVersion,
    /// (id, string) pairs as the symbol iterator emits them.
    pub symbols: Vec<(u32, String)>,
    /// An id just past the valid symbols; must report `NotFound`.
    pub symbol_probe_past_end: u32,
    /// Per (name, value): the source posting range, and whether a header
    /// reports its `end` exactly (false for the final value of a run,
    /// where the header over-estimates up to `last_posting_end`).
    pub ranges: BTreeMap<(String, String), (PostingRange, bool)>,
    pub label_names: Vec<String>,
    pub label_values: BTreeMap<String, Vec<String>>,
    /// Last byte of the last posting list, one before the postings offset
    /// table.
    pub last_posting_end: u64,
}

impl IndexWriter {
    pub fn new(version: IndexVersion) -> Self {
        IndexWriter {
            version,
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, labels: &[(&str, &str)]) {
        self.series.push(
            labels
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        );
    }

    pub fn build(self) -> BuiltIndex {
        let all_key = (String::new(), String::new());

        // Gather postings per (name, value); series ids are 1-based.
        let mut postings: BTreeMap<(String, String), Vec<u32>> = BTreeMap::new();
        let mut insertion_order: Vec<(String, String)> = vec![all_key.clone()];
        postings.insert(all_key.clone(), Vec::new());
        for (i, labels) in self.series.iter().enumerate() {
            let id = (i + 1) as u32;
            postings.get_mut(&all_key).unwrap().push(id);
            for (name, value) in labels {
                let key = (name.clone(), value.clone());
                if !postings.contains_key(&key) {
                    postings.insert(key.clone(), Vec::new());
                    insertion_order.push(key.clone());
                }
                postings.get_mut(&key).unwrap().push(id);
            }
        }

        let table_order: Vec<(String, String)> = match self.version {
            IndexVersion::V2 => postings.keys().cloned().collect(),
            IndexVersion::V1 => insertion_order,
        };

        let mut symbol_set: BTreeSet<String> = BTreeSet::new();
        for labels in &self.series {
            for (name, value) in labels {
                symbol_set.insert(name.clone());
                symbol_set.insert(value.clone());
            }
        }

        let mut e = Encbuf::new();
        e.put_be32(INDEX_MAGIC);
        e.put_byte(self.version.as_u8());

        // Symbols section. V2 ids are ordinals; V1 ids are byte offsets
        // within the section.
        let symbols_off = e.len() as u64;
        let mut symbols = Vec::with_capacity(symbol_set.len());
        let mut content = Encbuf::new();
        content.put_be32(symbol_set.len() as u32);
        let mut rel = 8usize; // past the section's len and count prefixes
        for (ordinal, s) in symbol_set.iter().enumerate() {
            let id = match self.version {
                IndexVersion::V2 => ordinal as u32,
                IndexVersion::V1 => rel as u32,
            };
            symbols.push((id, s.clone()));
            let before = content.len();
            content.put_uvarint_bytes(s.as_bytes());
            rel += content.len() - before;
        }
        let symbol_probe_past_end = match self.version {
            IndexVersion::V2 => symbol_set.len() as u32,
            IndexVersion::V1 => rel as u32,
        };
        e.put_be32(content.len() as u32);
        let start = e.len();
        e.put_slice(content.get());
        e.put_crc32c(start);

        // Series section: opaque filler, never read back.
        let series_off = e.len() as u64;
        for _ in &self.series {
            e.put_slice(&[0xAA; 16]);
        }

        // Posting lists, contiguous, in table order.
        let postings_off = e.len() as u64;
        let mut list_offsets: BTreeMap<(String, String), (u64, u64)> = BTreeMap::new();
        for key in &table_order {
            let off = e.len() as u64;
            let ids = &postings[key];
            let mut list = Encbuf::new();
            list.put_be32(ids.len() as u32);
            for id in ids {
                list.put_be32(*id);
            }
            e.put_be32(list.len() as u32);
            let start = e.len();
            e.put_slice(list.get());
            e.put_crc32c(start);
            list_offsets.insert(key.clone(), (off, list.len() as u64));
        }

        // Postings offset table.
        let postings_table = e.len() as u64;
        let last_posting_end = postings_table - 1;
        let mut content = Encbuf::new();
        content.put_be32(table_order.len() as u32);
        for key in &table_order {
            content.put_uvarint(2);
            content.put_uvarint_bytes(key.0.as_bytes());
            content.put_uvarint_bytes(key.1.as_bytes());
            content.put_uvarint(list_offsets[key].0);
        }
        e.put_be32(content.len() as u32);
        let start = e.len();
        e.put_slice(content.get());
        e.put_crc32c(start);

        // TOC tail.
        let toc_start = e.len();
        e.put_be64(symbols_off);
        e.put_be64(series_off);
        e.put_be64(0);
        e.put_be64(0);
        e.put_be64(postings_off);
        e.put_be64(postings_table);
        e.put_crc32c(toc_start);

        // Expected ranges. V2 addresses posting payloads (past the length
        // prefix); a run's final value is closed by the header against
        // last_posting_end instead of its true end. V1 addresses whole
        // records, each closed one byte before the next.
        let mut ranges = BTreeMap::new();
        for (j, key) in table_order.iter().enumerate() {
            let (off, content_len) = list_offsets[key];
            let (range, exact_end) = match self.version {
                IndexVersion::V2 => {
                    let run_final = match table_order.get(j + 1) {
                        Some(next) => next.0 != key.0,
                        None => true,
                    };
                    (
                        PostingRange {
                            start: off + 4,
                            end: off + 4 + content_len,
                        },
                        !run_final,
                    )
                }
                IndexVersion::V1 => {
                    let end = match table_order.get(j + 1) {
                        Some(next) => list_offsets[next].0 - 1,
                        None => last_posting_end,
                    };
                    (PostingRange { start: off, end }, true)
                }
            };
            ranges.insert(key.clone(), (range, exact_end));
        }

        let mut label_values: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in postings.keys() {
            if name.is_empty() {
                continue;
            }
            label_values
                .entry(name.clone())
                .or_default()
                .push(value.clone());
        }
        for values in label_values.values_mut() {
            values.sort_unstable();
        }
        let label_names: Vec<String> = label_values.keys().cloned().collect();

        BuiltIndex {
            bytes: e.into_vec(),
            version: self.version,
            symbols,
            symbol_probe_past_end,
            ranges,
            label_names,
            label_values,
            last_posting_end,
        }
    }
}
