#![no_main]

use blockhouse_core::encoding::Decbuf;
use blockhouse_core::index::{read_offset_table, IndexToc, IndexVersion};
use blockhouse_core::symbols::SymbolTable;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes to every section parser. They must handle all
    // malformed inputs gracefully:
    // - Truncated TOC tails and length prefixes
    // - Bad CRC32-Castagnoli checksums
    // - Corrupted uvarints and key counts
    // - Symbol ids pointing outside the section
    let _ = IndexToc::from_tail_bytes(data);

    let _ = read_offset_table(data, 0, true, |entry| {
        let _ = (entry.name, entry.value, entry.offset, entry.table_off);
        Ok(())
    });

    for version in [IndexVersion::V1, IndexVersion::V2] {
        if let Ok(table) = SymbolTable::new(data, version, 0) {
            // Parsing succeeded — lookups must still never panic
            let _ = table.lookup(data, 0);
            let _ = table.lookup(data, 8);
            let _ = table.lookup(data, u32::MAX);
            let _ = table.reverse_lookup(data, "a");
        }
    }

    // A varint stream of arbitrary bytes either decodes or errors out;
    // every Ok consumes at least one byte, so this terminates
    let mut d = Decbuf::new(data);
    while d.uvarint().is_ok() && d.remaining() > 0 {}
});
