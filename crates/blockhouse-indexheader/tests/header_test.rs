//! End-to-end: build an index-header from a block index in object storage,
//! load it, and compare every answer against the source index.

mod support;

use std::path::{Path as FilePath, PathBuf};
use std::sync::Arc;

use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use ulid::Ulid;

use blockhouse_core::encoding::crc32c;
use blockhouse_indexheader::{
    write_header, HeaderReader, IndexHeaderConfig, IndexVersion, INDEX_HEADER_FILENAME,
};
use support::{BuiltIndex, IndexWriter};

async fn upload(store: &InMemory, id: Ulid, bytes: &[u8]) {
    let location = Path::from(format!("{id}/index"));
    store
        .put(&location, PutPayload::from(bytes.to_vec()))
        .await
        .unwrap();
}

fn header_path(dir: &FilePath, id: Ulid) -> PathBuf {
    dir.join(id.to_string()).join(INDEX_HEADER_FILENAME)
}

async fn build_header(store: &InMemory, id: Ulid, dir: &FilePath) -> PathBuf {
    let path = header_path(dir, id);
    write_header(store, id, &path, &IndexHeaderConfig::default())
        .await
        .unwrap();
    path
}

/// The header must answer exactly like the index it was derived from.
fn compare_index_to_header(reader: &HeaderReader, built: &BuiltIndex) {
    assert_eq!(reader.index_version(), built.version);

    for (id, symbol) in &built.symbols {
        assert_eq!(&reader.lookup_symbol(*id).unwrap(), symbol);
    }
    assert!(reader
        .lookup_symbol(built.symbol_probe_past_end)
        .unwrap_err()
        .is_not_found());

    assert_eq!(&reader.label_names().unwrap(), &built.label_names);

    for name in &built.label_names {
        let values = reader.label_values(name).unwrap();
        assert_eq!(&values, &built.label_values[name]);

        for value in &values {
            let got = reader.postings_offset(name, value).unwrap();
            let (expected, exact_end) = built.ranges[&(name.clone(), value.clone())];
            assert_eq!(got.start, expected.start, "start of {name}={value}");
            if exact_end {
                assert_eq!(got.end, expected.end, "end of {name}={value}");
            } else {
                // Final value of a run: a safe over-estimate
                assert!(got.end >= expected.end, "end of {name}={value}");
                assert_eq!(got.end, built.last_posting_end);
            }
        }
    }

    assert!(reader.label_values("not-existing").unwrap().is_empty());
    assert!(reader
        .postings_offset("not-existing", "1")
        .unwrap_err()
        .is_not_found());
}

fn tiny_v2_block() -> BuiltIndex {
    let mut w = IndexWriter::new(IndexVersion::V2);
    w.add_series(&[("a", "1")]);
    w.add_series(&[("a", "2")]);
    w.add_series(&[("a", "3")]);
    w.add_series(&[("a", "4")]);
    w.add_series(&[("a", "1"), ("b", "1")]);
    w.build()
}

#[tokio::test]
async fn test_v2_block_roundtrip() {
    let built = tiny_v2_block();
    let store = InMemory::new();
    let id = Ulid::new();
    upload(&store, id, &built.bytes).await;

    let dir = tempfile::tempdir().unwrap();
    let path = build_header(&store, id, dir.path()).await;

    // On-disk layout: scaffolding, then the TOC the loader trusts
    let file = std::fs::read(&path).unwrap();
    assert_eq!(u32::from_be_bytes(file[0..4].try_into().unwrap()), 0xBAAA_D792);
    assert_eq!(file[4], 1); // header format version
    assert_eq!(file[5], 2); // original index version
    let tail = &file[file.len() - 20..];
    let symbols_start = u64::from_be_bytes(tail[0..8].try_into().unwrap());
    let postings_table_start = u64::from_be_bytes(tail[8..16].try_into().unwrap());
    assert_eq!(symbols_start, 14);
    // Six symbols of one byte each: a 24-byte section copy
    assert_eq!(postings_table_start, 38);
    assert_eq!(
        u32::from_be_bytes(tail[16..20].try_into().unwrap()),
        crc32c(&tail[..16])
    );

    let reader = HeaderReader::open(&path).unwrap();
    assert_eq!(reader.index_version(), IndexVersion::V2);
    assert_eq!(reader.label_names().unwrap(), vec!["a", "b"]);
    assert_eq!(reader.label_values("a").unwrap(), vec!["1", "2", "3", "4"]);

    // a=2 is not a run-final entry: both bounds exact
    let (expected, exact_end) = built.ranges[&("a".to_string(), "2".to_string())];
    assert!(exact_end);
    assert_eq!(reader.postings_offset("a", "2").unwrap(), expected);

    compare_index_to_header(&reader, &built);
}

#[tokio::test]
async fn test_v1_block_roundtrip() {
    // Unsorted table: 100 numerically-ordered bar values plus two foo
    // entries written first.
    let mut w = IndexWriter::new(IndexVersion::V1);
    w.add_series(&[("foo", "bar")]);
    w.add_series(&[("foo", "baz")]);
    for i in 0..100 {
        let value = i.to_string();
        w.add_series(&[("bar", value.as_str())]);
    }
    let built = w.build();

    let store = InMemory::new();
    let id = Ulid::new();
    upload(&store, id, &built.bytes).await;

    let dir = tempfile::tempdir().unwrap();
    let path = build_header(&store, id, dir.path()).await;
    let reader = HeaderReader::open(&path).unwrap();

    assert_eq!(reader.index_version(), IndexVersion::V1);
    assert_eq!(reader.label_values("foo").unwrap(), vec!["bar", "baz"]);
    assert!(reader
        .postings_offset("foo", "missing")
        .unwrap_err()
        .is_not_found());

    compare_index_to_header(&reader, &built);
}

#[tokio::test]
async fn test_rebuild_on_missing_header() {
    let built = tiny_v2_block();
    let store = InMemory::new();
    let id = Ulid::new();
    upload(&store, id, &built.bytes).await;

    let dir = tempfile::tempdir().unwrap();
    let config = IndexHeaderConfig::default();

    // No local file: the first open builds it
    let first = HeaderReader::open_or_build(&store, dir.path(), id, &config)
        .await
        .unwrap();
    assert!(header_path(dir.path(), id).exists());

    // Drop the remote index; the second open must succeed purely from the
    // local file, proving no rebuild happened
    store
        .delete(&Path::from(format!("{id}/index")))
        .await
        .unwrap();
    let second = HeaderReader::open_or_build(&store, dir.path(), id, &config)
        .await
        .unwrap();

    for reader in [&first, &second] {
        compare_index_to_header(reader, &built);
    }
}

#[tokio::test]
async fn test_rebuild_replaces_unreadable_header() {
    let built = tiny_v2_block();
    let store = InMemory::new();
    let id = Ulid::new();
    upload(&store, id, &built.bytes).await;

    let dir = tempfile::tempdir().unwrap();
    let path = header_path(dir.path(), id);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"not an index header").unwrap();

    let reader = HeaderReader::open_or_build(&store, dir.path(), id, &IndexHeaderConfig::default())
        .await
        .unwrap();
    compare_index_to_header(&reader, &built);
}

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let built = tiny_v2_block();
    let store = InMemory::new();
    let id = Ulid::new();
    upload(&store, id, &built.bytes).await;

    let dir = tempfile::tempdir().unwrap();
    let path = build_header(&store, id, dir.path()).await;
    let first = std::fs::read(&path).unwrap();

    build_header(&store, id, dir.path()).await;
    let second = std::fs::read(&path).unwrap();
    assert_eq!(first, second);

    let reader = HeaderReader::open(&path).unwrap();
    compare_index_to_header(&reader, &built);
}

#[tokio::test]
async fn test_truncation_and_corruption() {
    let built = tiny_v2_block();
    let store = InMemory::new();
    let id = Ulid::new();
    upload(&store, id, &built.bytes).await;

    let dir = tempfile::tempdir().unwrap();
    let path = build_header(&store, id, dir.path()).await;
    let file = std::fs::read(&path).unwrap();

    let reopen = |bytes: &[u8]| {
        std::fs::write(&path, bytes).unwrap();
        HeaderReader::open(&path)
    };

    // Shorter than the scaffolding header
    let err = reopen(&file[..13]).unwrap_err();
    assert!(err.to_string().contains("short read"));

    // Truncated just before the TOC
    let err = reopen(&file[..file.len() - 20]).unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("checksum mismatch") || msg.contains("short read"),
        "got: {msg}"
    );

    // Flipped magic
    let mut bad = file.clone();
    bad[0] ^= 0x01;
    let err = reopen(&bad).unwrap_err();
    assert!(err.to_string().contains("invalid magic number"));

    // Any corrupted TOC byte fails the checksum
    let mut bad = file.clone();
    let toc_byte = file.len() - 20 + 3;
    bad[toc_byte] ^= 0x01;
    let err = reopen(&bad).unwrap_err();
    assert!(err.to_string().contains("checksum mismatch"));

    // The pristine bytes still load
    assert!(reopen(&file).is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_queries() {
    // A block big enough that sampling kicks in (several hundred values
    // across a few names).
    let mut w = IndexWriter::new(IndexVersion::V2);
    for i in 0..300 {
        let value = format!("instance-{i:04}");
        w.add_series(&[("instance", value.as_str()), ("job", "api")]);
    }
    for i in 0..50 {
        let value = format!("path-{i:03}");
        w.add_series(&[("handler", value.as_str()), ("job", "web")]);
    }
    let built = w.build();

    let store = InMemory::new();
    let id = Ulid::new();
    upload(&store, id, &built.bytes).await;

    let dir = tempfile::tempdir().unwrap();
    let path = build_header(&store, id, dir.path()).await;
    let reader = Arc::new(HeaderReader::open(&path).unwrap());

    // Single-threaded reference answers
    let names = reader.label_names().unwrap();
    let mut reference = Vec::new();
    for name in &names {
        for value in reader.label_values(name).unwrap() {
            let rng = reader.postings_offset(name, &value).unwrap();
            reference.push((name.clone(), value, rng));
        }
    }
    let symbol_ids: Vec<u32> = built.symbols.iter().map(|(id, _)| *id).collect();

    std::thread::scope(|scope| {
        for worker in 0..64 {
            let reader = Arc::clone(&reader);
            let names = &names;
            let reference = &reference;
            let built = &built;
            let symbol_ids = &symbol_ids;
            scope.spawn(move || {
                assert_eq!(&reader.label_names().unwrap(), names);
                for (name, value, rng) in reference {
                    assert_eq!(&reader.postings_offset(name, value).unwrap(), rng);
                }
                for name in names {
                    assert_eq!(
                        &reader.label_values(name).unwrap(),
                        &built.label_values[name]
                    );
                }
                // Stagger symbol lookups so workers hit different ids at
                // the same time
                for id in symbol_ids.iter().cycle().skip(worker).take(symbol_ids.len()) {
                    let (_, expected) =
                        built.symbols.iter().find(|(sid, _)| sid == id).unwrap();
                    assert_eq!(&reader.lookup_symbol(*id).unwrap(), expected);
                }
            });
        }
    });
}
