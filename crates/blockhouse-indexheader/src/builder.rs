//! Index-Header Builder
//!
//! Builds an index-header file from the pieces of a block index living in
//! object storage, using ranged reads only — never the whole index:
//!
//! 1. Fetch the 6-byte preamble, validate magic and index version
//! 2. Fetch the 52-byte TOC tail, validate its checksum, learn where the
//!    symbols section and postings offset table live
//! 3. Stream-copy those two sections, byte-exact, into the local file
//!    behind a small scaffolding header
//! 4. Append the header's own TOC + CRC, then fsync
//!
//! The copied sections keep their original encoding, so every offset
//! embedded inside them still refers to the original index file.
//!
//! ## Durability
//!
//! The parent directory is fsynced after the output file is created and the
//! file itself after the TOC is written. A drop guard deletes the partial
//! output on every non-success exit — errors and cancellation alike — so a
//! later open never observes a half-built header: either the final TOC and
//! CRC made it to disk, or there is no file.
//!
//! ## Concurrency
//!
//! One build per output path; concurrent builds against the same path must
//! be serialized by the caller.

use std::ops::Range;
use std::path::{Path as FilePath, PathBuf};

use futures::StreamExt;
use object_store::path::Path;
use object_store::{GetOptions, GetRange, ObjectStore};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::debug;
use ulid::Ulid;

use blockhouse_core::encoding::Encbuf;
use blockhouse_core::index::{
    IndexToc, IndexVersion, INDEX_MAGIC, INDEX_PREAMBLE_LEN, INDEX_TOC_LEN,
};
use blockhouse_core::Error as FormatError;

use crate::config::IndexHeaderConfig;
use crate::error::{Error, Result};
use crate::{HEADER_FORMAT_V1, INDEX_FILENAME};

/// Build the index-header for block `id` at `path` from the block's index
/// in `store`.
///
/// Any pre-existing file at `path` is removed before writing begins.
/// On success the file is durable; on failure (or cancellation of the
/// returned future) no file is left behind.
pub async fn write_header(
    store: &dyn ObjectStore,
    id: Ulid,
    path: &FilePath,
    config: &IndexHeaderConfig,
) -> Result<()> {
    let remote = RemoteIndexReader::connect(store, id)
        .await
        .map_err(|e| e.in_phase("read preamble"))?;
    let toc = remote.read_toc().await.map_err(|e| e.in_phase("read toc"))?;

    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        other => other?,
    }

    let file = File::create(path).await?;
    let mut guard = PartialFile::new(path);
    if let Some(dir) = path.parent() {
        // Make the directory entry durable before any data goes in.
        File::open(dir).await?.sync_all().await?;
    }
    let mut w = BufWriter::with_capacity(config.write_buffer_size, file);

    let mut buf = Encbuf::with_capacity(crate::HEADER_LEN);
    buf.put_be32(INDEX_MAGIC);
    buf.put_byte(HEADER_FORMAT_V1);
    buf.put_byte(remote.version.as_u8());
    buf.put_be64(toc.postings_table);
    w.write_all(buf.get()).await?;
    let mut pos = buf.len() as u64;

    let symbols_start = pos;
    pos += remote
        .copy_range(&mut w, toc.symbols..toc.series)
        .await
        .map_err(|e| e.in_phase("copy symbols"))?;

    let postings_table_start = pos;
    remote
        .copy_range(
            &mut w,
            toc.postings_table..remote.size - INDEX_TOC_LEN as u64,
        )
        .await
        .map_err(|e| e.in_phase("copy postings"))?;

    buf.reset();
    buf.put_be64(symbols_start);
    buf.put_be64(postings_table_start);
    buf.put_crc32c(0);
    let finish = async {
        w.write_all(buf.get()).await?;
        w.flush().await?;
        w.into_inner().sync_all().await?;
        Ok::<_, Error>(())
    };
    finish.await.map_err(|e| e.in_phase("write toc"))?;

    guard.disarm();
    debug!(
        block = %id,
        path = %path.display(),
        symbols_start,
        postings_table_start,
        "wrote index-header"
    );
    Ok(())
}

/// Ranged-read view of one block's index file in object storage.
struct RemoteIndexReader<'a> {
    store: &'a dyn ObjectStore,
    location: Path,
    size: u64,
    version: IndexVersion,
}

impl<'a> RemoteIndexReader<'a> {
    /// Stat the index object and validate its preamble.
    async fn connect(store: &'a dyn ObjectStore, id: Ulid) -> Result<RemoteIndexReader<'a>> {
        let location = Path::from(format!("{id}/{INDEX_FILENAME}"));
        let size = store.head(&location).await?.size;
        if size < (INDEX_PREAMBLE_LEN + INDEX_TOC_LEN) as u64 {
            return Err(FormatError::ShortRead {
                need: INDEX_PREAMBLE_LEN + INDEX_TOC_LEN,
                have: size as usize,
            }
            .into());
        }

        let preamble = store
            .get_range(&location, 0..INDEX_PREAMBLE_LEN as u64)
            .await?;
        if preamble.len() < INDEX_PREAMBLE_LEN {
            return Err(FormatError::ShortRead {
                need: INDEX_PREAMBLE_LEN,
                have: preamble.len(),
            }
            .into());
        }
        let magic = u32::from_be_bytes(preamble[0..4].try_into().unwrap());
        if magic != INDEX_MAGIC {
            return Err(FormatError::InvalidMagic(magic).into());
        }
        let version = IndexVersion::try_from(preamble[4])?;

        Ok(RemoteIndexReader {
            store,
            location,
            size,
            version,
        })
    }

    /// Fetch and validate the TOC tail, then sanity-check the section
    /// offsets the build depends on.
    async fn read_toc(&self) -> Result<IndexToc> {
        let tail = self
            .store
            .get_range(&self.location, self.size - INDEX_TOC_LEN as u64..self.size)
            .await?;
        let toc = IndexToc::from_tail_bytes(&tail)?;

        let magic_and_version = 5u64;
        if toc.symbols < magic_and_version
            || toc.series < toc.symbols
            || toc.postings_table < toc.series
            || toc.postings_table > self.size - INDEX_TOC_LEN as u64
        {
            return Err(FormatError::Corrupt(format!(
                "impossible section offsets in index TOC: {toc:?}"
            ))
            .into());
        }
        Ok(toc)
    }

    /// Stream the given byte range of the remote index into `w`, returning
    /// the number of bytes written. The store must deliver the range in
    /// full; a shorter body is an error, not EOF.
    async fn copy_range<W>(&self, w: &mut W, range: Range<u64>) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let expected = range.end - range.start;
        let opts = GetOptions {
            range: Some(GetRange::Bounded(range)),
            ..Default::default()
        };
        let mut stream = self.store.get_opts(&self.location, opts).await?.into_stream();

        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            w.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        if written != expected {
            return Err(FormatError::ShortRead {
                need: expected as usize,
                have: written as usize,
            }
            .into());
        }
        Ok(written)
    }
}

/// Removes the output file on drop unless the build completed.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: &FilePath) -> Self {
        PartialFile {
            path: path.to_path_buf(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
