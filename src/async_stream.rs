//! Async flavour of the forward-only streaming writer
//!
//! Produces byte-for-byte the same archive as [`stream_archive`](crate::stream_archive)
//! for the same files, so [`calculate_total_size`](crate::calculate_total_size) holds
//! for it as well. Files are read with Tokio and copied in fixed-size chunks.

use crate::error::Result;
use crate::source::{resolve_sources, FileRecord, Source};
use crate::stream::{
    encode_central_record, encode_descriptor, encode_local_header, encode_trailer, Layout,
    SizedEntry,
};
use crate::tap::{expect_len, Checksum};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

const CHUNK_SIZE: usize = 64 * 1024;

/// Copy exactly `size` bytes of `source` into `dest`, returning the CRC-32
///
/// Fewer bytes than `size` is an error; bytes past `size` are not read.
async fn copy_counted<R, W>(name: &str, source: R, size: u64, dest: &mut W) -> Result<u32>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut source = source.take(size);
    let mut checksum = Checksum::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        checksum.update(&buf[..n]);
        dest.write_all(&buf[..n]).await?;
    }
    expect_len(name, size, checksum.count())?;
    Ok(checksum.finalize())
}

/// Stream resolved files as a ZIP archive to `dest`, returning the bytes written
pub async fn stream_records_async<W>(records: &[FileRecord], dest: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut layout = Layout::new();
    let mut written = Vec::with_capacity(records.len());
    let mut buf = Vec::new();

    for record in records {
        let offset = layout.push(record.name_len(), record.size);

        buf.clear();
        encode_local_header(&mut buf, record.name.as_bytes(), record.modified);
        dest.write_all(&buf).await?;

        let file = File::open(&record.path).await?;
        let crc32 = copy_counted(&record.name, file, record.size, dest).await?;

        buf.clear();
        encode_descriptor(&mut buf, crc32, record.size);
        dest.write_all(&buf).await?;

        trace!(entry = %record.name, offset, size = record.size, "streamed entry");
        written.push((offset, crc32));
    }

    buf.clear();
    for (record, &(offset, crc32)) in records.iter().zip(&written) {
        encode_central_record(
            &mut buf,
            record.name.as_bytes(),
            record.modified,
            crc32,
            record.size,
            offset,
        );
    }
    encode_trailer(&mut buf, &layout);
    dest.write_all(&buf).await?;
    dest.flush().await?;

    debug!(
        entries = layout.entry_count(),
        bytes = layout.total_len(),
        "streamed archive"
    );
    Ok(layout.total_len())
}

/// Resolve `sources` and stream them asynchronously
pub async fn stream_sources_async<W>(sources: &[Source], dest: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let records = resolve_sources(sources)?;
    stream_records_async(&records, dest).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ZipError;

    #[tokio::test]
    async fn short_reader_is_a_size_mismatch() {
        let mut out = Vec::new();
        let err = copy_counted("short", &b"abc"[..], 5, &mut out)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ZipError::SizeMismatch {
                declared: 5,
                actual: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn long_reader_is_cut() {
        let mut out = Vec::new();
        let crc = copy_counted("long", &b"abcdef"[..], 3, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(crc, crc32fast::hash(b"abc"));
    }
}
