//! Pass-through writer that checksums and counts entry data
//!
//! Bytes are forwarded unchanged. The compressed length is measured from the
//! destination position, starting at the first non-empty write, so the tap stays
//! correct if another writer is ever interposed between it and the destination.

use crate::error::{Result, ZipError};
use crate::sink::Tell;
use crc32fast::Hasher as Crc32;
use std::io::{self, Write};

/// Running CRC-32 and length of uncompressed entry bytes
#[derive(Debug, Clone, Default)]
pub struct Checksum {
    crc: Crc32,
    count: u64,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.crc.update(bytes);
        self.count += bytes.len() as u64;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn finalize(self) -> u32 {
        self.crc.finalize()
    }
}

/// Fail with [`ZipError::SizeMismatch`] unless a source delivered its declared length
pub fn expect_len(name: &str, declared: u64, actual: u64) -> Result<()> {
    if declared != actual {
        return Err(ZipError::SizeMismatch {
            name: name.to_string(),
            declared,
            actual,
        });
    }
    Ok(())
}

/// Final values reported when a tap is finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TapSummary {
    pub crc32: u32,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
}

/// Forwards writes to `inner` while accumulating CRC-32 and the byte count
pub struct CrcSizeTap<W> {
    inner: W,
    checksum: Checksum,
    start: Option<u64>,
}

impl<W: Write + Tell> CrcSizeTap<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            checksum: Checksum::new(),
            start: None,
        }
    }

    /// Whether any byte has gone through the tap yet
    pub fn has_written(&self) -> bool {
        self.start.is_some()
    }

    pub fn uncompressed_count(&self) -> u64 {
        self.checksum.count()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Consume the tap; the summary is produced exactly once
    pub fn finish(self) -> (W, TapSummary) {
        let compressed_size = self
            .start
            .map(|start| self.inner.tell() - start)
            .unwrap_or(0);
        let summary = TapSummary {
            uncompressed_size: self.checksum.count(),
            crc32: self.checksum.finalize(),
            compressed_size,
        };
        (self.inner, summary)
    }
}

impl<W: Write + Tell> Write for CrcSizeTap<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.start.is_none() {
            self.start = Some(self.inner.tell());
        }
        let n = self.inner.write(buf)?;
        self.checksum.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ByteCounter;

    #[test]
    fn forwards_and_checksums() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let mut tap = CrcSizeTap::new(ByteCounter::new());
        tap.write_all(&data[..10]).unwrap();
        tap.write_all(&data[10..]).unwrap();
        let (counter, summary) = tap.finish();

        assert_eq!(counter.count(), data.len() as u64);
        assert_eq!(summary.crc32, crc32fast::hash(data));
        assert_eq!(summary.crc32, 0x414FA339);
        assert_eq!(summary.uncompressed_size, data.len() as u64);
        assert_eq!(summary.compressed_size, data.len() as u64);
    }

    #[test]
    fn empty_writes_are_noops() {
        let mut tap = CrcSizeTap::new(ByteCounter::new());
        assert_eq!(tap.write(&[]).unwrap(), 0);
        assert!(!tap.has_written());
        let (_, summary) = tap.finish();
        assert_eq!(summary, TapSummary::default());
    }

    #[test]
    fn checksum_matches_one_shot_hash() {
        let mut checksum = Checksum::new();
        checksum.update(b"The quick brown fox ");
        checksum.update(b"jumps over the lazy dog");
        assert_eq!(checksum.count(), 43);
        assert_eq!(checksum.finalize(), 0x414FA339);
    }

    #[test]
    fn length_check() {
        assert!(expect_len("f", 3, 3).is_ok());
        assert!(matches!(
            expect_len("f", 10, 5),
            Err(ZipError::SizeMismatch {
                declared: 10,
                actual: 5,
                ..
            })
        ));
    }

    #[test]
    fn compressed_size_measured_from_first_write() {
        let mut counter = ByteCounter::new();
        counter.write_all(&[0; 30]).unwrap();

        let mut tap = CrcSizeTap::new(&mut counter);
        // bytes written behind the tap's back before the first write do not count
        tap.get_mut().write_all(&[0; 7]).unwrap();
        tap.write_all(b"abc").unwrap();
        assert_eq!(tap.uncompressed_count(), 3);
        let (_, summary) = tap.finish();

        assert_eq!(summary.compressed_size, 3);
        assert_eq!(counter.count(), 40);
    }
}
