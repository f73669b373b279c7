//! Forward-only streaming writer and its size predictor
//!
//! Every entry is written as version 4.5 with a data descriptor, and every central
//! record carries a ZIP64 extra field with both sizes. The only field whose width
//! depends on the data is the local header offset, promoted once it reaches
//! `0xFFFFFFFF`. That makes the archive length a closed-form sum that
//! [`calculate_total_size`] evaluates without reading any payload. The writer and
//! the predictor both advance the same [`Layout`].

use crate::dos_time::DosDateTime;
use crate::error::{Result, ZipError};
use crate::header::{
    flags, version, CentralDirectoryHeader, DataDescriptor, EndOfCentralDirectory,
    LocalFileHeader, Zip64EndOfCentralDirectory, Zip64EndOfCentralDirectoryLocator,
    COMPRESSION_STORED, MADE_BY_UNIX, MASK_16, MASK_32,
};
use crate::entry::DEFAULT_FILE_ATTRIBUTES;
use crate::sink::PositionWriter;
use crate::tap::{expect_len, CrcSizeTap};
use crate::zip64::{needs_zip64, CentralFields};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing::{debug, trace};

/// Local header (30) plus the unsigned ZIP64 data descriptor (20)
pub const LOCAL_SECTION_OVERHEAD: u64 = 50;
/// Central header (46) plus a ZIP64 extra field holding both sizes (20)
pub const CENTRAL_RECORD_OVERHEAD: u64 = 66;
/// Extra bytes in a central record whose local header offset is promoted
pub const OFFSET_EXTENSION_LEN: u64 = 8;
/// ZIP64 end record (56), its locator (20) and the classic end record (22)
pub const TRAILER_LEN: u64 = 98;

/// General purpose flags of every streamed entry: data descriptor and UTF-8 names
const STREAM_FLAGS: u16 = flags::DATA_DESCRIPTOR | flags::UTF8;

/// Bytes an entry occupies in the data section
#[inline]
pub fn local_section_len(name_len: u64, size: u64) -> u64 {
    LOCAL_SECTION_OVERHEAD + name_len + size
}

/// Bytes an entry's record occupies in the central directory
#[inline]
pub fn central_record_len(name_len: u64, local_header_offset: u64) -> u64 {
    let offset_ext = if needs_zip64(local_header_offset) {
        OFFSET_EXTENSION_LEN
    } else {
        0
    };
    CENTRAL_RECORD_OVERHEAD + name_len + offset_ext
}

/// Running byte layout of a streamed archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layout {
    data_len: u64,
    central_directory_len: u64,
    entry_count: u64,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for the next entry, returning the offset of its local header
    pub fn push(&mut self, name_len: u64, size: u64) -> u64 {
        let offset = self.data_len;
        self.data_len += local_section_len(name_len, size);
        self.central_directory_len += central_record_len(name_len, offset);
        self.entry_count += 1;
        offset
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Where the central directory starts
    pub fn central_directory_offset(&self) -> u64 {
        self.data_len
    }

    pub fn central_directory_len(&self) -> u64 {
        self.central_directory_len
    }

    pub fn total_len(&self) -> u64 {
        self.data_len + self.central_directory_len + TRAILER_LEN
    }
}

/// Name and declared size, all the predictor needs to know about an entry
pub trait SizedEntry {
    /// Length of the encoded name in bytes
    fn name_len(&self) -> u64;
    fn size(&self) -> u64;
}

impl<T: SizedEntry + ?Sized> SizedEntry for &T {
    fn name_len(&self) -> u64 {
        (**self).name_len()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

impl<N: AsRef<str>> SizedEntry for (N, u64) {
    fn name_len(&self) -> u64 {
        self.0.as_ref().len() as u64
    }

    fn size(&self) -> u64 {
        self.1
    }
}

/// Exact length of the archive [`stream_archive`] would produce for these entries
pub fn calculate_total_size<I>(entries: I) -> u64
where
    I: IntoIterator,
    I::Item: SizedEntry,
{
    let mut layout = Layout::new();
    for entry in entries {
        layout.push(entry.name_len(), entry.size());
    }
    layout.total_len()
}

/// Lazily opened bytes of one streamed entry
pub trait ByteSource {
    fn open(&self) -> io::Result<Box<dyn Read + '_>>;
}

impl ByteSource for PathBuf {
    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(self)?))
    }
}

impl ByteSource for Vec<u8> {
    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(self.as_slice()))
    }
}

impl ByteSource for &'static [u8] {
    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(*self))
    }
}

/// One entry of a streamed archive
pub struct StreamEntry {
    name: String,
    size: u64,
    modified: DosDateTime,
    source: Box<dyn ByteSource>,
}

impl StreamEntry {
    /// `size` is the exact number of bytes `source` will yield
    pub fn new(
        name: impl Into<String>,
        size: u64,
        modified: DosDateTime,
        source: impl ByteSource + 'static,
    ) -> Result<Self> {
        let name = name.into();
        if name.len() > u16::MAX as usize {
            return Err(ZipError::NameTooLong(name.len()));
        }
        Ok(Self {
            name,
            size,
            modified,
            source: Box::new(source),
        })
    }

    /// In-memory entry stamped with the current time
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        Self::new(name, data.len() as u64, DosDateTime::now(), data)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn modified(&self) -> DosDateTime {
        self.modified
    }
}

impl SizedEntry for StreamEntry {
    fn name_len(&self) -> u64 {
        self.name.len() as u64
    }

    fn size(&self) -> u64 {
        self.size
    }
}

pub(crate) fn encode_local_header(buf: &mut Vec<u8>, name: &[u8], modified: DosDateTime) {
    LocalFileHeader {
        version_needed: version::ZIP64,
        flags: STREAM_FLAGS,
        compression: COMPRESSION_STORED,
        modified,
        crc32: 0,
        compressed_size: 0,
        uncompressed_size: 0,
        name,
        extra: &[],
    }
    .encode(buf);
}

pub(crate) fn encode_descriptor(buf: &mut Vec<u8>, crc32: u32, size: u64) {
    DataDescriptor {
        crc32,
        compressed_size: size,
        uncompressed_size: size,
    }
    .encode(buf, false, true);
}

pub(crate) fn encode_central_record(
    buf: &mut Vec<u8>,
    name: &[u8],
    modified: DosDateTime,
    crc32: u32,
    size: u64,
    local_header_offset: u64,
) {
    let fields = CentralFields::always_zip64_sizes(size, local_header_offset);
    let mut extra = Vec::with_capacity(fields.zip64.total_len());
    fields.zip64.encode(&mut extra);

    CentralDirectoryHeader {
        version_made_by: (u16::from(MADE_BY_UNIX) << 8) | version::ZIP64,
        version_needed: version::ZIP64,
        flags: STREAM_FLAGS,
        compression: COMPRESSION_STORED,
        modified,
        crc32,
        compressed_size: fields.compressed_size,
        uncompressed_size: fields.uncompressed_size,
        name,
        extra: &extra,
        comment: &[],
        disk_start: 0,
        internal_attributes: 0,
        external_attributes: DEFAULT_FILE_ATTRIBUTES,
        local_header_offset: fields.local_header_offset,
    }
    .encode(buf);
}

/// The fixed trailer; the classic record only holds sentinels
pub(crate) fn encode_trailer(buf: &mut Vec<u8>, layout: &Layout) {
    let central_directory_offset = layout.central_directory_offset();
    let central_directory_size = layout.central_directory_len();
    Zip64EndOfCentralDirectory {
        entry_count: layout.entry_count(),
        central_directory_size,
        central_directory_offset,
    }
    .encode(buf);
    Zip64EndOfCentralDirectoryLocator {
        record_offset: central_directory_offset + central_directory_size,
    }
    .encode(buf);
    EndOfCentralDirectory {
        entry_count: MASK_16,
        central_directory_size: MASK_32,
        central_directory_offset: MASK_32,
        comment: Vec::new(),
    }
    .encode(buf);
}

/// Stream `entries` as a ZIP archive to `dest` without ever seeking
///
/// Returns the number of bytes written, always equal to
/// [`calculate_total_size`] of the same entries. A source that yields fewer bytes
/// than declared fails with [`ZipError::SizeMismatch`]; bytes beyond the declared
/// size are never read.
pub fn stream_archive<W: Write>(entries: &[StreamEntry], dest: W) -> Result<u64> {
    let mut out = PositionWriter::new(dest, 0);
    let mut layout = Layout::new();
    let mut written = Vec::with_capacity(entries.len());
    let mut buf = Vec::new();

    for entry in entries {
        let offset = layout.push(entry.name_len(), entry.size);
        debug_assert_eq!(offset, out.position());

        buf.clear();
        encode_local_header(&mut buf, entry.name.as_bytes(), entry.modified);
        out.write_all(&buf)?;

        let mut tap = CrcSizeTap::new(&mut out);
        let mut source = entry.source.open()?.take(entry.size);
        io::copy(&mut source, &mut tap)?;
        let (_, summary) = tap.finish();
        expect_len(&entry.name, entry.size, summary.uncompressed_size)?;

        buf.clear();
        encode_descriptor(&mut buf, summary.crc32, entry.size);
        out.write_all(&buf)?;

        trace!(entry = %entry.name, offset, size = entry.size, "streamed entry");
        written.push((offset, summary.crc32));
    }

    for (entry, &(offset, crc32)) in entries.iter().zip(&written) {
        buf.clear();
        encode_central_record(
            &mut buf,
            entry.name.as_bytes(),
            entry.modified,
            crc32,
            entry.size,
            offset,
        );
        out.write_all(&buf)?;
    }

    buf.clear();
    encode_trailer(&mut buf, &layout);
    out.write_all(&buf)?;
    out.flush()?;

    debug_assert_eq!(out.position(), layout.total_len());
    debug!(
        entries = layout.entry_count(),
        bytes = out.position(),
        "streamed archive"
    );
    Ok(out.position())
}
