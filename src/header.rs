//! Binary records of the ZIP container
//!
//! Encoders for the local file header, data descriptor, central directory file
//! header, ZIP64 end of central directory record and locator, end of central
//! directory record, and the extra-field blocks. All integers are little-endian.
//! The parse side reads back what the encoders (or other tools) produced.

use crate::dos_time::DosDateTime;
use crate::error::{Result, ZipError};
use std::io::{self, Read, Write};

/// ZIP local file header signature
pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;

/// ZIP central directory signature
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;

/// ZIP end of central directory signature
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;

/// ZIP64 end of central directory record signature
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;

/// ZIP64 end of central directory locator signature
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE: u32 = 0x07064b50;

/// Optional signature in front of a data descriptor
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

/// Header id of the ZIP64 extended information extra field
pub const ZIP64_EXTRA_FIELD_TAG: u16 = 0x0001;

pub const LOCAL_FILE_HEADER_LEN: u64 = 30;
pub const CENTRAL_DIRECTORY_HEADER_LEN: u64 = 46;
pub const END_OF_CENTRAL_DIRECTORY_LEN: u64 = 22;
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_LEN: u64 = 56;
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_LEN: u64 = 20;
pub const EXTRA_FIELD_HEADER_LEN: usize = 4;

/// Position of "version needed" inside a local file header
pub const LOCAL_HEADER_VERSION_OFFSET: u64 = 4;
/// Position of the CRC-32 inside a local file header
pub const LOCAL_HEADER_CRC_OFFSET: u64 = 14;

/// 32-bit sentinel meaning "the value lives in the ZIP64 record"
pub const MASK_32: u32 = 0xFFFF_FFFF;
/// 16-bit sentinel meaning "the value lives in the ZIP64 record"
pub const MASK_16: u16 = 0xFFFF;

/// General purpose bit flags
pub mod flags {
    /// CRC and sizes follow the data in a data descriptor
    pub const DATA_DESCRIPTOR: u16 = 0x0008;
    /// Name and comment are UTF-8
    pub const UTF8: u16 = 0x0800;
}

/// Version needed to extract
pub mod version {
    pub const DEFAULT: u16 = 10;
    pub const DIRECTORY: u16 = 20;
    pub const ZIP64: u16 = 45;
}

/// Host system byte of "version made by"
pub const MADE_BY_UNIX: u8 = 3;

pub const COMPRESSION_STORED: u16 = 0;
pub const COMPRESSION_DEFLATE: u16 = 8;

trait PutLe {
    fn put_u16(&mut self, v: u16);
    fn put_u32(&mut self, v: u32);
    fn put_u64(&mut self, v: u64);
}

impl PutLe for Vec<u8> {
    fn put_u16(&mut self, v: u16) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.extend_from_slice(&v.to_le_bytes());
    }
}

/// Little-endian cursor over a fixed-size block that was already read in full
struct LeSlice<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> LeSlice<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        v
    }

    fn u32(&mut self) -> u32 {
        let b = &self.buf[self.pos..self.pos + 4];
        self.pos += 4;
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn u64(&mut self) -> u64 {
        let b = &self.buf[self.pos..self.pos + 8];
        self.pos += 8;
        u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    }
}

fn expect_signature(found: u32, expected: u32, what: &str) -> Result<()> {
    if found != expected {
        return Err(ZipError::InvalidFormat(format!(
            "Invalid {} signature: 0x{:08x}",
            what, found
        )));
    }
    Ok(())
}

/// Local file header, written right before the entry data
#[derive(Debug, Clone)]
pub struct LocalFileHeader<'a> {
    pub version_needed: u16,
    pub flags: u16,
    pub compression: u16,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name: &'a [u8],
    pub extra: &'a [u8],
}

impl LocalFileHeader<'_> {
    pub fn encoded_len(&self) -> u64 {
        LOCAL_FILE_HEADER_LEN + self.name.len() as u64 + self.extra.len() as u64
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u32(LOCAL_FILE_HEADER_SIGNATURE);
        buf.put_u16(self.version_needed);
        buf.put_u16(self.flags);
        buf.put_u16(self.compression);
        buf.put_u16(self.modified.time);
        buf.put_u16(self.modified.date);
        buf.put_u32(self.crc32);
        buf.put_u32(self.compressed_size);
        buf.put_u32(self.uncompressed_size);
        buf.put_u16(self.name.len() as u16);
        buf.put_u16(self.extra.len() as u16);
        buf.extend_from_slice(self.name);
        buf.extend_from_slice(self.extra);
    }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        self.encode(&mut buf);
        w.write_all(&buf)
    }

    /// Read a local header, returning its total length (fixed part, name and extra field)
    pub fn skip<R: Read + ?Sized>(r: &mut R) -> Result<u64> {
        let mut fixed = [0u8; LOCAL_FILE_HEADER_LEN as usize];
        r.read_exact(&mut fixed).map_err(truncated("local file header"))?;
        let mut le = LeSlice::new(&fixed);
        expect_signature(le.u32(), LOCAL_FILE_HEADER_SIGNATURE, "local file header")?;
        le.pos = 26;
        let name_len = u64::from(le.u16());
        let extra_len = u64::from(le.u16());

        let variable = name_len + extra_len;
        let skipped = io::copy(&mut (&mut *r).take(variable), &mut io::sink())?;
        if skipped != variable {
            return Err(ZipError::InvalidFormat(
                "Truncated local file header".to_string(),
            ));
        }
        Ok(LOCAL_FILE_HEADER_LEN + variable)
    }
}

/// Trailer carrying CRC and sizes for entries whose header was written before they were known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    pub fn encoded_len(with_signature: bool, zip64: bool) -> u64 {
        let sig = if with_signature { 4 } else { 0 };
        let sizes = if zip64 { 16 } else { 8 };
        sig + 4 + sizes
    }

    /// Sizes are 32-bit unless `zip64`, in which case both are 64-bit whatever their value
    pub fn encode(&self, buf: &mut Vec<u8>, with_signature: bool, zip64: bool) {
        if with_signature {
            buf.put_u32(DATA_DESCRIPTOR_SIGNATURE);
        }
        buf.put_u32(self.crc32);
        if zip64 {
            buf.put_u64(self.compressed_size);
            buf.put_u64(self.uncompressed_size);
        } else {
            buf.put_u32(self.compressed_size as u32);
            buf.put_u32(self.uncompressed_size as u32);
        }
    }

    pub fn write<W: Write + ?Sized>(
        &self,
        w: &mut W,
        with_signature: bool,
        zip64: bool,
    ) -> io::Result<()> {
        let mut buf = Vec::with_capacity(Self::encoded_len(with_signature, zip64) as usize);
        self.encode(&mut buf, with_signature, zip64);
        w.write_all(&buf)
    }
}

/// Central directory file header
#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader<'a> {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression: u16,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name: &'a [u8],
    pub extra: &'a [u8],
    pub comment: &'a [u8],
    pub disk_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
}

impl CentralDirectoryHeader<'_> {
    pub fn encoded_len(&self) -> u64 {
        CENTRAL_DIRECTORY_HEADER_LEN
            + self.name.len() as u64
            + self.extra.len() as u64
            + self.comment.len() as u64
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u32(CENTRAL_DIRECTORY_SIGNATURE);
        buf.put_u16(self.version_made_by);
        buf.put_u16(self.version_needed);
        buf.put_u16(self.flags);
        buf.put_u16(self.compression);
        buf.put_u16(self.modified.time);
        buf.put_u16(self.modified.date);
        buf.put_u32(self.crc32);
        buf.put_u32(self.compressed_size);
        buf.put_u32(self.uncompressed_size);
        buf.put_u16(self.name.len() as u16);
        buf.put_u16(self.extra.len() as u16);
        buf.put_u16(self.comment.len() as u16);
        buf.put_u16(self.disk_start);
        buf.put_u16(self.internal_attributes);
        buf.put_u32(self.external_attributes);
        buf.put_u32(self.local_header_offset);
        buf.extend_from_slice(self.name);
        buf.extend_from_slice(self.extra);
        buf.extend_from_slice(self.comment);
    }
}

/// A central directory file header as read back from an archive
#[derive(Debug, Clone)]
pub struct CentralDirectoryRecord {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression: u16,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl CentralDirectoryRecord {
    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        let mut fixed = [0u8; CENTRAL_DIRECTORY_HEADER_LEN as usize];
        r.read_exact(&mut fixed)
            .map_err(truncated("central directory header"))?;
        let mut le = LeSlice::new(&fixed);
        expect_signature(le.u32(), CENTRAL_DIRECTORY_SIGNATURE, "central directory")?;

        let version_made_by = le.u16();
        let version_needed = le.u16();
        let flags = le.u16();
        let compression = le.u16();
        let time = le.u16();
        let date = le.u16();
        let crc32 = le.u32();
        let compressed_size = le.u32();
        let uncompressed_size = le.u32();
        let name_len = le.u16() as usize;
        let extra_len = le.u16() as usize;
        let comment_len = le.u16() as usize;
        let disk_start = le.u16();
        let internal_attributes = le.u16();
        let external_attributes = le.u32();
        let local_header_offset = le.u32();

        let mut name = vec![0u8; name_len];
        let mut extra = vec![0u8; extra_len];
        let mut comment = vec![0u8; comment_len];
        r.read_exact(&mut name)
            .map_err(truncated("central directory header"))?;
        r.read_exact(&mut extra)
            .map_err(truncated("central directory header"))?;
        r.read_exact(&mut comment)
            .map_err(truncated("central directory header"))?;

        Ok(Self {
            version_made_by,
            version_needed,
            flags,
            compression,
            modified: DosDateTime { time, date },
            crc32,
            compressed_size,
            uncompressed_size,
            disk_start,
            internal_attributes,
            external_attributes,
            local_header_offset,
            name,
            extra,
            comment,
        })
    }
}

/// ZIP64 end of central directory record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectory {
    pub entry_count: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u32(ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        // size of the remaining record, excluding signature and this field
        buf.put_u64(ZIP64_END_OF_CENTRAL_DIRECTORY_LEN - 12);
        buf.put_u16(version::ZIP64);
        buf.put_u16(version::ZIP64);
        buf.put_u32(0); // number of this disk
        buf.put_u32(0); // disk where the central directory starts
        buf.put_u64(self.entry_count); // entries on this disk
        buf.put_u64(self.entry_count); // total entries
        buf.put_u64(self.central_directory_size);
        buf.put_u64(self.central_directory_offset);
    }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(ZIP64_END_OF_CENTRAL_DIRECTORY_LEN as usize);
        self.encode(&mut buf);
        w.write_all(&buf)
    }

    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        let mut fixed = [0u8; ZIP64_END_OF_CENTRAL_DIRECTORY_LEN as usize];
        r.read_exact(&mut fixed)
            .map_err(truncated("ZIP64 end of central directory"))?;
        let mut le = LeSlice::new(&fixed);
        expect_signature(
            le.u32(),
            ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE,
            "ZIP64 EOCD",
        )?;
        le.pos = 16;
        let this_disk = le.u32();
        let cd_disk = le.u32();
        if this_disk != 0 || cd_disk != 0 {
            return Err(ZipError::SplitArchive);
        }
        let _entries_on_disk = le.u64();
        let entry_count = le.u64();
        let central_directory_size = le.u64();
        let central_directory_offset = le.u64();
        Ok(Self {
            entry_count,
            central_directory_size,
            central_directory_offset,
        })
    }
}

/// ZIP64 end of central directory locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub record_offset: u64,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u32(ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE);
        buf.put_u32(0); // disk with the ZIP64 EOCD record
        buf.put_u64(self.record_offset);
        buf.put_u32(1); // total number of disks
    }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_LEN as usize);
        self.encode(&mut buf);
        w.write_all(&buf)
    }

    pub fn parse(block: &[u8]) -> Result<Self> {
        if block.len() < ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_LEN as usize {
            return Err(ZipError::InvalidFormat(
                "Truncated ZIP64 EOCD locator".to_string(),
            ));
        }
        let mut le = LeSlice::new(block);
        expect_signature(
            le.u32(),
            ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE,
            "ZIP64 EOCD locator",
        )?;
        let _disk = le.u32();
        let record_offset = le.u64();
        if le.u32() > 1 {
            return Err(ZipError::SplitArchive);
        }
        Ok(Self { record_offset })
    }
}

/// Classic end of central directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub entry_count: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub fn encoded_len(&self) -> u64 {
        END_OF_CENTRAL_DIRECTORY_LEN + self.comment.len() as u64
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u32(END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        buf.put_u16(0); // number of this disk
        buf.put_u16(0); // disk where the central directory starts
        buf.put_u16(self.entry_count); // entries on this disk
        buf.put_u16(self.entry_count); // total entries
        buf.put_u32(self.central_directory_size);
        buf.put_u32(self.central_directory_offset);
        buf.put_u16(self.comment.len() as u16);
        buf.extend_from_slice(&self.comment);
    }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        self.encode(&mut buf);
        w.write_all(&buf)
    }

    /// Parse a record found in a tail buffer; `block` starts at the signature
    pub fn parse(block: &[u8]) -> Result<Self> {
        if block.len() < END_OF_CENTRAL_DIRECTORY_LEN as usize {
            return Err(ZipError::InvalidFormat(
                "Truncated end of central directory".to_string(),
            ));
        }
        let mut le = LeSlice::new(block);
        expect_signature(le.u32(), END_OF_CENTRAL_DIRECTORY_SIGNATURE, "EOCD")?;
        let this_disk = le.u16();
        let cd_disk = le.u16();
        if (this_disk != 0 && this_disk != MASK_16) || (cd_disk != 0 && cd_disk != MASK_16) {
            return Err(ZipError::SplitArchive);
        }
        let _entries_on_disk = le.u16();
        let entry_count = le.u16();
        let central_directory_size = le.u32();
        let central_directory_offset = le.u32();
        let comment_len = le.u16() as usize;
        let comment_end = END_OF_CENTRAL_DIRECTORY_LEN as usize + comment_len;
        let comment = block
            .get(END_OF_CENTRAL_DIRECTORY_LEN as usize..comment_end)
            .ok_or_else(|| ZipError::InvalidFormat("Truncated archive comment".to_string()))?
            .to_vec();
        Ok(Self {
            entry_count,
            central_directory_size,
            central_directory_offset,
            comment,
        })
    }

    /// Whether any field holds a sentinel that points at the ZIP64 record
    pub fn needs_zip64(&self) -> bool {
        self.entry_count == MASK_16
            || self.central_directory_size == MASK_32
            || self.central_directory_offset == MASK_32
    }
}

/// An extra-field block kept verbatim (header id plus data)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraField {
    pub tag: u16,
    pub data: Vec<u8>,
}

impl ExtraField {
    pub fn new(tag: u16, data: Vec<u8>) -> Result<Self> {
        if data.len() > (u16::MAX as usize - EXTRA_FIELD_HEADER_LEN) {
            return Err(ZipError::ExtraFieldTooLong(data.len()));
        }
        Ok(Self { tag, data })
    }

    pub fn total_len(&self) -> usize {
        EXTRA_FIELD_HEADER_LEN + self.data.len()
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u16(self.tag);
        buf.put_u16(self.data.len() as u16);
        buf.extend_from_slice(&self.data);
    }

    pub fn total_len_of(fields: &[ExtraField]) -> usize {
        fields.iter().map(ExtraField::total_len).sum()
    }

    /// Split an extra-field area into blocks; a truncated trailing block ends parsing
    pub fn parse_all(mut bytes: &[u8]) -> Vec<ExtraField> {
        let mut fields = Vec::new();
        while bytes.len() >= EXTRA_FIELD_HEADER_LEN {
            let tag = u16::from_le_bytes([bytes[0], bytes[1]]);
            let len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
            let Some(data) = bytes.get(EXTRA_FIELD_HEADER_LEN..EXTRA_FIELD_HEADER_LEN + len) else {
                break;
            };
            fields.push(ExtraField {
                tag,
                data: data.to_vec(),
            });
            bytes = &bytes[EXTRA_FIELD_HEADER_LEN + len..];
        }
        fields
    }
}

/// ZIP64 extended information extra field; only the promoted values are present
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64ExtraField {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
    pub disk_start: Option<u32>,
}

impl Zip64ExtraField {
    pub fn is_empty(&self) -> bool {
        self.data_len() == 0
    }

    fn data_len(&self) -> usize {
        let mut len = 0;
        if self.uncompressed_size.is_some() {
            len += 8;
        }
        if self.compressed_size.is_some() {
            len += 8;
        }
        if self.local_header_offset.is_some() {
            len += 8;
        }
        if self.disk_start.is_some() {
            len += 4;
        }
        len
    }

    /// Encoded length including the four byte block header, zero when nothing is promoted
    pub fn total_len(&self) -> usize {
        match self.data_len() {
            0 => 0,
            n => EXTRA_FIELD_HEADER_LEN + n,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        if self.is_empty() {
            return;
        }
        buf.put_u16(ZIP64_EXTRA_FIELD_TAG);
        buf.put_u16(self.data_len() as u16);
        if let Some(v) = self.uncompressed_size {
            buf.put_u64(v);
        }
        if let Some(v) = self.compressed_size {
            buf.put_u64(v);
        }
        if let Some(v) = self.local_header_offset {
            buf.put_u64(v);
        }
        if let Some(v) = self.disk_start {
            buf.put_u32(v);
        }
    }

    /// Read the values whose 32-bit (or 16-bit) slot held the sentinel, in the fixed field order
    pub fn parse(
        data: &[u8],
        uncompressed_masked: bool,
        compressed_masked: bool,
        offset_masked: bool,
        disk_masked: bool,
    ) -> Result<Self> {
        let short = || ZipError::InvalidFormat("Truncated ZIP64 extra field".to_string());
        let mut le = LeSlice::new(data);
        let mut field = Zip64ExtraField::default();
        if uncompressed_masked {
            if le.pos + 8 > data.len() {
                return Err(short());
            }
            field.uncompressed_size = Some(le.u64());
        }
        if compressed_masked {
            if le.pos + 8 > data.len() {
                return Err(short());
            }
            field.compressed_size = Some(le.u64());
        }
        if offset_masked {
            if le.pos + 8 > data.len() {
                return Err(short());
            }
            field.local_header_offset = Some(le.u64());
        }
        if disk_masked {
            if le.pos + 4 > data.len() {
                return Err(short());
            }
            field.disk_start = Some(le.u32());
        }
        Ok(field)
    }
}

fn truncated(what: &'static str) -> impl Fn(io::Error) -> ZipError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ZipError::InvalidFormat(format!("Truncated {}", what))
        } else {
            ZipError::Io(e)
        }
    }
}
