//! ZIP reader used to read archives back
//!
//! Parses the central directory (ZIP64 aware), locates entry data by skipping the
//! local headers, and reads stored or deflated entries. Multi-disk archives are
//! recognised and refused.

use crate::dos_time::DosDateTime;
use crate::error::{Result, ZipError};
use crate::header::{
    flags, CentralDirectoryRecord, EndOfCentralDirectory, ExtraField, LocalFileHeader,
    Zip64EndOfCentralDirectory, Zip64EndOfCentralDirectoryLocator, Zip64ExtraField,
    COMPRESSION_DEFLATE, COMPRESSION_STORED, END_OF_CENTRAL_DIRECTORY_LEN,
    END_OF_CENTRAL_DIRECTORY_SIGNATURE, MASK_16, MASK_32,
    ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_LEN, ZIP64_EXTRA_FIELD_TAG,
};
use flate2::read::DeflateDecoder;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Longest possible end of central directory record (fixed part plus a full comment)
const MAX_EOCD_SEARCH: u64 = END_OF_CENTRAL_DIRECTORY_LEN + u16::MAX as u64;

/// Entry in the ZIP central directory
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression_method: u16,
    /// Offset of the local file header
    pub offset: u64,
    pub crc32: u32,
    pub modified: DosDateTime,
    pub external_attributes: u32,
    pub comment: String,
    record: CentralDirectoryRecord,
}

impl ZipEntry {
    fn from_record(record: CentralDirectoryRecord) -> Result<Self> {
        let uncompressed_masked = record.uncompressed_size == MASK_32;
        let compressed_masked = record.compressed_size == MASK_32;
        let offset_masked = record.local_header_offset == MASK_32;
        let disk_masked = record.disk_start == MASK_16;

        let mut zip64 = Zip64ExtraField::default();
        if uncompressed_masked || compressed_masked || offset_masked || disk_masked {
            if let Some(block) = ExtraField::parse_all(&record.extra)
                .into_iter()
                .find(|f| f.tag == ZIP64_EXTRA_FIELD_TAG)
            {
                zip64 = Zip64ExtraField::parse(
                    &block.data,
                    uncompressed_masked,
                    compressed_masked,
                    offset_masked,
                    disk_masked,
                )?;
            }
        }

        let disk_start = zip64
            .disk_start
            .unwrap_or_else(|| u32::from(record.disk_start));
        if disk_start != 0 {
            return Err(ZipError::SplitArchive);
        }

        // names from other tools may be CP437; anything that is not UTF-8 is decoded lossily
        let name = String::from_utf8_lossy(&record.name).into_owned();

        Ok(Self {
            name,
            compressed_size: zip64
                .compressed_size
                .unwrap_or_else(|| u64::from(record.compressed_size)),
            uncompressed_size: zip64
                .uncompressed_size
                .unwrap_or_else(|| u64::from(record.uncompressed_size)),
            compression_method: record.compression,
            offset: zip64
                .local_header_offset
                .unwrap_or_else(|| u64::from(record.local_header_offset)),
            crc32: record.crc32,
            modified: record.modified,
            external_attributes: record.external_attributes,
            comment: String::from_utf8_lossy(&record.comment).into_owned(),
            record,
        })
    }

    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Whether the entry was written with a trailing data descriptor
    pub fn has_data_descriptor(&self) -> bool {
        self.record.flags & flags::DATA_DESCRIPTOR != 0
    }

    /// Version needed to extract, as stored in the central directory
    pub fn version_needed(&self) -> u16 {
        self.record.version_needed
    }

    pub fn flags(&self) -> u16 {
        self.record.flags
    }

    /// Extra-field blocks other than the ZIP64 one
    pub fn extra_fields(&self) -> Vec<ExtraField> {
        ExtraField::parse_all(&self.record.extra)
            .into_iter()
            .filter(|f| f.tag != ZIP64_EXTRA_FIELD_TAG)
            .collect()
    }

    /// Whether the central record carried a ZIP64 extra field
    pub fn has_zip64_extra(&self) -> bool {
        ExtraField::parse_all(&self.record.extra)
            .iter()
            .any(|f| f.tag == ZIP64_EXTRA_FIELD_TAG)
    }

    pub(crate) fn record(&self) -> &CentralDirectoryRecord {
        &self.record
    }
}

/// ZIP archive reader over any seekable source
pub struct ZipReader<R> {
    reader: R,
    entries: Vec<ZipEntry>,
    comment: Vec<u8>,
    central_directory_offset: u64,
}

impl ZipReader<BufReader<File>> {
    /// Open a ZIP file and read its central directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> ZipReader<R> {
    /// Read the central directory of the archive in `reader`
    pub fn new(mut reader: R) -> Result<Self> {
        let (eocd_offset, eocd) = find_eocd(&mut reader)?;

        let mut entry_count = u64::from(eocd.entry_count);
        let mut cd_size = u64::from(eocd.central_directory_size);
        let mut cd_offset = u64::from(eocd.central_directory_offset);

        if eocd.needs_zip64() {
            let record = read_zip64_eocd(&mut reader, eocd_offset)?;
            entry_count = record.entry_count;
            cd_size = record.central_directory_size;
            cd_offset = record.central_directory_offset;
        }

        let cd_len = usize::try_from(cd_size).map_err(|_| {
            ZipError::InvalidFormat(format!("Central directory of {} bytes", cd_size))
        })?;
        reader.seek(SeekFrom::Start(cd_offset))?;
        let mut central_directory = vec![0u8; cd_len];
        reader.read_exact(&mut central_directory).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ZipError::InvalidFormat("Truncated central directory".to_string())
            } else {
                ZipError::Io(e)
            }
        })?;

        let mut cursor = Cursor::new(&central_directory);
        // the count is untrusted input, do not pre-allocate from it blindly
        let mut entries = Vec::with_capacity(entry_count.min(1 << 16) as usize);
        for _ in 0..entry_count {
            let record = CentralDirectoryRecord::read(&mut cursor)?;
            entries.push(ZipEntry::from_record(record)?);
        }

        debug!(
            entries = entries.len(),
            central_directory_offset = cd_offset,
            "read central directory"
        );

        Ok(Self {
            reader,
            entries,
            comment: eocd.comment,
            central_directory_offset: cd_offset,
        })
    }

    /// Get list of all entries in the ZIP
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Find an entry by name
    pub fn find_entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Archive comment
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Where the central directory starts
    pub fn central_directory_offset(&self) -> u64 {
        self.central_directory_offset
    }

    /// Absolute position of the first data byte of `entry`
    pub fn data_offset(&mut self, entry: &ZipEntry) -> Result<u64> {
        self.reader.seek(SeekFrom::Start(entry.offset))?;
        let header_len = LocalFileHeader::skip(&mut self.reader)?;
        Ok(entry.offset + header_len)
    }

    /// Read an entry's decompressed data into a vector, verifying its CRC-32
    pub fn read_entry(&mut self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let capacity = usize::try_from(entry.uncompressed_size)
            .map_err(|_| ZipError::EntryTooLarge(entry.name.clone()))?;

        let mut data = Vec::with_capacity(capacity.min(64 << 20));
        self.read_entry_streaming(entry)?.read_to_end(&mut data)?;

        if data.len() as u64 != entry.uncompressed_size {
            return Err(ZipError::InvalidFormat(format!(
                "Entry `{}` has {} bytes, expected {}",
                entry.name,
                data.len(),
                entry.uncompressed_size
            )));
        }
        let crc = crc32fast::hash(&data);
        if crc != entry.crc32 {
            return Err(ZipError::InvalidFormat(format!(
                "CRC mismatch in `{}`: 0x{:08x} != 0x{:08x}",
                entry.name, crc, entry.crc32
            )));
        }
        Ok(data)
    }

    /// Read an entry by name
    pub fn read_entry_by_name(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find_entry(name)
            .ok_or_else(|| ZipError::EntryNotFound(name.to_string()))?
            .clone();

        self.read_entry(&entry)
    }

    /// Get a streaming reader for an entry (for large files)
    /// Returns a reader that decompresses data on-the-fly without loading everything into memory
    pub fn read_entry_streaming(&mut self, entry: &ZipEntry) -> Result<Box<dyn Read + '_>> {
        if entry.compression_method != COMPRESSION_STORED
            && entry.compression_method != COMPRESSION_DEFLATE
        {
            return Err(ZipError::UnsupportedCompression(entry.compression_method));
        }
        self.data_offset(entry)?;

        let limited_reader = (&mut self.reader).take(entry.compressed_size);
        if entry.compression_method == COMPRESSION_DEFLATE {
            Ok(Box::new(DeflateDecoder::new(limited_reader)))
        } else {
            Ok(Box::new(limited_reader))
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Find the end of central directory record by scanning backwards from the end
fn find_eocd<R: Read + Seek>(reader: &mut R) -> Result<(u64, EndOfCentralDirectory)> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    let search_start = file_size.saturating_sub(MAX_EOCD_SEARCH);
    reader.seek(SeekFrom::Start(search_start))?;

    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;

    let signature = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();
    let last = buffer
        .len()
        .saturating_sub(END_OF_CENTRAL_DIRECTORY_LEN as usize - 1);
    for i in (0..last).rev() {
        if buffer[i..i + 4] == signature {
            match EndOfCentralDirectory::parse(&buffer[i..]) {
                Ok(eocd) => return Ok((search_start + i as u64, eocd)),
                Err(ZipError::SplitArchive) => return Err(ZipError::SplitArchive),
                // the bytes only looked like a signature, keep scanning
                Err(_) => {}
            }
        }
    }

    Err(ZipError::InvalidFormat(
        "End of central directory not found".to_string(),
    ))
}

/// Read the ZIP64 record through the locator right in front of the classic record
fn read_zip64_eocd<R: Read + Seek>(
    reader: &mut R,
    eocd_offset: u64,
) -> Result<Zip64EndOfCentralDirectory> {
    let locator_offset = eocd_offset
        .checked_sub(ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_LEN)
        .ok_or_else(|| ZipError::InvalidFormat("ZIP64 EOCD locator not found".to_string()))?;
    reader.seek(SeekFrom::Start(locator_offset))?;
    let mut block = [0u8; ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_LEN as usize];
    reader.read_exact(&mut block)?;
    let locator = Zip64EndOfCentralDirectoryLocator::parse(&block)?;

    reader.seek(SeekFrom::Start(locator.record_offset))?;
    Zip64EndOfCentralDirectory::read(reader)
}
