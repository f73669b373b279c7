//! Entries of a general archive and the handle used to write their data
//!
//! An entry moves through `Unwritten -> OpenForWrite -> Finalized`. Its local header
//! is emitted lazily on the first non-empty write; when the handle is closed the
//! header is either patched in place (seekable destination) or followed by a data
//! descriptor (forward-only destination).

use crate::dos_time::DosDateTime;
use crate::error::{Result, ZipError};
use crate::header::{
    flags, version, CentralDirectoryHeader, DataDescriptor, ExtraField, LocalFileHeader,
    Zip64ExtraField, COMPRESSION_STORED, LOCAL_FILE_HEADER_LEN, LOCAL_HEADER_CRC_OFFSET,
    LOCAL_HEADER_VERSION_OFFSET, MADE_BY_UNIX, MASK_32, ZIP64_EXTRA_FIELD_TAG,
};
use crate::reader::ZipEntry;
use crate::sink::{ArchiveSink, PositionWriter, Tell};
use crate::tap::{CrcSizeTap, TapSummary};
use crate::zip64::{assemble_extra_field, sizes_need_zip64, CentralFields};
use std::io::{self, Write};
use std::time::SystemTime;
use time::PrimitiveDateTime;
use tracing::{error, trace, warn};

/// Default external attributes of a regular file (`-rw-r--r--`)
pub const DEFAULT_FILE_ATTRIBUTES: u32 = 0o100644 << 16;
/// Default external attributes of a directory (`drwxr-xr-x` plus the DOS directory bit)
pub const DEFAULT_DIRECTORY_ATTRIBUTES: u32 = (0o040755 << 16) | 0x10;

/// Position of an entry inside its archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub(crate) usize);

impl EntryId {
    /// Index in central directory order
    pub fn index(self) -> usize {
        self.0
    }
}

/// Write lifecycle of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Unwritten,
    OpenForWrite,
    Finalized,
}

/// Per-entry settings applied when the entry is created
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    last_modified: Option<PrimitiveDateTime>,
    last_modified_dos: Option<DosDateTime>,
    permissions: Option<u32>,
    external_attributes: Option<u32>,
    comment: Option<String>,
    extra_fields: Vec<ExtraField>,
    large_file: bool,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last modification time (UTC). Defaults to the creation time of the entry.
    ///
    /// Must fall inside the DOS range, otherwise entry creation fails.
    #[must_use]
    pub fn last_modified(mut self, modified: PrimitiveDateTime) -> Self {
        self.last_modified = Some(modified);
        self
    }

    /// Already packed timestamp, used as is
    #[must_use]
    pub fn last_modified_dos(mut self, modified: DosDateTime) -> Self {
        self.last_modified_dos = Some(modified);
        self
    }

    /// Filesystem timestamp, clamped to the DOS range
    #[must_use]
    pub fn last_modified_system(self, modified: SystemTime) -> Self {
        self.last_modified_dos(DosDateTime::from_system_time(modified))
    }

    /// Unix permission bits; the file type bits are filled in from the entry kind
    #[must_use]
    pub fn unix_permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(mode & 0o777);
        self
    }

    /// Raw external attributes, overriding [`unix_permissions`](Self::unix_permissions)
    #[must_use]
    pub fn external_attributes(mut self, attributes: u32) -> Self {
        self.external_attributes = Some(attributes);
        self
    }

    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Extra-field block written after the ZIP64 block, dropped if the headers run out of room
    #[must_use]
    pub fn extra_field(mut self, field: ExtraField) -> Self {
        self.extra_fields.push(field);
        self
    }

    /// Reserve a ZIP64 extra field in the local header.
    ///
    /// Lets a seekable destination patch sizes of 4 GiB and more in place instead of
    /// falling back to a data descriptor. Costs 20 bytes per entry.
    #[must_use]
    pub fn large_file(mut self, large: bool) -> Self {
        self.large_file = large;
        self
    }
}

/// One entry of a [`ZipArchive`](crate::ZipArchive)
#[derive(Debug, Clone)]
pub struct Entry {
    name: String,
    raw_name: Vec<u8>,
    version_made_by: u16,
    version_needed: u16,
    flags: u16,
    compression: u16,
    modified: DosDateTime,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
    internal_attributes: u16,
    external_attributes: u32,
    comment: Vec<u8>,
    extra_fields: Vec<ExtraField>,
    large_file: bool,
    opened: bool,
    header_written: bool,
    state: EntryState,
}

impl Entry {
    pub(crate) fn new(name: &str, options: EntryOptions) -> Result<Self> {
        if name.len() > u16::MAX as usize {
            return Err(ZipError::NameTooLong(name.len()));
        }
        let comment = options.comment.unwrap_or_default();
        if comment.len() > u16::MAX as usize {
            return Err(ZipError::CommentTooLong(comment.len()));
        }
        let modified = match (options.last_modified_dos, options.last_modified) {
            (Some(dos), _) => dos,
            (None, Some(dt)) => DosDateTime::try_from_datetime(dt)?,
            (None, None) => DosDateTime::now(),
        };

        let is_dir = name.ends_with('/');
        let version_needed = if is_dir {
            version::DIRECTORY
        } else {
            version::DEFAULT
        };
        let kind_bits = if is_dir {
            DEFAULT_DIRECTORY_ATTRIBUTES
        } else {
            DEFAULT_FILE_ATTRIBUTES
        };
        let external_attributes = match (options.external_attributes, options.permissions) {
            (Some(attrs), _) => attrs,
            (None, Some(mode)) => (kind_bits & !(0o777 << 16)) | (mode << 16),
            (None, None) => kind_bits,
        };
        let flags = if name.is_ascii() && comment.is_ascii() {
            0
        } else {
            flags::UTF8
        };

        Ok(Self {
            name: name.to_string(),
            raw_name: name.as_bytes().to_vec(),
            version_made_by: (u16::from(MADE_BY_UNIX) << 8) | version_needed,
            version_needed,
            flags,
            compression: COMPRESSION_STORED,
            modified,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            local_header_offset: 0,
            internal_attributes: 0,
            external_attributes,
            comment: comment.into_bytes(),
            extra_fields: options.extra_fields,
            large_file: options.large_file && !is_dir,
            opened: false,
            header_written: false,
            state: EntryState::Unwritten,
        })
    }

    /// An entry already present in an archive opened for update
    pub(crate) fn from_existing(found: &ZipEntry) -> Self {
        let record = found.record();
        Self {
            name: found.name.clone(),
            raw_name: record.name.clone(),
            version_made_by: record.version_made_by,
            version_needed: record.version_needed,
            flags: record.flags,
            compression: record.compression,
            modified: record.modified,
            crc32: record.crc32,
            compressed_size: found.compressed_size,
            uncompressed_size: found.uncompressed_size,
            local_header_offset: found.offset,
            internal_attributes: record.internal_attributes,
            external_attributes: record.external_attributes,
            comment: record.comment.clone(),
            extra_fields: found.extra_fields(),
            large_file: false,
            opened: true,
            header_written: true,
            state: EntryState::Finalized,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn last_modified(&self) -> DosDateTime {
        self.modified
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn compression_method(&self) -> u16 {
        self.compression
    }

    /// Offset of the local header; meaningful once the entry is finalized
    pub fn local_header_offset(&self) -> u64 {
        self.local_header_offset
    }

    pub fn external_attributes(&self) -> u32 {
        self.external_attributes
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    pub fn extra_fields(&self) -> &[ExtraField] {
        &self.extra_fields
    }

    pub fn uses_data_descriptor(&self) -> bool {
        self.flags & flags::DATA_DESCRIPTOR != 0
    }

    pub(crate) fn was_opened(&self) -> bool {
        self.opened
    }

    pub(crate) fn header_written(&self) -> bool {
        self.header_written
    }

    pub(crate) fn mark_open(&mut self) {
        self.opened = true;
        self.state = EntryState::OpenForWrite;
    }

    /// Caller-supplied blocks; a ZIP64 block is always negotiated, never carried over
    fn preserved_extra_fields(&self) -> Vec<ExtraField> {
        self.extra_fields
            .iter()
            .filter(|f| f.tag != ZIP64_EXTRA_FIELD_TAG)
            .cloned()
            .collect()
    }

    fn require_version(&mut self, needed: u16) {
        self.version_needed = self.version_needed.max(needed);
    }

    /// Emit the local header at the current position
    ///
    /// An empty entry gets a complete stored header. Otherwise CRC and sizes are
    /// placeholders, announced as trailing when the destination cannot seek back.
    pub(crate) fn write_local_header<W: Write + Tell>(
        &mut self,
        w: &mut W,
        empty: bool,
        seekable: bool,
    ) -> io::Result<()> {
        self.local_header_offset = w.tell();

        let mut zip64 = Zip64ExtraField::default();
        let mut size_slot = 0;
        if empty {
            self.compression = COMPRESSION_STORED;
            self.crc32 = 0;
            self.compressed_size = 0;
            self.uncompressed_size = 0;
        } else {
            if !seekable {
                self.flags |= flags::DATA_DESCRIPTOR;
            }
            if self.large_file {
                zip64.uncompressed_size = Some(0);
                zip64.compressed_size = Some(0);
                size_slot = MASK_32;
                self.require_version(version::ZIP64);
            }
        }

        let (extra, dropped) = assemble_extra_field(&zip64, &self.preserved_extra_fields());
        if dropped {
            warn!(entry = %self.name, "extra fields do not fit in the local header, dropped");
        }
        LocalFileHeader {
            version_needed: self.version_needed,
            flags: self.flags,
            compression: self.compression,
            modified: self.modified,
            crc32: self.crc32,
            compressed_size: size_slot,
            uncompressed_size: size_slot,
            name: &self.raw_name,
            extra: &extra,
        }
        .write(w)?;
        self.header_written = true;

        trace!(
            entry = %self.name,
            offset = self.local_header_offset,
            empty,
            "wrote local header"
        );
        Ok(())
    }

    /// Finalize an entry that never received data
    pub(crate) fn finalize_empty<W: Write + Tell>(&mut self, w: &mut W) -> io::Result<()> {
        self.state = EntryState::Finalized;
        if !self.header_written {
            self.write_local_header(w, true, false)?;
        }
        Ok(())
    }

    /// Record the tap results and complete the local header or append a descriptor
    pub(crate) fn finalize_written<S: ArchiveSink>(
        &mut self,
        w: &mut PositionWriter<S>,
        summary: TapSummary,
    ) -> io::Result<()> {
        self.state = EntryState::Finalized;
        self.crc32 = summary.crc32;
        self.uncompressed_size = summary.uncompressed_size;
        self.compressed_size = summary.compressed_size;

        if w.can_seek() && !self.uses_data_descriptor() {
            self.patch_local_header(w)
        } else {
            self.write_data_descriptor(w)
        }
    }

    fn patch_local_header<S: ArchiveSink>(&mut self, w: &mut PositionWriter<S>) -> io::Result<()> {
        let end = w.position();
        let zip64_needed = sizes_need_zip64(self.compressed_size, self.uncompressed_size);
        // no room was reserved for 64-bit sizes, so they go to a trailing descriptor
        let pretend_streaming = zip64_needed && !self.large_file;

        if pretend_streaming {
            self.require_version(version::ZIP64);
            self.flags |= flags::DATA_DESCRIPTOR;
            w.seek_to(self.local_header_offset + LOCAL_HEADER_VERSION_OFFSET)?;
            w.write_all(&self.version_needed.to_le_bytes())?;
            w.write_all(&self.flags.to_le_bytes())?;
            w.seek_to(self.local_header_offset + LOCAL_HEADER_CRC_OFFSET)?;
            w.write_all(&[0; 12])?;
        } else {
            w.seek_to(self.local_header_offset + LOCAL_HEADER_CRC_OFFSET)?;
            w.write_all(&self.crc32.to_le_bytes())?;
            if self.large_file {
                w.write_all(&MASK_32.to_le_bytes())?;
                w.write_all(&MASK_32.to_le_bytes())?;
                // the ZIP64 block is always the first one after the name
                w.seek_to(
                    self.local_header_offset
                        + LOCAL_FILE_HEADER_LEN
                        + self.raw_name.len() as u64
                        + 4,
                )?;
                w.write_all(&self.uncompressed_size.to_le_bytes())?;
                w.write_all(&self.compressed_size.to_le_bytes())?;
            } else {
                w.write_all(&(self.compressed_size as u32).to_le_bytes())?;
                w.write_all(&(self.uncompressed_size as u32).to_le_bytes())?;
            }
        }
        w.seek_to(end)?;

        trace!(entry = %self.name, pretend_streaming, "patched local header");
        if pretend_streaming {
            self.write_data_descriptor(w)?;
        }
        Ok(())
    }

    fn write_data_descriptor<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let zip64 =
            self.large_file || sizes_need_zip64(self.compressed_size, self.uncompressed_size);
        DataDescriptor {
            crc32: self.crc32,
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
        }
        .write(w, true, zip64)
    }

    /// Encode the central directory record; returns whether ZIP64 was needed
    pub(crate) fn encode_central_header(&self, buf: &mut Vec<u8>) -> bool {
        let fields = CentralFields::negotiate(
            self.compressed_size,
            self.uncompressed_size,
            self.local_header_offset,
        );
        let promoted = fields.uses_zip64();
        let version_needed = if promoted {
            self.version_needed.max(version::ZIP64)
        } else {
            self.version_needed
        };
        let made_by_spec = (self.version_made_by & 0xFF).max(version_needed);

        let preserved = self.preserved_extra_fields();
        let (extra, dropped) = assemble_extra_field(&fields.zip64, &preserved);
        if dropped {
            warn!(entry = %self.name, "extra fields do not fit in the central header, dropped");
        }

        let header = CentralDirectoryHeader {
            version_made_by: (self.version_made_by & 0xFF00) | made_by_spec,
            version_needed,
            flags: self.flags,
            compression: self.compression,
            modified: self.modified,
            crc32: self.crc32,
            compressed_size: fields.compressed_size,
            uncompressed_size: fields.uncompressed_size,
            name: &self.raw_name,
            extra: &extra,
            comment: &self.comment,
            disk_start: 0,
            internal_attributes: self.internal_attributes,
            external_attributes: self.external_attributes,
            local_header_offset: fields.local_header_offset,
        };
        buf.reserve(header.encoded_len() as usize);
        header.encode(buf);
        promoted
    }
}

/// Write handle for the data of one entry
///
/// Holds the archive stream exclusively. Closing it, explicitly with
/// [`finish`](Self::finish) or by dropping it, completes the entry and hands the
/// stream back to the archive.
pub struct EntryWriter<'a, S: ArchiveSink> {
    tap: Option<CrcSizeTap<&'a mut PositionWriter<S>>>,
    entry: &'a mut Entry,
    owner: &'a mut Option<EntryId>,
}

impl<'a, S: ArchiveSink> EntryWriter<'a, S> {
    pub(crate) fn new(
        output: &'a mut PositionWriter<S>,
        entry: &'a mut Entry,
        owner: &'a mut Option<EntryId>,
    ) -> Self {
        Self {
            tap: Some(CrcSizeTap::new(output)),
            entry,
            owner,
        }
    }

    pub fn name(&self) -> &str {
        self.entry.name()
    }

    /// Bytes written through this handle so far
    pub fn bytes_written(&self) -> u64 {
        self.tap.as_ref().map_or(0, |tap| tap.uncompressed_count())
    }

    /// Complete the entry, reporting any error from the final header or descriptor write
    pub fn finish(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        let Some(tap) = self.tap.take() else {
            return Ok(());
        };
        let written = tap.has_written();
        let (output, summary) = tap.finish();
        let result = if written {
            self.entry.finalize_written(output, summary)
        } else {
            self.entry.finalize_empty(output)
        };
        *self.owner = None;
        result.map_err(ZipError::from)
    }
}

impl<S: ArchiveSink> Write for EntryWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let tap = self
            .tap
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "entry writer is closed"))?;
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.entry.header_written {
            let seekable = tap.get_ref().can_seek();
            self.entry.write_local_header(tap.get_mut(), false, seekable)?;
        }
        tap.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.tap.as_mut() {
            Some(tap) => tap.flush(),
            None => Ok(()),
        }
    }
}

impl<S: ArchiveSink> Drop for EntryWriter<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(entry = %self.entry.name(), "failed to finalize entry: {}", e);
        }
    }
}
