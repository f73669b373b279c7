//! General archive: entries, stream ownership and the central directory
//!
//! The archive owns its destination. At most one entry holds the stream at a time;
//! creating the next entry finalizes a previous owner that was never opened, and
//! refuses to proceed while a previous owner is still open for writing. Closing the
//! archive finalizes every entry and then writes the central directory and the end
//! records, exactly once.

use crate::entry::{Entry, EntryId, EntryOptions, EntryState, EntryWriter};
use crate::error::{Result, ZipError};
use crate::header::{
    EndOfCentralDirectory, Zip64EndOfCentralDirectory, Zip64EndOfCentralDirectoryLocator,
};
use crate::reader::ZipReader;
use crate::sink::{ArchiveSink, PositionWriter, Truncate};
use crate::zip64::{end_record_needs_zip64, slot16, slot32};
use std::io::{self, Read, Seek, Write};
use tracing::{debug, error};

type TruncateFn<S> = fn(&mut S, u64) -> io::Result<()>;

/// A ZIP archive being written to `S`
///
/// ```no_run
/// use std::io::Write;
/// use zipcast::ZipArchive;
///
/// let file = std::fs::File::create("out.zip")?;
/// let mut archive = ZipArchive::new(file)?;
///
/// let id = archive.create_entry("hello.txt")?;
/// let mut writer = archive.open_for_write(id)?;
/// writer.write_all(b"Hello, World!")?;
/// writer.finish()?;
///
/// archive.finish()?;
/// # Ok::<(), zipcast::ZipError>(())
/// ```
pub struct ZipArchive<S: ArchiveSink> {
    output: Option<PositionWriter<S>>,
    entries: Vec<Entry>,
    owner: Option<EntryId>,
    comment: Vec<u8>,
    closed: bool,
    truncate: Option<TruncateFn<S>>,
}

impl<S: ArchiveSink> ZipArchive<S> {
    /// Start a new archive at the current position of `sink`
    pub fn new(mut sink: S) -> Result<Self> {
        let start = sink.start_position()?;
        debug!(start, seekable = sink.can_seek(), "created archive");
        Ok(Self {
            output: Some(PositionWriter::new(sink, start)),
            entries: Vec::new(),
            owner: None,
            comment: Vec::new(),
            closed: false,
            truncate: None,
        })
    }

    pub fn create_entry(&mut self, name: &str) -> Result<EntryId> {
        self.create_entry_with_options(name, EntryOptions::default())
    }

    /// Append a new entry and give it ownership of the archive stream
    pub fn create_entry_with_options(
        &mut self,
        name: &str,
        options: EntryOptions,
    ) -> Result<EntryId> {
        self.ensure_open()?;
        let entry = Entry::new(name, options)?;
        self.release_owner()?;

        let id = EntryId(self.entries.len());
        self.entries.push(entry);
        self.owner = Some(id);
        Ok(id)
    }

    /// Add a directory entry; a trailing `/` is appended when missing
    pub fn add_directory(&mut self, name: &str, options: EntryOptions) -> Result<EntryId> {
        if name.ends_with('/') {
            self.create_entry_with_options(name, options)
        } else {
            self.create_entry_with_options(&format!("{}/", name), options)
        }
    }

    /// Create an entry and copy everything `data` yields into it
    pub fn add_entry<R: Read>(
        &mut self,
        name: &str,
        options: EntryOptions,
        mut data: R,
    ) -> Result<EntryId> {
        let id = self.create_entry_with_options(name, options)?;
        let mut writer = self.open_for_write(id)?;
        io::copy(&mut data, &mut writer)?;
        writer.finish()?;
        Ok(id)
    }

    /// Open an entry's data stream. Each entry can be opened once.
    pub fn open_for_write(&mut self, id: EntryId) -> Result<EntryWriter<'_, S>> {
        self.ensure_open()?;
        let entry = self.entries.get(id.0).ok_or(ZipError::UnknownEntry(id.0))?;
        match entry.state() {
            EntryState::OpenForWrite => {
                return Err(ZipError::EntryAlreadyOpened(entry.name().to_string()))
            }
            EntryState::Finalized if entry.was_opened() => {
                return Err(ZipError::EntryAlreadyOpened(entry.name().to_string()))
            }
            EntryState::Finalized => {
                return Err(ZipError::EntryFinalized(entry.name().to_string()))
            }
            EntryState::Unwritten => {}
        }
        if entry.is_dir() {
            return Err(ZipError::IsDirectory(entry.name().to_string()));
        }

        if self.owner != Some(id) {
            self.release_owner()?;
            self.owner = Some(id);
        }

        let output = self.output.as_mut().ok_or(ZipError::ArchiveClosed)?;
        let entry = &mut self.entries[id.0];
        entry.mark_open();
        Ok(EntryWriter::new(output, entry, &mut self.owner))
    }

    /// Set the archive comment written into the end of central directory record
    pub fn set_comment(&mut self, comment: &str) -> Result<()> {
        if comment.len() > u16::MAX as usize {
            return Err(ZipError::CommentTooLong(comment.len()));
        }
        self.comment = comment.as_bytes().to_vec();
        Ok(())
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Entries in central directory order
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Finalize all entries and write the central directory and end records
    ///
    /// Runs once; later calls are no-ops. A failure is reported but the archive
    /// still counts as closed and its output may be partial.
    pub fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.write_central_directory()
    }

    /// Close the archive and return the destination
    pub fn into_inner(mut self) -> Result<S> {
        self.finish()?;
        self.output
            .take()
            .map(PositionWriter::into_inner)
            .ok_or(ZipError::ArchiveClosed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ZipError::ArchiveClosed);
        }
        Ok(())
    }

    /// Take the stream away from its current owner
    fn release_owner(&mut self) -> Result<()> {
        let Some(previous) = self.owner else {
            return Ok(());
        };
        let output = self.output.as_mut().ok_or(ZipError::ArchiveClosed)?;
        let entry = &mut self.entries[previous.0];
        match entry.state() {
            EntryState::Unwritten => entry.finalize_empty(output)?,
            EntryState::OpenForWrite => {
                return Err(ZipError::ConcurrentOpen(entry.name().to_string()))
            }
            EntryState::Finalized => {}
        }
        self.owner = None;
        Ok(())
    }

    fn write_central_directory(&mut self) -> Result<()> {
        let output = self.output.as_mut().ok_or(ZipError::ArchiveClosed)?;

        for entry in &mut self.entries {
            match entry.state() {
                EntryState::Finalized => {}
                EntryState::Unwritten => entry.finalize_empty(output)?,
                // a writer that was leaked before it wrote anything
                EntryState::OpenForWrite if !entry.header_written() => {
                    entry.finalize_empty(output)?
                }
                EntryState::OpenForWrite => {
                    return Err(ZipError::ConcurrentOpen(entry.name().to_string()))
                }
            }
        }
        self.owner = None;

        let central_directory_offset = output.position();
        let mut any_promoted = false;
        let mut buf = Vec::new();
        for entry in &self.entries {
            buf.clear();
            any_promoted |= entry.encode_central_header(&mut buf);
            output.write_all(&buf)?;
        }
        let central_directory_size = output.position() - central_directory_offset;
        let entry_count = self.entries.len() as u64;

        let zip64 = end_record_needs_zip64(
            entry_count,
            central_directory_offset,
            central_directory_size,
            any_promoted,
        );
        if zip64 {
            let record_offset = output.position();
            Zip64EndOfCentralDirectory {
                entry_count,
                central_directory_size,
                central_directory_offset,
            }
            .write(output)?;
            Zip64EndOfCentralDirectoryLocator { record_offset }.write(output)?;
        }
        EndOfCentralDirectory {
            entry_count: slot16(entry_count),
            central_directory_size: slot32(central_directory_size),
            central_directory_offset: slot32(central_directory_offset),
            comment: self.comment.clone(),
        }
        .write(output)?;
        output.flush()?;

        if let Some(truncate) = self.truncate {
            let end = output.position();
            truncate(output.get_mut(), end)?;
        }

        debug!(
            entries = entry_count,
            central_directory_offset,
            central_directory_size,
            zip64,
            "finalized archive"
        );
        Ok(())
    }
}

impl<S: ArchiveSink + Read + Seek + Truncate> ZipArchive<S> {
    /// Open an existing archive to append entries to it
    ///
    /// Existing entries are kept as they are. New entries are written where the old
    /// central directory started; on close the central directory is rewritten for all
    /// entries and the destination is cut at the new end.
    pub fn open_for_update(mut sink: S) -> Result<Self> {
        if !sink.can_seek() {
            return Err(ZipError::NotSeekable);
        }

        let (entries, comment, central_directory_offset) = {
            let mut reader = ZipReader::new(&mut sink)?;
            let found = reader.entries().to_vec();
            for entry in &found {
                reader.data_offset(entry)?;
            }
            let entries: Vec<Entry> = found.iter().map(Entry::from_existing).collect();
            (
                entries,
                reader.comment().to_vec(),
                reader.central_directory_offset(),
            )
        };

        sink.seek_to(central_directory_offset)?;
        debug!(
            entries = entries.len(),
            central_directory_offset, "opened archive for update"
        );

        let truncate: TruncateFn<S> = |sink: &mut S, len: u64| sink.truncate_at(len);
        Ok(Self {
            output: Some(PositionWriter::new(sink, central_directory_offset)),
            entries,
            owner: None,
            comment,
            closed: false,
            truncate: Some(truncate),
        })
    }
}

impl<S: ArchiveSink> Drop for ZipArchive<S> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!("failed to finalize archive: {}", e);
        }
    }
}
