//! # zipcast: ZIP archive construction
//!
//! `zipcast` builds stored (uncompressed) ZIP archives two ways:
//!
//! - **General archives**: entries are created, opened and written one at a time
//!   through [`ZipArchive`]. Sizes and CRC are only known when an entry closes, so
//!   the local header is patched in place when the destination can seek, and a data
//!   descriptor follows the data when it cannot. ZIP64 fields are used exactly when
//!   a size, an offset or the entry count needs them.
//! - **Streaming archives**: [`stream_archive`] writes a fixed-format archive that
//!   never seeks, and [`calculate_total_size`] tells its exact length from names and
//!   sizes alone, before a single payload byte is read. Handy for a
//!   `Content-Length` header.
//!
//! ## Quick Start
//!
//! ### Writing a general archive
//!
//! ```no_run
//! use std::io::Write;
//! use zipcast::{EntryOptions, ZipArchive};
//!
//! let file = std::fs::File::create("output.zip")?;
//! let mut archive = ZipArchive::new(file)?;
//!
//! let id = archive.create_entry("file1.txt")?;
//! let mut writer = archive.open_for_write(id)?;
//! writer.write_all(b"Hello, World!")?;
//! writer.finish()?;
//!
//! archive.add_directory("empty", EntryOptions::new())?;
//! archive.add_entry("file2.txt", EntryOptions::new(), &b"Another file"[..])?;
//!
//! archive.finish()?;
//! # Ok::<(), zipcast::ZipError>(())
//! ```
//!
//! ### Streaming with a known length
//!
//! ```no_run
//! use zipcast::{calculate_sources_size, stream_sources, Source};
//!
//! let sources = [Source::new("reports"), Source::new("summary.csv").to("extra")];
//! let length = calculate_sources_size(&sources)?;
//!
//! let written = stream_sources(&sources, std::io::stdout().lock())?;
//! assert_eq!(written, length);
//! # Ok::<(), zipcast::ZipError>(())
//! ```
//!
//! ### Reading an archive back
//!
//! ```no_run
//! use zipcast::ZipReader;
//!
//! let mut reader = ZipReader::open("archive.zip")?;
//! for entry in reader.entries() {
//!     println!("{}: {} bytes", entry.name, entry.uncompressed_size);
//! }
//! let data = reader.read_entry_by_name("file1.txt")?;
//! # Ok::<(), zipcast::ZipError>(())
//! ```

pub mod archive;
pub mod dos_time;
pub mod entry;
pub mod error;
mod header;
pub mod reader;
pub mod sink;
pub mod source;
pub mod stream;
mod tap;
mod zip64;

#[cfg(feature = "async")]
pub mod async_stream;

pub use archive::ZipArchive;
pub use dos_time::DosDateTime;
pub use entry::{Entry, EntryId, EntryOptions, EntryState, EntryWriter};
pub use error::{Result, ZipError};
pub use header::ExtraField;
pub use reader::{ZipEntry, ZipReader};
pub use sink::{ArchiveSink, ByteCounter, ForwardOnly, Seekable, Truncate};
pub use source::{
    calculate_sources_size, create_from_directory, resolve_sources, stream_sources, FileRecord,
    Source,
};
pub use stream::{
    calculate_total_size, stream_archive, ByteSource, Layout, SizedEntry, StreamEntry,
};

#[cfg(feature = "async")]
pub use async_stream::{stream_records_async, stream_sources_async};
