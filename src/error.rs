//! Error types for zipcast

use std::io;
use thiserror::Error;

/// Result type for zipcast operations
pub type Result<T> = std::result::Result<T, ZipError>;

/// Error types that can occur while building or reading back ZIP archives
#[derive(Debug, Error)]
pub enum ZipError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Invalid ZIP format or structure
    #[error("Invalid ZIP format: {0}")]
    InvalidFormat(String),
    /// Entry not found in ZIP archive
    #[error("Entry not found: {0}")]
    EntryNotFound(String),
    /// Unsupported compression method
    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(u16),
    /// The archive spans several disks
    #[error("Split or spanned archives are not supported")]
    SplitArchive,

    /// The entry was already opened for writing once
    #[error("Entry `{0}` was already opened for writing")]
    EntryAlreadyOpened(String),
    /// The entry has been finalized and can no longer be written
    #[error("Entry `{0}` is already finalized")]
    EntryFinalized(String),
    /// Another entry still holds the archive stream
    #[error("Entry `{0}` is still open for writing")]
    ConcurrentOpen(String),
    /// The archive has been closed
    #[error("Archive is already closed")]
    ArchiveClosed,
    /// Directory entries never carry data
    #[error("Entry `{0}` is a directory and cannot be written to")]
    IsDirectory(String),
    /// Unknown entry id for this archive
    #[error("No entry with id {0} in this archive")]
    UnknownEntry(usize),

    /// Encoded entry name does not fit in 16 bits
    #[error("Entry name is {0} bytes long, the limit is 65535")]
    NameTooLong(usize),
    /// Encoded comment does not fit in 16 bits
    #[error("Comment is {0} bytes long, the limit is 65535")]
    CommentTooLong(usize),
    /// Extra field data does not fit in 16 bits
    #[error("Extra field block is {0} bytes long, the limit is 65535")]
    ExtraFieldTooLong(usize),
    /// Timestamp outside of the DOS date range
    #[error("Timestamp {0} is outside 1980-01-01 00:00:00 ..= 2107-12-31 23:59:58")]
    InvalidTimestamp(String),
    /// A byte source delivered a length different from the declared one
    #[error("Entry `{name}` declared {declared} bytes but its source delivered {actual}")]
    SizeMismatch {
        name: String,
        declared: u64,
        actual: u64,
    },

    /// The destination cannot seek but the operation requires it
    #[error("Destination stream is not seekable")]
    NotSeekable,
    /// Entry too large to be held in memory
    #[error("Entry `{0}` is too large to be read into memory")]
    EntryTooLarge(String),
}
